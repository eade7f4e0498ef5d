//! Harasser Integration Tests
//!
//! Background worker lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qualrun::core::harasser;
use qualrun::domain::FAULT_STATUS;

#[tokio::test]
async fn test_alive_until_stopped() {
    let release = Arc::new(AtomicBool::new(false));
    let flag = release.clone();

    let handle = harasser::start(
        move |args| async move {
            while !flag.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            args.len() as i32 + 40
        },
        vec!["--load".to_string(), "cpu".to_string()],
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.is_alive());

    release.store(true, Ordering::SeqCst);
    assert_eq!(handle.stop().await, 42);
}

#[tokio::test]
async fn test_finished_worker_is_not_alive() {
    let handle = harasser::start(|_| async { 0 }, vec![]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!handle.is_alive());
    assert_eq!(handle.stop().await, 0);
}

#[tokio::test]
async fn test_panicking_worker_reports_fault() {
    let handle = harasser::start(
        |_| async {
            if true {
                panic!("harasser crashed");
            }
            0
        },
        vec![],
    );

    assert_eq!(handle.stop().await, FAULT_STATUS);
}

#[tokio::test]
async fn test_dropped_handle_aborts_worker() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();

    let handle = harasser::start(
        move |_| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            0
        },
        vec![],
    );
    drop(handle);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!finished.load(Ordering::SeqCst));
}
