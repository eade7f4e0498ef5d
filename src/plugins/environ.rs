//! Environment overlay utility.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::core::{ExecutionContext, Plugin, ResolvedOptions, Utility};
use crate::domain::ExecutionLog;

/// Utility copying every key it is given into the environment overlay
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironUtility;

#[async_trait]
impl Plugin for EnvironUtility {
    fn display_name(&self) -> String {
        "Environ".to_string()
    }

    async fn execute(
        &self,
        log: &mut ExecutionLog,
        options: &ResolvedOptions,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        for (key, value) in options.values().iter().chain(options.passthrough()) {
            debug!(%key, %value, "Setting environment variable");
            ctx.set_env(key.clone(), value.clone());
        }
        log.status = 0;
        Ok(())
    }
}

impl Utility for EnvironUtility {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConfigStore, PluginRegistry, Role};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sets_overlay() {
        let mut registry = PluginRegistry::new();
        registry.register_utility("Environ", Arc::new(EnvironUtility)).unwrap();
        let ctx = ExecutionContext::new(
            Uuid::new_v4(),
            ConfigStore::new().with_value("Environ", "CC", "gcc"),
        )
        .with_plugins(&registry);

        let overrides: BTreeMap<String, String> =
            [("OMP_NUM_THREADS".to_string(), "4".to_string())].into_iter().collect();
        let log = ctx.invoke(Role::Utility, "Environ", &overrides).await;

        assert!(log.is_success());
        let env = ctx.environment();
        assert_eq!(env.get("CC").map(String::as_str), Some("gcc"));
        assert_eq!(env.get("OMP_NUM_THREADS").map(String::as_str), Some("4"));
    }
}
