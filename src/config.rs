//! Configuration for qualrun paths and defaults.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (QUALRUN_HOME, QUALRUN_PLUGIN_PATH)
//! 2. Config file (.qualrun/config.yaml)
//! 3. Defaults (~/.qualrun)
//!
//! Config file discovery:
//! - Searches current directory and parents for .qualrun/config.yaml
//! - `paths.home` is relative to the .qualrun/ directory
//! - `paths.plugin_dirs` are relative to the project root (parent of .qualrun/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::RunLimits;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "QUALRUN_HOME";

/// Environment variable listing extra plugin directories (colon-separated)
pub const PLUGIN_PATH_ENV: &str = "QUALRUN_PLUGIN_PATH";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub limits: RunLimits,
    #[serde(default)]
    pub modules: ModulesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Run state directory (relative to .qualrun/)
    pub home: Option<String>,
    /// Plugin manifest directories (relative to the project root)
    #[serde(default)]
    pub plugin_dirs: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModulesConfig {
    /// Environment module command, e.g. "modulecmd bash"
    pub wrapper: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to qualrun home (run journals)
    pub home: PathBuf,
    /// Plugin directories to discover, in order
    pub plugin_dirs: Vec<PathBuf>,
    /// Limits applied when a run definition sets none
    pub limits: RunLimits,
    /// Environment module command, if modules are available
    pub module_wrapper: Option<String>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".qualrun").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Combine the config file (if any) with environment overrides
fn resolve_config(
    config: Option<(&Path, ConfigFile)>,
    env_home: Option<String>,
    env_plugin_path: Option<String>,
    default_home: PathBuf,
) -> ResolvedConfig {
    let env_plugin_dirs: Vec<PathBuf> = env_plugin_path
        .iter()
        .flat_map(|p| p.split(':'))
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .collect();

    let Some((config_path, config)) = config else {
        return ResolvedConfig {
            home: env_home.map(PathBuf::from).unwrap_or(default_home),
            plugin_dirs: env_plugin_dirs,
            limits: RunLimits::default(),
            module_wrapper: None,
            config_file: None,
        };
    };

    let qualrun_dir = config_path.parent().unwrap_or(Path::new("."));
    // Base directory is the parent of .qualrun/ (i.e., grandparent of config.yaml)
    let base_dir = qualrun_dir.parent().unwrap_or(Path::new("."));

    let home = if let Some(env_home) = env_home {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = config.paths.home {
        resolve_path(qualrun_dir, home_path)
    } else {
        default_home
    };

    let mut plugin_dirs: Vec<PathBuf> = config
        .paths
        .plugin_dirs
        .iter()
        .map(|dir| resolve_path(base_dir, dir))
        .collect();
    plugin_dirs.extend(env_plugin_dirs);

    ResolvedConfig {
        home,
        plugin_dirs,
        limits: config.limits,
        module_wrapper: config.modules.wrapper.filter(|w| !w.trim().is_empty()),
        config_file: Some(config_path.to_path_buf()),
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".qualrun");

    let config_file = find_config_file();
    let loaded = match config_file {
        Some(ref path) => Some((path.as_path(), load_config_file(path)?)),
        None => None,
    };

    Ok(resolve_config(
        loaded,
        std::env::var(HOME_ENV).ok(),
        std::env::var(PLUGIN_PATH_ENV).ok(),
        default_home,
    ))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the qualrun home directory
pub fn qualrun_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($QUALRUN_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("runs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, content: &str) -> PathBuf {
        let qualrun_dir = temp.path().join(".qualrun");
        std::fs::create_dir_all(&qualrun_dir).unwrap();

        let config_path = qualrun_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", content).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve_config(None, None, None, PathBuf::from("/home/u/.qualrun"));

        assert_eq!(config.home, PathBuf::from("/home/u/.qualrun"));
        assert!(config.plugin_dirs.is_empty());
        assert!(config.module_wrapper.is_none());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: ./state
  plugin_dirs:
    - plugins
limits:
  stage_timeout_seconds: 900
modules:
  wrapper: modulecmd bash
"#,
        );

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./state".to_string()));
        assert_eq!(config.paths.plugin_dirs, vec!["plugins".to_string()]);
        assert_eq!(config.limits.stage_timeout_seconds, Some(900));
        assert_eq!(config.modules.wrapper.as_deref(), Some("modulecmd bash"));
    }

    #[test]
    fn test_resolve_relative_to_project() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  plugin_dirs: [plugins]
"#,
        );
        let file = load_config_file(&config_path).unwrap();

        let config = resolve_config(
            Some((config_path.as_path(), file)),
            None,
            Some("/opt/a:/opt/b".to_string()),
            PathBuf::from("/default"),
        );

        assert_eq!(config.home, PathBuf::from("/default"));
        assert_eq!(
            config.plugin_dirs,
            vec![
                temp.path().join("plugins"),
                PathBuf::from("/opt/a"),
                PathBuf::from("/opt/b")
            ]
        );
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_env_home_wins() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(&temp, "version: \"1.0\"\npaths:\n  home: ./state\n");
        let file = load_config_file(&config_path).unwrap();

        let config = resolve_config(
            Some((config_path.as_path(), file)),
            Some("/env/home".to_string()),
            None,
            PathBuf::from("/default"),
        );
        assert_eq!(config.home, PathBuf::from("/env/home"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
