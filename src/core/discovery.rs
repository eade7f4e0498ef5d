//! Plugin discovery from manifest files.
//!
//! A plugin directory holds YAML manifests. A file is a candidate when its
//! stem contains a role marker (`Stage`, `Tool`, `Utility`); the manifest
//! entry named exactly like the stem describes the plugin, and the entry's
//! `implementation` selects the [`PluginCatalog`] factory that builds it.
//!
//! ```yaml
//! BIOSStage:
//!   ordering: 50
//!   command: ["flash-bios", "--image", "{image}"]
//!   options:
//!     image:
//!       default: bios.bin
//!       description: BIOS image to flash
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::options::OptionSpec;
use super::plugin::{PluginHandle, PluginUnit, Role};

/// Catalog entry used when a manifest names no implementation
pub const DEFAULT_IMPLEMENTATION: &str = "command";

/// Fatal discovery failures
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Plugin directory not found: {0}")]
    MissingRoot(PathBuf),

    #[error("Invalid scan pattern: {0}")]
    Pattern(String),

    #[error("Failed to read plugin file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plugin file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid plugin '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("Plugin '{name}' names unknown implementation '{implementation}'")]
    UnknownImplementation { name: String, implementation: String },

    #[error("Plugin '{name}' failed to activate: {message}")]
    Activation { name: String, message: String },
}

/// Manifest entry describing one plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginDefinition {
    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Position of a stage in the pipeline (required for stages)
    #[serde(default)]
    pub ordering: Option<i64>,

    /// Catalog entry that builds the plugin
    #[serde(default)]
    pub implementation: Option<String>,

    /// Command line for command-backed plugins
    #[serde(default)]
    pub command: Vec<String>,

    /// Stage timeout overriding the run-wide limit
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Declared options with defaults
    #[serde(default)]
    pub options: OptionSpec,
}

impl PluginDefinition {
    pub fn implementation(&self) -> &str {
        self.implementation
            .as_deref()
            .unwrap_or(DEFAULT_IMPLEMENTATION)
    }
}

/// Builds a plugin instance from its role, display name and manifest entry
pub type PluginFactory =
    Box<dyn Fn(Role, &str, &PluginDefinition) -> anyhow::Result<PluginHandle> + Send + Sync>;

/// Registration table of plugin implementations available to manifests
#[derive(Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an implementation
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Role, &str, &PluginDefinition) -> anyhow::Result<PluginHandle> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<&PluginFactory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered implementation names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("implementations", &self.names())
            .finish()
    }
}

/// A file whose stem carries a role marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub stem: String,
    pub role: Role,
    pub key: String,
}

/// Collect candidate files under `root`, sorted by path
pub fn scan(root: &Path) -> Result<Vec<Candidate>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::MissingRoot(root.to_path_buf()));
    }

    // glob metacharacters in the root itself must match literally
    let base = PathBuf::from(glob::Pattern::escape(&root.to_string_lossy()));

    let mut paths = Vec::new();
    for extension in ["yaml", "yml"] {
        let pattern = base.join("**").join(format!("*.{}", extension));
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| DiscoveryError::Pattern(e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| DiscoveryError::Io {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            if path.is_file() {
                paths.push(path);
            }
        }
    }
    paths.sort();

    let candidates = paths
        .into_iter()
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?.to_string();
            let role = Role::from_name(&stem)?;
            let key = role.canonical_key(&stem);
            Some(Candidate {
                path,
                stem,
                role,
                key,
            })
        })
        .collect();

    Ok(candidates)
}

/// Build the plugin a candidate file describes.
///
/// `Ok(None)` means the file holds no entry named after its stem.
pub fn load(
    candidate: &Candidate,
    catalog: &PluginCatalog,
) -> Result<Option<PluginUnit>, DiscoveryError> {
    let content = std::fs::read_to_string(&candidate.path).map_err(|source| DiscoveryError::Io {
        path: candidate.path.clone(),
        source,
    })?;

    let document: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|source| DiscoveryError::Parse {
            path: candidate.path.clone(),
            source,
        })?;

    let Some(entry) = document
        .as_mapping()
        .and_then(|m| m.get(candidate.stem.as_str()))
    else {
        debug!(path = %candidate.path.display(), stem = %candidate.stem, "No matching plugin type, skipping");
        return Ok(None);
    };

    let definition: PluginDefinition =
        serde_yaml::from_value(entry.clone()).map_err(|source| DiscoveryError::Parse {
            path: candidate.path.clone(),
            source,
        })?;

    if candidate.key.trim().is_empty() {
        return Err(DiscoveryError::Invalid {
            name: candidate.stem.clone(),
            reason: "registry key is empty".to_string(),
        });
    }

    if candidate.role == Role::Stage && definition.ordering.is_none() {
        return Err(DiscoveryError::Invalid {
            name: candidate.stem.clone(),
            reason: "stages must declare an ordering".to_string(),
        });
    }

    let implementation = definition.implementation();
    let factory = catalog
        .get(implementation)
        .ok_or_else(|| DiscoveryError::UnknownImplementation {
            name: candidate.stem.clone(),
            implementation: implementation.to_string(),
        })?;

    let handle = factory(candidate.role, &candidate.key, &definition).map_err(|e| {
        DiscoveryError::Invalid {
            name: candidate.stem.clone(),
            reason: format!("{:#}", e),
        }
    })?;

    if handle.role() != candidate.role {
        return Err(DiscoveryError::Invalid {
            name: candidate.stem.clone(),
            reason: format!(
                "implementation '{}' built a {} instead of a {}",
                implementation,
                handle.role(),
                candidate.role
            ),
        });
    }

    Ok(Some(PluginUnit::new(candidate.key.clone(), handle)))
}
