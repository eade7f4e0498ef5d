//! Run definitions and the configuration store.
//!
//! A run definition is a YAML file naming the run, its failure policy and
//! limits, and its configuration sections. Each section holds flat string
//! key/value pairs and is titled `[SKIP|STOP] <key>[:<name>]`: a stage runs
//! once per section addressed to its key, `SKIP` leaves a section out and
//! `STOP` ends the run when it is reached. Sections keep definition order.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use super::limits::RunLimits;

/// Key the runner fills in itself; sections may not set it
pub const SECTION_KEY: &str = "section";

/// Errors in a run definition
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Run definition name cannot be empty")]
    EmptyName,

    #[error("Section name cannot be empty")]
    EmptySection,

    #[error("Section title {0} must be a string")]
    NonStringTitle(String),

    #[error("Section '{0}' must be a mapping of options")]
    NonMappingSection(String),

    #[error("Section '{section}' key '{key}' must be a string, number or boolean")]
    NonScalar { section: String, key: String },

    #[error("Section '{section}' cannot declare itself as its parent")]
    SelfParent { section: String },

    #[error("Section '{section}' cannot set reserved key '{key}'")]
    ReservedKey { section: String, key: String },
}

/// A complete run definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDefinition {
    /// Run name (shown in reports and the journal)
    #[serde(default = "default_name")]
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Keep running stages after one fails
    #[serde(default)]
    pub continue_on_failure: bool,

    /// Time limits for this run
    #[serde(default)]
    pub limits: RunLimits,

    /// Option overrides by section title, in definition order
    #[serde(default)]
    pub sections: Mapping,
}

fn default_name() -> String {
    "default".to_string()
}

impl RunDefinition {
    /// Load a run definition from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run definition: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a run definition from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse run definition YAML")
    }

    /// Validate the definition
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }

        let store = self.config_store()?;
        for (title, values) in store.iter() {
            let parsed = SectionTitle::parse(title);
            if parsed.stage.is_empty() || parsed.name.as_deref() == Some("") {
                return Err(ConfigError::EmptySection);
            }
            if values.contains_key(SECTION_KEY) {
                return Err(ConfigError::ReservedKey {
                    section: title.to_string(),
                    key: SECTION_KEY.to_string(),
                });
            }
            if values.get("parent").map(|p| p.trim()) == Some(title.trim()) {
                return Err(ConfigError::SelfParent {
                    section: title.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Flatten the sections into string values
    pub fn config_store(&self) -> Result<ConfigStore, ConfigError> {
        let mut store = ConfigStore::new();
        for (title, values) in &self.sections {
            let title = match title {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => return Err(ConfigError::NonStringTitle(format!("{:?}", other))),
            };

            let mut flat = BTreeMap::new();
            match values {
                Value::Null => {}
                Value::Mapping(mapping) => {
                    for (key, value) in mapping {
                        let non_scalar = || ConfigError::NonScalar {
                            section: title.clone(),
                            key: format!("{:?}", key),
                        };
                        let key = scalar_to_string(key).ok_or_else(non_scalar)?;
                        let text = scalar_to_string(value).ok_or_else(|| ConfigError::NonScalar {
                            section: title.clone(),
                            key: key.clone(),
                        })?;
                        flat.insert(key, text);
                    }
                }
                _ => return Err(ConfigError::NonMappingSection(title)),
            }
            store.insert_section(title, flat);
        }
        Ok(store)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Qualifier word in front of a section title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionQualifier {
    /// Leave the section out of the run
    Skip,
    /// End the run when the section is reached
    Stop,
}

/// A parsed section title: `[SKIP|STOP] <key>[:<name>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTitle {
    pub qualifier: Option<SectionQualifier>,

    /// Key of the plugin the section is addressed to
    pub stage: String,

    /// Instance name after the colon
    pub name: Option<String>,
}

impl SectionTitle {
    pub fn parse(title: &str) -> Self {
        let title = title.trim();
        let (qualifier, rest) = match title.split_once(char::is_whitespace) {
            Some(("SKIP", rest)) => (Some(SectionQualifier::Skip), rest),
            Some(("STOP", rest)) => (Some(SectionQualifier::Stop), rest),
            _ => (None, title),
        };

        match rest.split_once(':') {
            Some((stage, name)) => Self {
                qualifier,
                stage: stage.trim().to_string(),
                name: Some(name.trim().to_string()),
            },
            None => Self {
                qualifier,
                stage: rest.trim().to_string(),
                name: None,
            },
        }
    }
}

/// Configuration sections by title
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigStore {
    sections: BTreeMap<String, BTreeMap<String, String>>,
    order: Vec<String>,
}

impl ConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a section. A replaced section keeps its position.
    pub fn insert_section(&mut self, name: impl Into<String>, values: BTreeMap<String, String>) {
        let name = name.into();
        if !self.sections.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.sections.insert(name, values);
    }

    /// Builder-style single value insert
    pub fn with_value(
        mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let section = section.into();
        if !self.sections.contains_key(&section) {
            self.order.push(section.clone());
        }
        self.sections
            .entry(section)
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Values of a section
    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    /// Sections in definition order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, String>)> {
        self.order
            .iter()
            .filter_map(|title| Some((title.as_str(), self.sections.get(title)?)))
    }

    /// Sections addressed to `key`, in definition order
    pub fn sections_for(&self, key: &str) -> Vec<(&str, SectionTitle, &BTreeMap<String, String>)> {
        self.iter()
            .map(|(title, values)| (title, SectionTitle::parse(title), values))
            .filter(|(_, parsed, _)| parsed.stage == key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
