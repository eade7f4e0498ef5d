//! Option declaration and resolution.
//!
//! Each plugin declares an [`OptionSpec`] of defaults. At invocation time
//! the defaults are merged with the overrides of the plugin's configuration
//! section. Values stay opaque strings at this layer; plugins coerce them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Section keys that carry framework metadata rather than plugin options
pub const RESERVED_KEYS: &[&str] = &["section", "plugin", "parent"];

/// Declared default and help text for one option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDef {
    /// Value used when the section does not override it
    #[serde(default)]
    pub default: String,

    /// One-line description
    #[serde(default)]
    pub description: String,
}

/// Options a plugin understands, by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionSpec {
    options: BTreeMap<String, OptionDef>,
}

impl OptionSpec {
    /// Create an empty spec
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style option declaration
    pub fn with(
        mut self,
        name: impl Into<String>,
        default: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.options.insert(
            name.into(),
            OptionDef {
                default: default.into(),
                description: description.into(),
            },
        );
        self
    }

    /// Look up an option definition
    pub fn get(&self, name: &str) -> Option<&OptionDef> {
        self.options.get(name)
    }

    /// Check whether the option is declared
    pub fn contains(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    /// Iterate declared options in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionDef)> + '_ {
        self.options.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of declared options
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether no options are declared
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Help lines of the form `name: default - description`
    pub fn describe(&self) -> Vec<String> {
        self.options
            .iter()
            .map(|(name, def)| {
                let default = if def.default.is_empty() {
                    "(none)"
                } else {
                    def.default.as_str()
                };
                format!("{}: {} - {}", name, default, def.description)
            })
            .collect()
    }
}

/// Effective option values for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOptions {
    values: BTreeMap<String, String>,
    passthrough: BTreeMap<String, String>,
}

impl ResolvedOptions {
    /// Effective value of a declared option
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Effective value, empty values treated as absent
    pub fn get_nonempty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.trim().is_empty())
    }

    /// Interpret an option as a boolean (`true`, `1`, `t`, `y`, `yes`)
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name)
            .map(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "true" | "1" | "t" | "y" | "yes"
                )
            })
            .unwrap_or(false)
    }

    /// Interpret an option as an integer
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    /// Interpret an option as a list: `[a, b]` or `a, b`
    pub fn get_list(&self, name: &str) -> Vec<String> {
        let Some(raw) = self.get(name) else {
            return Vec::new();
        };
        let trimmed = raw.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(trimmed);

        inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// All effective values of declared options
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Override keys the plugin does not declare
    pub fn passthrough(&self) -> &BTreeMap<String, String> {
        &self.passthrough
    }
}

/// Merge declared defaults with section overrides.
///
/// Declared keys take the override when present, else their default.
/// Undeclared keys are kept aside as pass-through metadata. Reserved keys
/// are dropped. Neither input is modified.
pub fn resolve(spec: &OptionSpec, overrides: &BTreeMap<String, String>) -> ResolvedOptions {
    let values = spec
        .iter()
        .map(|(name, def)| {
            let value = overrides
                .get(name)
                .cloned()
                .unwrap_or_else(|| def.default.clone());
            (name.to_string(), value)
        })
        .collect();

    let passthrough = overrides
        .iter()
        .filter(|(k, _)| !spec.contains(k) && !RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    ResolvedOptions {
        values,
        passthrough,
    }
}

/// [`resolve`] that also warns about each pass-through key
pub fn resolve_for(
    plugin: &str,
    spec: &OptionSpec,
    overrides: &BTreeMap<String, String>,
) -> ResolvedOptions {
    let resolved = resolve(spec, overrides);
    for key in resolved.passthrough.keys() {
        warn!(plugin, option = %key, "Option is not declared by plugin, passing through as metadata");
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> OptionSpec {
        OptionSpec::new()
            .with("image", "bios.bin", "BIOS image to flash")
            .with("verify", "yes", "Verify after flashing")
    }

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let resolved = resolve(&spec(), &BTreeMap::new());
        assert_eq!(resolved.get("image"), Some("bios.bin"));
        assert_eq!(resolved.get("verify"), Some("yes"));
        assert!(resolved.passthrough().is_empty());
    }

    #[test]
    fn test_override_and_passthrough() {
        let overrides = map(&[("image", "new.bin"), ("node", "n01"), ("parent", "Firmware")]);
        let resolved = resolve(&spec(), &overrides);

        assert_eq!(resolved.get("image"), Some("new.bin"));
        assert_eq!(resolved.get("verify"), Some("yes"));
        assert_eq!(resolved.passthrough(), &map(&[("node", "n01")]));
    }

    #[test]
    fn test_typed_accessors() {
        let spec = OptionSpec::new()
            .with("flag", "Y", "")
            .with("count", "12", "")
            .with("hosts", "[a, b ,c]", "")
            .with("plain", "x,y", "")
            .with("blank", "", "");
        let resolved = resolve(&spec, &BTreeMap::new());

        assert!(resolved.get_bool("flag"));
        assert!(!resolved.get_bool("blank"));
        assert_eq!(resolved.get_int("count"), Some(12));
        assert_eq!(resolved.get_int("hosts"), None);
        assert_eq!(resolved.get_list("hosts"), vec!["a", "b", "c"]);
        assert_eq!(resolved.get_list("plain"), vec!["x", "y"]);
        assert!(resolved.get_list("blank").is_empty());
        assert_eq!(resolved.get_nonempty("blank"), None);
    }

    #[test]
    fn test_describe() {
        let lines = OptionSpec::new().with("modules", "", "Modules to load").describe();
        assert_eq!(lines, vec!["modules: (none) - Modules to load"]);
    }
}
