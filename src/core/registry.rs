//! Plugin registry.
//!
//! Holds every registered plugin under `(role, key)` and keeps the stages
//! ordered through an [`OrderIndex`].
//!
//! # Lifecycle
//! ```text
//! register / discover → activate() → (pipeline runs) → shutdown() → deactivate()
//! ```
//! A unit replaced by a later registration under the same key is
//! deactivated at replacement time.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::discovery::{self, DiscoveryError, PluginCatalog};
use super::order::OrderIndex;
use super::plugin::{PluginHandle, PluginUnit, Role, Stage, Tool, Utility};

/// Registry of plugins by role and key
#[derive(Debug, Default)]
pub struct PluginRegistry {
    units: BTreeMap<(Role, String), PluginUnit>,
    order: OrderIndex,
    catalog: PluginCatalog,
}

impl PluginRegistry {
    /// Create an empty registry with an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry whose discovery uses `catalog`
    pub fn with_catalog(catalog: PluginCatalog) -> Self {
        Self {
            catalog,
            ..Default::default()
        }
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// Activate and register a plugin under `key`
    pub fn register(&mut self, key: &str, handle: PluginHandle) -> Result<(), DiscoveryError> {
        if key.trim().is_empty() {
            return Err(DiscoveryError::Invalid {
                name: handle.display_name(),
                reason: "registry key is empty".to_string(),
            });
        }

        handle.activate().map_err(|e| DiscoveryError::Activation {
            name: key.to_string(),
            message: format!("{:#}", e),
        })?;

        self.commit(PluginUnit::new(key, handle));
        Ok(())
    }

    pub fn register_stage(&mut self, key: &str, stage: Arc<dyn Stage>) -> Result<(), DiscoveryError> {
        self.register(key, PluginHandle::Stage(stage))
    }

    pub fn register_tool(&mut self, key: &str, tool: Arc<dyn Tool>) -> Result<(), DiscoveryError> {
        self.register(key, PluginHandle::Tool(tool))
    }

    pub fn register_utility(
        &mut self,
        key: &str,
        utility: Arc<dyn Utility>,
    ) -> Result<(), DiscoveryError> {
        self.register(key, PluginHandle::Utility(utility))
    }

    /// Register every plugin described by the manifests under `root`.
    ///
    /// Either every candidate is registered or none is: on error the
    /// registry is unchanged and any plugin already activated by this pass
    /// is deactivated again. Returns the number of plugins registered.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn discover(&mut self, root: &Path) -> Result<usize, DiscoveryError> {
        let candidates = discovery::scan(root)?;
        let mut staged: Vec<PluginUnit> = Vec::with_capacity(candidates.len());

        for candidate in &candidates {
            let loaded = discovery::load(candidate, &self.catalog).and_then(|unit| match unit {
                Some(unit) => unit
                    .handle
                    .activate()
                    .map(|_| Some(unit))
                    .map_err(|e| DiscoveryError::Activation {
                        name: candidate.stem.clone(),
                        message: format!("{:#}", e),
                    }),
                None => Ok(None),
            });

            match loaded {
                Ok(Some(unit)) => staged.push(unit),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %candidate.path.display(), error = %e, "Discovery failed");
                    for unit in &staged {
                        unit.handle.deactivate();
                    }
                    return Err(e);
                }
            }
        }

        let count = staged.len();
        for unit in staged {
            self.commit(unit);
        }

        info!(candidates = candidates.len(), registered = count, "Discovery complete");
        Ok(count)
    }

    /// Look up a plugin
    pub fn lookup(&self, role: Role, key: &str) -> Option<&PluginUnit> {
        self.units.get(&(role, key.to_string()))
    }

    /// Stages in execution order
    pub fn list_ordered(&self) -> Vec<&PluginUnit> {
        self.order
            .sequence()
            .iter()
            .filter_map(|name| self.units.get(&(Role::Stage, name.clone())))
            .collect()
    }

    /// Remove a plugin. The caller owns deactivating it.
    pub fn unregister(&mut self, role: Role, key: &str) -> Option<PluginUnit> {
        let unit = self.units.remove(&(role, key.to_string()))?;
        if role == Role::Stage {
            self.order.remove(key);
        }
        Some(unit)
    }

    /// Deactivate every plugin and empty the registry
    pub fn shutdown(&mut self) {
        for unit in self.units.values() {
            debug!(role = %unit.role(), plugin = %unit.name, "Deactivating plugin");
            unit.handle.deactivate();
        }
        self.units.clear();
        self.order = OrderIndex::new();
    }

    /// Units of one role, sorted by key
    pub fn by_role(&self, role: Role) -> Vec<&PluginUnit> {
        self.units
            .values()
            .filter(|u| u.role() == role)
            .collect()
    }

    pub fn stages(&self) -> Vec<&PluginUnit> {
        self.by_role(Role::Stage)
    }

    pub fn tools(&self) -> Vec<&PluginUnit> {
        self.by_role(Role::Tool)
    }

    pub fn utilities(&self) -> Vec<&PluginUnit> {
        self.by_role(Role::Utility)
    }

    /// Whether any role has a plugin registered under `key`
    pub fn contains_key(&self, key: &str) -> bool {
        Role::ALL
            .iter()
            .any(|role| self.units.contains_key(&(*role, key.to_string())))
    }

    pub fn order(&self) -> &OrderIndex {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn commit(&mut self, unit: PluginUnit) {
        let role = unit.role();
        let key = unit.name.clone();

        if let Some(ordering_key) = unit.handle.ordering_key() {
            self.order.insert(&key, ordering_key);
        }

        debug!(%role, plugin = %key, "Registered plugin");
        if let Some(previous) = self.units.insert((role, key.clone()), unit) {
            debug!(%role, plugin = %key, "Replacing previously registered plugin");
            previous.handle.deactivate();
        }
    }
}
