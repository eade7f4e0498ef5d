//! Execution order of registered stages.
//!
//! Stages are kept sorted ascending by their ordering key. Two parallel
//! vectors hold the keys and the names; position `i` in both always refers
//! to the same stage. The order among stages that share a key is
//! unspecified and must not be relied on.

/// Sorted index of stage names by ordering key
#[derive(Debug, Clone, Default)]
pub struct OrderIndex {
    keys: Vec<i64>,
    names: Vec<String>,
}

impl OrderIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stage, replacing any entry already held under the same name
    pub fn insert(&mut self, name: &str, ordering_key: i64) {
        self.remove(name);

        // leftmost position whose key is >= ordering_key
        let pos = self.keys.partition_point(|k| *k < ordering_key);
        self.keys.insert(pos, ordering_key);
        self.names.insert(pos, name.to_string());
    }

    /// Remove a stage. Returns its ordering key if it was present.
    pub fn remove(&mut self, name: &str) -> Option<i64> {
        let pos = self.names.iter().position(|n| n == name)?;
        self.names.remove(pos);
        Some(self.keys.remove(pos))
    }

    /// Stage names in execution order
    pub fn sequence(&self) -> &[String] {
        &self.names
    }

    /// `(name, ordering key)` pairs in execution order
    pub fn entries(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.keys.iter().copied())
    }

    /// Ordering key of a stage
    pub fn key_of(&self, name: &str) -> Option<i64> {
        let pos = self.names.iter().position(|n| n == name)?;
        self.keys.get(pos).copied()
    }

    /// Check whether a stage is indexed
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Number of indexed stages
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the index holds no stages
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
