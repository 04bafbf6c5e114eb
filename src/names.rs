//! Program name registry for correlating attachment uids to program names
//!
//! Every attached instance gets a unique uid, which would explode metric and
//! log cardinality if used as a name. This map lets observability code turn
//! a uid back into the stable function name and owning module.

use dashmap::DashMap;
use std::sync::Arc;

/// Display name of an attached program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramName {
    pub func_name: String,
    pub module: String,
}

/// Thread-safe map from attachment uid to program name
#[derive(Clone)]
pub struct ProgramNames {
    inner: Arc<DashMap<String, ProgramName>>,
}

impl ProgramNames {
    /// Create a new empty name registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Insert or update the name of an attachment
    pub fn insert(&self, uid: &str, func_name: &str, module: &str) {
        self.inner.insert(
            uid.to_string(),
            ProgramName {
                func_name: func_name.to_string(),
                module: module.to_string(),
            },
        );
    }

    /// Look up the name of an attachment
    pub fn get(&self, uid: &str) -> Option<ProgramName> {
        self.inner.get(uid).map(|r| r.clone())
    }

    /// Remove an attachment
    pub fn remove(&self, uid: &str) -> Option<ProgramName> {
        self.inner.remove(uid).map(|(_, v)| v)
    }

    /// Get the number of registered attachments
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for ProgramNames {
    fn default() -> Self {
        Self::new()
    }
}
