//! Best-effort probe selection
//!
//! A selection is a snapshot of the attachments that were running when it was
//! built. By the time a reconciler consumes it, any member may already be gone:
//! the container-exit path tears down namespaces without going through the
//! registry lock. Consumers must therefore treat a failure on one member as
//! "skip it" and carry on with the rest.

use std::fmt;

use tracing::debug;

/// Identifies one attached program instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeSelector {
    pub uid: String,
    pub func_name: String,
}

impl fmt::Display for ProbeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.uid, self.func_name)
    }
}

/// Selection whose members may be stale by the time they are used
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BestEffortSelector {
    selectors: Vec<ProbeSelector>,
}

/// What happened when a selection was applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: usize,
    pub skipped: Vec<(ProbeSelector, String)>,
}

impl ReconcileReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

impl BestEffortSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, selector: ProbeSelector) {
        self.selectors.push(selector);
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeSelector> {
        self.selectors.iter()
    }

    pub fn contains_uid(&self, uid: &str) -> bool {
        self.selectors.iter().any(|s| s.uid == uid)
    }

    /// Run `op` on every member. Failures are recorded and never stop the batch.
    pub fn apply<F, E>(&self, mut op: F) -> ReconcileReport
    where
        F: FnMut(&ProbeSelector) -> Result<(), E>,
        E: fmt::Display,
    {
        let mut report = ReconcileReport::default();
        for selector in &self.selectors {
            match op(selector) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    debug!(probe = %selector, error = %e, "skipping stale probe selector");
                    report.skipped.push((selector.clone(), e.to_string()));
                }
            }
        }
        report
    }
}

impl FromIterator<ProbeSelector> for BestEffortSelector {
    fn from_iter<I: IntoIterator<Item = ProbeSelector>>(iter: I) -> Self {
        Self {
            selectors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for BestEffortSelector {
    type Item = ProbeSelector;
    type IntoIter = std::vec::IntoIter<ProbeSelector>;

    fn into_iter(self) -> Self::IntoIter {
        self.selectors.into_iter()
    }
}
