//! Cross-cycle per-application state
//!
//! The store is owned by the poller and only mutated from its
//! correlate/decide phase. `upsert` and `prune` are the only mutators.

use crate::models::UsageAggregate;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Last known aggregate for each application seen in the latest cycle
#[derive(Debug, Default)]
pub struct StateStore {
    entries: HashMap<String, UsageAggregate>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `aggregate` as current and return the one it replaced
    pub fn upsert(&mut self, app_id: &str, aggregate: UsageAggregate) -> Option<UsageAggregate> {
        self.entries.insert(app_id.to_string(), aggregate)
    }

    /// Drop every entry whose application is not in `current`
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self, current: &HashSet<&str>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|app_id, _| {
            let keep = current.contains(app_id.as_str());
            if !keep {
                debug!(app_id = %app_id, "Pruning state of departed application");
            }
            keep
        });
        before - self.entries.len()
    }

    pub fn get(&self, app_id: &str) -> Option<&UsageAggregate> {
        self.entries.get(app_id)
    }

    /// Application ids currently tracked
    pub fn keys(&self) -> HashSet<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
