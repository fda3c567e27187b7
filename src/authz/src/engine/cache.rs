//! Request-scoped membership cache
//!
//! Owned by a single [`ResolutionSession`](super::ResolutionSession), so it
//! never outlives the request nor crosses users. Group membership changes made
//! during the request are not observed until [`RequestCache::clear`].

use serde::Serialize;
use std::collections::BTreeSet;

use crate::types::GroupId;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Memoized group and dynamic group memberships of the session user
#[derive(Debug, Default)]
pub struct RequestCache {
    groups: Option<BTreeSet<GroupId>>,
    dynamic_groups: Option<Vec<String>>,
    stats: CacheStats,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&mut self) -> Option<&BTreeSet<GroupId>> {
        self.record(self.groups.is_some());
        self.groups.as_ref()
    }

    pub fn store_groups(&mut self, groups: BTreeSet<GroupId>) {
        self.groups = Some(groups);
    }

    pub fn dynamic_groups(&mut self) -> Option<&[String]> {
        self.record(self.dynamic_groups.is_some());
        self.dynamic_groups.as_deref()
    }

    pub fn store_dynamic_groups(&mut self, groups: Vec<String>) {
        self.dynamic_groups = Some(groups);
    }

    /// Drop every memoized value; statistics are kept
    pub fn clear(&mut self) {
        self.groups = None;
        self.dynamic_groups = None;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn record(&mut self, hit: bool) {
        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
    }
}
