//! Run-scoped memo of fragment lookups.
//!
//! Keys are the whitespace-trimmed raw fragment. Misses are stored too, so a
//! recurring unmatched string pays for the fuzzy search once per run. The map
//! is a [`DashMap`]: rows may be resolved from several threads, and since a
//! lookup is deterministic for a fixed registry, two writers racing on the
//! same key store the same value.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::matcher::OrgMatch;

#[derive(Default)]
pub struct LookupMemo {
    entries: DashMap<String, Option<OrgMatch>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LookupMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(stored)` on hit, where `stored` may itself be a cached no-match.
    pub fn get(&self, key: &str) -> Option<Option<OrgMatch>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key, found = entry.is_some(), "memo hit");
                Some(entry.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: &str, result: Option<OrgMatch>) {
        self.entries.insert(key.to_string(), result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for LookupMemo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupMemo")
            .field("entries", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchMethod;

    fn org(id: &str) -> OrgMatch {
        OrgMatch {
            org_id: id.to_string(),
            country_code: Some("US".to_string()),
            key: "key".to_string(),
            method: MatchMethod::Exact,
        }
    }

    #[test]
    fn test_miss_then_hit() {
        let memo = LookupMemo::new();
        assert_eq!(memo.get("harvard"), None);
        memo.insert("harvard", Some(org("a")));
        assert_eq!(memo.get("harvard"), Some(Some(org("a"))));
        assert_eq!((memo.hits(), memo.misses()), (1, 1));
    }

    #[test]
    fn test_negative_results_are_stored() {
        let memo = LookupMemo::new();
        memo.insert("nowhere", None);
        assert_eq!(memo.get("nowhere"), Some(None));
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn test_clear() {
        let memo = LookupMemo::new();
        memo.insert("x", None);
        memo.get("x");
        memo.clear();
        assert!(memo.is_empty());
        assert_eq!(memo.hits(), 0);
    }
}
