//! Tiered resolution of one affiliation fragment to a registry organization.
//!
//! 1. Memo: a fragment seen before returns its stored result (including a
//!    stored miss).
//! 2. Exact: every key from [`candidate_keys`] is probed against the exact
//!    table; the first hit wins.
//! 3. Fuzzy (optional): the query-side key is scored against a search space
//!    pruned through the token index.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::cache::LookupMemo;
use crate::fuzzy::{FuzzyBackend, default_backend};
use crate::normalize::{Normalizer, tokenize};
use crate::registry::{OrgEntry, RegistryIndex};
use crate::variants::candidate_keys;

/// Default fuzzy score cutoff (inclusive).
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 92;

/// Cutoff used by the strict profile.
pub const STRICT_FUZZY_THRESHOLD: u8 = 95;

/// Query keys shorter or longer than this (in chars) skip the fuzzy phase.
pub const MIN_FUZZY_QUERY_CHARS: usize = 4;
pub const MAX_FUZZY_QUERY_CHARS: usize = 128;

/// Tokens that carry no identifying content for candidate pruning.
pub const STOP_TOKENS: [&str; 16] = [
    "the",
    "of",
    "and",
    "university",
    "college",
    "school",
    "institute",
    "center",
    "centre",
    "hospital",
    "clinic",
    "faculty",
    "lab",
    "laboratory",
    "campus",
    "graduate",
];

fn is_stop_token(tok: &str) -> bool {
    STOP_TOKENS.contains(&tok)
}

fn content_tokens(s: &str) -> BTreeSet<String> {
    tokenize(s).into_iter().filter(|t| !is_stop_token(t)).collect()
}

/// Keys with no content token at all ("university", "the college") are
/// never fuzzy candidates. Keys with exactly one ("harvard university") stay
/// reachable through the fallback tiers; dropping them too would leave every
/// "X University" registry name unmatchable by fuzzy lookup.
fn has_content(key: &str) -> bool {
    !content_tokens(key).is_empty()
}

/// How a fragment was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchMethod {
    Exact,
    Fuzzy { score: f64 },
}

/// A resolved organization.
#[derive(Debug, Clone, PartialEq)]
pub struct OrgMatch {
    pub org_id: String,
    pub country_code: Option<String>,
    /// The exact-table key that matched.
    pub key: String,
    pub method: MatchMethod,
}

impl OrgMatch {
    fn new(key: &str, entry: &OrgEntry, method: MatchMethod) -> Self {
        Self {
            org_id: entry.org_id.clone(),
            country_code: entry.country_code.clone(),
            key: key.to_string(),
            method,
        }
    }

    pub fn is_fuzzy(&self) -> bool {
        matches!(self.method, MatchMethod::Fuzzy { .. })
    }
}

/// Snapshot of the matcher's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatcherStats {
    /// Every call to [`Matcher::resolve`], including blank input.
    pub calls: u64,
    pub memo_hits: u64,
    pub exact_hits: u64,
    pub fuzzy_hits: u64,
    pub misses: u64,
}

#[derive(Default)]
struct Counters {
    calls: AtomicU64,
    memo_hits: AtomicU64,
    exact_hits: AtomicU64,
    fuzzy_hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Resolves fragments against one registry snapshot.
///
/// The registry and normalizer are shared read-only; the memo and counters
/// are the only mutable state and are safe to use from several threads.
pub struct Matcher {
    index: Arc<RegistryIndex>,
    normalizer: Arc<Normalizer>,
    fuzzy: Option<Arc<dyn FuzzyBackend>>,
    memo: LookupMemo,
    counters: Counters,
    degraded_logged: AtomicBool,
}

impl Matcher {
    /// A matcher with a fresh normalizer and the compiled-in fuzzy backend.
    pub fn new(index: Arc<RegistryIndex>) -> Self {
        Self {
            index,
            normalizer: Arc::new(Normalizer::default()),
            fuzzy: default_backend(),
            memo: LookupMemo::new(),
            counters: Counters::default(),
            degraded_logged: AtomicBool::new(false),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Replace the fuzzy backend; `None` makes the matcher exact-only.
    pub fn with_fuzzy_backend(mut self, backend: Option<Arc<dyn FuzzyBackend>>) -> Self {
        self.fuzzy = backend;
        self
    }

    pub fn has_fuzzy_backend(&self) -> bool {
        self.fuzzy.is_some()
    }

    pub fn index(&self) -> &RegistryIndex {
        &self.index
    }

    pub fn memo(&self) -> &LookupMemo {
        &self.memo
    }

    pub fn stats(&self) -> MatcherStats {
        let c = &self.counters;
        MatcherStats {
            calls: c.calls.load(Ordering::Relaxed),
            memo_hits: c.memo_hits.load(Ordering::Relaxed),
            exact_hits: c.exact_hits.load(Ordering::Relaxed),
            fuzzy_hits: c.fuzzy_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
        }
    }

    /// Resolve one raw fragment.
    ///
    /// Blank input returns `None` without touching the memo. The memo is keyed
    /// by the trimmed fragment alone, so within one run the first answer for a
    /// fragment sticks regardless of later `use_fuzzy`/threshold arguments.
    pub fn resolve(&self, raw: &str, use_fuzzy: bool, fuzzy_threshold: u8) -> Option<OrgMatch> {
        Counters::bump(&self.counters.calls);

        let memo_key = raw.trim();
        if memo_key.is_empty() {
            return None;
        }
        if let Some(stored) = self.memo.get(memo_key) {
            Counters::bump(&self.counters.memo_hits);
            return stored;
        }

        let result = self
            .resolve_exact(raw)
            .or_else(|| self.resolve_fuzzy_if_enabled(raw, use_fuzzy, fuzzy_threshold));

        match &result {
            Some(m) if m.is_fuzzy() => Counters::bump(&self.counters.fuzzy_hits),
            Some(_) => Counters::bump(&self.counters.exact_hits),
            None => Counters::bump(&self.counters.misses),
        }
        self.memo.insert(memo_key, result.clone());
        result
    }

    fn resolve_exact(&self, raw: &str) -> Option<OrgMatch> {
        candidate_keys(raw, &self.normalizer).into_iter().find_map(|key| {
            self.index.get(&key).map(|entry| {
                tracing::trace!(raw, key = %key, org = %entry.org_id, "exact hit");
                OrgMatch::new(&key, entry, MatchMethod::Exact)
            })
        })
    }

    fn resolve_fuzzy_if_enabled(
        &self,
        raw: &str,
        use_fuzzy: bool,
        fuzzy_threshold: u8,
    ) -> Option<OrgMatch> {
        if !use_fuzzy {
            return None;
        }
        let Some(backend) = &self.fuzzy else {
            if !self.degraded_logged.swap(true, Ordering::Relaxed) {
                tracing::info!("no fuzzy backend available, matching exact-only");
            }
            return None;
        };
        self.resolve_fuzzy(backend.as_ref(), raw, fuzzy_threshold)
    }

    fn resolve_fuzzy(
        &self,
        backend: &dyn FuzzyBackend,
        raw: &str,
        fuzzy_threshold: u8,
    ) -> Option<OrgMatch> {
        let q = self.normalizer.query_key(raw);
        let len = q.chars().count();
        if !(MIN_FUZZY_QUERY_CHARS..=MAX_FUZZY_QUERY_CHARS).contains(&len) {
            return None;
        }

        let space = self.fuzzy_search_space(&q);
        if space.is_empty() {
            return None;
        }

        let (key, score) = backend.best_match(&q, &space, f64::from(fuzzy_threshold))?;
        let entry = self.index.get(key)?;
        tracing::trace!(raw, query = %q, key, score, backend = backend.name(), "fuzzy hit");
        Some(OrgMatch::new(key, entry, MatchMethod::Fuzzy { score }))
    }

    /// Candidate keys for fuzzy scoring of the query-side key `q`, sorted.
    ///
    /// - Pool: every key sharing any token with `q`.
    /// - Preferred: pool keys with two or more content tokens, at least one
    ///   of them shared with `q`.
    /// - Else: pool keys with any content token.
    /// - Else, only if the pool is empty: every key with a content token.
    pub fn fuzzy_search_space(&self, q: &str) -> Vec<&str> {
        let q_tokens: BTreeSet<String> = tokenize(q).into_iter().collect();
        let q_content: BTreeSet<&str> = q_tokens
            .iter()
            .map(String::as_str)
            .filter(|t| !is_stop_token(t))
            .collect();

        let mut pool: BTreeSet<&str> = BTreeSet::new();
        for tok in &q_tokens {
            if let Some(keys) = self.index.keys_with_token(tok) {
                pool.extend(keys.iter().map(String::as_str));
            }
        }

        if pool.is_empty() {
            // One-content-token keys stay candidates here; see `has_content`.
            let mut all: Vec<&str> = self.index.keys().filter(|k| has_content(k)).collect();
            all.sort_unstable();
            return all;
        }

        let mut fallback: Vec<&str> = Vec::new();
        let mut preferred: Vec<&str> = Vec::new();
        for key in pool {
            let key_content = content_tokens(key);
            // Same rule as `has_content`: only the preferred tier requires
            // two content tokens.
            if key_content.is_empty() {
                continue;
            }
            if key_content.len() > 1 && key_content.iter().any(|t| q_content.contains(t.as_str())) {
                preferred.push(key);
            }
            fallback.push(key);
        }

        if preferred.is_empty() {
            fallback
        } else {
            preferred
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("keys", &self.index.len())
            .field("fuzzy", &self.fuzzy.as_ref().map(|b| b.name().to_string()))
            .field("memo", &self.memo)
            .field("stats", &self.stats())
            .finish()
    }
}
