//! Canonical-key normalization for organization names.
//!
//! Two policies share one base step:
//!
//! - [`registry_key`] keeps institutional subunits, so that
//!   "University Hospital Bonn" and "University Hospital Essen" stay distinct.
//! - [`query_key`] additionally trims everything from the first subunit keyword
//!   ("department", "hospital", "campus", ...) to the end, which raises recall
//!   for affiliation strings like "Foo University, Department of Physics".
//!
//! Keep them separate. A single normalizer that trims registry names too would
//! collapse distinct institutions onto one key.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Default capacity for each of the memoized key caches.
pub const DEFAULT_KEY_CACHE_CAPACITY: usize = 100_000;

/// Dash, slash, pipe, colon, comma and semicolon variants collapse to a space.
static SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{2010}\u{2011}\u{2012}\u{2013}\u{2014}\u{2015}\u{2212}\-/:|,;]+").unwrap());

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Innermost parenthesized group. Applied until nothing matches so nested
/// groups are removed too.
static PARENS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^()]*\)").unwrap());

static LEADING_THE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:the\s+)+").unwrap());

/// Query-side only: first subunit keyword through end of string.
static SUBUNIT_TAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:department|graduate school|school|faculty|college|institute|center|centre|laboratory|lab|hospital|clinic|campus)\b.*$",
    )
    .unwrap()
});

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").unwrap());

/// Collapse whitespace runs to single spaces and trim.
fn squash(s: &str) -> String {
    WHITESPACE_RE.replace_all(s, " ").trim().to_string()
}

/// Base normalization shared by both key policies.
///
/// 1. NFKC (folds full-width forms and compatibility characters)
/// 2. Lowercase
/// 3. NFKD and drop combining marks (strips diacritics)
/// 4. Separator variants → space
/// 5. Collapse whitespace, trim
pub fn base_normalize(s: &str) -> String {
    let composed: String = s.nfkc().collect::<String>().to_lowercase();
    let stripped: String = composed.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let separated = SEPARATOR_RE.replace_all(&stripped, " ");
    squash(&separated)
}

fn strip_parens(s: &str) -> String {
    let mut out = s.to_string();
    while PARENS_RE.is_match(&out) {
        out = PARENS_RE.replace_all(&out, " ").into_owned();
    }
    squash(&out)
}

fn strip_leading_the(s: &str) -> String {
    LEADING_THE_RE.replace(s, "").trim().to_string()
}

/// Registry-side canonical key. Preserves subunit clauses.
///
/// Idempotent: `registry_key(&registry_key(s)) == registry_key(s)`.
pub fn registry_key(s: &str) -> String {
    let base = base_normalize(s);
    let no_parens = strip_parens(&base);
    strip_leading_the(&no_parens)
}

/// Query-side canonical key: [`registry_key`] plus subunit-tail trimming.
///
/// Trims at the *first* keyword occurrence, so a name that is itself a clinic
/// or a hospital ("Cleveland Clinic") loses most of its text. That loss is
/// accepted in exchange for recall on departmental affiliations.
pub fn query_key(s: &str) -> String {
    let key = registry_key(s);
    squash(&SUBUNIT_TAIL_RE.replace(&key, ""))
}

/// Lowercase ASCII alphanumeric runs of `s`.
pub fn tokenize(s: &str) -> Vec<String> {
    let lowered = s.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Bounded LRU memo for one key policy. A capacity of zero disables caching.
struct KeyCache {
    inner: Option<Mutex<LruCache<String, String>>>,
}

impl KeyCache {
    fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    fn get_or_insert_with(&self, raw: &str, compute: impl FnOnce(&str) -> String) -> String {
        let Some(cache) = &self.inner else {
            return compute(raw);
        };
        if let Some(hit) = cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(raw)
        {
            return hit.clone();
        }
        // Computed outside the lock; two threads racing on the same input
        // produce the same key, so last-write-wins is harmless.
        let key = compute(raw);
        cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(raw.to_string(), key.clone());
        key
    }

    fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |c| {
            c.lock().unwrap_or_else(PoisonError::into_inner).len()
        })
    }
}

/// Memoizing front end for [`registry_key`] and [`query_key`].
///
/// Each instance owns its caches, so several registry snapshots (or tests) can
/// coexist without sharing state.
pub struct Normalizer {
    registry: KeyCache,
    query: KeyCache,
}

impl Normalizer {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: KeyCache::new(capacity),
            query: KeyCache::new(capacity),
        }
    }

    pub fn registry_key(&self, s: &str) -> String {
        self.registry.get_or_insert_with(s, registry_key)
    }

    pub fn query_key(&self, s: &str) -> String {
        self.query.get_or_insert_with(s, query_key)
    }

    /// Number of memoized entries as `(registry, query)`.
    pub fn cached_len(&self) -> (usize, usize) {
        (self.registry.len(), self.query.len())
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (registry, query) = self.cached_len();
        f.debug_struct("Normalizer")
            .field("registry_cached", &registry)
            .field("query_cached", &query)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base_normalize_diacritics_and_case() {
        assert_eq!(base_normalize("Université de Montréal"), "universite de montreal");
        assert_eq!(base_normalize("ETH Zürich"), "eth zurich");
    }

    #[test]
    fn test_base_normalize_separators() {
        assert_eq!(
            base_normalize("Max Planck Institute – Tübingen/Stuttgart"),
            "max planck institute tubingen stuttgart"
        );
        assert_eq!(base_normalize("A|B:C;D,E"), "a b c d e");
        assert_eq!(base_normalize("  spaced \t out  "), "spaced out");
    }

    #[test]
    fn test_base_normalize_fullwidth() {
        assert_eq!(base_normalize("ＭＩＴ"), "mit");
    }

    #[test]
    fn test_registry_key_strips_leading_the_and_parens() {
        assert_eq!(
            registry_key("The University of Tokyo (UTokyo)"),
            "university of tokyo"
        );
        assert_eq!(registry_key("the the Ohio State University"), "ohio state university");
    }

    #[test]
    fn test_registry_key_nested_parens() {
        assert_eq!(registry_key("Foo (Bar (Baz)) Institute"), "foo institute");
    }

    #[test]
    fn test_registry_key_keeps_subunits() {
        assert_eq!(
            registry_key("University Hospital Bonn"),
            "university hospital bonn"
        );
        assert_ne!(
            registry_key("University Hospital Bonn"),
            registry_key("University Hospital Essen")
        );
    }

    #[test]
    fn test_query_key_trims_department_tail() {
        assert_eq!(
            query_key("Stanford University, Department of Physics"),
            "stanford university"
        );
        assert_eq!(query_key("Harvard Medical School"), "harvard medical");
    }

    #[test]
    fn test_query_key_trims_at_first_keyword() {
        // Known tradeoff: names that are themselves a subunit keyword are cut short.
        assert_eq!(query_key("Cleveland Clinic"), "cleveland");
        assert_eq!(query_key("Institute of Science Tokyo"), "");
    }

    #[test]
    fn test_query_key_keyword_must_be_whole_word() {
        assert_eq!(query_key("Labrador Research Trust"), "labrador research trust");
        assert_eq!(query_key("Schoolcraft Foundation"), "schoolcraft foundation");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Max-Planck Institut für 3D"),
            vec!["max", "planck", "institut", "f", "r", "3d"]
        );
        assert_eq!(tokenize("mit media lab"), vec!["mit", "media", "lab"]);
        assert!(tokenize("  ").is_empty());
    }

    #[test]
    fn test_normalizer_memoizes() {
        let n = Normalizer::new(8);
        assert_eq!(n.registry_key("The MIT"), "mit");
        assert_eq!(n.registry_key("The MIT"), "mit");
        assert_eq!(n.query_key("MIT, Department of EECS"), "mit");
        assert_eq!(n.cached_len(), (1, 1));
    }

    #[test]
    fn test_normalizer_zero_capacity_disables_cache() {
        let n = Normalizer::new(0);
        assert_eq!(n.registry_key("Oxford"), "oxford");
        assert_eq!(n.cached_len(), (0, 0));
    }

    #[test]
    fn test_normalizer_evicts_at_capacity() {
        let n = Normalizer::new(2);
        n.registry_key("a");
        n.registry_key("b");
        n.registry_key("c");
        assert_eq!(n.cached_len().0, 2);
    }

    proptest! {
        #[test]
        fn registry_key_is_idempotent(s in "\\PC{0,40}") {
            let once = registry_key(&s);
            prop_assert_eq!(registry_key(&once), once);
        }

        #[test]
        fn query_key_is_idempotent(s in "\\PC{0,40}") {
            let once = query_key(&s);
            prop_assert_eq!(query_key(&once), once);
        }

        #[test]
        fn org_like_names_are_idempotent(
            s in "(the )?[A-Za-z]{1,8}( [A-Za-z()]{1,10}){0,5}(, (Department|School|Lab) of [A-Za-z]{1,8})?"
        ) {
            let r = registry_key(&s);
            prop_assert_eq!(registry_key(&r), r.clone());
            let q = query_key(&s);
            prop_assert_eq!(query_key(&q), q);
        }
    }
}
