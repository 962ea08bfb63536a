//! Exact-lookup key candidates for a raw affiliation fragment.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::normalize::Normalizer;

static PARENS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[（(].*?[）)]").unwrap());

/// First delimiter: dash variants, colon, pipe, comma, semicolon, slash.
static DELIMITER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{2010}\u{2012}\u{2013}\u{2014}\-:|,;/]").unwrap());

static LEADING_THE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^the\s+").unwrap());

fn before_first_delimiter(s: &str) -> &str {
    DELIMITER_RE.split(s).next().unwrap_or(s)
}

/// Textual variants of `raw`: the input, parentheses removed, and the text
/// before the first delimiter of each, all with a leading "the " dropped.
pub fn textual_variants(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let no_parens = PARENS_RE.replace_all(raw, "");

    let mut variants = vec![raw];
    if no_parens != raw {
        variants.push(&no_parens);
    }
    variants.push(before_first_delimiter(raw));
    variants.push(before_first_delimiter(&no_parens));

    variants
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| LEADING_THE_RE.replace(v, "").into_owned())
        .collect()
}

/// Canonical keys to probe against the exact table, deduplicated, in
/// generation order. Each textual variant contributes its registry-side key
/// and then its query-side key; empty keys are dropped.
pub fn candidate_keys(raw: &str, normalizer: &Normalizer) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for variant in textual_variants(raw) {
        for key in [normalizer.registry_key(&variant), normalizer.query_key(&variant)] {
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}
