//! Splitting an affiliations cell into classified fragments.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ConfigError;

static FRAGMENT_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[;,]\s*").unwrap());

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn squash(s: &str) -> String {
    WHITESPACE_RE.replace_all(s, " ").trim().to_string()
}

fn trim_fragment(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '.'))
}

/// What kind of entry a fragment is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentCategory {
    /// An "independent researcher" marker. Never looked up.
    Independent,
    /// A placeholder such as "affiliation not provided". Never looked up.
    NotAvailable,
    /// Anything else; resolved against the registry.
    Candidate,
}

/// One comma- or semicolon-delimited piece of an affiliations cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffiliationFragment {
    /// Trimmed text with whitespace collapsed. Case is preserved.
    pub text: String,
    pub category: FragmentCategory,
}

impl AffiliationFragment {
    pub fn is_candidate(&self) -> bool {
        self.category == FragmentCategory::Candidate
    }
}

/// Splits cells and classifies the fragments.
#[derive(Debug, Clone)]
pub struct SegmentClassifier {
    not_available: HashSet<String>,
    independent: HashSet<String>,
    /// `and <phrase>` and `<phrase> and`, case-insensitive; `None` when no
    /// phrases are configured.
    conjunctions: Option<(Regex, Regex)>,
}

impl SegmentClassifier {
    /// Phrase and keyword comparisons are case-insensitive and ignore runs of
    /// whitespace.
    pub fn new<P, K>(not_available_phrases: P, independent_keywords: K) -> Result<Self, ConfigError>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        let canonical = |s: &str| squash(&s.to_lowercase());

        let mut phrases: Vec<String> = not_available_phrases
            .into_iter()
            .map(|p| canonical(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        // Longest first so "affiliation not provided to ssrn" wins over its prefix.
        phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        phrases.dedup();

        let independent = independent_keywords
            .into_iter()
            .map(|k| canonical(k.as_ref()))
            .filter(|k| !k.is_empty())
            .collect();

        let conjunctions = if phrases.is_empty() {
            None
        } else {
            let alternation = phrases
                .iter()
                .map(|p| regex::escape(p).replace(' ', r"\s+"))
                .collect::<Vec<_>>()
                .join("|");
            Some((
                Regex::new(&format!(r"(?i)\band\s+({alternation})\b"))?,
                Regex::new(&format!(r"(?i)\b({alternation})\s+and\b"))?,
            ))
        };

        Ok(Self {
            not_available: phrases.into_iter().collect(),
            independent,
            conjunctions,
        })
    }

    /// True if the whole cell carries no affiliation: blank, or exactly one
    /// of the not-available phrases.
    pub fn is_empty_cell(&self, cell: &str) -> bool {
        let cell = squash(&cell.to_lowercase());
        cell.is_empty() || self.not_available.contains(trim_fragment(&cell))
    }

    /// Split a raw cell into ordered fragments.
    ///
    /// A blank cell or one that is exactly a not-available phrase yields no
    /// fragments.
    pub fn split(&self, cell: &str) -> Vec<AffiliationFragment> {
        if self.is_empty_cell(cell) {
            return Vec::new();
        }

        let mut text = squash(cell);
        if let Some((before, after)) = &self.conjunctions {
            text = before.replace_all(&text, "$1").into_owned();
            text = after.replace_all(&text, "$1").into_owned();
            text = squash(&text);
        }

        FRAGMENT_SPLIT_RE
            .split(&text)
            .map(trim_fragment)
            .filter(|piece| !piece.is_empty())
            .map(|piece| AffiliationFragment {
                text: piece.to_string(),
                category: self.categorize(piece),
            })
            .collect()
    }

    fn categorize(&self, fragment: &str) -> FragmentCategory {
        let lowered = squash(&fragment.to_lowercase());
        if self.independent.contains(&lowered) {
            FragmentCategory::Independent
        } else if self.not_available.contains(&lowered) {
            FragmentCategory::NotAvailable
        } else {
            FragmentCategory::Candidate
        }
    }
}
