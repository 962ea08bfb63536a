//! Pluggable approximate-match scoring.
//!
//! The matcher only depends on [`FuzzyBackend`]. The bundled implementation,
//! [`TokenSetRatio`], is compiled with the `fuzzy` feature (on by default);
//! without it [`default_backend`] returns `None` and matching runs exact-only.

/// A similarity scorer on a 0–100 scale.
pub trait FuzzyBackend: Send + Sync {
    /// Short identifier used in logs (e.g. "token_set_ratio").
    fn name(&self) -> &str;

    /// Similarity of `query` and `candidate`, 0.0 (disjoint) to 100.0 (equivalent).
    fn score(&self, query: &str, candidate: &str) -> f64;

    /// Highest-scoring candidate whose score is `>= cutoff`.
    ///
    /// Ties keep the earliest candidate, so callers that pass candidates in a
    /// stable order get a stable answer.
    fn best_match<'c>(
        &self,
        query: &str,
        candidates: &[&'c str],
        cutoff: f64,
    ) -> Option<(&'c str, f64)> {
        let mut best: Option<(&'c str, f64)> = None;
        for &candidate in candidates {
            let score = self.score(query, candidate);
            if score >= cutoff && best.is_none_or(|(_, b)| score > b) {
                best = Some((candidate, score));
            }
        }
        best
    }
}

/// Order-insensitive token-set similarity.
///
/// Both strings are split on whitespace into token sets. If they share at
/// least one token and either set is contained in the other, the score is 100.
/// Otherwise the score is the best of three indel ratios built from the sorted
/// intersection `I` and the sorted differences `A−B`, `B−A`:
/// `ratio(I+A−B, I+B−A)`, `ratio(I, I+A−B)`, `ratio(I, I+B−A)`.
#[cfg(feature = "fuzzy")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSetRatio;

#[cfg(feature = "fuzzy")]
impl TokenSetRatio {
    fn ratio(a: &str, b: &str) -> f64 {
        rapidfuzz::fuzz::ratio(a.chars(), b.chars()) * 100.0
    }

    fn join(tokens: &std::collections::BTreeSet<&str>) -> String {
        tokens.iter().copied().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(feature = "fuzzy")]
impl FuzzyBackend for TokenSetRatio {
    fn name(&self) -> &str {
        "token_set_ratio"
    }

    fn score(&self, query: &str, candidate: &str) -> f64 {
        use std::collections::BTreeSet;

        let a: BTreeSet<&str> = query.split_whitespace().collect();
        let b: BTreeSet<&str> = candidate.split_whitespace().collect();
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let sect: BTreeSet<&str> = a.intersection(&b).copied().collect();
        let diff_ab: BTreeSet<&str> = a.difference(&b).copied().collect();
        let diff_ba: BTreeSet<&str> = b.difference(&a).copied().collect();

        if !sect.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
            return 100.0;
        }

        let sect = Self::join(&sect);
        let diff_ab = Self::join(&diff_ab);
        let diff_ba = Self::join(&diff_ba);

        if sect.is_empty() {
            return Self::ratio(&diff_ab, &diff_ba);
        }

        let sect_ab = format!("{sect} {diff_ab}");
        let sect_ba = format!("{sect} {diff_ba}");
        Self::ratio(&sect_ab, &sect_ba)
            .max(Self::ratio(&sect, &sect_ab))
            .max(Self::ratio(&sect, &sect_ba))
    }
}

/// The backend compiled into this build, if any.
pub fn default_backend() -> Option<std::sync::Arc<dyn FuzzyBackend>> {
    #[cfg(feature = "fuzzy")]
    {
        Some(std::sync::Arc::new(TokenSetRatio))
    }
    #[cfg(not(feature = "fuzzy"))]
    {
        None
    }
}
