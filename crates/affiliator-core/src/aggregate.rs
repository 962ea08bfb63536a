//! Per-row labelling from fragment-level match results.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::matcher::OrgMatch;
use crate::segments::{AffiliationFragment, FragmentCategory};

pub const DETAIL_INDEPENDENT: &str = "Independent";
pub const DETAIL_NOT_AVAILABLE: &str = "N/A";
pub const DETAIL_UNKNOWN: &str = "unknown";

/// Column names appended to an output row, in [`RowResult::output_fields`] order.
pub const OUTPUT_COLUMNS: [&str; 8] = [
    "english_background",
    "matched_countries",
    "matched_ror_ids",
    "unmatched_institutions",
    "match_status",
    "match_count",
    "affil_detail",
    "match_conf",
];

/// English-speaking background of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// At least one affiliation resolves to an English-speaking country.
    Strong,
    /// Resolved affiliations exist, none English-speaking.
    Weak,
    Unknown,
    /// Only independent-researcher markers.
    Independent,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Strong => "strong",
            Label::Weak => "weak",
            Label::Unknown => "unknown",
            Label::Independent => "independent",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many candidate fragments resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MatchStatus {
    #[serde(rename = "none")]
    Unmatched,
    #[serde(rename = "partial")]
    Partial,
    #[serde(rename = "full")]
    Full,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Unmatched => "none",
            MatchStatus::Partial => "partial",
            MatchStatus::Full => "full",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trust in a row's resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MatchConfidence {
    /// Some candidate fragment did not resolve.
    Unresolved,
    /// Every candidate resolved exactly (or there were no candidates).
    Exact,
    /// Everything resolved, at least one via fuzzy matching.
    Fuzzy,
}

impl MatchConfidence {
    /// `-1`, `0` or `1`.
    pub fn as_i8(&self) -> i8 {
        match self {
            MatchConfidence::Unresolved => -1,
            MatchConfidence::Exact => 0,
            MatchConfidence::Fuzzy => 1,
        }
    }
}

/// Classification of one affiliations cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowResult {
    pub label: Label,
    /// One entry per independent or resolved candidate fragment. A resolved
    /// organization without a country contributes an empty string.
    pub matched_countries: Vec<String>,
    pub matched_org_ids: Vec<String>,
    /// Text of candidate fragments that did not resolve.
    pub unmatched_fragments: Vec<String>,
    pub match_status: MatchStatus,
    pub match_count: usize,
    /// One detail token per fragment: "Independent", "N/A", an ISO2 code or
    /// "unknown".
    pub details: Vec<String>,
    pub confidence: MatchConfidence,
}

impl RowResult {
    /// The result for a cell with no fragments.
    pub fn empty() -> Self {
        Self {
            label: Label::Unknown,
            matched_countries: Vec::new(),
            matched_org_ids: Vec::new(),
            unmatched_fragments: Vec::new(),
            match_status: MatchStatus::Unmatched,
            match_count: 0,
            details: Vec::new(),
            confidence: MatchConfidence::Exact,
        }
    }

    /// Serialized values for [`OUTPUT_COLUMNS`].
    pub fn output_fields(&self) -> [String; 8] {
        let countries: Vec<&str> = self
            .matched_countries
            .iter()
            .map(String::as_str)
            .filter(|c| !c.is_empty())
            .collect();
        [
            self.label.to_string(),
            countries.join(","),
            self.matched_org_ids.join(","),
            self.unmatched_fragments.join(";"),
            self.match_status.to_string(),
            self.match_count.to_string(),
            self.details.join("; "),
            self.confidence.as_i8().to_string(),
        ]
    }
}

/// Combine fragments with their match results into a [`RowResult`].
///
/// `results[i]` belongs to `fragments[i]`; it is ignored unless the fragment
/// is a candidate. Missing trailing results count as no match.
pub fn aggregate(
    fragments: &[AffiliationFragment],
    results: &[Option<OrgMatch>],
    english_countries: &BTreeSet<String>,
) -> RowResult {
    if fragments.is_empty() {
        return RowResult::empty();
    }

    let mut row = RowResult::empty();
    let mut candidates = 0usize;
    let mut any_fuzzy = false;

    for (i, fragment) in fragments.iter().enumerate() {
        match fragment.category {
            FragmentCategory::Independent => {
                row.details.push(DETAIL_INDEPENDENT.to_string());
                row.matched_countries.push(DETAIL_INDEPENDENT.to_string());
            }
            FragmentCategory::NotAvailable => {
                row.details.push(DETAIL_NOT_AVAILABLE.to_string());
            }
            FragmentCategory::Candidate => {
                candidates += 1;
                match results.get(i).and_then(Option::as_ref) {
                    Some(found) => {
                        let cc = found.country_code.clone().unwrap_or_default();
                        row.details.push(if cc.is_empty() {
                            DETAIL_UNKNOWN.to_string()
                        } else {
                            cc.clone()
                        });
                        row.matched_countries.push(cc);
                        row.matched_org_ids.push(found.org_id.clone());
                        any_fuzzy |= found.is_fuzzy();
                    }
                    None => {
                        row.details.push(DETAIL_UNKNOWN.to_string());
                        row.unmatched_fragments.push(fragment.text.clone());
                    }
                }
            }
        }
    }

    row.match_count = row.matched_org_ids.len();
    row.label = label_for(&row.details, english_countries);
    row.match_status = if row.match_count == 0 {
        MatchStatus::Unmatched
    } else if row.match_count == candidates {
        MatchStatus::Full
    } else {
        MatchStatus::Partial
    };
    row.confidence = if !row.unmatched_fragments.is_empty() {
        MatchConfidence::Unresolved
    } else if any_fuzzy {
        MatchConfidence::Fuzzy
    } else {
        MatchConfidence::Exact
    };
    row
}

fn label_for(details: &[String], english_countries: &BTreeSet<String>) -> Label {
    if details.iter().all(|d| d == DETAIL_INDEPENDENT) {
        Label::Independent
    } else if details.iter().any(|d| english_countries.contains(d)) {
        Label::Strong
    } else if details
        .iter()
        .all(|d| [DETAIL_NOT_AVAILABLE, DETAIL_INDEPENDENT, DETAIL_UNKNOWN].contains(&d.as_str()))
    {
        Label::Unknown
    } else {
        Label::Weak
    }
}
