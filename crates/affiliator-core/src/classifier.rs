//! Cell-level entry point: split, resolve candidates, aggregate.

use std::path::Path;
use std::sync::Arc;

use crate::aggregate::{RowResult, aggregate};
use crate::matcher::{Matcher, OrgMatch};
use crate::normalize::Normalizer;
use crate::registry::RegistryIndex;
use crate::segments::{AffiliationFragment, SegmentClassifier};
use crate::{Config, CoreError};

/// Classifies affiliations cells against one registry snapshot.
///
/// Cheap to share across threads behind an `Arc`; every row yields a
/// [`RowResult`], none fails.
#[derive(Debug)]
pub struct AffiliationClassifier {
    config: Config,
    segments: SegmentClassifier,
    matcher: Arc<Matcher>,
}

impl AffiliationClassifier {
    /// Wrap an existing matcher.
    pub fn new(config: Config, matcher: Arc<Matcher>) -> Result<Self, CoreError> {
        config.validate()?;
        let segments =
            SegmentClassifier::new(&config.not_available_phrases, &config.independent_keywords)?;
        Ok(Self {
            config,
            segments,
            matcher,
        })
    }

    /// Build a matcher over `index` with the compiled-in fuzzy backend.
    pub fn from_index(config: Config, index: Arc<RegistryIndex>) -> Result<Self, CoreError> {
        let normalizer = Arc::new(Normalizer::new(config.key_cache_capacity));
        let matcher = Matcher::new(index).with_normalizer(normalizer);
        Self::new(config, Arc::new(matcher))
    }

    /// Load the registry at `path` and build a classifier over it.
    pub fn open(config: Config, path: &Path) -> Result<Self, CoreError> {
        let index = RegistryIndex::open(path)?;
        Self::from_index(config, Arc::new(index))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Whether fuzzy matching will actually run.
    pub fn fuzzy_active(&self) -> bool {
        self.config.use_fuzzy && self.matcher.has_fuzzy_backend()
    }

    pub fn split(&self, cell: &str) -> Vec<AffiliationFragment> {
        self.segments.split(cell)
    }

    /// Resolve a single fragment with the configured fuzzy settings.
    pub fn resolve(&self, fragment: &str) -> Option<OrgMatch> {
        self.matcher
            .resolve(fragment, self.config.use_fuzzy, self.config.fuzzy_threshold)
    }

    /// Classify one raw affiliations cell.
    pub fn classify_cell(&self, cell: &str) -> RowResult {
        let fragments = self.segments.split(cell);
        let results: Vec<Option<OrgMatch>> = fragments
            .iter()
            .map(|f| {
                if f.is_candidate() {
                    self.resolve(&f.text)
                } else {
                    None
                }
            })
            .collect();
        let row = aggregate(&fragments, &results, &self.config.english_countries);
        tracing::debug!(
            fragments = fragments.len(),
            label = %row.label,
            status = %row.match_status,
            "classified cell"
        );
        row
    }
}
