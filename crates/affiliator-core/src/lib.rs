use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod cache;
pub mod classifier;
pub mod config_file;
pub mod fuzzy;
pub mod matcher;
pub mod normalize;
pub mod registry;
pub mod segments;
pub mod variants;

// Re-export for convenience
pub use aggregate::{Label, MatchConfidence, MatchStatus, OUTPUT_COLUMNS, RowResult, aggregate};
pub use classifier::AffiliationClassifier;
pub use fuzzy::{FuzzyBackend, default_backend};
pub use matcher::{
    DEFAULT_FUZZY_THRESHOLD, MatchMethod, Matcher, MatcherStats, OrgMatch, STRICT_FUZZY_THRESHOLD,
};
pub use normalize::{Normalizer, query_key, registry_key};
pub use registry::{LoadStats, OrganizationRecord, RegistryError, RegistryIndex};
pub use segments::{AffiliationFragment, FragmentCategory, SegmentClassifier};

/// Phrase used by SSRN for papers without an affiliation.
pub const SSRN_NO_AFFILIATION: &str = "affiliation not provided to SSRN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("fuzzy threshold must be between 0 and 100, got {0}")]
    ThresholdOutOfRange(u8),
    #[error("English-speaking country set is empty")]
    NoEnglishCountries,
    #[error("invalid not-available phrase pattern: {0}")]
    InvalidPhrase(#[from] regex::Error),
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Named fuzzy-threshold presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdProfile {
    #[default]
    Balanced,
    Strict,
}

impl ThresholdProfile {
    pub fn threshold(&self) -> u8 {
        match self {
            ThresholdProfile::Balanced => DEFAULT_FUZZY_THRESHOLD,
            ThresholdProfile::Strict => STRICT_FUZZY_THRESHOLD,
        }
    }
}

/// Classification settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Requested fuzzy matching. Ignored when no backend is compiled in.
    pub use_fuzzy: bool,
    /// Inclusive fuzzy score cutoff, 0–100.
    pub fuzzy_threshold: u8,
    /// ISO2 codes that make a row `strong`.
    pub english_countries: BTreeSet<String>,
    pub not_available_phrases: Vec<String>,
    pub independent_keywords: Vec<String>,
    /// Capacity of each normalization cache; 0 disables them.
    pub key_cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_fuzzy: true,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            english_countries: ["US", "GB", "AU", "CA"]
                .into_iter()
                .map(String::from)
                .collect(),
            not_available_phrases: vec![
                SSRN_NO_AFFILIATION.to_string(),
                "affiliation not provided".to_string(),
                "not available".to_string(),
                "n/a".to_string(),
            ],
            independent_keywords: vec![
                "independent".to_string(),
                "independent researcher".to_string(),
            ],
            key_cache_capacity: normalize::DEFAULT_KEY_CACHE_CAPACITY,
        }
    }
}

impl Config {
    /// Default settings with the threshold of `profile`.
    pub fn with_profile(profile: ThresholdProfile) -> Self {
        Self {
            fuzzy_threshold: profile.threshold(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fuzzy_threshold > 100 {
            return Err(ConfigError::ThresholdOutOfRange(self.fuzzy_threshold));
        }
        if self.english_countries.is_empty() {
            return Err(ConfigError::NoEnglishCountries);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.use_fuzzy);
        assert_eq!(config.fuzzy_threshold, 92);
        assert!(config.english_countries.contains("CA"));
    }

    #[test]
    fn test_profiles() {
        assert_eq!(Config::with_profile(ThresholdProfile::Strict).fuzzy_threshold, 95);
        assert_eq!(ThresholdProfile::default().threshold(), 92);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            fuzzy_threshold: 101,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange(101))
        ));

        let config = Config {
            english_countries: BTreeSet::new(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoEnglishCountries)));
    }
}
