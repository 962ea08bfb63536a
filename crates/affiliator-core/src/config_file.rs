use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Config, ConfigError, ThresholdProfile};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub registry: Option<RegistryConfig>,
    pub matching: Option<MatchingConfig>,
    pub labels: Option<LabelsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub path: Option<String>,
    pub key_cache_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub use_fuzzy: Option<bool>,
    /// Explicit threshold; wins over `profile`.
    pub fuzzy_threshold: Option<u8>,
    pub profile: Option<ThresholdProfile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelsConfig {
    pub english_countries: Option<Vec<String>>,
    pub not_available_phrases: Option<Vec<String>>,
    pub independent_keywords: Option<Vec<String>>,
}

/// Platform config directory path: `<config_dir>/affiliator/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("affiliator").join("config.toml"))
}

/// Load config by cascading CWD `.affiliator.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".affiliator.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed; a parse failure is logged.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    if !path.exists() {
        return None;
    }
    match read_config(path) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring config file");
            None
        }
    }
}

/// Read and parse a config file, reporting why it failed.
pub fn read_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        registry: Some(RegistryConfig {
            path: overlay
                .registry
                .as_ref()
                .and_then(|r| r.path.clone())
                .or_else(|| base.registry.as_ref().and_then(|r| r.path.clone())),
            key_cache_capacity: overlay
                .registry
                .as_ref()
                .and_then(|r| r.key_cache_capacity)
                .or_else(|| base.registry.as_ref().and_then(|r| r.key_cache_capacity)),
        }),
        matching: Some(MatchingConfig {
            use_fuzzy: overlay
                .matching
                .as_ref()
                .and_then(|m| m.use_fuzzy)
                .or_else(|| base.matching.as_ref().and_then(|m| m.use_fuzzy)),
            fuzzy_threshold: overlay
                .matching
                .as_ref()
                .and_then(|m| m.fuzzy_threshold)
                .or_else(|| base.matching.as_ref().and_then(|m| m.fuzzy_threshold)),
            profile: overlay
                .matching
                .as_ref()
                .and_then(|m| m.profile)
                .or_else(|| base.matching.as_ref().and_then(|m| m.profile)),
        }),
        labels: Some(LabelsConfig {
            english_countries: overlay
                .labels
                .as_ref()
                .and_then(|l| l.english_countries.clone())
                .or_else(|| base.labels.as_ref().and_then(|l| l.english_countries.clone())),
            not_available_phrases: overlay
                .labels
                .as_ref()
                .and_then(|l| l.not_available_phrases.clone())
                .or_else(|| {
                    base.labels
                        .as_ref()
                        .and_then(|l| l.not_available_phrases.clone())
                }),
            independent_keywords: overlay
                .labels
                .as_ref()
                .and_then(|l| l.independent_keywords.clone())
                .or_else(|| {
                    base.labels
                        .as_ref()
                        .and_then(|l| l.independent_keywords.clone())
                }),
        }),
    }
}

impl ConfigFile {
    /// Registry path named in the file, if any.
    pub fn registry_path(&self) -> Option<PathBuf> {
        self.registry
            .as_ref()
            .and_then(|r| r.path.as_deref())
            .map(PathBuf::from)
    }

    /// Apply the values present in the file on top of `config`.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(registry) = &self.registry {
            if let Some(capacity) = registry.key_cache_capacity {
                config.key_cache_capacity = capacity;
            }
        }
        if let Some(matching) = &self.matching {
            if let Some(use_fuzzy) = matching.use_fuzzy {
                config.use_fuzzy = use_fuzzy;
            }
            if let Some(profile) = matching.profile {
                config.fuzzy_threshold = profile.threshold();
            }
            if let Some(threshold) = matching.fuzzy_threshold {
                config.fuzzy_threshold = threshold;
            }
        }
        if let Some(labels) = &self.labels {
            if let Some(countries) = &labels.english_countries {
                config.english_countries = countries
                    .iter()
                    .map(|c| c.trim().to_uppercase())
                    .filter(|c| !c.is_empty())
                    .collect::<BTreeSet<_>>();
            }
            if let Some(phrases) = &labels.not_available_phrases {
                config.not_available_phrases = phrases.clone();
            }
            if let Some(keywords) = &labels.independent_keywords {
                config.independent_keywords = keywords.clone();
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_partial_toml() {
        let toml_str = "[matching]\nprofile = \"strict\"\n";
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(
            parsed.matching.unwrap().profile,
            Some(ThresholdProfile::Strict)
        );
        assert!(parsed.registry.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            registry: Some(RegistryConfig {
                path: Some("/base/ror.tsv".to_string()),
                ..Default::default()
            }),
            matching: Some(MatchingConfig {
                fuzzy_threshold: Some(90),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            registry: Some(RegistryConfig {
                path: Some("/overlay/ror.json".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        assert_eq!(
            merged.registry_path(),
            Some(PathBuf::from("/overlay/ror.json"))
        );
        assert_eq!(merged.matching.unwrap().fuzzy_threshold, Some(90));
    }

    #[test]
    fn apply_threshold_beats_profile() {
        let file = ConfigFile {
            matching: Some(MatchingConfig {
                use_fuzzy: Some(false),
                fuzzy_threshold: Some(88),
                profile: Some(ThresholdProfile::Strict),
            }),
            labels: Some(LabelsConfig {
                english_countries: Some(vec!["us".into(), " nz ".into()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = file.apply(Config::default());
        assert!(!config.use_fuzzy);
        assert_eq!(config.fuzzy_threshold, 88);
        assert_eq!(
            config.english_countries.into_iter().collect::<Vec<_>>(),
            vec!["NZ", "US"]
        );
        assert_eq!(config.independent_keywords, Config::default().independent_keywords);
    }

    #[test]
    fn read_config_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[matching\nuse_fuzzy = ").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            read_config(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        assert!(load_from_path(file.path()).is_none());
    }

    #[test]
    fn missing_file_is_none() {
        assert!(load_from_path(Path::new("/no/such/affiliator.toml")).is_none());
    }
}
