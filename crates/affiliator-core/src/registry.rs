//! Reference registry of research organizations and its lookup indexes.
//!
//! The registry arrives flattened to `(name, org_id, country_code)` triples,
//! one per alias. [`RegistryIndex`] keeps:
//!
//! - an exact table from registry-side canonical key to `(org_id, country)`,
//!   where the first triple seen for a key wins;
//! - an inverted index from token to the keys containing it, used to prune the
//!   fuzzy search space.
//!
//! Both are read-only once built.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::{registry_key, tokenize};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry source not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("IO error reading registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid registry JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("registry {source_name} has no usable entries")]
    Empty { source_name: String },
}

/// One organization with all of its known name variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    #[serde(rename = "id", alias = "org_id")]
    pub org_id: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(rename = "names", alias = "name_variants", default)]
    pub name_variants: Vec<String>,
}

/// What an exact-table key resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgEntry {
    pub org_id: String,
    pub country_code: Option<String>,
}

/// Counters collected while building an index. Skipped rows are not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows_read: usize,
    /// Rows with the wrong shape (TSV column count, or a JSON element that is
    /// not an organization record).
    pub malformed_rows: usize,
    /// Rows whose key normalized to empty or whose org id was empty.
    pub empty_rows: usize,
    /// Rows whose key was already present for the same org id.
    pub duplicate_keys: usize,
    /// Rows whose key was already present for a *different* org id.
    pub conflicting_keys: usize,
}

/// Trim and uppercase a country code; blank becomes `None`.
fn clean_country(cc: Option<&str>) -> Option<String> {
    cc.map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_uppercase)
}

/// Exact and token indexes over canonical organization-name keys.
#[derive(Debug, Default)]
pub struct RegistryIndex {
    exact: HashMap<String, OrgEntry>,
    tokens: HashMap<String, BTreeSet<String>>,
    stats: LoadStats,
}

impl RegistryIndex {
    /// Build from `(name, org_id, country_code)` triples.
    ///
    /// An empty result is allowed here; the file loaders reject it.
    pub fn from_triples<I, N, O, C>(triples: I) -> Self
    where
        I: IntoIterator<Item = (N, O, Option<C>)>,
        N: AsRef<str>,
        O: AsRef<str>,
        C: AsRef<str>,
    {
        let mut builder = Builder::default();
        for (name, org_id, cc) in triples {
            builder.push(name.as_ref(), org_id.as_ref(), cc.as_ref().map(|c| c.as_ref()));
        }
        builder.finish()
    }

    /// Build from organization records, one triple per name variant.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a OrganizationRecord>) -> Self {
        let mut builder = Builder::default();
        for record in records {
            for name in &record.name_variants {
                builder.push(name, &record.org_id, record.country_code.as_deref());
            }
        }
        builder.finish()
    }

    /// Load a registry file, choosing the format by extension: `.json` is a
    /// list of [`OrganizationRecord`]s, anything else is tab-separated triples.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::load_json(path)
        } else {
            Self::load_tsv(path)
        }
    }

    /// Load `name_key \t org_id \t country_code` lines. Lines that do not have
    /// exactly three columns are skipped.
    pub fn load_tsv(path: &Path) -> Result<Self, RegistryError> {
        let file = open_source(path)?;
        let mut builder = Builder::default();
        for line in BufReader::new(file).lines() {
            let line = line?;
            builder.push_tsv_line(&line);
        }
        builder.finish_nonempty(path)
    }

    /// Load a JSON array of organization records. Elements that do not
    /// deserialize as a record are skipped.
    pub fn load_json(path: &Path) -> Result<Self, RegistryError> {
        let file = open_source(path)?;
        let values: Vec<serde_json::Value> = serde_json::from_reader(BufReader::new(file))?;
        let mut builder = Builder::default();
        for value in values {
            match serde_json::from_value::<OrganizationRecord>(value) {
                Ok(record) => {
                    for name in &record.name_variants {
                        builder.push(name, &record.org_id, record.country_code.as_deref());
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed registry record");
                    builder.stats.rows_read += 1;
                    builder.stats.malformed_rows += 1;
                }
            }
        }
        builder.finish_nonempty(path)
    }

    /// Exact lookup of an already-canonical key.
    pub fn get(&self, key: &str) -> Option<&OrgEntry> {
        self.exact.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.exact.contains_key(key)
    }

    /// Keys containing `token`, in sorted order.
    pub fn keys_with_token(&self, token: &str) -> Option<&BTreeSet<String>> {
        self.tokens.get(token)
    }

    /// Every exact-table key.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.exact.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }
}

fn open_source(path: &Path) -> Result<File, RegistryError> {
    if !path.exists() {
        return Err(RegistryError::NotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(File::open(path)?)
}

#[derive(Default)]
struct Builder {
    exact: HashMap<String, OrgEntry>,
    stats: LoadStats,
}

impl Builder {
    fn push_tsv_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if let &[name, org_id, cc] = parts.as_slice() {
            self.push(name, org_id, Some(cc));
        } else {
            tracing::debug!(columns = parts.len(), "skipping malformed registry row");
            self.stats.rows_read += 1;
            self.stats.malformed_rows += 1;
        }
    }

    fn push(&mut self, name: &str, org_id: &str, country_code: Option<&str>) {
        self.stats.rows_read += 1;
        let key = registry_key(name);
        let org_id = org_id.trim();
        if key.is_empty() || org_id.is_empty() {
            self.stats.empty_rows += 1;
            return;
        }

        if let Some(existing) = self.exact.get(&key) {
            if existing.org_id == org_id {
                self.stats.duplicate_keys += 1;
            } else {
                self.stats.conflicting_keys += 1;
                tracing::warn!(
                    key = %key,
                    kept = %existing.org_id,
                    dropped = %org_id,
                    "registry key maps to more than one organization, keeping first"
                );
            }
            return;
        }

        self.exact.insert(
            key,
            OrgEntry {
                org_id: org_id.to_string(),
                country_code: clean_country(country_code),
            },
        );
    }

    fn finish(self) -> RegistryIndex {
        let mut tokens: HashMap<String, BTreeSet<String>> = HashMap::new();
        for key in self.exact.keys() {
            for tok in tokenize(key) {
                tokens.entry(tok).or_default().insert(key.clone());
            }
        }
        RegistryIndex {
            exact: self.exact,
            tokens,
            stats: self.stats,
        }
    }

    fn finish_nonempty(self, path: &Path) -> Result<RegistryIndex, RegistryError> {
        let index = self.finish();
        if index.is_empty() {
            return Err(RegistryError::Empty {
                source_name: path.display().to_string(),
            });
        }
        tracing::info!(
            path = %path.display(),
            keys = index.len(),
            tokens = index.token_count(),
            malformed = index.stats.malformed_rows,
            conflicts = index.stats.conflicting_keys,
            "registry loaded"
        );
        Ok(index)
    }
}
