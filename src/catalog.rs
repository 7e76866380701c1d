//! The persisted model catalog.
//!
//! A JSON Lines file, one record per model:
//!
//! ```text
//! {"name": "qwen-vl-max-latest", "provider": "dashscope"}
//! {"name": "gpt-4o", "provider": "sandbox", "prompt": "Transcribe tables as GFM."}
//! ```
//!
//! Records are keyed by `name`. A file with two records of the same name is
//! rejected on load rather than resolved by position, so editing a model
//! always touches exactly one record.

use crate::error::FicheroError;
use crate::provider::{ModelSelection, ProviderRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Records written to a fresh catalog.
pub const SEED_CATALOG: &str = include_str!("../resources/models_config.start.jsonl");

/// One persisted model configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ModelRecord {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            api_key: None,
            prompt: None,
            url: None,
        }
    }

    /// The `(provider, model)` selection this record describes.
    pub fn selection(&self) -> ModelSelection {
        ModelSelection {
            provider: self.provider.clone(),
            model: self.name.clone(),
            url: self.url.clone(),
        }
    }
}

/// Model records keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelCatalog {
    records: BTreeMap<String, ModelRecord>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse JSON Lines. Blank lines are ignored; `source` is used in errors.
    pub fn parse(text: &str, source: &Path) -> Result<Self, FicheroError> {
        let mut records = BTreeMap::new();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            let record: ModelRecord =
                serde_json::from_str(line).map_err(|e| FicheroError::CatalogParse {
                    path: source.to_path_buf(),
                    line: line_no,
                    detail: e.to_string(),
                })?;
            if record.name.trim().is_empty() || record.provider.trim().is_empty() {
                return Err(FicheroError::CatalogParse {
                    path: source.to_path_buf(),
                    line: line_no,
                    detail: "`name` and `provider` must be non-empty".into(),
                });
            }
            if records.contains_key(&record.name) {
                return Err(FicheroError::DuplicateModel {
                    name: record.name,
                    line: line_no,
                });
            }
            records.insert(record.name.clone(), record);
        }
        Ok(Self { records })
    }

    /// Read a catalog file.
    pub fn load(path: &Path) -> Result<Self, FicheroError> {
        let text = std::fs::read_to_string(path).map_err(|e| FicheroError::CatalogRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let catalog = Self::parse(&text, path)?;
        debug!("Loaded {} models from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Read a catalog file, first creating it from [`SEED_CATALOG`] if it
    /// does not exist.
    pub fn load_or_seed(path: &Path) -> Result<Self, FicheroError> {
        if !path.exists() {
            let seed = Self::parse(SEED_CATALOG, Path::new("<seed>"))?;
            seed.save(path)?;
            info!("Created model catalog at {}", path.display());
            return Ok(seed);
        }
        Self::load(path)
    }

    /// Check every record names a registered provider.
    pub fn validate(&self, registry: &ProviderRegistry) -> Result<(), FicheroError> {
        for record in self.records.values() {
            registry.resolve(&record.provider)?;
        }
        Ok(())
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<(), FicheroError> {
        let write_err = |e: std::io::Error| FicheroError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(self.to_jsonl()?.as_bytes()).map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    /// Serialise to JSON Lines, sorted by name.
    pub fn to_jsonl(&self) -> Result<String, FicheroError> {
        let mut out = String::new();
        for record in self.records.values() {
            let line = serde_json::to_string(record)
                .map_err(|e| FicheroError::Internal(format!("serialise model record: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn get(&self, name: &str) -> Option<&ModelRecord> {
        self.records.get(name)
    }

    /// Like [`ModelCatalog::get`] but an absent name is an error.
    pub fn require(&self, name: &str) -> Result<&ModelRecord, FicheroError> {
        self.get(name).ok_or_else(|| FicheroError::UnknownModel {
            name: name.to_string(),
        })
    }

    /// Insert or replace the record with this name; returns the old one.
    pub fn upsert(&mut self, record: ModelRecord) -> Option<ModelRecord> {
        self.records.insert(record.name.clone(), record)
    }

    pub fn remove(&mut self, name: &str) -> Option<ModelRecord> {
        self.records.remove(name)
    }

    pub fn records(&self) -> impl Iterator<Item = &ModelRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
