//! Result types for batch conversion.

use crate::engine::InputFormat;
use crate::error::{FailureKind, FileError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Outcome of converting one file. Never both, never neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionResult {
    Success(ConvertedDocument),
    Failure(FileFailure),
}

impl ConversionResult {
    pub fn source_path(&self) -> &Path {
        match self {
            ConversionResult::Success(d) => &d.source_path,
            ConversionResult::Failure(f) => &f.source_path,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Success(_))
    }

    /// Build a failure entry from a per-file error.
    pub fn failed(source_path: impl Into<PathBuf>, error: FileError) -> Self {
        ConversionResult::Failure(FileFailure::new(source_path, error))
    }
}

/// A successfully converted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertedDocument {
    pub source_path: PathBuf,
    /// Extracted content in the requested response format.
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Provider and timing details recorded with each document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub provider: String,
    pub model: String,
    pub input_format: InputFormat,
    pub pages: usize,
    /// Wall-clock time for the file including retries.
    pub duration_ms: u64,
    /// Attempts beyond the first.
    pub retries: u32,
    /// Where the document was written, when an output directory is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

/// A file that could not be converted (or written).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub source_path: PathBuf,
    pub kind: FailureKind,
    pub message: String,
    pub error: FileError,
}

impl FileFailure {
    pub fn new(source_path: impl Into<PathBuf>, error: FileError) -> Self {
        Self {
            source_path: source_path.into(),
            kind: error.kind(),
            message: error.to_string(),
            error,
        }
    }
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Files matched by the walk.
    pub matched_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Matched but never scheduled because the run was cancelled.
    pub skipped: usize,
    pub duration_ms: u64,
}

/// Ordered results of one batch run.
///
/// `results[i]` belongs to the `i`-th file in folder-then-traversal order.
/// For a run that was not cancelled, `results.len() == stats.matched_files`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<ConversionResult>,
    pub stats: BatchStats,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn successes(&self) -> impl Iterator<Item = &ConvertedDocument> {
        self.results.iter().filter_map(|r| match r {
            ConversionResult::Success(d) => Some(d),
            ConversionResult::Failure(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileFailure> {
        self.results.iter().filter_map(|r| match r {
            ConversionResult::Failure(f) => Some(f),
            ConversionResult::Success(_) => None,
        })
    }

    /// True when at least one file matched and none converted.
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| !r.is_success())
    }
}

/// Subdirectory of `output_dir` for each input folder, by position.
///
/// Normally the folder's own name (`root` for `/`). Names shared by several
/// folders, compared case-insensitively, get a 1-based position suffix
/// (`scans-1`, `scans-2`) so no two folders write into the same subtree.
pub fn output_roots(folders: &[PathBuf]) -> Vec<PathBuf> {
    let names: Vec<OsString> = folders
        .iter()
        .map(|f| f.file_name().map(OsStr::to_os_string).unwrap_or_else(|| "root".into()))
        .collect();
    let key = |n: &OsStr| n.to_string_lossy().to_lowercase();

    let mut taken = HashSet::new();
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let shared = names.iter().filter(|n| key(n.as_os_str()) == key(name.as_os_str())).count() > 1;
            let mut root = name.clone();
            if shared {
                root.push(format!("-{}", i + 1));
            }
            while taken.contains(&key(root.as_os_str())) {
                root.push(format!("-{}", i + 1));
            }
            taken.insert(key(root.as_os_str()));
            PathBuf::from(root)
        })
        .collect()
}

/// Destination of a converted file below `output_dir`.
///
/// `<output_dir>/<root>/<path relative to folder>.<ext>`, with `root` taken
/// from [`output_roots`]. The source extension is kept (`scan.png` →
/// `scan.png.md`) so `a.pdf` and `a.png` in one folder do not overwrite each
/// other.
pub fn output_path_for(output_dir: &Path, root: &Path, folder: &Path, file: &Path, ext: &str) -> PathBuf {
    let relative = file.strip_prefix(folder).unwrap_or(file);
    let relative = match relative.file_name() {
        Some(_) => relative.to_path_buf(),
        None => PathBuf::from("document"),
    };

    let mut target = output_dir.join(root).join(relative).into_os_string();
    target.push(".");
    target.push(ext);
    PathBuf::from(target)
}

/// Write `content` to `path` atomically (temp file + rename).
pub async fn write_document(path: &Path, content: &str) -> Result<(), FileError> {
    let fail = |e: std::io::Error| FileError::OutputWrite {
        path: path.to_path_buf(),
        detail: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }

    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, content).await.map_err(fail)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(fail(e));
    }
    Ok(())
}
