//! Folder traversal and extension filtering.
//!
//! Folders are walked in the order given; inside each folder entries are
//! visited depth-first in file-name order so a run over the same tree always
//! enumerates files identically. Only regular files are yielded: symlinks,
//! sockets and devices are skipped without comment.

use crate::error::FicheroError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Lowercase, dot-less file extensions the engine can convert.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtensionSet(BTreeSet<String>);

impl ExtensionSet {
    /// Normalises each entry: trims, drops a leading `.`, lowercases.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            extensions
                .into_iter()
                .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated list such as `"pdf, .PNG,jpg"`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Case-insensitive match on the path's final extension.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.0.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.0.contains(&extension.to_ascii_lowercase())
    }

    /// Entries of `self` missing from `other`.
    pub fn outside<'a>(&'a self, other: &'a ExtensionSet) -> impl Iterator<Item = &'a str> + 'a {
        self.0.difference(&other.0).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Enumerates matching files across an ordered list of folders.
#[derive(Debug, Clone)]
pub struct BatchWalker {
    extensions: ExtensionSet,
}

impl BatchWalker {
    pub fn new(extensions: ExtensionSet) -> Self {
        Self { extensions }
    }

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    /// Check every folder before any work starts.
    pub fn validate(folders: &[PathBuf]) -> Result<(), FicheroError> {
        folders.iter().try_for_each(|f| ensure_dir(f))
    }

    /// Lazily walk `folders`. Each folder is checked when the walk reaches
    /// it, so an invalid folder surfaces as an `Err` item after the files of
    /// the folders before it.
    pub fn walk<'a>(&'a self, folders: &'a [PathBuf]) -> impl Iterator<Item = Result<PathBuf, FicheroError>> + 'a {
        folders.iter().flat_map(move |folder| self.walk_folder(folder))
    }

    /// Validate all folders, then collect every match in order.
    pub fn collect(&self, folders: &[PathBuf]) -> Result<Vec<WalkedFile>, FicheroError> {
        Self::validate(folders)?;
        let mut files = Vec::new();
        for (folder_index, folder) in folders.iter().enumerate() {
            for path in self.walk_folder(folder) {
                files.push(WalkedFile {
                    folder_index,
                    path: path?,
                });
            }
        }
        debug!("Matched {} files across {} folders", files.len(), folders.len());
        Ok(files)
    }

    fn walk_folder<'a>(&'a self, folder: &'a Path) -> Box<dyn Iterator<Item = Result<PathBuf, FicheroError>> + 'a> {
        if let Err(e) = ensure_dir(folder) {
            return Box::new(std::iter::once(Err(e)));
        }
        let entries = WalkDir::new(folder)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", folder.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(move |entry| self.extensions.matches(entry.path()))
            .map(|entry| Ok(entry.into_path()));
        Box::new(entries)
    }
}

/// A matched file and the index of the input folder it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub folder_index: usize,
    pub path: PathBuf,
}

fn ensure_dir(path: &Path) -> Result<(), FicheroError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(FicheroError::InvalidInput {
            path: path.to_path_buf(),
        })
    }
}
