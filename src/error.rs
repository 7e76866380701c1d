//! Error types for the fichero library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FicheroError`]: **Fatal**: the batch cannot run at all (an input
//!   folder is not a directory, the provider is unknown, the model catalog is
//!   unreadable). Returned as `Err(FicheroError)` before any file is converted.
//!
//! * [`FileError`]: **Non-fatal**: one file failed (timeout, rejected
//!   credentials, garbled response) but its siblings are fine. Stored inside
//!   [`crate::output::FileFailure`] so the batch report stays total.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the fichero library.
///
/// Per-file failures use [`FileError`] and are recorded in the
/// [`crate::output::BatchReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum FicheroError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A folder passed to the batch is missing or is not a directory.
    #[error("Input path '{path}' is not a directory")]
    InvalidInput { path: PathBuf },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The provider name does not exist in the registry.
    #[error("Unknown provider '{name}'. Known providers: {known}")]
    ProviderNotFound { name: String, known: String },

    // ── Model catalog errors ──────────────────────────────────────────────
    /// The catalog file could not be read.
    #[error("Failed to read model catalog '{path}': {source}")]
    CatalogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A catalog line is not a valid model record.
    #[error("Invalid model record at {path}:{line}: {detail}")]
    CatalogParse {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    /// Two catalog records share the same model name.
    #[error("Duplicate model '{name}' in catalog (line {line})")]
    DuplicateModel { name: String, line: usize },

    /// A model name was requested that the catalog does not contain.
    #[error("Model '{name}' is not in the catalog")]
    UnknownModel { name: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a per-file failure.
///
/// `Authentication` is a specialisation of `Conversion`: both mean the remote
/// call did not produce a document, but only the former will not improve by
/// retrying with the same credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Remote call failed: timeout, non-2xx response, malformed payload.
    Conversion,
    /// Missing or rejected credentials.
    Authentication,
    /// The document converted but could not be written to the output target.
    Output,
}

/// A non-fatal error for a single file.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum FileError {
    /// The call did not finish within its timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection refused, DNS failure, reset mid-response.
    #[error("transport error: {detail}")]
    Transport { detail: String },

    /// The endpoint answered with a non-2xx status other than 401/403.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The endpoint answered 2xx but the payload has no usable content.
    #[error("malformed response: {detail}")]
    MalformedResponse { detail: String },

    /// The endpoint rejected the credentials (401/403).
    #[error("authentication rejected by '{provider}' (HTTP {status}): {detail}")]
    Authentication {
        provider: String,
        status: u16,
        detail: String,
    },

    /// No API key was available for a provider that requires one.
    #[error("no API key configured for provider '{provider}'")]
    MissingCredentials { provider: String },

    /// The provider named in the job is not registered.
    #[error("unknown provider '{name}'")]
    ProviderNotFound { name: String },

    /// The file extension is not one the engine can convert.
    #[error("unsupported input format '.{extension}'")]
    UnsupportedFormat { extension: String },

    /// Reading the input file failed.
    #[error("I/O error: {detail}")]
    Io { detail: String },

    /// Rasterising or decoding the input failed.
    #[error("render failed: {detail}")]
    Render { detail: String },

    /// A single page of a multi-page document failed.
    #[error("page {page}: {source}")]
    Page {
        page: usize,
        #[source]
        source: Box<FileError>,
    },

    /// Writing the converted document to the output target failed.
    #[error("failed to write '{path}': {detail}")]
    OutputWrite { path: PathBuf, detail: String },
}

impl FileError {
    /// Classify this error for the batch report.
    pub fn kind(&self) -> FailureKind {
        match self {
            FileError::Authentication { .. } | FileError::MissingCredentials { .. } => {
                FailureKind::Authentication
            }
            FileError::OutputWrite { .. } => FailureKind::Output,
            FileError::Page { source, .. } => source.kind(),
            _ => FailureKind::Conversion,
        }
    }

    /// Whether another attempt with identical inputs could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FileError::Timeout { .. } | FileError::Transport { .. } => true,
            FileError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            FileError::Page { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
