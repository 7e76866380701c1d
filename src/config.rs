//! Configuration types for batch conversion.
//!
//! All batch behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. The provider table is *not* part of this struct:
//! it lives in [`crate::provider::ProviderRegistry`] and is passed to the
//! orchestrator separately so each run reads an explicit snapshot.

use crate::error::FicheroError;
use crate::progress::ProgressCallback;
use crate::walker::ExtensionSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Configuration for a batch conversion run.
///
/// # Example
/// ```rust
/// use fichero::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .concurrency(8)
///     .max_retries(1)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 8);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Number of files converted at once. Default: 4.
    ///
    /// Remote endpoints behind institutional gateways often allow only a few
    /// requests per second; 4 keeps throughput reasonable without tripping
    /// their limits. `1` runs the sequential path.
    pub concurrency: usize,

    /// Retry attempts per file on a transient failure. Default: 2.
    ///
    /// Timeouts, transport errors, 429 and 5xx are retried; rejected
    /// credentials are not.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Reject a missing API key before calling a provider that needs one.
    /// Default: false, in which case the call goes out without an auth
    /// header and the endpoint's 401 is recorded as an authentication failure.
    pub require_api_key: bool,

    /// Upper bound on one whole-file conversion, in seconds. Default: None.
    ///
    /// The per-call timeout of each provider still applies to every HTTP
    /// request; this guards multi-page documents as a whole.
    pub file_timeout_secs: Option<u64>,

    /// Extra body parameters merged into every request. Family-fixed keys win.
    pub extra_params: Map<String, Value>,

    /// Format the engine is asked to return. Default: Markdown.
    pub response_format: ResponseFormat,

    /// Restrict the walk to these extensions instead of the engine's set.
    pub extensions: Option<ExtensionSet>,

    /// Write each converted document below this directory. Default: None.
    pub output_dir: Option<PathBuf>,

    /// Longest edge, in pixels, of any image sent to the VLM. Default: 2000.
    pub max_image_pixels: u32,

    /// Optional per-file progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 2,
            retry_backoff_ms: 500,
            require_api_key: false,
            file_timeout_secs: None,
            extra_params: Map::new(),
            response_format: ResponseFormat::default(),
            extensions: None,
            output_dir: None,
            max_image_pixels: 2000,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("require_api_key", &self.require_api_key)
            .field("file_timeout_secs", &self.file_timeout_secs)
            .field("extra_params", &self.extra_params)
            .field("response_format", &self.response_format)
            .field("extensions", &self.extensions)
            .field("output_dir", &self.output_dir)
            .field("max_image_pixels", &self.max_image_pixels)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn require_api_key(mut self, v: bool) -> Self {
        self.config.require_api_key = v;
        self
    }

    pub fn file_timeout_secs(mut self, secs: u64) -> Self {
        self.config.file_timeout_secs = Some(secs);
        self
    }

    pub fn extra_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.extra_params.insert(key.into(), value);
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.config.response_format = format;
        self
    }

    pub fn extensions(mut self, set: ExtensionSet) -> Self {
        self.config.extensions = Some(set);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn max_image_pixels(mut self, px: u32) -> Self {
        self.config.max_image_pixels = px.max(100);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, FicheroError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(FicheroError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.file_timeout_secs == Some(0) {
            return Err(FicheroError::InvalidConfig(
                "File timeout must be ≥ 1 second".into(),
            ));
        }
        if let Some(ref set) = c.extensions {
            if set.is_empty() {
                return Err(FicheroError::InvalidConfig(
                    "Extension filter is empty; no file could ever match".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the VLM is asked to produce and how its answer is cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Markdown; fences, invisible characters and blank-line runs are cleaned. (default)
    #[default]
    Markdown,
    /// Plain text; only line endings and surrounding whitespace are normalised.
    Text,
}

impl ResponseFormat {
    /// File extension used when writing documents in this format.
    pub fn file_extension(self) -> &'static str {
        match self {
            ResponseFormat::Markdown => "md",
            ResponseFormat::Text => "txt",
        }
    }
}
