//! Single-file conversion: build the request, call the engine, map the outcome.
//!
//! ## Retry Strategy
//!
//! Remote VLM endpoints time out and rate-limit under batch load. Failures
//! that [`FileError::is_retryable`] accepts (timeouts, transport errors, 429,
//! 5xx) are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`). Rejected or missing credentials are
//! returned at once: the same key will be rejected again.
//!
//! [`ConversionInvoker::convert`] never returns an error and never panics on
//! engine failures. Every outcome, good or bad, becomes a [`ConversionResult`].

use crate::config::BatchConfig;
use crate::engine::{ConversionEngine, EngineDocument, InputFormat};
use crate::error::FileError;
use crate::output::{ConversionResult, ConvertedDocument, DocumentMetadata};
use crate::provider::{ModelSelection, ProviderRegistry};
use crate::request::{RequestBuilder, RequestSpec};
use crate::walker::ExtensionSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// One unit of work: a file plus everything needed to call its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub path: PathBuf,
    pub selection: ModelSelection,
    /// Overrides the provider's default prompt.
    pub prompt: Option<String>,
    pub api_key: Option<String>,
}

impl ConversionJob {
    pub fn new(path: impl Into<PathBuf>, selection: ModelSelection) -> Self {
        Self {
            path: path.into(),
            selection,
            prompt: None,
            api_key: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }
}

/// Executes [`ConversionJob`]s against a [`ConversionEngine`].
///
/// Cheap to clone: registry, engine and config are shared.
#[derive(Clone)]
pub struct ConversionInvoker {
    registry: Arc<ProviderRegistry>,
    engine: Arc<dyn ConversionEngine>,
    config: Arc<BatchConfig>,
    supported: ExtensionSet,
}

impl ConversionInvoker {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        engine: Arc<dyn ConversionEngine>,
        config: Arc<BatchConfig>,
    ) -> Self {
        let supported = engine.supported_extensions();
        Self {
            registry,
            engine,
            config,
            supported,
        }
    }

    /// Resolve the selection and build the request every job of a run shares.
    pub fn build_request(
        &self,
        selection: &ModelSelection,
        prompt: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<RequestSpec, FileError> {
        let endpoint = self
            .registry
            .endpoint(selection)
            .map_err(|_| FileError::ProviderNotFound {
                name: selection.provider.clone(),
            })?;
        let builder = RequestBuilder::for_family(endpoint.family);
        let extra = &self.config.extra_params;
        let format = self.config.response_format;
        if self.config.require_api_key {
            builder.build_strict(&endpoint, prompt, api_key, extra, format)
        } else {
            Ok(builder.build(&endpoint, prompt, api_key, extra, format))
        }
    }

    /// Convert one file. Always returns a result for `job.path`.
    pub async fn convert(&self, job: &ConversionJob) -> ConversionResult {
        let start = Instant::now();

        let prepared = classify(&job.path, &self.supported).and_then(|format| {
            self.build_request(&job.selection, job.prompt.as_deref(), job.api_key.as_deref())
                .map(|request| (format, request))
        });
        let (format, request) = match prepared {
            Ok(p) => p,
            Err(e) => {
                warn!("{}: {}", job.path.display(), e);
                return ConversionResult::failed(&job.path, e);
            }
        };

        let max_retries = self.config.max_retries;
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let backoff = backoff_delay(self.config.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    job.path.display(),
                    attempt,
                    max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            match self.call_engine(&job.path, format, &request).await {
                Ok(doc) => {
                    let duration = start.elapsed();
                    debug!(
                        "{}: {} pages, {} chars in {:?}",
                        job.path.display(),
                        doc.pages,
                        doc.content.chars().count(),
                        duration
                    );
                    return ConversionResult::Success(ConvertedDocument {
                        source_path: job.path.clone(),
                        content: doc.content,
                        metadata: DocumentMetadata {
                            provider: request.provider.clone(),
                            model: job.selection.model.clone(),
                            input_format: format,
                            pages: doc.pages,
                            duration_ms: duration.as_millis() as u64,
                            retries: attempt,
                            output_path: None,
                        },
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    warn!("{}: attempt {} failed: {}", job.path.display(), attempt + 1, e);
                    attempt += 1;
                }
                Err(e) => {
                    warn!("{}: {}", job.path.display(), e);
                    return ConversionResult::failed(&job.path, e);
                }
            }
        }
    }

    async fn call_engine(
        &self,
        path: &Path,
        format: InputFormat,
        request: &RequestSpec,
    ) -> Result<EngineDocument, FileError> {
        let call = self.engine.convert(path, format, request);
        match self.config.file_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), call)
                .await
                .unwrap_or(Err(FileError::Timeout { secs })),
            None => call.await,
        }
    }
}

fn classify(path: &Path, supported: &ExtensionSet) -> Result<InputFormat, FileError> {
    InputFormat::classify(path, supported).ok_or_else(|| FileError::UnsupportedFormat {
        extension: path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default(),
    })
}

/// `base_ms * 2^(attempt-1)`, saturating.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(factor))
}
