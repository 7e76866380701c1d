//! Batch orchestration: walk folders, convert every match, keep the order.
//!
//! ## Flow
//!
//! ```text
//! folders ──▶ validate ──▶ resolve provider ──▶ walk ──▶ jobs ──▶ invoker ──▶ BatchReport
//!             (fatal)      (fatal, no calls)    (sorted)          (per-file
//!                                                                  outcomes)
//! ```
//!
//! Everything before the first engine call can abort the run with a
//! [`FicheroError`]. After that, file failures are recorded and the run
//! continues. Results land in slots indexed by enumeration position, so the
//! report order is the same whether files ran one at a time or concurrently.

use crate::config::BatchConfig;
use crate::engine::ConversionEngine;
use crate::error::FicheroError;
use crate::invoker::{ConversionInvoker, ConversionJob};
use crate::output::{self, BatchReport, BatchStats, ConversionResult};
use crate::progress::{BatchProgressCallback, NoopProgressCallback};
use crate::provider::{ModelSelection, ProviderRegistry};
use crate::request::RequestSpec;
use crate::secrets::ApiKeyResolver;
use crate::walker::BatchWalker;
use futures::future;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Cooperative cancellation for a running batch.
///
/// Cancelling stops new files from being scheduled. Files already handed to
/// the engine finish, and their results are kept.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a run would do, without calling any endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPlan {
    pub files: Vec<PathBuf>,
    /// The shared request with credentials masked.
    pub request: RequestSpec,
}

/// A job paired with the input folder it was found under.
#[derive(Debug, Clone)]
pub(crate) struct PlannedJob {
    pub job: ConversionJob,
    pub folder: PathBuf,
    /// Subdirectory of the output dir that mirrors `folder`.
    pub output_root: PathBuf,
}

/// Jobs for a run plus the key they all share.
#[derive(Debug)]
pub(crate) struct PreparedRun {
    pub jobs: Vec<PlannedJob>,
    pub api_key: Option<String>,
}

/// Drives the walker and invoker over a set of folders.
#[derive(Clone)]
pub struct BatchOrchestrator {
    registry: Arc<ProviderRegistry>,
    engine: Arc<dyn ConversionEngine>,
    config: Arc<BatchConfig>,
}

impl BatchOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        engine: Arc<dyn ConversionEngine>,
        config: BatchConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Walker filtering on the configured extensions, else the engine's.
    ///
    /// A configured filter must be a subset of what the engine declares;
    /// anything else would match files that can only fail.
    pub fn walker(&self) -> Result<BatchWalker, FicheroError> {
        let supported = self.engine.supported_extensions();
        let Some(ref configured) = self.config.extensions else {
            return Ok(BatchWalker::new(supported));
        };
        let unsupported: Vec<&str> = configured.outside(&supported).collect();
        if !unsupported.is_empty() {
            return Err(FicheroError::InvalidConfig(format!(
                "Extensions not supported by the engine: {} (supported: {})",
                unsupported.join(", "),
                supported.iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(BatchWalker::new(configured.clone()))
    }

    pub(crate) fn invoker(&self) -> ConversionInvoker {
        ConversionInvoker::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.engine),
            Arc::clone(&self.config),
        )
    }

    pub(crate) fn callback(&self) -> Arc<dyn BatchProgressCallback> {
        self.config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback))
    }

    /// Convert every matching file under `folders`.
    ///
    /// Fails before any conversion when a folder is not a directory or the
    /// selected provider is unknown. Otherwise returns one result per matched
    /// file, in folder-then-traversal order.
    pub async fn run(
        &self,
        folders: &[PathBuf],
        selection: &ModelSelection,
        prompt_override: Option<&str>,
        keys: &dyn ApiKeyResolver,
    ) -> Result<BatchReport, FicheroError> {
        self.run_with_cancel(folders, selection, prompt_override, keys, &CancelToken::new())
            .await
    }

    /// [`BatchOrchestrator::run`] that stops scheduling once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        folders: &[PathBuf],
        selection: &ModelSelection,
        prompt_override: Option<&str>,
        keys: &dyn ApiKeyResolver,
        cancel: &CancelToken,
    ) -> Result<BatchReport, FicheroError> {
        let start = Instant::now();
        let jobs = self.prepare(folders, selection, prompt_override, keys)?.jobs;
        let total = jobs.len();
        let concurrency = self.config.concurrency;

        info!(
            "Converting {} files from {} folders with {}/{} (concurrency {})",
            total,
            folders.len(),
            selection.provider,
            selection.model,
            concurrency
        );

        let callback = self.callback();
        callback.on_batch_start(total);

        let invoker = self.invoker();
        let mut slots: Vec<Option<ConversionResult>> = vec![None; total];

        if concurrency == 1 {
            for (index, planned) in jobs.iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                slots[index] = Some(self.process(&invoker, index, total, planned).await);
            }
        } else {
            let mut completed = stream::iter(jobs.iter().enumerate())
                .take_while(|_| future::ready(!cancel.is_cancelled()))
                .map(|(index, planned)| {
                    let invoker = &invoker;
                    async move { (index, self.process(invoker, index, total, planned).await) }
                })
                .buffer_unordered(concurrency);
            while let Some((index, result)) = completed.next().await {
                slots[index] = Some(result);
            }
        }

        let results: Vec<ConversionResult> = slots.into_iter().flatten().collect();
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let stats = BatchStats {
            matched_files: total,
            succeeded,
            failed: results.len() - succeeded,
            skipped: total - results.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        let cancelled = cancel.is_cancelled();

        callback.on_batch_complete(total, succeeded);
        if cancelled {
            warn!("Batch cancelled: {} of {} files skipped", stats.skipped, total);
        }
        info!(
            "Batch done: {} succeeded, {} failed in {}ms",
            stats.succeeded, stats.failed, stats.duration_ms
        );

        Ok(BatchReport {
            results,
            stats,
            cancelled,
        })
    }

    /// Validate, resolve and walk without converting anything.
    pub fn plan(
        &self,
        folders: &[PathBuf],
        selection: &ModelSelection,
        prompt_override: Option<&str>,
        keys: &dyn ApiKeyResolver,
    ) -> Result<BatchPlan, FicheroError> {
        let prepared = self.prepare(folders, selection, prompt_override, keys)?;
        let request = self
            .invoker()
            .build_request(selection, prompt_override, prepared.api_key.as_deref())
            .map_err(|e| FicheroError::InvalidConfig(e.to_string()))?;
        Ok(BatchPlan {
            files: prepared.jobs.into_iter().map(|p| p.job.path).collect(),
            request: request.redacted(),
        })
    }

    /// Fatal checks, then one job per matched file.
    ///
    /// Prompt and key are resolved once here and shared by every job.
    pub(crate) fn prepare(
        &self,
        folders: &[PathBuf],
        selection: &ModelSelection,
        prompt_override: Option<&str>,
        keys: &dyn ApiKeyResolver,
    ) -> Result<PreparedRun, FicheroError> {
        BatchWalker::validate(folders)?;
        self.registry.resolve(&selection.provider)?;
        let walker = self.walker()?;

        let prompt = prompt_override.map(str::to_string);
        let api_key = keys.resolve(&selection.provider);

        let roots = output::output_roots(folders);
        let jobs = walker
            .collect(folders)?
            .into_iter()
            .map(|f| PlannedJob {
                folder: folders[f.folder_index].clone(),
                output_root: roots[f.folder_index].clone(),
                job: ConversionJob::new(f.path, selection.clone())
                    .with_prompt(prompt.clone())
                    .with_api_key(api_key.clone()),
            })
            .collect();
        Ok(PreparedRun { jobs, api_key })
    }

    /// Convert one job, write it out if configured, fire progress events.
    pub(crate) async fn process(
        &self,
        invoker: &ConversionInvoker,
        index: usize,
        total: usize,
        planned: &PlannedJob,
    ) -> ConversionResult {
        let callback = self.callback();
        let path = planned.job.path.as_path();
        callback.on_file_start(index, total, path);

        let mut result = invoker.convert(&planned.job).await;
        if let Some(ref out_dir) = self.config.output_dir {
            result = self.write_output(result, out_dir, planned).await;
        }

        match &result {
            ConversionResult::Success(doc) => {
                callback.on_file_complete(index, total, path, doc.content.chars().count())
            }
            ConversionResult::Failure(f) => callback.on_file_error(index, total, path, &f.message),
        }
        result
    }

    async fn write_output(
        &self,
        result: ConversionResult,
        out_dir: &Path,
        planned: &PlannedJob,
    ) -> ConversionResult {
        let mut doc = match result {
            ConversionResult::Success(doc) => doc,
            failure => return failure,
        };
        let target = output::output_path_for(
            out_dir,
            &planned.output_root,
            &planned.folder,
            &doc.source_path,
            self.config.response_format.file_extension(),
        );
        match output::write_document(&target, &doc.content).await {
            Ok(()) => {
                doc.metadata.output_path = Some(target);
                ConversionResult::Success(doc)
            }
            Err(e) => {
                warn!("{}: {}", doc.source_path.display(), e);
                ConversionResult::failed(doc.source_path, e)
            }
        }
    }
}
