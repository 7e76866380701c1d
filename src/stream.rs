//! Streaming batch API: emit results as files complete.
//!
//! [`BatchOrchestrator::run`] returns only after the last file. For long runs
//! [`BatchOrchestrator::run_stream`] yields `(index, result)` pairs as each
//! file finishes, so callers can show progress or write output incrementally.
//! With `concurrency > 1` items arrive in completion order; `index` is the
//! position the result would have in a [`crate::output::BatchReport`].

use crate::error::FicheroError;
use crate::orchestrator::BatchOrchestrator;
use crate::output::ConversionResult;
use crate::provider::ModelSelection;
use crate::secrets::ApiKeyResolver;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of indexed file results.
pub type ResultStream = Pin<Box<dyn Stream<Item = (usize, ConversionResult)> + Send>>;

impl BatchOrchestrator {
    /// Like [`BatchOrchestrator::run`], but streaming.
    ///
    /// The same fatal checks run before the stream is returned. The stream
    /// owns everything it needs; dropping it stops scheduling further files.
    pub fn run_stream(
        &self,
        folders: &[PathBuf],
        selection: &ModelSelection,
        prompt_override: Option<&str>,
        keys: &dyn ApiKeyResolver,
    ) -> Result<ResultStream, FicheroError> {
        let jobs = self.prepare(folders, selection, prompt_override, keys)?.jobs;
        let total = jobs.len();
        info!("Streaming conversion of {} files", total);
        self.callback().on_batch_start(total);

        let this = self.clone();
        let invoker = self.invoker();
        let concurrency = self.config().concurrency;

        let s = stream::iter(jobs.into_iter().enumerate())
            .map(move |(index, planned)| {
                let this = this.clone();
                let invoker = invoker.clone();
                async move {
                    let result = this.process(&invoker, index, total, &planned).await;
                    (index, result)
                }
            })
            .buffer_unordered(concurrency);

        Ok(Box::pin(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::engine::{ConversionEngine, EngineDocument, InputFormat};
    use crate::error::FileError;
    use crate::provider::ProviderRegistry;
    use crate::request::RequestSpec;
    use crate::secrets::NoApiKeys;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;

    struct Upper;

    #[async_trait]
    impl ConversionEngine for Upper {
        async fn convert(
            &self,
            path: &Path,
            _format: InputFormat,
            _request: &RequestSpec,
        ) -> Result<EngineDocument, FileError> {
            let name = path.file_name().unwrap().to_string_lossy().to_uppercase();
            if name.starts_with("BAD") {
                return Err(FileError::HttpStatus {
                    status: 400,
                    body: "bad image".into(),
                });
            }
            Ok(EngineDocument {
                content: name,
                pages: 1,
            })
        }
    }

    #[tokio::test]
    async fn stream_yields_every_file_once() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["a.png", "bad.png", "c.pdf", "skip.txt"] {
            std::fs::write(tmp.path().join(name), b"x").unwrap();
        }

        let orch = BatchOrchestrator::new(
            Arc::new(ProviderRegistry::builtin()),
            Arc::new(Upper),
            BatchConfig::builder().concurrency(3).build().unwrap(),
        );
        let stream = orch
            .run_stream(
                &[tmp.path().to_path_buf()],
                &ModelSelection::new("ollama", "llava"),
                None,
                &NoApiKeys,
            )
            .unwrap();

        let mut items: Vec<(usize, ConversionResult)> = stream.collect().await;
        items.sort_by_key(|(i, _)| *i);

        let indices: Vec<usize> = items.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(items[0].1.is_success());
        assert!(!items[1].1.is_success());
        assert!(items[2].1.is_success());
    }

    #[test]
    fn invalid_folder_fails_before_streaming() {
        let orch = BatchOrchestrator::new(
            Arc::new(ProviderRegistry::builtin()),
            Arc::new(Upper),
            BatchConfig::default(),
        );
        let result = orch.run_stream(
            &[PathBuf::from("/definitely/not/here")],
            &ModelSelection::new("ollama", "llava"),
            None,
            &NoApiKeys,
        );
        assert!(matches!(result, Err(FicheroError::InvalidInput { .. })));
    }
}
