//! Batch orchestration tests against in-memory engines.
//!
//! No network and no pdfium: the engine decides each file's outcome from its
//! name, so every scenario is deterministic.

use async_trait::async_trait;
use fichero::{
    BatchConfig, BatchOrchestrator, BatchProgressCallback, CancelToken, ConversionEngine,
    ConversionResult, EngineDocument, ExtensionSet, FailureKind, FicheroError, FileError,
    InputFormat, ModelSelection, NoApiKeys, ProviderRegistry, RequestSpec, StaticKeyResolver,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Outcome by file name:
/// * `timeout*` fails with a timeout
/// * `denied*` fails with HTTP 401
/// * `slow*` succeeds after 80 ms, everything else after 5 ms
#[derive(Default)]
struct NameDrivenEngine {
    calls: AtomicUsize,
    requests: Mutex<Vec<RequestSpec>>,
}

#[async_trait]
impl ConversionEngine for NameDrivenEngine {
    async fn convert(
        &self,
        path: &Path,
        _format: InputFormat,
        request: &RequestSpec,
    ) -> Result<EngineDocument, FileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let delay = if name.starts_with("slow") { 80 } else { 5 };
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if name.starts_with("timeout") {
            return Err(FileError::Timeout {
                secs: request.timeout.as_secs(),
            });
        }
        if name.starts_with("denied") {
            return Err(FileError::Authentication {
                provider: request.provider.clone(),
                status: 401,
                detail: "invalid api key".into(),
            });
        }
        Ok(EngineDocument {
            content: format!("# {name}\n"),
            pages: 1,
        })
    }
}

fn touch(dir: &Path, rel: &str) {
    let p = dir.join(rel);
    if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(p, b"fake").unwrap();
}

fn orchestrator(engine: Arc<NameDrivenEngine>, config: BatchConfig) -> BatchOrchestrator {
    BatchOrchestrator::new(Arc::new(ProviderRegistry::builtin()), engine, config)
}

fn fast_config() -> fichero::BatchConfigBuilder {
    BatchConfig::builder().retry_backoff_ms(1)
}

fn ollama() -> ModelSelection {
    ModelSelection::new("ollama", "qwen2.5vl:7b")
}

fn names(results: &[ConversionResult]) -> Vec<String> {
    results
        .iter()
        .map(|r| r.source_path().file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_folders_filtered_by_extension() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    touch(a.path(), "report.pdf");
    touch(a.path(), "notes.txt");
    touch(b.path(), "scan.png");

    let engine = Arc::new(NameDrivenEngine::default());
    let config = fast_config()
        .extensions(ExtensionSet::new(["pdf", "png"]))
        .build()
        .unwrap();
    let report = orchestrator(engine.clone(), config)
        .run(
            &[a.path().to_path_buf(), b.path().to_path_buf()],
            &ollama(),
            None,
            &NoApiKeys,
        )
        .await
        .unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(report.stats.matched_files, 2);
    assert_eq!(names(&report.results), vec!["report.pdf", "scan.png"]);
    assert_eq!(report.results[0].source_path(), a.path().join("report.pdf"));
    assert!(report.results.iter().all(ConversionResult::is_success));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn non_directory_input_is_fatal() {
    let a = tempfile::tempdir().unwrap();
    touch(a.path(), "report.pdf");
    let not_a_dir = a.path().join("report.pdf");

    let engine = Arc::new(NameDrivenEngine::default());
    let result = orchestrator(engine.clone(), BatchConfig::default())
        .run(&[a.path().to_path_buf(), not_a_dir.clone()], &ollama(), None, &NoApiKeys)
        .await;

    match result {
        Err(FicheroError::InvalidInput { path }) => assert_eq!(path, not_a_dir),
        other => panic!("expected InvalidInput, got {other:?}"),
    }
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_provider_makes_no_calls() {
    let a = tempfile::tempdir().unwrap();
    touch(a.path(), "report.pdf");

    let engine = Arc::new(NameDrivenEngine::default());
    let result = orchestrator(engine.clone(), BatchConfig::default())
        .run(
            &[a.path().to_path_buf()],
            &ModelSelection::new("unknown-provider", "m"),
            None,
            &NoApiKeys,
        )
        .await;

    match result {
        Err(FicheroError::ProviderNotFound { name, known }) => {
            assert_eq!(name, "unknown-provider");
            assert!(known.contains("ollama"));
        }
        other => panic!("expected ProviderNotFound, got {other:?}"),
    }
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_timeout_does_not_stop_the_batch() {
    let a = tempfile::tempdir().unwrap();
    touch(a.path(), "a.png");
    touch(a.path(), "timeout.pdf");
    touch(a.path(), "c.jpg");

    let engine = Arc::new(NameDrivenEngine::default());
    let config = fast_config().max_retries(1).build().unwrap();
    let report = orchestrator(engine.clone(), config)
        .run(&[a.path().to_path_buf()], &ollama(), None, &NoApiKeys)
        .await
        .unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(names(&report.results), vec!["a.png", "c.jpg", "timeout.pdf"]);
    assert_eq!(report.stats.succeeded, 2);
    assert_eq!(report.stats.failed, 1);

    let failure = report.failures().next().unwrap();
    assert_eq!(failure.kind, FailureKind::Conversion);
    assert!(matches!(failure.error, FileError::Timeout { secs: 90 }));
    // Two successes plus the timed-out file tried twice.
    assert_eq!(engine.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn concurrent_order_matches_sequential() {
    let a = tempfile::tempdir().unwrap();
    for name in ["slow1.png", "slow2.png", "x.png", "y.pdf", "nested/z.png"] {
        touch(a.path(), name);
    }
    let folders = [a.path().to_path_buf()];

    let sequential = orchestrator(
        Arc::new(NameDrivenEngine::default()),
        fast_config().concurrency(1).build().unwrap(),
    )
    .run(&folders, &ollama(), None, &NoApiKeys)
    .await
    .unwrap();

    let concurrent = orchestrator(
        Arc::new(NameDrivenEngine::default()),
        fast_config().concurrency(4).build().unwrap(),
    )
    .run(&folders, &ollama(), None, &NoApiKeys)
    .await
    .unwrap();

    let seq: Vec<PathBuf> = sequential.results.iter().map(|r| r.source_path().to_path_buf()).collect();
    let con: Vec<PathBuf> = concurrent.results.iter().map(|r| r.source_path().to_path_buf()).collect();
    assert_eq!(seq.len(), 5);
    assert_eq!(seq, con);
}

#[tokio::test]
async fn empty_and_all_failed_reports_differ() {
    let empty_dir = tempfile::tempdir().unwrap();
    touch(empty_dir.path(), "readme.txt");

    let empty = orchestrator(Arc::new(NameDrivenEngine::default()), BatchConfig::default())
        .run(&[empty_dir.path().to_path_buf()], &ollama(), None, &NoApiKeys)
        .await
        .unwrap();
    assert!(empty.is_empty());
    assert!(!empty.all_failed());
    assert_eq!(empty.stats.matched_files, 0);

    let denied_dir = tempfile::tempdir().unwrap();
    touch(denied_dir.path(), "denied1.png");
    touch(denied_dir.path(), "denied2.pdf");

    let engine = Arc::new(NameDrivenEngine::default());
    let failed = orchestrator(engine.clone(), fast_config().build().unwrap())
        .run(
            &[denied_dir.path().to_path_buf()],
            &ModelSelection::new("dashscope", "qwen-vl-max-latest"),
            None,
            &NoApiKeys,
        )
        .await
        .unwrap();
    assert_eq!(failed.len(), 2);
    assert!(failed.all_failed());
    assert!(failed.failures().all(|f| f.kind == FailureKind::Authentication));
    // Rejected credentials are not retried.
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn key_and_prompt_resolved_once_for_all_jobs() {
    let a = tempfile::tempdir().unwrap();
    touch(a.path(), "one.png");
    touch(a.path(), "two.png");

    let engine = Arc::new(NameDrivenEngine::default());
    let keys = StaticKeyResolver::new().with_key("dashscope", "sk-test");
    orchestrator(engine.clone(), BatchConfig::default())
        .run(
            &[a.path().to_path_buf()],
            &ModelSelection::new("dashscope", "qwen-vl-max-latest"),
            Some("Transcribe tables as GFM."),
            &keys,
        )
        .await
        .unwrap();

    let requests = engine.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
    assert_eq!(requests[0].headers["Authorization"], "Bearer sk-test");
    assert_eq!(requests[0].prompt, "Transcribe tables as GFM.");
    assert_eq!(requests[0].body_params["parameters"]["max_new_tokens"], 400);
}

// ── Cancellation & progress ──────────────────────────────────────────────────

struct CancelAfterFirst(CancelToken);

impl BatchProgressCallback for CancelAfterFirst {
    fn on_file_complete(&self, _index: usize, _total: usize, _path: &Path, _chars: usize) {
        self.0.cancel();
    }
}

#[tokio::test]
async fn cancellation_returns_partial_report() {
    let a = tempfile::tempdir().unwrap();
    for name in ["1.png", "2.png", "3.png", "4.png"] {
        touch(a.path(), name);
    }

    let token = CancelToken::new();
    let config = BatchConfig::builder()
        .concurrency(1)
        .progress_callback(Arc::new(CancelAfterFirst(token.clone())))
        .build()
        .unwrap();
    let engine = Arc::new(NameDrivenEngine::default());
    let report = orchestrator(engine.clone(), config)
        .run_with_cancel(&[a.path().to_path_buf()], &ollama(), None, &NoApiKeys, &token)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.len(), 1);
    assert_eq!(report.stats.matched_files, 4);
    assert_eq!(report.stats.skipped, 3);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_before_start_schedules_nothing() {
    let a = tempfile::tempdir().unwrap();
    touch(a.path(), "1.png");
    touch(a.path(), "2.png");

    let token = CancelToken::new();
    token.cancel();
    let engine = Arc::new(NameDrivenEngine::default());
    let report = orchestrator(engine.clone(), BatchConfig::default())
        .run_with_cancel(&[a.path().to_path_buf()], &ollama(), None, &NoApiKeys, &token)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.is_empty());
    assert_eq!(report.stats.skipped, 2);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    errored: AtomicUsize,
    batch_total: AtomicUsize,
}

impl BatchProgressCallback for Counting {
    fn on_batch_start(&self, total: usize) {
        self.batch_total.store(total, Ordering::SeqCst);
    }
    fn on_file_start(&self, _index: usize, _total: usize, _path: &Path) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_complete(&self, _index: usize, _total: usize, _path: &Path, _chars: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_error(&self, _index: usize, _total: usize, _path: &Path, _error: &str) {
        self.errored.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_events_cover_every_file() {
    let a = tempfile::tempdir().unwrap();
    for name in ["a.png", "b.png", "denied.png", "sub/c.pdf"] {
        touch(a.path(), name);
    }

    let counter = Arc::new(Counting::default());
    let config = fast_config()
        .concurrency(3)
        .progress_callback(counter.clone())
        .build()
        .unwrap();
    orchestrator(Arc::new(NameDrivenEngine::default()), config)
        .run(&[a.path().to_path_buf()], &ollama(), None, &NoApiKeys)
        .await
        .unwrap();

    assert_eq!(counter.batch_total.load(Ordering::SeqCst), 4);
    assert_eq!(counter.started.load(Ordering::SeqCst), 4);
    assert_eq!(counter.completed.load(Ordering::SeqCst), 3);
    assert_eq!(counter.errored.load(Ordering::SeqCst), 1);
}

// ── Output target ────────────────────────────────────────────────────────────

#[tokio::test]
async fn output_dir_mirrors_input_layout() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    touch(input.path(), "2024/q1/report.pdf");
    touch(input.path(), "cover.png");

    let config = fast_config().output_dir(out.path()).build().unwrap();
    let report = orchestrator(Arc::new(NameDrivenEngine::default()), config)
        .run(&[input.path().to_path_buf()], &ollama(), None, &NoApiKeys)
        .await
        .unwrap();

    let root = out.path().join(input.path().file_name().unwrap());
    assert_eq!(
        std::fs::read_to_string(root.join("2024/q1/report.pdf.md")).unwrap(),
        "# report.pdf\n"
    );
    assert!(root.join("cover.png.md").is_file());
    assert!(report
        .successes()
        .all(|d| d.metadata.output_path.as_ref().is_some_and(|p| p.is_file())));
}

#[tokio::test]
async fn unwritable_output_becomes_output_failure() {
    let input = tempfile::tempdir().unwrap();
    touch(input.path(), "cover.png");
    let scratch = tempfile::tempdir().unwrap();
    let blocker = scratch.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();

    let config = fast_config().output_dir(&blocker).build().unwrap();
    let report = orchestrator(Arc::new(NameDrivenEngine::default()), config)
        .run(&[input.path().to_path_buf()], &ollama(), None, &NoApiKeys)
        .await
        .unwrap();

    assert_eq!(report.len(), 1);
    let failure = report.failures().next().unwrap();
    assert_eq!(failure.kind, FailureKind::Output);
    assert!(matches!(failure.error, FileError::OutputWrite { .. }));
}

#[tokio::test]
async fn same_named_folders_keep_separate_outputs() {
    let base = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let first = base.path().join("a/scans");
    let second = base.path().join("b/scans");
    touch(&first, "doc.pdf");
    touch(&second, "doc.pdf");

    for concurrency in [1, 4] {
        let config = fast_config()
            .output_dir(out.path().join(concurrency.to_string()))
            .concurrency(concurrency)
            .build()
            .unwrap();
        let report = orchestrator(Arc::new(NameDrivenEngine::default()), config)
            .run(&[first.clone(), second.clone()], &ollama(), None, &NoApiKeys)
            .await
            .unwrap();

        assert_eq!(report.stats.succeeded, 2, "concurrency {concurrency}");
        let written: Vec<PathBuf> = report
            .successes()
            .map(|d| d.metadata.output_path.clone().unwrap())
            .collect();
        let root = out.path().join(concurrency.to_string());
        assert_eq!(
            written,
            vec![
                root.join("scans-1/doc.pdf.md"),
                root.join("scans-2/doc.pdf.md"),
            ]
        );
        assert!(written.iter().all(|p| p.is_file()));
    }
}

// ── Engine-declared formats ──────────────────────────────────────────────────

/// Declares GIF on top of PDF and nothing else.
#[derive(Default)]
struct GifEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl ConversionEngine for GifEngine {
    async fn convert(
        &self,
        path: &Path,
        format: InputFormat,
        _request: &RequestSpec,
    ) -> Result<EngineDocument, FileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EngineDocument {
            content: format!("{:?} {}\n", format, path.display()),
            pages: 1,
        })
    }

    fn supported_extensions(&self) -> ExtensionSet {
        ExtensionSet::new(["pdf", "gif"])
    }
}

#[tokio::test]
async fn engine_declared_format_is_converted() {
    let input = tempfile::tempdir().unwrap();
    touch(input.path(), "fig.gif");
    touch(input.path(), "scan.png");

    let engine = Arc::new(GifEngine::default());
    let config = fast_config().build().unwrap();
    let report = BatchOrchestrator::new(Arc::new(ProviderRegistry::builtin()), engine.clone(), config)
        .run(&[input.path().to_path_buf()], &ollama(), None, &NoApiKeys)
        .await
        .unwrap();

    assert_eq!(names(&report.results), vec!["fig.gif"]);
    assert!(report.results[0].is_success());
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn extension_filter_outside_engine_set_is_rejected() {
    let input = tempfile::tempdir().unwrap();
    touch(input.path(), "fig.gif");

    let engine = Arc::new(NameDrivenEngine::default());
    let config = fast_config()
        .extensions(ExtensionSet::parse("gif"))
        .build()
        .unwrap();
    let err = orchestrator(engine.clone(), config)
        .run(&[input.path().to_path_buf()], &ollama(), None, &NoApiKeys)
        .await
        .unwrap_err();

    assert!(matches!(err, FicheroError::InvalidConfig(_)), "got {err:?}");
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}
