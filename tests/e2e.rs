//! Live end-to-end run against a real provider.
//!
//! Gated behind `E2E_ENABLED` so CI never calls out. Point it at a folder of
//! sample files and pick the model:
//!
//!   E2E_ENABLED=1 E2E_FOLDER=./samples E2E_PROVIDER=ollama E2E_MODEL=qwen2.5vl:7b \
//!     cargo test --test e2e -- --nocapture
//!
//! PDFs additionally need `PDFIUM_LIB_PATH`.

use fichero::{
    BatchConfig, BatchOrchestrator, EnvKeyResolver, HttpVlmEngine, ModelSelection,
    ProviderRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;

macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        match std::env::var("E2E_FOLDER") {
            Ok(f) if PathBuf::from(&f).is_dir() => PathBuf::from(f),
            _ => {
                println!("SKIP: E2E_FOLDER must name a directory");
                return;
            }
        }
    }};
}

#[tokio::test]
async fn live_batch_produces_markdown() {
    let folder = e2e_skip_unless_ready!();
    let provider = std::env::var("E2E_PROVIDER").unwrap_or_else(|_| "ollama".into());
    let model = std::env::var("E2E_MODEL").unwrap_or_else(|_| "qwen2.5vl:7b".into());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("fichero=debug"))
        .with_test_writer()
        .try_init();

    let registry = Arc::new(ProviderRegistry::builtin());
    let keys = EnvKeyResolver::from_registry(&registry);
    let config = BatchConfig::builder().concurrency(2).build().unwrap();
    let engine = Arc::new(HttpVlmEngine::new(config.max_image_pixels).unwrap());

    let report = BatchOrchestrator::new(registry, engine, config)
        .run(&[folder], &ModelSelection::new(provider, model), None, &keys)
        .await
        .unwrap();

    for failure in report.failures() {
        println!("FAILED {}: {}", failure.source_path.display(), failure.message);
    }
    assert!(!report.is_empty(), "no supported files in E2E_FOLDER");
    assert!(!report.all_failed(), "every file failed");

    for doc in report.successes() {
        assert!(!doc.content.trim().is_empty(), "{} is empty", doc.source_path.display());
        assert!(doc.content.ends_with('\n'));
        assert!(!doc.content.trim_start().starts_with("```markdown"));
    }
}
