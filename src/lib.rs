//! # fichero
//!
//! Batch-convert folders of PDFs and images into Markdown through remote
//! vision-language-model (VLM) endpoints.
//!
//! ## Pipeline Overview
//!
//! ```text
//! folders
//!  │
//!  ├─ 1. Walk      recursive, sorted, extension-filtered       (walker)
//!  ├─ 2. Resolve   provider name → endpoint descriptor         (provider)
//!  ├─ 3. Build     family-specific URL, headers, body          (request)
//!  ├─ 4. Invoke    engine call with retries and timeouts       (invoker)
//!  │     └─ render → encode → chat/completions → cleanup       (pipeline)
//!  └─ 5. Report    ordered results, successes and failures     (orchestrator)
//! ```
//!
//! Three provider families are built in: a local Ollama server (no auth),
//! DashScope (bearer token) and an Azure-style institutional sandbox
//! (`api-key` header). More can be registered at runtime.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fichero::{BatchConfig, BatchOrchestrator, EnvKeyResolver, HttpVlmEngine,
//!               ModelSelection, ProviderRegistry};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(ProviderRegistry::builtin());
//!     let config = BatchConfig::builder().output_dir("converted").build()?;
//!     let engine = Arc::new(HttpVlmEngine::new(config.max_image_pixels)?);
//!     let keys = EnvKeyResolver::from_registry(&registry);
//!
//!     let orchestrator = BatchOrchestrator::new(registry, engine, config);
//!     let report = orchestrator
//!         .run(
//!             &[PathBuf::from("scans")],
//!             &ModelSelection::new("dashscope", "qwen-vl-max-latest"),
//!             None,
//!             &keys,
//!         )
//!         .await?;
//!
//!     eprintln!("{} converted, {} failed", report.stats.succeeded, report.stats.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fichero` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! fichero = { version = "0.1", default-features = false }
//! ```
//!
//! ## PDF rendering
//!
//! PDF pages are rasterised with pdfium, bound at runtime. Set
//! `PDFIUM_LIB_PATH` to the directory holding the shared library, or install
//! it where the system loader finds it. Image inputs do not need pdfium.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod request;
pub mod secrets;
pub mod stream;
pub mod walker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use catalog::{ModelCatalog, ModelRecord};
pub use config::{BatchConfig, BatchConfigBuilder, ResponseFormat};
pub use engine::{ConversionEngine, EngineDocument, InputFormat, SUPPORTED_EXTENSIONS};
pub use error::{FailureKind, FicheroError, FileError};
pub use invoker::{ConversionInvoker, ConversionJob};
pub use orchestrator::{BatchOrchestrator, BatchPlan, CancelToken};
pub use output::{BatchReport, BatchStats, ConversionResult, ConvertedDocument, DocumentMetadata, FileFailure};
pub use pipeline::HttpVlmEngine;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::DEFAULT_PROMPT;
pub use provider::{EndpointDescriptor, ModelSelection, ProviderDefinition, ProviderFamily, ProviderRegistry};
pub use request::{RequestBuilder, RequestSpec};
pub use secrets::{ApiKeyResolver, EnvKeyResolver, KeyChain, NoApiKeys, StaticKeyResolver};
pub use stream::ResultStream;
pub use walker::{BatchWalker, ExtensionSet, WalkedFile};
