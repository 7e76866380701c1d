//! Progress-callback trait for per-file batch events.
//!
//! Inject an `Arc<dyn BatchProgressCallback>` via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to follow a run as
//! files are converted. Callers forward events wherever they like: a terminal
//! progress bar, a channel, a log line.
//!
//! # Example
//!
//! ```rust
//! use fichero::{BatchConfig, BatchProgressCallback};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl BatchProgressCallback for Counter {
//!     fn on_file_complete(&self, _index: usize, total: usize, path: &Path, chars: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("[{done}/{total}] {} ({chars} chars)", path.display());
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as it processes each file.
///
/// All methods default to no-ops. With `concurrency > 1` the per-file
/// methods are called from concurrently running jobs, so shared state needs
/// `Mutex` or atomics. `index` is the file's slot in the report (0-based).
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after the walk, before any file is converted.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called just before a file is handed to the engine.
    fn on_file_start(&self, index: usize, total_files: usize, path: &Path) {
        let _ = (index, total_files, path);
    }

    /// Called when a file converted; `chars` is the content length in chars.
    fn on_file_complete(&self, index: usize, total_files: usize, path: &Path, chars: usize) {
        let _ = (index, total_files, path, chars);
    }

    /// Called when a file failed after all retries.
    fn on_file_error(&self, index: usize, total_files: usize, path: &Path, error: &str) {
        let _ = (index, total_files, path, error);
    }

    /// Called once after every scheduled file finished.
    fn on_batch_complete(&self, total_files: usize, succeeded: usize) {
        let _ = (total_files, succeeded);
    }
}

/// Default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
