//! The conversion-engine boundary.
//!
//! The batch core never parses documents itself. It hands each file, its
//! input-format classification and a [`RequestSpec`] to a [`ConversionEngine`]
//! and gets back either the extracted text or a [`FileError`]. The default
//! engine is [`crate::pipeline::HttpVlmEngine`]; tests plug in in-memory ones.

use crate::error::FileError;
use crate::request::RequestSpec;
use crate::walker::ExtensionSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Extensions the default engine converts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp"];

/// Input classification derived from the file extension.
///
/// Both variants go through the same remote pipeline; the engine only needs
/// to know whether pages must be rasterised first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    Pdf,
    Image,
}

impl InputFormat {
    /// Classify against the extensions an engine declares: `pdf` needs
    /// rasterising, every other declared extension is sent as an image.
    /// `None` when the extension is not in `supported`.
    pub fn classify(path: &Path, supported: &ExtensionSet) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if !supported.contains(&ext) {
            return None;
        }
        Some(if ext == "pdf" { InputFormat::Pdf } else { InputFormat::Image })
    }
}

/// What an engine returns for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDocument {
    /// Extracted content in the requested response format.
    pub content: String,
    /// Pages sent to the model (1 for images).
    pub pages: usize,
}

/// A capability that turns one file into text via a remote VLM.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Convert `path` using the transport parameters in `request`.
    async fn convert(
        &self,
        path: &Path,
        format: InputFormat,
        request: &RequestSpec,
    ) -> Result<EngineDocument, FileError>;

    /// Extensions this engine accepts. The walker filters on exactly this set
    /// unless the batch config narrows it.
    fn supported_extensions(&self) -> ExtensionSet {
        ExtensionSet::new(SUPPORTED_EXTENSIONS)
    }
}
