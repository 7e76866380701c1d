//! The default conversion engine: render → encode → VLM → post-process.
//!
//! ## Data Flow
//!
//! ```text
//! file ──▶ render ──▶ encode ──▶ llm ──▶ postprocess ──▶ EngineDocument
//!          (pdfium,   (base64    (HTTP   (cleanup,
//!           PDF only)  data URI)  POST)   page join)
//! ```
//!
//! 1. [`render`]: rasterise PDF pages in `spawn_blocking`
//! 2. [`encode`]: base64-wrap page bitmaps or image files, downscaling
//!    anything over the pixel cap
//! 3. [`llm`]: one `chat/completions` call per page; the only stage with
//!    network I/O
//! 4. [`postprocess`]: deterministic cleanup of model quirks
//!
//! Pages of one document are sent one after another. Concurrency lives a
//! level up, across files, in [`crate::orchestrator`].

pub mod encode;
pub mod llm;
pub mod postprocess;
pub mod render;

use crate::engine::{ConversionEngine, EngineDocument, InputFormat};
use crate::error::{FicheroError, FileError};
use crate::request::RequestSpec;
use async_trait::async_trait;
use encode::EncodedImage;
use std::path::Path;
use tracing::debug;

/// Engine speaking the OpenAI-compatible `chat/completions` protocol.
#[derive(Debug, Clone)]
pub struct HttpVlmEngine {
    client: reqwest::Client,
    max_image_pixels: u32,
}

impl HttpVlmEngine {
    /// Create an engine with its own HTTP client.
    pub fn new(max_image_pixels: u32) -> Result<Self, FicheroError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fichero/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FicheroError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, max_image_pixels))
    }

    /// Create an engine around an existing client (shared pools, proxies).
    pub fn with_client(client: reqwest::Client, max_image_pixels: u32) -> Self {
        Self {
            client,
            max_image_pixels,
        }
    }

    async fn load_images(
        &self,
        path: &Path,
        format: InputFormat,
        scale: f32,
    ) -> Result<Vec<EncodedImage>, FileError> {
        match format {
            InputFormat::Image => {
                let bytes = tokio::fs::read(path).await.map_err(|e| FileError::Io {
                    detail: format!("{}: {e}", path.display()),
                })?;
                Ok(vec![encode::prepare_image(&bytes, path, self.max_image_pixels)?])
            }
            InputFormat::Pdf => render::render_pages(path, scale, self.max_image_pixels)
                .await?
                .iter()
                .map(encode::encode_page)
                .collect(),
        }
    }
}

#[async_trait]
impl ConversionEngine for HttpVlmEngine {
    async fn convert(
        &self,
        path: &Path,
        format: InputFormat,
        request: &RequestSpec,
    ) -> Result<EngineDocument, FileError> {
        let images = self.load_images(path, format, request.scale).await?;
        let total = images.len();

        let mut pages = Vec::with_capacity(total);
        for (idx, image) in images.iter().enumerate() {
            let raw = llm::request_page(&self.client, request, image)
                .await
                .map_err(|e| {
                    if total > 1 {
                        FileError::Page {
                            page: idx + 1,
                            source: Box::new(e),
                        }
                    } else {
                        e
                    }
                })?;
            debug!("{}: page {}/{} done", path.display(), idx + 1, total);
            pages.push(postprocess::normalise(&raw, request.response_format));
        }

        Ok(EngineDocument {
            content: postprocess::join_pages(&pages),
            pages: total,
        })
    }
}
