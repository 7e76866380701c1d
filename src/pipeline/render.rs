//! PDF rasterisation: render every page to a `DynamicImage` via pdfium.
//!
//! pdfium is a C++ library with thread-local state, so all work happens
//! inside `spawn_blocking`. The library is bound at runtime: the path in
//! `PDFIUM_LIB_PATH` if set (a directory or the library file itself), the
//! system library otherwise.

use crate::error::FileError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rasterise all pages of a PDF.
///
/// `scale` is the render factor relative to 72 DPI; `max_pixels` caps the
/// longest edge of every page regardless of scale.
pub async fn render_pages(
    pdf_path: &Path,
    scale: f32,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, FileError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || render_pages_blocking(&path, scale, max_pixels))
        .await
        .map_err(|e| FileError::Render {
            detail: format!("render task panicked: {e}"),
        })?
}

fn bind_pdfium() -> Result<Pdfium, FileError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from) {
        Some(p) if p.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&p))
        }
        Some(p) => Pdfium::bind_to_library(p),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| FileError::Render {
        detail: format!(
            "cannot bind to pdfium ({e:?}); set PDFIUM_LIB_PATH=/path/to/libpdfium"
        ),
    })?;
    Ok(Pdfium::new(bindings))
}

fn render_pages_blocking(
    pdf_path: &Path,
    scale: f32,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, FileError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
        let err_str = format!("{e:?}");
        let detail = if err_str.to_ascii_lowercase().contains("password") {
            "document is password-protected".to_string()
        } else {
            err_str
        };
        FileError::Render { detail }
    })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if total == 0 {
        return Err(FileError::Render {
            detail: "document has no pages".into(),
        });
    }
    info!("{}: {} pages", pdf_path.display(), total);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(scale)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| FileError::Page {
                page: idx + 1,
                source: Box::new(FileError::Render {
                    detail: format!("{e:?}"),
                }),
            })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}
