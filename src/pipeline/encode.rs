//! Image encoding: page bitmaps and image files → base64 data URIs.
//!
//! OpenAI-compatible chat endpoints accept images only as `image_url` parts,
//! so everything is turned into a `data:<mime>;base64,...` URI. PNG, JPEG and
//! WebP files that already fit the pixel cap are forwarded byte for byte;
//! anything larger, and formats most endpoints refuse (TIFF, BMP), is decoded
//! and re-encoded as PNG.

use crate::error::FileError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// A base64 image ready to embed in a request body.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub mime_type: &'static str,
    pub data: String,
}

impl EncodedImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Encode a rasterised page as a base64 PNG.
pub fn encode_page(img: &DynamicImage) -> Result<EncodedImage, FileError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| FileError::Render {
            detail: format!("PNG encoding failed: {e}"),
        })?;

    let data = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", data.len());
    Ok(EncodedImage {
        mime_type: "image/png",
        data,
    })
}

/// Mime type for formats endpoints accept as-is.
fn passthrough_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Prepare an image file for the VLM, downscaling if its longest edge
/// exceeds `max_pixels`.
pub fn prepare_image(bytes: &[u8], path: &Path, max_pixels: u32) -> Result<EncodedImage, FileError> {
    let passthrough = passthrough_mime(path);

    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            // Undecodable here does not mean unreadable by the model.
            return match passthrough {
                Some(mime_type) => Ok(EncodedImage {
                    mime_type,
                    data: STANDARD.encode(bytes),
                }),
                None => Err(FileError::Render {
                    detail: format!("cannot decode {}: {e}", path.display()),
                }),
            };
        }
    };

    let (w, h) = img.dimensions();
    if w.max(h) > max_pixels {
        debug!(
            "Downscaling {} from {}x{} to fit {} px",
            path.display(),
            w,
            h,
            max_pixels
        );
        return encode_page(&img.resize(max_pixels, max_pixels, FilterType::Lanczos3));
    }

    match passthrough {
        Some(mime_type) => Ok(EncodedImage {
            mime_type,
            data: STANDARD.encode(bytes),
        }),
        None => encode_page(&img),
    }
}
