//! Image encoding: page bitmaps and image files → base64 `ImageData`.
//!
//! VLM APIs (OpenAI, Anthropic, Gemini) accept images as base64 data-URIs
//! embedded in the JSON request body. Rendered PDF pages are sent as PNG:
//! lossless compression keeps small print legible, which matters more than
//! payload size when reading prices. Image files already in a format every
//! provider accepts are passed through untouched.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// MIME types sent as-is.
const PASSTHROUGH_MIME: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

/// Encode a rasterised page as a base64 PNG ready for the VLM API.
///
/// `detail: "high"` lets GPT-4-class models tile the full image; with
/// `"low"` a single 512 px overview loses line-item text.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Encode an image file's bytes, re-encoding to PNG when the provider may
/// not accept the original format.
pub fn encode_image_bytes(bytes: &[u8], mime_type: &str) -> Result<ImageData, image::ImageError> {
    if PASSTHROUGH_MIME.contains(&mime_type) {
        let b64 = STANDARD.encode(bytes);
        debug!("Encoded {} image → {} bytes base64", mime_type, b64.len());
        return Ok(ImageData::new(b64, mime_type).with_detail("high"));
    }
    let img = image::load_from_memory(bytes)?;
    encode_page(&img)
}
