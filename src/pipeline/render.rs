//! PDF rasterisation: render every page of an invoice PDF via pdfium.
//!
//! pdfium is a C++ library with thread-local state, so rendering runs in
//! `spawn_blocking` rather than on a Tokio worker. Page size is capped by
//! its longest edge (`max_rendered_pixels`) instead of DPI, which keeps
//! memory bounded for oversized scans.

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// Above this many pages a document is probably not a single invoice.
pub const LARGE_DOCUMENT_PAGES: usize = 100;

/// Rasterise every page of an in-memory PDF.
///
/// Errors are plain strings; the caller decides which failure they map to.
pub async fn render_pdf_pages(bytes: Vec<u8>, max_pixels: u32) -> Result<Vec<DynamicImage>, String> {
    tokio::task::spawn_blocking(move || render_blocking(&bytes, max_pixels))
        .await
        .map_err(|e| format!("Render task panicked: {e}"))?
}

fn render_blocking(bytes: &[u8], max_pixels: u32) -> Result<Vec<DynamicImage>, String> {
    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| format!("PDFium engine unavailable: {e}"))?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| format!("Cannot open PDF: {e:?}"))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} pages", total);
    if total > LARGE_DOCUMENT_PAGES {
        warn!(
            "PDF has {} pages; every page is sent to the model in one request",
            total
        );
    }

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| format!("Cannot render page {}: {e:?}", idx + 1))?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    if images.is_empty() {
        return Err("PDF has no pages".into());
    }
    Ok(images)
}
