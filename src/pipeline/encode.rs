//! Image encoding: [`RasterImage`] → base64 PNG wrapped in `ImageData`.
//!
//! PNG rather than JPEG: compression artefacts around small print in defect
//! tables measurably hurt extraction. `detail: "high"` lets GPT-4-class
//! models tile the full page instead of reading a 512 px overview.

use crate::pipeline::render::RasterImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as a base64 PNG ready for a vision request.
pub fn encode_page(page: &RasterImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    page.bitmap
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded page {} → {} bytes base64",
        page.page_number,
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
