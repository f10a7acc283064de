//! Document rasterisation: render every page to a fixed-scale RGB bitmap.
//!
//! ## Why a fixed scale rather than a target width?
//!
//! Inspection reports are mostly A4 scans with small print in defect
//! tables. Rendering at a fixed 4× scale over PDF points (≈300 DPI) keeps
//! that print legible for the vision model regardless of how the page was
//! produced. `max_rendered_pixels` is a safety cap for the odd oversized
//! drawing and leaves ordinary pages untouched.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state. The orchestrator calls
//! [`DocumentRasterizer::rasterize`] from `tokio::task::spawn_blocking`
//! so CPU-heavy rendering never stalls the async workers.

use crate::error::{DocumentOpenError, InspectError};
use image::{DynamicImage, RgbImage};
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// One rendered page.
#[derive(Debug, Clone)]
pub struct RasterImage {
    /// 1-indexed physical page number.
    pub page_number: usize,
    /// 24-bit RGB bitmap.
    pub bitmap: RgbImage,
}

impl RasterImage {
    pub fn new(page_number: usize, bitmap: RgbImage) -> Self {
        Self {
            page_number,
            bitmap,
        }
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }
}

/// Turns document bytes into page bitmaps.
///
/// Implementations are blocking and must be callable from any thread.
pub trait DocumentRasterizer: Send + Sync {
    /// Render every page, in page order.
    fn rasterize(&self, document: &[u8]) -> Result<Vec<RasterImage>, DocumentOpenError>;
}

/// PDFium-backed rasteriser.
///
/// Binds the library per call: the binding, the loaded document and every
/// page bitmap are locals, so all native handles are released when
/// `rasterize` returns, whichever way it returns.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    scale: f32,
    max_pixels: u32,
    password: Option<String>,
}

impl PdfiumRasterizer {
    /// Create a rasteriser, verifying the pdfium library can be bound.
    pub fn new(
        scale: f32,
        max_pixels: u32,
        password: Option<String>,
    ) -> Result<Self, InspectError> {
        load_pdfium().map_err(InspectError::PdfiumBindingFailed)?;
        Ok(Self {
            scale,
            max_pixels,
            password,
        })
    }
}

/// Bind the pdfium shared library.
///
/// Lookup order: `PDFIUM_LIB_PATH` (file or directory), the executable's
/// directory, then the system library search path.
fn load_pdfium() -> Result<Pdfium, String> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        debug!("Binding pdfium from PDFIUM_LIB_PATH={}", path);
        let bound = if std::path::Path::new(&path).is_dir() {
            let lib = Pdfium::pdfium_platform_library_name_at_path(path.as_str());
            Pdfium::bind_to_library(&lib)
        } else {
            Pdfium::bind_to_library(&path)
        };
        return bound.map(Pdfium::new).map_err(|e| format!("{path}: {e}"));
    }

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
    {
        let dir_name = dir.to_string_lossy();
        let candidate = Pdfium::pdfium_platform_library_name_at_path(&*dir_name);
        if let Ok(bindings) = Pdfium::bind_to_library(&candidate) {
            debug!("Bound pdfium next to executable: {}", dir.display());
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| e.to_string())
}

/// Reject bytes that are not a PDF before handing them to pdfium.
fn check_magic(document: &[u8]) -> Result<(), DocumentOpenError> {
    if document.len() < 4 || &document[..4] != b"%PDF" {
        return Err(DocumentOpenError::NotAPdf {
            magic: document.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

fn map_load_error(e: PdfiumError, password: Option<&str>) -> DocumentOpenError {
    match e {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            if password.is_some() {
                DocumentOpenError::WrongPassword
            } else {
                DocumentOpenError::PasswordRequired
            }
        }
        other => DocumentOpenError::Corrupt {
            detail: format!("{other:?}"),
        },
    }
}

impl DocumentRasterizer for PdfiumRasterizer {
    fn rasterize(&self, document: &[u8]) -> Result<Vec<RasterImage>, DocumentOpenError> {
        check_magic(document)?;

        let pdfium = load_pdfium().map_err(DocumentOpenError::Internal)?;
        let password = self.password.as_deref();
        let doc = pdfium
            .load_pdf_from_byte_slice(document, password)
            .map_err(|e| map_load_error(e, password))?;

        let pages = doc.pages();
        let total_pages = pages.len() as usize;
        info!("Document loaded: {} pages", total_pages);

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.scale)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut images = Vec::with_capacity(total_pages);
        for (idx, page) in pages.iter().enumerate() {
            let page_number = idx + 1;
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                DocumentOpenError::RenderFailed {
                    page: page_number,
                    detail: format!("{e:?}"),
                }
            })?;

            let rgb = match bitmap.as_image() {
                DynamicImage::ImageRgb8(img) => img,
                other => other.to_rgb8(),
            };
            debug!(
                "Rendered page {} → {}x{} px",
                page_number,
                rgb.width(),
                rgb.height()
            );
            images.push(RasterImage::new(page_number, rgb));
        }

        Ok(images)
    }
}
