//! PDFium-backed document engine.
//!
//! `PdfiumEngine` is stateless (`Send + Sync`). Each request binds a fresh
//! `Pdfium` instance because the upstream type is `!Send`; the OS caches
//! the library load, so repeat binds are cheap. The document borrows that
//! instance and both are dropped when `with_document` returns.

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::debug;

use super::{cluster_rects, DocumentEngine, EmbeddedImage, EngineError, ImageRef, PdfDocument, Rect};
use crate::raster;

pub struct PdfiumEngine;

impl PdfiumEngine {
    /// Create an engine, verifying the PDFium library is loadable.
    pub fn new() -> Result<Self, EngineError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

/// Discovery order: `PDFIUM_DYNAMIC_LIB_PATH`, the executable's directory,
/// then the system library search path.
fn load_pdfium() -> Result<Pdfium, EngineError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| EngineError::Load(format!("Failed to load PDFium from {path}: {e}")))?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let dir = exe_dir.to_string_lossy().into_owned();
            let lib_path = Pdfium::pdfium_platform_library_name_at_path(&dir);
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!(dir = %exe_dir.display(), "Loaded PDFium next to executable");
                return Ok(Pdfium::new(bindings));
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        EngineError::Load(format!(
            "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

impl DocumentEngine for PdfiumEngine {
    fn with_document(
        &self,
        bytes: &[u8],
        session: &mut dyn FnMut(&dyn PdfDocument),
    ) -> Result<(), EngineError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| EngineError::Load(e.to_string()))?;
        session(&PdfiumDocument { document });
        Ok(())
    }
}

// `PdfDocument` in this module is the crate trait; the upstream type is qualified.
struct PdfiumDocument<'a> {
    document: pdfium_render::prelude::PdfDocument<'a>,
}

impl PdfiumDocument<'_> {
    fn page(&self, page: usize) -> Result<PdfPage<'_>, EngineError> {
        let index = u16::try_from(page).map_err(|_| EngineError::Page {
            page,
            reason: format!("Page index {page} exceeds u16 maximum"),
        })?;
        let pages = self.document.pages();
        pages.get(index).map_err(|e| EngineError::Page {
            page,
            reason: e.to_string(),
        })
    }
}

/// PDF space has a bottom-left origin; page space here is top-left.
fn to_page_space(rect: &PdfRect, page_height: f32) -> Rect {
    Rect::new(
        rect.left().value,
        page_height - rect.top().value,
        rect.right().value,
        page_height - rect.bottom().value,
    )
}

fn to_pdf_space(rect: &Rect, page_height: f32) -> PdfRect {
    PdfRect::new_from_values(
        page_height - rect.y1,
        rect.x0,
        page_height - rect.y0,
        rect.x1,
    )
}

/// Label an image by its stream filter, the way extraction tools name files.
fn format_label(filters: &[String]) -> &'static str {
    if filters.iter().any(|f| f == "DCTDecode") {
        "jpeg"
    } else if filters.iter().any(|f| f == "JPXDecode") {
        "jpx"
    } else if filters.iter().any(|f| f == "JBIG2Decode") {
        "jb2"
    } else if filters.iter().any(|f| f == "CCITTFaxDecode") {
        "tiff"
    } else {
        "png"
    }
}

/// A stream whose only filter is DCTDecode is a complete JPEG file.
fn is_plain_jpeg(filters: &[String]) -> bool {
    matches!(filters, [only] if only == "DCTDecode")
}

fn stored_jpeg(image: &PdfPageImageObject<'_>) -> Result<Option<EmbeddedImage>, PdfiumError> {
    let data = image.get_raw_image_data()?;
    if !raster::is_accepted_payload(&data) {
        return Ok(None);
    }
    let (Ok(width), Ok(height)) = (u32::try_from(image.width()?), u32::try_from(image.height()?)) else {
        return Ok(None);
    };
    Ok(Some(EmbeddedImage {
        width,
        height,
        format: "jpeg".to_string(),
        data,
    }))
}

impl PdfDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_rect(&self, page: usize) -> Result<Rect, EngineError> {
        let pdf_page = self.page(page)?;
        Ok(Rect::new(
            0.0,
            0.0,
            pdf_page.width().value,
            pdf_page.height().value,
        ))
    }

    fn images(&self, page: usize) -> Result<Vec<ImageRef>, EngineError> {
        let pdf_page = self.page(page)?;
        Ok(pdf_page
            .objects()
            .iter()
            .enumerate()
            .filter(|(_, object)| object.object_type() == PdfPageObjectType::Image)
            .map(|(index, _)| ImageRef { xref: index as u32 })
            .collect())
    }

    fn extract_image(&self, page: usize, image: ImageRef) -> Result<EmbeddedImage, EngineError> {
        let image_error = |reason: String| EngineError::Image {
            xref: image.xref,
            reason,
        };

        let pdf_page = self.page(page)?;
        let object = pdf_page
            .objects()
            .get(image.xref as PdfPageObjectIndex)
            .map_err(|e| image_error(e.to_string()))?;
        let image_object = object
            .as_image_object()
            .ok_or_else(|| image_error("not an image object".to_string()))?;

        let filters: Vec<String> = image_object
            .filters()
            .iter()
            .map(|filter| filter.name().to_string())
            .collect();
        if is_plain_jpeg(&filters) {
            match stored_jpeg(image_object) {
                Ok(Some(stored)) => return Ok(stored),
                Ok(None) => debug!(page, xref = image.xref, "Stored JPEG stream unusable, decoding"),
                Err(e) => debug!(page, xref = image.xref, error = %e, "Stored JPEG stream unreadable, decoding"),
            }
        }

        let decoded = image_object
            .get_raw_image()
            .map_err(|e| image_error(e.to_string()))?;
        let data = raster::encode_png(&decoded).map_err(|e| image_error(e.to_string()))?;

        Ok(EmbeddedImage {
            width: decoded.width(),
            height: decoded.height(),
            format: format_label(&filters).to_string(),
            data,
        })
    }

    fn drawings(&self, page: usize) -> Result<Vec<Rect>, EngineError> {
        let pdf_page = self.page(page)?;
        let height = pdf_page.height().value;
        let mut rects = Vec::new();
        for object in pdf_page.objects().iter() {
            if object.object_type() != PdfPageObjectType::Path {
                continue;
            }
            match object.bounds() {
                Ok(bounds) => rects.push(to_page_space(&bounds.to_rect(), height)),
                Err(e) => debug!(page, error = %e, "Skipping path without bounds"),
            }
        }
        Ok(rects)
    }

    fn cluster_drawings(&self, page: usize, tolerance: f32) -> Result<Vec<Rect>, EngineError> {
        let drawings = self.drawings(page).map_err(|e| EngineError::Clustering {
            page,
            reason: e.to_string(),
        })?;
        Ok(cluster_rects(&drawings, tolerance))
    }

    fn text_in(&self, page: usize, clip: &Rect) -> Result<String, EngineError> {
        let pdf_page = self.page(page)?;
        let height = pdf_page.height().value;
        let text = pdf_page.text().map_err(|e| EngineError::Text {
            page,
            reason: e.to_string(),
        })?;
        Ok(text.inside_rect(to_pdf_space(clip, height)))
    }

    fn search(&self, page: usize, needle: &str) -> Result<Vec<Rect>, EngineError> {
        let text_error = |e: PdfiumError| EngineError::Text {
            page,
            reason: e.to_string(),
        };

        let pdf_page = self.page(page)?;
        let height = pdf_page.height().value;
        let text = pdf_page.text().map_err(text_error)?;
        let search = text
            .search(needle, &PdfSearchOptions::new())
            .map_err(text_error)?;

        let mut hits = Vec::new();
        for segments in search.iter(PdfSearchDirection::SearchForward) {
            // A match that wraps a line spans several segments.
            let hit = segments
                .iter()
                .map(|segment| to_page_space(&segment.bounds(), height))
                .reduce(|a, b| a.union(&b));
            if let Some(hit) = hit {
                hits.push(hit);
            }
        }
        Ok(hits)
    }

    fn render(&self, page: usize, clip: &Rect, zoom: f32) -> Result<DynamicImage, EngineError> {
        let render_error = |reason: String| EngineError::Render { page, reason };

        let pdf_page = self.page(page)?;
        let config = PdfRenderConfig::new().scale_page_by_factor(zoom);
        let bitmap = pdf_page
            .render_with_config(&config)
            .map_err(|e| render_error(e.to_string()))?;
        let full = bitmap.as_image();

        let x = ((clip.x0 * zoom).max(0.0) as u32).min(full.width());
        let y = ((clip.y0 * zoom).max(0.0) as u32).min(full.height());
        let width = ((clip.width() * zoom) as u32).min(full.width() - x);
        let height = ((clip.height() * zoom) as u32).min(full.height() - y);
        if width == 0 || height == 0 {
            return Err(render_error(format!(
                "clip {clip:?} lies outside the rendered page"
            )));
        }
        Ok(full.crop_imm(x, y, width, height))
    }
}
