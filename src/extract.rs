use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::caption::detect_caption_figures;
use crate::embedded::extract_embedded;
use crate::engine::{DocumentEngine, EngineError, PdfDocument, Rect};
use crate::filters::FilterConfig;
use crate::models::{Dimensions, ExtractionRequest, ExtractionResult, Figure};
use crate::raster;
use crate::vector::detect_vector_figures;
use crate::verify::VerificationGate;

// ── Constants ────────────────────────────────────────────────────────────────

const PDF_MAGIC: &[u8] = b"%PDF";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("No PDF data received")]
    MissingData,
    #[error("Invalid PDF: missing PDF header")]
    InvalidHeader,
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Extraction timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractionError {
    /// Faults caused by the caller's payload or parameters.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MissingData | Self::InvalidHeader | Self::InvalidParameter(_)
        )
    }
}

// ── Per-page context ─────────────────────────────────────────────────────────

/// What a strategy needs to examine one page.
pub struct PageContext<'a> {
    pub doc: &'a dyn PdfDocument,
    /// 0-indexed.
    pub page_index: usize,
    pub min_size: f32,
    pub zoom: f32,
    pub config: &'a FilterConfig,
}

impl PageContext<'_> {
    pub fn page_number(&self) -> usize {
        self.page_index + 1
    }

    /// Rasterize `region` into a figure. Dimensions are scaled by zoom,
    /// bounds stay in page units.
    pub fn rasterize(&self, region: &Rect, caption_hint: Option<String>) -> Result<Figure, EngineError> {
        let pixels = self.doc.render(self.page_index, region, self.zoom)?;
        let image = raster::encode_png(&pixels).map_err(|e| EngineError::Render {
            page: self.page_index,
            reason: format!("PNG encoding failed: {e}"),
        })?;
        Ok(Figure {
            page: self.page_number(),
            image,
            dimensions: Dimensions {
                width: (region.width() * self.zoom) as u32,
                height: (region.height() * self.zoom) as u32,
            },
            bounds: Some((*region).into()),
            caption_hint,
        })
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

pub struct FigureExtractor {
    engine: Arc<dyn DocumentEngine>,
    gate: VerificationGate,
    config: FilterConfig,
    request_timeout: Duration,
}

impl FigureExtractor {
    pub fn new(
        engine: Arc<dyn DocumentEngine>,
        gate: VerificationGate,
        config: FilterConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            gate,
            config,
            request_timeout,
        }
    }

    /// Run a request and always return a well-formed envelope.
    pub async fn extract(&self, request: ExtractionRequest) -> ExtractionResult {
        match self.try_extract(request).await {
            Ok(figures) => ExtractionResult::ok(figures),
            Err(e) => ExtractionResult::failed(e.to_string()),
        }
    }

    pub async fn try_extract(&self, request: ExtractionRequest) -> Result<Vec<Figure>, ExtractionError> {
        validate_request(&request)?;

        let (verify, max_figures) = (request.verify, request.max_figures);
        let outcome = self.run(request).await;

        match &outcome {
            Ok(figures) => info!(figures = figures.len(), max_figures, verify, "Extraction complete"),
            Err(e) => warn!(error = %e, "Extraction failed"),
        }
        outcome
    }

    /// Detection must finish within the request timeout. Verification gets
    /// whatever time is left and keeps unchecked figures when it runs out.
    async fn run(&self, request: ExtractionRequest) -> Result<Vec<Figure>, ExtractionError> {
        let deadline = Instant::now().checked_add(self.request_timeout);
        let verify = request.verify;
        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();

        let detection = tokio::task::spawn_blocking(move || {
            detect_figures(engine.as_ref(), &request, &config)
        });
        // On timeout the detection thread runs to completion in the background;
        // its result is discarded.
        let joined = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, detection)
                .await
                .map_err(|_| ExtractionError::Timeout(self.request_timeout))?,
            None => detection.await,
        };
        let figures =
            joined.map_err(|e| ExtractionError::Internal(format!("Detection task failed: {e}")))??;

        if verify {
            Ok(self.gate.apply(figures, deadline).await)
        } else {
            Ok(figures)
        }
    }
}

// ── Input validation ─────────────────────────────────────────────────────────

pub fn validate_request(request: &ExtractionRequest) -> Result<(), ExtractionError> {
    if request.pdf.is_empty() {
        return Err(ExtractionError::MissingData);
    }
    if !request.pdf.starts_with(PDF_MAGIC) {
        return Err(ExtractionError::InvalidHeader);
    }
    if request.max_figures == 0 {
        return Err(ExtractionError::InvalidParameter(
            "max_figures must be positive".to_string(),
        ));
    }
    if !request.zoom.is_finite() || request.zoom <= 0.0 {
        return Err(ExtractionError::InvalidParameter(
            "zoom must be a positive number".to_string(),
        ));
    }
    if !request.min_size.is_finite() || request.min_size < 0.0 {
        return Err(ExtractionError::InvalidParameter(
            "min_size must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}

// ── Page loop ────────────────────────────────────────────────────────────────

/// 0-indexed pages to visit, from a 1-indexed inclusive request window
/// clamped to the document.
pub fn page_window(page_count: usize, start_page: Option<usize>, end_page: Option<usize>) -> Range<usize> {
    let first = start_page.unwrap_or(1).max(1) - 1;
    let last = end_page.unwrap_or(page_count).min(page_count);
    first..last.max(first)
}

/// Detection pass over the document. Blocking; the document handle is
/// released before this returns.
pub fn detect_figures(
    engine: &dyn DocumentEngine,
    request: &ExtractionRequest,
    config: &FilterConfig,
) -> Result<Vec<Figure>, ExtractionError> {
    let mut figures = Vec::new();
    engine.with_document(&request.pdf, &mut |doc| {
        figures = scan_document(doc, request, config);
    })?;
    Ok(figures)
}

fn scan_document(doc: &dyn PdfDocument, request: &ExtractionRequest, config: &FilterConfig) -> Vec<Figure> {
    let window = page_window(doc.page_count(), request.start_page, request.end_page);
    let mut figures: Vec<Figure> = Vec::new();

    for page_index in window {
        let budget = request.max_figures - figures.len();
        if budget == 0 {
            break;
        }
        let ctx = PageContext {
            doc,
            page_index,
            min_size: request.min_size,
            zoom: request.zoom,
            config,
        };
        figures.extend(process_page(&ctx, budget));
    }
    figures
}

/// Run the strategies for one page in priority order and return at most
/// `budget` figures.
///
/// Caption anchors are skipped when the page had embedded images. Vector
/// figures are capped as they are found; the caption batch is capped after.
fn process_page(ctx: &PageContext<'_>, budget: usize) -> Vec<Figure> {
    let embedded = extract_embedded(ctx);
    let had_embedded = !embedded.is_empty();

    let mut page_figures: Vec<Figure> = embedded.into_iter().take(budget).collect();

    let remaining = budget - page_figures.len();
    page_figures.extend(detect_vector_figures(ctx, remaining));

    if had_embedded {
        return page_figures;
    }

    let remaining = budget - page_figures.len();
    if remaining > 0 {
        let mut batch = detect_caption_figures(ctx, remaining);
        batch.truncate(remaining);
        page_figures.extend(batch);
    }
    page_figures
}
