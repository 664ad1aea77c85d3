//! Document-engine collaborator surface.
//!
//! The figure pipeline never talks to a PDF library directly. It borrows a
//! [`PdfDocument`] for the duration of one request through
//! [`DocumentEngine::with_document`], which keeps the open handle scoped to
//! the call and releases it on every exit path.
//!
//! All rectangles are in page space with a top-left origin and y growing
//! downward.

#[cfg(test)]
pub mod mock;
pub mod pdfium;

use image::DynamicImage;

use crate::models::Bounds;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to load PDF: {0}")]
    Load(String),
    #[error("Page {page} unavailable: {reason}")]
    Page { page: usize, reason: String },
    #[error("Image xref={xref} could not be decoded: {reason}")]
    Image { xref: u32, reason: String },
    #[error("Drawing clustering failed on page {page}: {reason}")]
    Clustering { page: usize, reason: String },
    #[error("Text access failed on page {page}: {reason}")]
    Text { page: usize, reason: String },
    #[error("Rendering failed on page {page}: {reason}")]
    Render { page: usize, reason: String },
}

// ── Geometry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Zero for empty or inverted rectangles.
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    /// Strict overlap test. Empty rectangles (lines, points) never intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x0 < other.x1
            && other.x0 < self.x1
            && self.y0 < other.y1
            && other.y0 < self.y1
    }

    /// Inclusive overlap test: shared edges and degenerate boxes count.
    pub fn touches(&self, other: &Rect) -> bool {
        self.x0 <= other.x1 && other.x0 <= self.x1 && self.y0 <= other.y1 && other.y0 <= self.y1
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }

    pub fn expand(&self, by: f32) -> Rect {
        Rect::new(self.x0 - by, self.y0 - by, self.x1 + by, self.y1 + by)
    }

    /// Clamp this rectangle into `bounds`. The result may be empty.
    pub fn clip_to(&self, bounds: &Rect) -> Rect {
        Rect::new(
            self.x0.max(bounds.x0),
            self.y0.max(bounds.y0),
            self.x1.min(bounds.x1),
            self.y1.min(bounds.y1),
        )
    }
}

impl From<Rect> for Bounds {
    fn from(rect: Rect) -> Self {
        Bounds {
            x0: rect.x0,
            y0: rect.y0,
            x1: rect.x1,
            y1: rect.y1,
        }
    }
}

// ── Embedded images ──────────────────────────────────────────────────────────

/// Reference to an embedded raster image, as enumerated on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRef {
    pub xref: u32,
}

/// A decoded embedded image.
///
/// `format` is the label of the image as stored in the document (`png`,
/// `jpeg`, `jpx`, ...). `data` holds whatever encoded bytes the engine could
/// produce; callers sniff it before deciding to re-encode.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub data: Vec<u8>,
}

// ── Collaborator traits ──────────────────────────────────────────────────────

/// Opens PDF documents from raw bytes.
pub trait DocumentEngine: Send + Sync {
    /// Open `bytes` and hand the document to `session`. The document is
    /// closed before this returns, whether or not `session` completed.
    fn with_document(
        &self,
        bytes: &[u8],
        session: &mut dyn FnMut(&dyn PdfDocument),
    ) -> Result<(), EngineError>;
}

/// Page-level queries over an open document. Pages are 0-indexed here.
pub trait PdfDocument {
    fn page_count(&self) -> usize;

    fn page_rect(&self, page: usize) -> Result<Rect, EngineError>;

    fn images(&self, page: usize) -> Result<Vec<ImageRef>, EngineError>;

    fn extract_image(&self, page: usize, image: ImageRef) -> Result<EmbeddedImage, EngineError>;

    /// Bounding boxes of every vector-drawing primitive on the page.
    fn drawings(&self, page: usize) -> Result<Vec<Rect>, EngineError>;

    /// Bounding boxes of groups of spatially-nearby drawings.
    fn cluster_drawings(&self, page: usize, tolerance: f32) -> Result<Vec<Rect>, EngineError>;

    /// Plain text whose glyphs fall inside `clip`.
    fn text_in(&self, page: usize, clip: &Rect) -> Result<String, EngineError>;

    /// Rectangles of every literal occurrence of `needle`, in reading order.
    fn search(&self, page: usize, needle: &str) -> Result<Vec<Rect>, EngineError>;

    /// Rasterize `clip` scaled by `zoom`.
    fn render(&self, page: usize, clip: &Rect, zoom: f32) -> Result<DynamicImage, EngineError>;
}

// ── Clustering ───────────────────────────────────────────────────────────────

/// Agglomerate drawing rectangles into clusters.
///
/// Two boxes join the same cluster when the gap between them is at most
/// `tolerance` on both axes. Merging repeats until stable, since a grown
/// cluster can reach clusters it did not touch before. Output keeps
/// first-appearance order.
pub fn cluster_rects(rects: &[Rect], tolerance: f32) -> Vec<Rect> {
    let mut clusters: Vec<Rect> = Vec::new();

    for rect in rects {
        let mut merged = *rect;
        let mut index = 0;
        let mut slot: Option<usize> = None;
        while index < clusters.len() {
            if clusters[index].expand(tolerance).touches(&merged) {
                merged = merged.union(&clusters[index]);
                match slot {
                    None => {
                        slot = Some(index);
                        index += 1;
                    }
                    Some(_) => {
                        clusters.remove(index);
                    }
                }
            } else {
                index += 1;
            }
        }
        match slot {
            Some(first) => clusters[first] = merged,
            None => clusters.push(merged),
        }
    }

    loop {
        let before = clusters.len();
        clusters = merge_pass(clusters, tolerance);
        if clusters.len() == before {
            return clusters;
        }
    }
}

fn merge_pass(clusters: Vec<Rect>, tolerance: f32) -> Vec<Rect> {
    let mut out: Vec<Rect> = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        match out
            .iter_mut()
            .find(|existing| existing.expand(tolerance).touches(&cluster))
        {
            Some(existing) => *existing = existing.union(&cluster),
            None => out.push(cluster),
        }
    }
    out
}
