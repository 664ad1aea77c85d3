//! Geometry and text heuristics shared by the detection strategies.
//!
//! Every predicate here is pure: strategies fetch text and drawings from the
//! document and pass them in, so thresholds can be tested in isolation.

use crate::engine::Rect;

// ── Configuration ────────────────────────────────────────────────────────────

/// Inclusive width/height ratio band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectBand {
    pub min: f32,
    pub max: f32,
}

impl AspectBand {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, width: f32, height: f32) -> bool {
        if width <= 0.0 || height <= 0.0 {
            return false;
        }
        let ratio = width / height;
        self.min <= ratio && ratio <= self.max
    }
}

/// Empirically tuned heuristic thresholds.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Square page units one rendered character is assumed to cover.
    pub char_area: f32,
    pub embedded_aspect: AspectBand,
    pub vector_aspect: AspectBand,
    pub vector_text_coverage: f32,
    /// Intersecting drawings per 10 000 square page units.
    pub min_drawing_density: f32,
    pub cluster_tolerance: f32,
    pub caption_markers: Vec<String>,
    pub caption_text_coverage: f32,
    pub caption_label_chars: usize,
    /// How far left of the marker the label band starts.
    pub caption_label_lead: f32,
    /// How far right of the marker's left edge the label band extends.
    pub caption_label_span: f32,
    pub caption_label_pad: f32,
    pub caption_margin: f32,
    /// Height of the band above a caption presumed to hold the figure.
    pub caption_extent: f32,
    pub caption_gap: f32,
    pub caption_min_height: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            char_area: 50.0,
            embedded_aspect: AspectBand::new(0.2, 5.0),
            vector_aspect: AspectBand::new(0.4, 2.5),
            vector_text_coverage: 0.4,
            min_drawing_density: 0.5,
            cluster_tolerance: 10.0,
            caption_markers: vec!["Figure ".to_string(), "Fig. ".to_string()],
            caption_text_coverage: 0.5,
            caption_label_chars: 50,
            caption_label_lead: 5.0,
            caption_label_span: 150.0,
            caption_label_pad: 2.0,
            caption_margin: 30.0,
            caption_extent: 250.0,
            caption_gap: 5.0,
            caption_min_height: 80.0,
        }
    }
}

// ── Rejection reasons ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    Empty,
    TooSmall { width: f32, height: f32 },
    AspectRatio(f32),
    TextHeavy(f32),
    Sparse(f32),
    Unreadable,
}

// ── Predicates ───────────────────────────────────────────────────────────────

pub fn meets_min_size(width: f32, height: f32, min_size: f32) -> bool {
    width >= min_size && height >= min_size
}

/// Estimated fraction of `rect` covered by `text`.
///
/// Character count times a fixed per-character area, over the region area.
/// Whitespace and line breaks are not counted. A zero-area region with any
/// text is reported as fully covered.
pub fn text_coverage(text: &str, rect: &Rect, char_area: f32) -> f32 {
    let text = text.trim();
    if text.is_empty() {
        return 0.0;
    }
    let chars = text.chars().filter(|c| *c != ' ' && *c != '\n').count();
    let area = rect.area();
    if area == 0.0 {
        return f32::INFINITY;
    }
    chars as f32 * char_area / area
}

pub fn is_text_heavy(text: &str, rect: &Rect, threshold: f32, char_area: f32) -> bool {
    text_coverage(text, rect, char_area) > threshold
}

/// Drawings whose box intersects `region`, per 10 000 square units.
pub fn drawing_density(drawings: &[Rect], region: &Rect) -> f32 {
    let area = region.area();
    if drawings.is_empty() || area == 0.0 {
        return 0.0;
    }
    let hits = drawings.iter().filter(|d| d.intersects(region)).count();
    hits as f32 / area * 10_000.0
}
