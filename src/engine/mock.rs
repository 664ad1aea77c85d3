//! In-memory document engine for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::DynamicImage;

use super::{cluster_rects, DocumentEngine, EmbeddedImage, EngineError, ImageRef, PdfDocument, Rect};

pub const LETTER: Rect = Rect::new(0.0, 0.0, 612.0, 792.0);

/// A run of text placed at a fixed rectangle, one glyph per equal-width slot.
#[derive(Debug, Clone)]
pub struct MockSpan {
    pub rect: Rect,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum MockImage {
    Ok(EmbeddedImage),
    Broken,
}

#[derive(Debug, Clone)]
pub struct MockPage {
    pub rect: Rect,
    pub images: Vec<MockImage>,
    pub drawings: Vec<Rect>,
    /// `None` makes clustering fail for this page.
    pub clusters: Option<Vec<Rect>>,
    pub spans: Vec<MockSpan>,
}

impl Default for MockPage {
    fn default() -> Self {
        Self {
            rect: LETTER,
            images: Vec::new(),
            drawings: Vec::new(),
            clusters: Some(Vec::new()),
            spans: Vec::new(),
        }
    }
}

impl MockPage {
    pub fn with_image(mut self, width: u32, height: u32, format: &str) -> Self {
        self.images.push(MockImage::Ok(EmbeddedImage {
            width,
            height,
            format: format.to_string(),
            data: crate::raster::blank_png(width, height),
        }));
        self
    }

    pub fn with_broken_image(mut self) -> Self {
        self.images.push(MockImage::Broken);
        self
    }

    /// Add drawings and let the real clustering routine group them.
    pub fn with_drawings(mut self, drawings: &[Rect]) -> Self {
        self.drawings.extend_from_slice(drawings);
        self.clusters = Some(cluster_rects(&self.drawings, 10.0));
        self
    }

    pub fn with_cluster(mut self, cluster: Rect, drawings: usize) -> Self {
        let cell = cluster.width() / drawings.max(1) as f32;
        for i in 0..drawings {
            let x0 = cluster.x0 + cell * i as f32;
            self.drawings
                .push(Rect::new(x0, cluster.y0, x0 + cell, cluster.y1));
        }
        self.clusters.get_or_insert_with(Vec::new).push(cluster);
        self
    }

    pub fn with_failing_clusters(mut self) -> Self {
        self.clusters = None;
        self
    }

    pub fn with_text(mut self, rect: Rect, text: &str) -> Self {
        self.spans.push(MockSpan {
            rect,
            text: text.to_string(),
        });
        self
    }
}

#[derive(Debug, Default)]
pub struct MockEngine {
    pub pages: Vec<MockPage>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub fail_open: bool,
}

impl MockEngine {
    pub fn new(pages: Vec<MockPage>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    pub fn blank(page_count: usize) -> Self {
        Self::new(vec![MockPage::default(); page_count])
    }

    pub fn unopenable() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }
}

impl DocumentEngine for MockEngine {
    fn with_document(
        &self,
        _bytes: &[u8],
        session: &mut dyn FnMut(&dyn PdfDocument),
    ) -> Result<(), EngineError> {
        if self.fail_open {
            return Err(EngineError::Load("mock refused to open".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let document = MockDocument {
            pages: &self.pages,
            closed: Arc::clone(&self.closed),
        };
        session(&document);
        Ok(())
    }
}

struct MockDocument<'a> {
    pages: &'a [MockPage],
    closed: Arc<AtomicUsize>,
}

impl Drop for MockDocument<'_> {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl MockDocument<'_> {
    fn page(&self, page: usize) -> Result<&MockPage, EngineError> {
        self.pages.get(page).ok_or_else(|| EngineError::Page {
            page,
            reason: "out of range".to_string(),
        })
    }
}

impl PdfDocument for MockDocument<'_> {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_rect(&self, page: usize) -> Result<Rect, EngineError> {
        Ok(self.page(page)?.rect)
    }

    fn images(&self, page: usize) -> Result<Vec<ImageRef>, EngineError> {
        let count = self.page(page)?.images.len() as u32;
        Ok((0..count).map(|xref| ImageRef { xref }).collect())
    }

    fn extract_image(&self, page: usize, image: ImageRef) -> Result<EmbeddedImage, EngineError> {
        match self.page(page)?.images.get(image.xref as usize) {
            Some(MockImage::Ok(embedded)) => Ok(embedded.clone()),
            _ => Err(EngineError::Image {
                xref: image.xref,
                reason: "corrupt stream".to_string(),
            }),
        }
    }

    fn drawings(&self, page: usize) -> Result<Vec<Rect>, EngineError> {
        Ok(self.page(page)?.drawings.clone())
    }

    fn cluster_drawings(&self, page: usize, _tolerance: f32) -> Result<Vec<Rect>, EngineError> {
        self.page(page)?
            .clusters
            .clone()
            .ok_or_else(|| EngineError::Clustering {
                page,
                reason: "mock clustering failure".to_string(),
            })
    }

    fn text_in(&self, page: usize, clip: &Rect) -> Result<String, EngineError> {
        let mut lines = Vec::new();
        for span in &self.page(page)?.spans {
            let glyph = span.rect.width() / span.text.chars().count().max(1) as f32;
            let line: String = span
                .text
                .chars()
                .enumerate()
                .filter(|(i, _)| {
                    let cx = span.rect.x0 + glyph * (*i as f32 + 0.5);
                    let cy = (span.rect.y0 + span.rect.y1) / 2.0;
                    clip.x0 <= cx && cx <= clip.x1 && clip.y0 <= cy && cy <= clip.y1
                })
                .map(|(_, c)| c)
                .collect();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        Ok(lines.join("\n"))
    }

    fn search(&self, page: usize, needle: &str) -> Result<Vec<Rect>, EngineError> {
        let mut hits = Vec::new();
        for span in &self.page(page)?.spans {
            let chars: Vec<char> = span.text.chars().collect();
            let glyph = span.rect.width() / chars.len().max(1) as f32;
            let pattern: Vec<char> = needle.chars().collect();
            if pattern.is_empty() || pattern.len() > chars.len() {
                continue;
            }
            for start in 0..=chars.len() - pattern.len() {
                if chars[start..start + pattern.len()] == pattern[..] {
                    let x0 = span.rect.x0 + glyph * start as f32;
                    hits.push(Rect::new(
                        x0,
                        span.rect.y0,
                        x0 + glyph * pattern.len() as f32,
                        span.rect.y1,
                    ));
                }
            }
        }
        Ok(hits)
    }

    fn render(&self, page: usize, clip: &Rect, zoom: f32) -> Result<DynamicImage, EngineError> {
        self.page(page)?;
        let width = (clip.width() * zoom) as u32;
        let height = (clip.height() * zoom) as u32;
        Ok(DynamicImage::new_rgb8(width.max(1), height.max(1)))
    }
}
