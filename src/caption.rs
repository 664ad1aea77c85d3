use tracing::{debug, warn};

use crate::engine::Rect;
use crate::extract::PageContext;
use crate::filters;
use crate::models::Figure;

/// Infer figure regions from caption markers on the page.
///
/// Every occurrence of every marker is examined in marker order, then in
/// reading order. The returned batch may still exceed what the caller can
/// accept; the caller truncates it. Examination stops once `limit` figures
/// are collected.
pub fn detect_caption_figures(ctx: &PageContext<'_>, limit: usize) -> Vec<Figure> {
    if limit == 0 {
        return Vec::new();
    }

    let page_rect = match ctx.doc.page_rect(ctx.page_index) {
        Ok(rect) => rect,
        Err(e) => {
            warn!(page = ctx.page_number(), error = %e, "Page bounds unavailable");
            return Vec::new();
        }
    };

    let mut batch = Vec::new();
    for marker in &ctx.config.caption_markers {
        let hits = match ctx.doc.search(ctx.page_index, marker) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(page = ctx.page_number(), marker = %marker, error = %e, "Caption search failed");
                continue;
            }
        };

        for hit in hits {
            if batch.len() >= limit {
                break;
            }

            let region = caption_region(ctx, &hit, &page_rect);
            if region.is_empty()
                || region.width() < ctx.min_size
                || region.height() < ctx.config.caption_min_height
            {
                debug!(page = ctx.page_number(), ?region, "Caption region too small");
                continue;
            }

            let text = match ctx.doc.text_in(ctx.page_index, &region) {
                Ok(text) => text,
                Err(e) => {
                    warn!(page = ctx.page_number(), error = %e, "Caption region text unavailable");
                    continue;
                }
            };
            if filters::is_text_heavy(
                &text,
                &region,
                ctx.config.caption_text_coverage,
                ctx.config.char_area,
            ) {
                debug!(page = ctx.page_number(), ?region, "Caption region is text-heavy");
                continue;
            }

            let hint = caption_label(ctx, &hit, &page_rect).unwrap_or_else(|| marker.clone());
            match ctx.rasterize(&region, Some(hint)) {
                Ok(figure) => batch.push(figure),
                Err(e) => warn!(page = ctx.page_number(), error = %e, "Failed to rasterize caption region"),
            }
        }
    }
    batch
}

/// Fixed-height band directly above the caption, inside the page margins.
pub fn caption_region(ctx: &PageContext<'_>, hit: &Rect, page: &Rect) -> Rect {
    let config = ctx.config;
    Rect::new(
        page.x0 + config.caption_margin,
        (hit.y0 - config.caption_extent).max(page.y0),
        page.x1 - config.caption_margin,
        hit.y0 - config.caption_gap,
    )
    .clip_to(page)
}

/// Text adjacent to the marker, truncated. `None` when nothing is readable.
fn caption_label(ctx: &PageContext<'_>, hit: &Rect, page: &Rect) -> Option<String> {
    let config = ctx.config;
    let band = Rect::new(
        hit.x0 - config.caption_label_lead,
        hit.y0 - config.caption_label_pad,
        (hit.x0 + config.caption_label_span).min(page.x1),
        hit.y1 + config.caption_label_pad,
    );
    let text = ctx.doc.text_in(ctx.page_index, &band).ok()?;
    let label: String = text.trim().chars().take(config.caption_label_chars).collect();
    (!label.is_empty()).then_some(label)
}
