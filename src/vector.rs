use tracing::{debug, warn};

use crate::engine::Rect;
use crate::extract::PageContext;
use crate::filters::{self, Rejection};
use crate::models::Figure;

/// Turn the page's drawing clusters into figures, stopping at `limit`.
///
/// A clustering failure means no vector candidates on this page.
pub fn detect_vector_figures(ctx: &PageContext<'_>, limit: usize) -> Vec<Figure> {
    if limit == 0 {
        return Vec::new();
    }

    let clusters = match ctx
        .doc
        .cluster_drawings(ctx.page_index, ctx.config.cluster_tolerance)
    {
        Ok(clusters) => clusters,
        Err(e) => {
            warn!(page = ctx.page_number(), error = %e, "Drawing clusters unavailable");
            return Vec::new();
        }
    };
    if clusters.is_empty() {
        return Vec::new();
    }

    let drawings = match ctx.doc.drawings(ctx.page_index) {
        Ok(drawings) => drawings,
        Err(e) => {
            warn!(page = ctx.page_number(), error = %e, "Drawings unavailable");
            return Vec::new();
        }
    };

    let mut figures = Vec::new();
    for rect in clusters {
        if figures.len() >= limit {
            break;
        }
        if let Err(rejection) = screen_cluster(ctx, &rect, &drawings) {
            debug!(page = ctx.page_number(), ?rect, ?rejection, "Rejected drawing cluster");
            continue;
        }
        match ctx.rasterize(&rect, None) {
            Ok(figure) => figures.push(figure),
            Err(e) => warn!(page = ctx.page_number(), error = %e, "Failed to rasterize cluster"),
        }
    }
    figures
}

/// Filter chain, rejecting on first failure: minimum size, aspect ratio,
/// text coverage, drawing density.
pub fn screen_cluster(
    ctx: &PageContext<'_>,
    rect: &Rect,
    drawings: &[Rect],
) -> Result<(), Rejection> {
    let config = ctx.config;
    let (width, height) = (rect.width(), rect.height());

    if rect.is_empty() {
        return Err(Rejection::Empty);
    }
    if !filters::meets_min_size(width, height, ctx.min_size) {
        return Err(Rejection::TooSmall { width, height });
    }
    if !config.vector_aspect.contains(width, height) {
        return Err(Rejection::AspectRatio(width / height));
    }

    let text = ctx
        .doc
        .text_in(ctx.page_index, rect)
        .map_err(|_| Rejection::Unreadable)?;
    if filters::is_text_heavy(&text, rect, config.vector_text_coverage, config.char_area) {
        return Err(Rejection::TextHeavy(filters::text_coverage(
            &text,
            rect,
            config.char_area,
        )));
    }

    let density = filters::drawing_density(drawings, rect);
    if density < config.min_drawing_density {
        return Err(Rejection::Sparse(density));
    }
    Ok(())
}
