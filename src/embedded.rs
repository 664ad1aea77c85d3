use tracing::{debug, warn};

use crate::extract::PageContext;
use crate::models::{Dimensions, Figure};
use crate::raster;

/// Pull complete raster images already embedded in the page.
///
/// A failure on one image is logged and only that image is skipped.
pub fn extract_embedded(ctx: &PageContext<'_>) -> Vec<Figure> {
    let refs = match ctx.doc.images(ctx.page_index) {
        Ok(refs) => refs,
        Err(e) => {
            warn!(page = ctx.page_number(), error = %e, "Failed to enumerate embedded images");
            return Vec::new();
        }
    };

    let mut figures = Vec::new();
    for image_ref in refs {
        let image = match ctx.doc.extract_image(ctx.page_index, image_ref) {
            Ok(image) => image,
            Err(e) => {
                warn!(
                    page = ctx.page_number(),
                    xref = image_ref.xref,
                    error = %e,
                    "Failed to extract embedded image"
                );
                continue;
            }
        };

        let (width, height) = (image.width as f32, image.height as f32);
        if width < ctx.min_size || height < ctx.min_size {
            debug!(xref = image_ref.xref, width, height, "Skipping small embedded image");
            continue;
        }
        if !ctx.config.embedded_aspect.contains(width, height) {
            debug!(xref = image_ref.xref, width, height, "Skipping sliver or icon");
            continue;
        }

        let payload = match raster::canonicalize(image.data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    page = ctx.page_number(),
                    xref = image_ref.xref,
                    error = %e,
                    "Failed to re-encode embedded image"
                );
                continue;
            }
        };

        figures.push(Figure {
            page: ctx.page_number(),
            image: payload,
            dimensions: Dimensions {
                width: image.width,
                height: image.height,
            },
            bounds: None,
            caption_hint: Some(format!("embedded_{}", image.format)),
        });
    }
    figures
}
