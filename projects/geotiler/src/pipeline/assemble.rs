use crate::pipeline::transform::AffineTransform;
use crate::pipeline::types::{BoxInfo, Extent, ObjectSample, PixelBox};

/// Converts world-space boxes into pixel boxes of the tile whose upper-left
/// corner is `(tile.xmin, tile.ymax)`. Coordinates are clamped to the tile.
pub fn assemble(
    tile_extent: &Extent,
    boxes: &[BoxInfo],
    transform: &AffineTransform,
    tile_size: u32,
) -> ObjectSample {
    let max = tile_size.saturating_sub(1) as f64;
    let to_col = |x: f64| {
        ((x - tile_extent.xmin) / transform.pixel_width)
            .floor()
            .clamp(0.0, max) as u32
    };
    let to_row = |y: f64| {
        ((y - tile_extent.ymax) / transform.pixel_height)
            .floor()
            .clamp(0.0, max) as u32
    };

    let boxes = boxes
        .iter()
        .map(|b| PixelBox {
            x0: to_col(b.extent.xmin),
            y0: to_row(b.extent.ymax),
            x1: to_col(b.extent.xmax),
            y1: to_row(b.extent.ymin),
            label: b.label.clone(),
            truncated: b.truncated,
        })
        .collect();

    ObjectSample {
        tile_extent: tile_extent.clone(),
        boxes,
    }
}
