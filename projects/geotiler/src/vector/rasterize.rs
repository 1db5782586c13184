use crate::error::SampleError;
use crate::pipeline::transform::AffineTransform;
use anyhow::Result;
use geo_rasterize::{LabelBuilder, Transform};
use geo_types::MultiPolygon;

/// World-to-pixel mapping for the rasterizer, the inverse of the tile's
/// pixel-to-world transform.
fn geo_to_pix(transform: &AffineTransform) -> Transform {
    let (pw, ph) = (transform.pixel_width, transform.pixel_height);
    Transform::new(
        1.0 / pw,
        0.0,
        0.0,
        1.0 / ph,
        -transform.origin_x / pw,
        -transform.origin_y / ph,
    )
}

/// Burns `(shape, value)` pairs into a `cols` x `rows` grid. A pixel takes the
/// value of the last shape containing its centre; untouched pixels stay 0.
pub fn rasterize(
    shapes: &[(&MultiPolygon<f64>, u8)],
    transform: &AffineTransform,
    cols: usize,
    rows: usize,
) -> Result<Vec<u8>> {
    let mut rasterizer = LabelBuilder::background(0u8)
        .width(cols)
        .height(rows)
        .geo_to_pix(geo_to_pix(transform))
        .build()
        .map_err(|e| SampleError::config(format!("label rasterizer: {}", e)))?;

    for (shape, value) in shapes {
        rasterizer
            .rasterize(*shape, *value)
            .map_err(|e| SampleError::content(format!("rasterizing label shape: {}", e)))?;
    }

    // Row-major, matching the band layout of the tile
    Ok(rasterizer.finish().iter().copied().collect())
}
