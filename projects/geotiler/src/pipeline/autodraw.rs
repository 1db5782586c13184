// Auto-draw pipeline: segments a raster block by block into class polygons.
//
// Blocks are read and segmented on the calling thread; polygons flow over a
// channel to a merge worker that owns the output layer.

use crate::error::SampleError;
use crate::pipeline::blocks::BlockIterator;
use crate::pipeline::segmenter::{SegmentMethod, Segmenter};
use crate::pipeline::stretch::{stretch, BandLayout, StretchMethod};
use crate::raster::{MemoryRaster, PixelWindow, RasterData, RasterSource, SampleType};
use crate::run_context::{progress_bar, Workspace};
use crate::vector::polygonize::polygonize;
use crate::vector::FeatureLayer;
use anyhow::Result;
use crossbeam::channel;
use geo_types::{Polygon, Rect};
use serde::Serialize;
use std::thread;

#[derive(Debug, Clone, Serialize)]
pub struct AutoDrawConfig {
    /// Block edge length in pixels
    pub block_size: usize,
    /// 1-based bands composed into the RGB image handed to the segmenter
    pub rgb_bands: [usize; 3],
    pub method: SegmentMethod,
    /// Applied to the whole raster when it is not 8-bit
    pub stretch: StretchMethod,
}

impl Default for AutoDrawConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            rgb_bands: [1, 2, 3],
            method: SegmentMethod::Slic,
            stretch: StretchMethod::default(),
        }
    }
}

type BlockPolygons = Vec<(Polygon<f64>, Option<i64>)>;

/// Stretches every band of the raster to 8 bits.
fn stretch_to_u8(source: &dyn RasterSource, method: StretchMethod) -> Result<MemoryRaster> {
    let meta = source.meta();
    let data = source.read_window(&PixelWindow::new(0, 0, meta.cols, meta.rows))?;
    let bytes = stretch(
        &data.values,
        (data.bands, data.rows, data.cols),
        BandLayout::BandFirst,
        method,
    );
    let stretched = RasterData::new(
        data.bands,
        data.rows,
        data.cols,
        SampleType::U8,
        bytes.into_iter().map(f32::from).collect(),
    );
    Ok(MemoryRaster::new(stretched, meta.transform, meta.srs.clone()))
}

fn block_polygon(source: &dyn RasterSource, window: &PixelWindow) -> Polygon<f64> {
    let gt = source.meta().transform;
    let (x0, y0) = gt.pixel_to_world(window.row as f64, window.col as f64);
    let (x1, y1) = gt.pixel_to_world(
        (window.row + window.rows as i64) as f64,
        (window.col + window.cols as i64) as f64,
    );
    Rect::new((x0, y0), (x1, y1)).to_polygon()
}

fn draw_block(
    source: &dyn RasterSource,
    window: &PixelWindow,
    config: &AutoDrawConfig,
    segmenter: &dyn Segmenter,
    workspace: &Workspace,
) -> Result<BlockPolygons> {
    let data = source.read_window(window)?;
    if data.is_uniform() {
        tracing::debug!("Block at ({}, {}) is uniform", window.col, window.row);
        return Ok(vec![(block_polygon(source, window), None)]);
    }

    let rgb = data.select_bands(&config.rgb_bands);
    let labels = segmenter.segment(&rgb, workspace)?;
    if labels.len() != rgb.rows * rgb.cols {
        anyhow::bail!(
            "Segmenter returned {} labels for a {}x{} block",
            labels.len(),
            rgb.cols,
            rgb.rows
        );
    }

    let block_gt = source
        .meta()
        .transform
        .offset(window.row as f64, window.col as f64);
    Ok(polygonize(&labels, rgb.cols, rgb.rows, &block_gt)
        .into_iter()
        .map(|(polygon, class)| (polygon, Some(class)))
        .collect())
}

/// Segments `source` into a single polygon layer with a `class` attribute.
/// Uniform blocks become one background polygon with a null class.
pub fn auto_draw(
    source: &dyn RasterSource,
    config: &AutoDrawConfig,
    segmenter: &dyn Segmenter,
    workspace: &Workspace,
) -> Result<FeatureLayer> {
    let meta = source.meta();
    if let Some(&band) = config
        .rgb_bands
        .iter()
        .find(|&&b| b == 0 || b > meta.band_count)
    {
        return Err(SampleError::config(format!(
            "band {} is out of range, the raster has {} band(s)",
            band, meta.band_count
        ))
        .into());
    }

    let stretched;
    let source: &dyn RasterSource = if meta.sample_type == SampleType::U8 {
        source
    } else {
        tracing::info!("Stretching {:?} raster to 8 bits", meta.sample_type);
        stretched = stretch_to_u8(source, config.stretch)?;
        &stretched
    };

    let blocks = BlockIterator::new(meta.cols, meta.rows, config.block_size, config.block_size);
    let total = if blocks.is_single_block() {
        1
    } else {
        meta.cols.div_ceil(config.block_size) * meta.rows.div_ceil(config.block_size)
    };

    let (tx, rx) = channel::unbounded::<BlockPolygons>();
    let merge = thread::spawn(move || {
        let mut layer = FeatureLayer::new();
        for polygons in rx {
            for (polygon, class) in polygons {
                layer.push(polygon, class);
            }
        }
        layer
    });

    let pb = progress_bar(total, "blocks")?;

    for window in blocks {
        let polygons = draw_block(source, &window, config, segmenter, workspace)?;
        if tx.send(polygons).is_err() {
            anyhow::bail!("Merge worker stopped early");
        }
        pb.inc(1);
    }
    pb.finish_with_message("Done");

    drop(tx);
    let layer = merge
        .join()
        .map_err(|_| anyhow::anyhow!("Merge worker panicked"))?;
    let background = layer.features().iter().filter(|(_, class)| class.is_none()).count();
    tracing::info!(
        "Auto-draw produced {} polygon(s), {} of them background",
        layer.len(),
        background
    );
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::transform::AffineTransform;
    use crate::pipeline::types::SpatialRef;
    use geo::Area;
    use std::cell::Cell;

    fn raster(data: RasterData) -> MemoryRaster {
        MemoryRaster::new(
            data,
            AffineTransform::new(1000.0, 2000.0, 1.0, -1.0),
            SpatialRef::default(),
        )
    }

    #[test]
    fn test_uniform_block_skips_segmentation() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();
        let source = raster(RasterData::new(
            3,
            512,
            512,
            SampleType::U8,
            vec![7.0; 3 * 512 * 512],
        ));
        let never = |_: &RasterData, _: &Workspace| -> Result<Vec<i64>> {
            panic!("segmenter must not run on a uniform block")
        };

        let layer = auto_draw(&source, &AutoDrawConfig::default(), &never, &ws).unwrap();
        assert_eq!(layer.len(), 1);
        let (polygon, class) = &layer.features()[0];
        assert_eq!(*class, None);
        assert_eq!(polygon.unsigned_area(), 512.0 * 512.0);
    }

    #[test]
    fn test_segmented_blocks_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();

        // 8x4 raster, two 4x4 blocks; the right block is uniform
        let mut values = vec![0.0f32; 3 * 4 * 8];
        for band in 0..3 {
            for row in 0..4 {
                for col in 0..2 {
                    values[band * 32 + row * 8 + col] = 200.0;
                }
            }
        }
        let source = raster(RasterData::new(3, 4, 8, SampleType::U8, values));

        let calls = Cell::new(0);
        let halves = |rgb: &RasterData, _: &Workspace| -> Result<Vec<i64>> {
            calls.set(calls.get() + 1);
            Ok((0..rgb.rows * rgb.cols)
                .map(|i| if i % rgb.cols < 2 { 1 } else { 2 })
                .collect())
        };
        let config = AutoDrawConfig {
            block_size: 4,
            ..AutoDrawConfig::default()
        };

        let layer = auto_draw(&source, &config, &halves, &ws).unwrap();
        assert_eq!(calls.get(), 1);

        let classes: Vec<Option<i64>> = layer.features().iter().map(|(_, c)| *c).collect();
        assert_eq!(classes, vec![Some(1), Some(2), None]);

        let (first, _) = &layer.features()[0];
        assert_eq!(first.unsigned_area(), 8.0);
        let bounds = geo::BoundingRect::bounding_rect(first).unwrap();
        assert_eq!((bounds.min().x, bounds.max().y), (1000.0, 2000.0));
    }

    #[test]
    fn test_band_out_of_range_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();
        let source = raster(RasterData::zeros(1, 4, 4, SampleType::U8));
        let never = |_: &RasterData, _: &Workspace| -> Result<Vec<i64>> { unreachable!() };

        let err = auto_draw(&source, &AutoDrawConfig::default(), &never, &ws).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SampleError>(),
            Some(SampleError::Configuration(_))
        ));
    }

    #[test]
    fn test_sixteen_bit_raster_is_stretched_first() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();
        let values: Vec<f32> = (0..3 * 16).map(|v| (v % 16) as f32 * 1000.0).collect();
        let source = raster(RasterData::new(3, 4, 4, SampleType::U16, values));

        let check = |rgb: &RasterData, _: &Workspace| -> Result<Vec<i64>> {
            assert_eq!(rgb.sample, SampleType::U8);
            assert!(rgb.values.iter().all(|&v| v <= 255.0));
            Ok(vec![3; rgb.rows * rgb.cols])
        };
        let config = AutoDrawConfig {
            block_size: 4,
            stretch: StretchMethod::MinMax,
            ..AutoDrawConfig::default()
        };
        let layer = auto_draw(&source, &config, &check, &ws).unwrap();
        assert_eq!(layer.len(), 1);
        assert_eq!(layer.features()[0].1, Some(3));
    }
}
