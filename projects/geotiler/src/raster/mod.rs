pub mod geotiff;
pub mod image_reader;
pub mod writer;

use crate::pipeline::transform::AffineTransform;
use crate::pipeline::types::{Extent, SpatialRef};
use anyhow::Result;
use serde::Serialize;

/// Storage type of the source pixels. Values are widened to `f32` in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleType {
    U8,
    U16,
    I16,
    F32,
}

/// Rectangular pixel window; `col`/`row` may be negative or run past the
/// raster, the outside is read as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col: i64,
    pub row: i64,
    pub cols: usize,
    pub rows: usize,
}

impl PixelWindow {
    pub fn new(col: i64, row: i64, cols: usize, rows: usize) -> Self {
        Self {
            col,
            row,
            cols,
            rows,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RasterMeta {
    pub band_count: usize,
    pub cols: usize,
    pub rows: usize,
    pub sample_type: SampleType,
    pub transform: AffineTransform,
    pub srs: SpatialRef,
    pub extent: Extent,
}

impl RasterMeta {
    pub fn new(
        band_count: usize,
        cols: usize,
        rows: usize,
        sample_type: SampleType,
        transform: AffineTransform,
        srs: SpatialRef,
    ) -> Self {
        let (x0, y0) = transform.pixel_to_world(0.0, 0.0);
        let (x1, y1) = transform.pixel_to_world(rows as f64, cols as f64);
        let extent = Extent::new(x0, x1, y0, y1, srs.clone());
        Self {
            band_count,
            cols,
            rows,
            sample_type,
            transform,
            srs,
            extent,
        }
    }
}

/// Band-major pixel block: `values[band * rows * cols + row * cols + col]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterData {
    pub bands: usize,
    pub rows: usize,
    pub cols: usize,
    pub sample: SampleType,
    pub values: Vec<f32>,
}

impl RasterData {
    pub fn new(bands: usize, rows: usize, cols: usize, sample: SampleType, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), bands * rows * cols);
        Self {
            bands,
            rows,
            cols,
            sample,
            values,
        }
    }

    pub fn zeros(bands: usize, rows: usize, cols: usize, sample: SampleType) -> Self {
        Self::new(bands, rows, cols, sample, vec![0.0; bands * rows * cols])
    }

    pub fn band(&self, index: usize) -> &[f32] {
        let size = self.rows * self.cols;
        &self.values[index * size..(index + 1) * size]
    }

    pub fn get(&self, band: usize, row: usize, col: usize) -> f32 {
        self.values[(band * self.rows + row) * self.cols + col]
    }

    /// True when every value is identical (min == max over all bands).
    pub fn is_uniform(&self) -> bool {
        match self.values.first() {
            Some(&first) => self.values.iter().all(|&v| v == first),
            None => true,
        }
    }

    /// Keeps the listed bands (1-based) in the given order.
    pub fn select_bands(&self, bands: &[usize]) -> RasterData {
        let mut values = Vec::with_capacity(bands.len() * self.rows * self.cols);
        for &b in bands {
            values.extend_from_slice(self.band(b - 1));
        }
        RasterData::new(bands.len(), self.rows, self.cols, self.sample, values)
    }
}

/// Read access to a georeferenced raster.
pub trait RasterSource {
    fn meta(&self) -> &RasterMeta;

    /// Reads all bands of `window`; pixels outside the raster are 0.
    fn read_window(&self, window: &PixelWindow) -> Result<RasterData>;
}

/// Raster held fully in memory.
pub struct MemoryRaster {
    meta: RasterMeta,
    data: RasterData,
}

impl MemoryRaster {
    pub fn new(data: RasterData, transform: AffineTransform, srs: SpatialRef) -> Self {
        let meta = RasterMeta::new(data.bands, data.cols, data.rows, data.sample, transform, srs);
        Self { meta, data }
    }
}

impl RasterSource for MemoryRaster {
    fn meta(&self) -> &RasterMeta {
        &self.meta
    }

    fn read_window(&self, window: &PixelWindow) -> Result<RasterData> {
        let mut out = RasterData::zeros(self.data.bands, window.rows, window.cols, self.data.sample);
        let src_rows = self.data.rows as i64;
        let src_cols = self.data.cols as i64;

        for band in 0..self.data.bands {
            for r in 0..window.rows {
                let sr = window.row + r as i64;
                if sr < 0 || sr >= src_rows {
                    continue;
                }
                for c in 0..window.cols {
                    let sc = window.col + c as i64;
                    if sc < 0 || sc >= src_cols {
                        continue;
                    }
                    out.values[(band * window.rows + r) * window.cols + c] =
                        self.data.get(band, sr as usize, sc as usize);
                }
            }
        }

        Ok(out)
    }
}
