use crate::error::SampleError;
use crate::pipeline::stretch::{stretch, BandLayout, StretchMethod};
use crate::pipeline::transform::AffineTransform;
use crate::pipeline::types::Extent;
use crate::raster::writer::ImageFormat;
use crate::raster::{PixelWindow, RasterData, RasterSource, SampleType};
use anyhow::Result;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use serde::Serialize;

/// Interpolation used when a tile is resized to the sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum ResampleMethod {
    Nearest,
    Bilinear,
    Cubic,
}

impl ResampleMethod {
    fn filter(&self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::Cubic => FilterType::CatmullRom,
        }
    }
}

/// Raster pixels under a world extent, with the transform of the clip.
#[derive(Debug, Clone)]
pub struct ClippedTile {
    pub data: RasterData,
    pub transform: AffineTransform,
    pub extent: Extent,
}

/// Reads the pixels of `extent`. Parts outside the raster are 0; an extent
/// entirely outside is rejected.
pub fn clip_to_extent(source: &dyn RasterSource, extent: &Extent) -> Result<ClippedTile> {
    let meta = source.meta();
    let gt = meta.transform;

    if extent.xmax <= meta.extent.xmin
        || extent.xmin >= meta.extent.xmax
        || extent.ymax <= meta.extent.ymin
        || extent.ymin >= meta.extent.ymax
    {
        return Err(SampleError::content("tile lies outside the raster").into());
    }

    // Pixel under the centre of the tile's first pixel
    let (col, row) = gt.world_to_pixel(
        extent.xmin + gt.pixel_width / 2.0,
        extent.ymax + gt.pixel_height / 2.0,
    );
    let cols = ((extent.width() / gt.cell_width()).round() as usize).max(1);
    let rows = ((extent.height() / gt.cell_height()).round() as usize).max(1);

    let window = PixelWindow::new(col, row, cols, rows);
    let data = source.read_window(&window)?;
    let transform = gt.offset(row as f64, col as f64);
    let (x0, y0) = transform.pixel_to_world(0.0, 0.0);
    let (x1, y1) = transform.pixel_to_world(rows as f64, cols as f64);

    Ok(ClippedTile {
        data,
        transform,
        extent: Extent::new(x0, x1, y0, y1, extent.srs.clone()),
    })
}

/// Checks a 1-based band list against the raster and the output format.
pub fn validate_bands(bands: &[usize], band_count: usize, format: ImageFormat) -> Result<()> {
    if bands.is_empty() {
        return Err(SampleError::config("at least one band must be selected").into());
    }
    if let Some(&bad) = bands.iter().find(|&&b| b == 0 || b > band_count) {
        return Err(SampleError::config(format!(
            "band {} is out of range, the raster has {} band(s)",
            bad, band_count
        ))
        .into());
    }
    if format.requires_rgb8() && bands.len() != 3 {
        return Err(SampleError::config(format!(
            "{:?} output needs exactly 3 bands, {} selected",
            format,
            bands.len()
        ))
        .into());
    }
    Ok(())
}

/// Resizes every band to `cols` x `rows`.
///
/// Float buffers are resized in the `[0, 1]` range the image crate expects,
/// so each band is normalized by its own min/max and scaled back afterwards.
pub fn resample(
    data: &RasterData,
    cols: usize,
    rows: usize,
    method: ResampleMethod,
) -> Result<RasterData> {
    if data.cols == cols && data.rows == rows {
        return Ok(data.clone());
    }

    let mut values = Vec::with_capacity(data.bands * cols * rows);
    for band in 0..data.bands {
        let src = data.band(band);
        let lo = src.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = src.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if !(hi > lo) {
            let fill = if lo.is_finite() { lo } else { 0.0 };
            values.extend(std::iter::repeat(fill).take(cols * rows));
            continue;
        }

        let span = hi - lo;
        let normalized: Vec<f32> = src.iter().map(|v| (v - lo) / span).collect();
        let buf: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(data.cols as u32, data.rows as u32, normalized)
                .ok_or_else(|| anyhow::anyhow!("Band {} does not match its shape", band))?;
        let resized = imageops::resize(&buf, cols as u32, rows as u32, method.filter());
        values.extend(resized.into_raw().into_iter().map(|v| lo + v.clamp(0.0, 1.0) * span));
    }
    Ok(RasterData::new(data.bands, rows, cols, data.sample, values))
}

/// Turns clipped pixels into the tile that gets written: band selection, a
/// uniformity check and, for 8-bit formats, a contrast stretch.
pub fn prepare_tile(
    data: &RasterData,
    bands: &[usize],
    format: ImageFormat,
    stretch_method: StretchMethod,
) -> Result<RasterData> {
    let selected = data.select_bands(bands);
    if selected.is_uniform() {
        return Err(SampleError::content("tile has a single value").into());
    }
    if !format.requires_rgb8() {
        return Ok(selected);
    }

    let bytes = stretch(
        &selected.values,
        (selected.bands, selected.rows, selected.cols),
        BandLayout::BandFirst,
        stretch_method,
    );
    Ok(RasterData::new(
        selected.bands,
        selected.rows,
        selected.cols,
        SampleType::U8,
        bytes.into_iter().map(f32::from).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_content_error;
    use crate::pipeline::types::SpatialRef;
    use crate::raster::MemoryRaster;

    fn source() -> MemoryRaster {
        let values = (0..2 * 10 * 10).map(|v| v as f32).collect();
        MemoryRaster::new(
            RasterData::new(2, 10, 10, SampleType::U16, values),
            AffineTransform::new(0.0, 100.0, 10.0, -10.0),
            SpatialRef::default(),
        )
    }

    fn ext(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Extent {
        Extent::new(xmin, xmax, ymin, ymax, SpatialRef::default())
    }

    #[test]
    fn test_clip_inside_raster() {
        let tile = clip_to_extent(&source(), &ext(20.0, 50.0, 50.0, 80.0)).unwrap();
        assert_eq!((tile.data.cols, tile.data.rows), (3, 3));
        assert_eq!(tile.transform.origin_x, 20.0);
        assert_eq!(tile.transform.origin_y, 80.0);
        // Row 2, col 2 of band 0
        assert_eq!(tile.data.get(0, 0, 0), 22.0);
        assert_eq!(tile.extent, ext(20.0, 50.0, 50.0, 80.0));
    }

    #[test]
    fn test_clip_partially_outside_is_zero_filled() {
        let tile = clip_to_extent(&source(), &ext(-20.0, 10.0, 90.0, 120.0)).unwrap();
        assert_eq!((tile.data.cols, tile.data.rows), (3, 3));
        assert_eq!(tile.data.band(0), &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(tile.data.band(1), &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 100.0]);
    }

    #[test]
    fn test_clip_outside_is_content_error() {
        let err = clip_to_extent(&source(), &ext(200.0, 230.0, 50.0, 80.0)).unwrap_err();
        assert!(is_content_error(&err));
        let touching = clip_to_extent(&source(), &ext(100.0, 130.0, 50.0, 80.0)).unwrap_err();
        assert!(is_content_error(&touching));
    }

    #[test]
    fn test_validate_bands() {
        assert!(validate_bands(&[3, 2, 1], 4, ImageFormat::Jpeg).is_ok());
        assert!(validate_bands(&[1], 4, ImageFormat::Tiff).is_ok());
        assert!(validate_bands(&[1], 4, ImageFormat::Png).is_err());
        assert!(validate_bands(&[0, 1, 2], 4, ImageFormat::Tiff).is_err());
        assert!(validate_bands(&[1, 2, 5], 4, ImageFormat::Tiff).is_err());
    }

    #[test]
    fn test_resample_nearest_doubles_pixels() {
        let data = RasterData::new(1, 2, 2, SampleType::U8, vec![0.0, 255.0, 255.0, 0.0]);
        let up = resample(&data, 4, 4, ResampleMethod::Nearest).unwrap();
        assert_eq!((up.cols, up.rows), (4, 4));
        assert_eq!(
            up.values,
            vec![
                0.0, 0.0, 255.0, 255.0, //
                0.0, 0.0, 255.0, 255.0, //
                255.0, 255.0, 0.0, 0.0, //
                255.0, 255.0, 0.0, 0.0,
            ]
        );
    }

    #[test]
    fn test_resample_keeps_value_range() {
        let data = RasterData::new(1, 2, 2, SampleType::U16, vec![1000.0, 3000.0, 3000.0, 1000.0]);
        let down = resample(&data, 3, 3, ResampleMethod::Cubic).unwrap();
        assert!(down.values.iter().all(|&v| (1000.0..=3000.0).contains(&v)));

        let flat = RasterData::new(1, 2, 2, SampleType::U16, vec![42.0; 4]);
        let up = resample(&flat, 3, 3, ResampleMethod::Bilinear).unwrap();
        assert_eq!(up.values, vec![42.0; 9]);
    }

    #[test]
    fn test_prepare_tile_rejects_uniform_and_stretches_for_png() {
        let flat = RasterData::new(3, 2, 2, SampleType::U16, vec![500.0; 12]);
        let err = prepare_tile(&flat, &[1, 2, 3], ImageFormat::Png, StretchMethod::MinMax).unwrap_err();
        assert!(is_content_error(&err));

        let values: Vec<f32> = (0..12).map(|v| v as f32 * 100.0).collect();
        let data = RasterData::new(3, 2, 2, SampleType::U16, values);
        let png = prepare_tile(&data, &[3, 2, 1], ImageFormat::Png, StretchMethod::MinMax).unwrap();
        assert_eq!(png.sample, SampleType::U8);
        assert_eq!(png.band(0), &[0.0, 85.0, 170.0, 255.0]);

        let tif = prepare_tile(&data, &[1], ImageFormat::Tiff, StretchMethod::MinMax).unwrap();
        assert_eq!(tif.sample, SampleType::U16);
        assert_eq!(tif.values, vec![0.0, 100.0, 200.0, 300.0]);
    }
}
