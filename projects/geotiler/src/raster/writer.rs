use crate::error::SampleError;
use crate::pipeline::transform::AffineTransform;
use crate::pipeline::types::SpatialRef;
use crate::raster::geotiff::write_geotiff;
use crate::raster::{RasterData, SampleType};
use anyhow::{Context, Result};
use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgb32FImage, Rgba, Rgba32FImage};
use std::fs;
use std::path::{Path, PathBuf};

/// Encoded tile format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, clap::ValueEnum)]
pub enum ImageFormat {
    Tiff,
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Tiff => "tif",
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    pub fn world_file_extension(&self) -> &'static str {
        match self {
            Self::Tiff => "tfw",
            Self::Jpeg => "jgw",
            Self::Png => "pgw",
        }
    }

    /// JPEG and PNG tiles are written as 8-bit RGB.
    pub fn requires_rgb8(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }

    fn codec(&self) -> image::ImageFormat {
        match self {
            Self::Tiff => image::ImageFormat::Tiff,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
        }
    }
}

fn interleave(data: &RasterData) -> Vec<f32> {
    let size = data.rows * data.cols;
    let mut out = Vec::with_capacity(data.values.len());
    for px in 0..size {
        for band in 0..data.bands {
            out.push(data.values[band * size + px]);
        }
    }
    out
}

/// Packs band-major data into an image buffer of the matching pixel type.
pub fn to_dynamic_image(data: &RasterData) -> Result<DynamicImage> {
    let (w, h) = (data.cols as u32, data.rows as u32);
    let pixels = interleave(data);

    let image = match (data.sample, data.bands) {
        (SampleType::U8, 1) => ImageBuffer::<Luma<u8>, _>::from_raw(w, h, to_u8(&pixels))
            .map(DynamicImage::ImageLuma8),
        (SampleType::U8, 3) => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, to_u8(&pixels))
            .map(DynamicImage::ImageRgb8),
        (SampleType::U8, 4) => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, to_u8(&pixels))
            .map(DynamicImage::ImageRgba8),
        (SampleType::U16, 1) => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, to_u16(&pixels))
            .map(DynamicImage::ImageLuma16),
        (SampleType::U16, 3) => ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, to_u16(&pixels))
            .map(DynamicImage::ImageRgb16),
        (SampleType::U16, 4) => ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, to_u16(&pixels))
            .map(DynamicImage::ImageRgba16),
        (SampleType::F32, 3) => Rgb32FImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb32F),
        (SampleType::F32, 4) => {
            Rgba32FImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgba32F)
        }
        (sample, bands) => {
            return Err(SampleError::config(format!(
                "cannot encode {} band(s) of {:?}; select 1, 3 or 4 bands (3 or 4 for float data)",
                bands, sample
            ))
            .into())
        }
    };

    image.ok_or_else(|| anyhow::anyhow!("Pixel buffer does not match {}x{} tile", w, h))
}

fn to_u8(values: &[f32]) -> Vec<u8> {
    values.iter().map(|&v| v.clamp(0.0, 255.0) as u8).collect()
}

fn to_u16(values: &[f32]) -> Vec<u16> {
    values.iter().map(|&v| v.clamp(0.0, 65535.0) as u16).collect()
}

/// Writes a tile and its world file (and `.prj` when the reference is known).
/// TIFF tiles also carry the georeference as GeoTIFF tags.
/// Returns the image path.
pub fn write_tile(
    dir: &Path,
    stem: &str,
    data: &RasterData,
    format: ImageFormat,
    transform: &AffineTransform,
    srs: &SpatialRef,
) -> Result<PathBuf> {
    let path = dir.join(format!("{}.{}", stem, format.extension()));
    match format {
        ImageFormat::Tiff => write_geotiff(&path, data, transform)?,
        _ => to_dynamic_image(data)?
            .save_with_format(&path, format.codec())
            .with_context(|| format!("Failed to write {:?}", path))?,
    }

    write_sidecars(&path, format, transform, srs)?;
    Ok(path)
}

pub fn write_sidecars(
    image_path: &Path,
    format: ImageFormat,
    transform: &AffineTransform,
    srs: &SpatialRef,
) -> Result<()> {
    let world = image_path.with_extension(format.world_file_extension());
    fs::write(&world, transform.to_world_file())
        .with_context(|| format!("Failed to write {:?}", world))?;

    if let Some(wkt) = srs.wkt() {
        let prj = image_path.with_extension("prj");
        fs::write(&prj, wkt).with_context(|| format!("Failed to write {:?}", prj))?;
    }
    Ok(())
}
