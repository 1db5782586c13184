use crate::pipeline::transform::AffineTransform;
use crate::pipeline::types::SpatialRef;
use crate::raster::geotiff::read_geotiff;
use crate::raster::{MemoryRaster, RasterData, SampleType};
use anyhow::{Context, Result};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Candidate world-file sidecars for `path`, most common spelling first
/// (`scene.tif` -> `scene.tfw`, `scene.tifw`, `scene.wld`).
pub fn world_file_candidates(path: &Path) -> Vec<PathBuf> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let mut candidates = Vec::new();
    if let (Some(first), Some(last)) = (ext.chars().next(), ext.chars().last()) {
        candidates.push(path.with_extension(format!("{}{}w", first, last)));
        candidates.push(path.with_extension(format!("{}w", ext)));
    }
    candidates.push(path.with_extension("wld"));
    candidates
}

fn read_world_file(path: &Path) -> Result<Option<AffineTransform>> {
    for candidate in world_file_candidates(path) {
        if candidate.is_file() {
            let content = fs::read_to_string(&candidate)
                .with_context(|| format!("Failed to read world file {:?}", candidate))?;
            return AffineTransform::from_world_file(&content)
                .map(Some)
                .with_context(|| format!("Failed to parse world file {:?}", candidate));
        }
    }
    Ok(None)
}

/// Embedded georeference first, then a world-file sidecar, then pixel
/// coordinates.
fn resolve_transform(path: &Path, embedded: Option<AffineTransform>) -> Result<AffineTransform> {
    if let Some(transform) = embedded {
        return Ok(transform);
    }
    if let Some(transform) = read_world_file(path)? {
        return Ok(transform);
    }

    tracing::warn!(
        "No georeference found for {:?}, using pixel coordinates",
        path
    );
    Ok(AffineTransform::new(0.0, 0.0, 1.0, -1.0))
}

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "tif" | "tiff"))
        .unwrap_or(false)
}

fn read_spatial_ref(path: &Path) -> Result<SpatialRef> {
    let prj = path.with_extension("prj");
    if !prj.is_file() {
        return Ok(SpatialRef::default());
    }
    let wkt =
        fs::read_to_string(&prj).with_context(|| format!("Failed to read {:?}", prj))?;
    Ok(SpatialRef::from_wkt(&wkt))
}

fn deinterleave<I>(bands: usize, rows: usize, cols: usize, sample: SampleType, pixels: I) -> RasterData
where
    I: IntoIterator<Item = f32>,
{
    let size = rows * cols;
    let mut values = vec![0.0; bands * size];
    for (i, v) in pixels.into_iter().enumerate() {
        values[(i % bands) * size + i / bands] = v;
    }
    RasterData::new(bands, rows, cols, sample, values)
}

/// Splits a decoded image into band-major values.
pub fn decode(img: DynamicImage) -> RasterData {
    let rows = img.height() as usize;
    let cols = img.width() as usize;

    fn widen8(raw: &[u8]) -> impl Iterator<Item = f32> + '_ {
        raw.iter().map(|&v| v as f32)
    }
    fn widen16(raw: &[u16]) -> impl Iterator<Item = f32> + '_ {
        raw.iter().map(|&v| v as f32)
    }

    match img {
        DynamicImage::ImageLuma8(buf) => deinterleave(1, rows, cols, SampleType::U8, widen8(buf.as_raw())),
        DynamicImage::ImageLumaA8(buf) => deinterleave(2, rows, cols, SampleType::U8, widen8(buf.as_raw())),
        DynamicImage::ImageRgb8(buf) => deinterleave(3, rows, cols, SampleType::U8, widen8(buf.as_raw())),
        DynamicImage::ImageRgba8(buf) => deinterleave(4, rows, cols, SampleType::U8, widen8(buf.as_raw())),
        DynamicImage::ImageLuma16(buf) => deinterleave(1, rows, cols, SampleType::U16, widen16(buf.as_raw())),
        DynamicImage::ImageLumaA16(buf) => deinterleave(2, rows, cols, SampleType::U16, widen16(buf.as_raw())),
        DynamicImage::ImageRgb16(buf) => deinterleave(3, rows, cols, SampleType::U16, widen16(buf.as_raw())),
        DynamicImage::ImageRgba16(buf) => deinterleave(4, rows, cols, SampleType::U16, widen16(buf.as_raw())),
        DynamicImage::ImageRgb32F(buf) => {
            deinterleave(3, rows, cols, SampleType::F32, buf.as_raw().iter().copied())
        }
        other => {
            let buf = other.into_rgba32f();
            deinterleave(4, rows, cols, SampleType::F32, buf.as_raw().iter().copied())
        }
    }
}

/// Opens a TIFF/PNG/JPEG raster. TIFFs are georeferenced from their GeoTIFF
/// tags, other formats (and untagged TIFFs) from their world file.
pub fn open_raster(path: &Path) -> Result<MemoryRaster> {
    let (data, embedded) = if is_tiff(path) {
        let tif = read_geotiff(path)?;
        (tif.data, tif.transform)
    } else {
        let img =
            image::open(path).with_context(|| format!("Failed to open raster {:?}", path))?;
        (decode(img), None)
    };
    let transform = resolve_transform(path, embedded)?;
    let srs = read_spatial_ref(path)?;

    tracing::info!(
        "Opened {:?}: {}x{} px, {} band(s), {:?}",
        path,
        data.cols,
        data.rows,
        data.bands,
        data.sample
    );

    Ok(MemoryRaster::new(data, transform, srs))
}
