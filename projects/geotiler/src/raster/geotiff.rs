// GeoTIFF codec
//
// TIFF pixels of any band count with the georeference carried in the
// ModelPixelScale / ModelTiepoint (or ModelTransformation) tags.

use crate::error::SampleError;
use crate::pipeline::transform::AffineTransform;
use crate::raster::{RasterData, SampleType};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{
    ColorType, Gray16, Gray32Float, Gray8, GrayI16, RGB16, RGB32Float, RGB8,
};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKindStandard, TiffValue};
use tiff::tags::{ExtraSamples, Tag};

// GeoKey IDs and values
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const MODEL_TYPE_PROJECTED: u16 = 1;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;

/// Decoded GeoTIFF: band-major pixels plus the embedded georeference, if any.
pub struct GeoTiff {
    pub data: RasterData,
    pub transform: Option<AffineTransform>,
}

fn widen<T: Copy>(values: Vec<T>, f: impl Fn(T) -> f32) -> Vec<f32> {
    values.into_iter().map(f).collect()
}

fn samples(result: DecodingResult) -> Result<(SampleType, Vec<f32>)> {
    Ok(match result {
        DecodingResult::U8(v) => (SampleType::U8, widen(v, f32::from)),
        DecodingResult::U16(v) => (SampleType::U16, widen(v, f32::from)),
        DecodingResult::I8(v) => (SampleType::I16, widen(v, f32::from)),
        DecodingResult::I16(v) => (SampleType::I16, widen(v, f32::from)),
        DecodingResult::U32(v) => (SampleType::F32, widen(v, |x| x as f32)),
        DecodingResult::I32(v) => (SampleType::F32, widen(v, |x| x as f32)),
        DecodingResult::U64(v) => (SampleType::F32, widen(v, |x| x as f32)),
        DecodingResult::I64(v) => (SampleType::F32, widen(v, |x| x as f32)),
        DecodingResult::F32(v) => (SampleType::F32, v),
        DecodingResult::F64(v) => (SampleType::F32, widen(v, |x| x as f32)),
        DecodingResult::F16(_) => {
            return Err(SampleError::config("16-bit float TIFFs are not supported").into())
        }
    })
}

/// Reads the georeference tags of the current image; `None` when the file
/// carries none.
fn read_georeference<R: std::io::Read + Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<AffineTransform>> {
    let point_raster = decoder
        .find_tag_unsigned_vec::<u16>(Tag::GeoKeyDirectoryTag)?
        .map(|keys| {
            keys.get(4..)
                .unwrap_or(&[])
                .chunks_exact(4)
                .any(|k| k[0] == GT_RASTER_TYPE_GEO_KEY && k[3] == RASTER_PIXEL_IS_POINT)
        })
        .unwrap_or(false);

    let mut transform = if let Some(m) = decoder.find_tag(Tag::ModelTransformationTag)? {
        let m = m.into_f64_vec()?;
        if m.len() < 8 {
            anyhow::bail!("ModelTransformation needs 16 values, found {}", m.len());
        }
        AffineTransform {
            pixel_width: m[0],
            rotation_x: m[1],
            origin_x: m[3],
            rotation_y: m[4],
            pixel_height: m[5],
            origin_y: m[7],
        }
    } else {
        let scale = decoder.find_tag(Tag::ModelPixelScaleTag)?;
        let tie = decoder.find_tag(Tag::ModelTiepointTag)?;
        let (Some(scale), Some(tie)) = (scale, tie) else {
            return Ok(None);
        };
        let (scale, tie) = (scale.into_f64_vec()?, tie.into_f64_vec()?);
        if scale.len() < 2 || tie.len() < 6 {
            anyhow::bail!(
                "Malformed GeoTIFF tags: {} scale and {} tiepoint values",
                scale.len(),
                tie.len()
            );
        }
        AffineTransform::new(
            tie[3] - tie[0] * scale[0],
            tie[4] + tie[1] * scale[1],
            scale[0],
            -scale[1],
        )
    };

    if point_raster {
        // Tiepoints address pixel centres
        transform.origin_x -= transform.pixel_width / 2.0;
        transform.origin_y -= transform.pixel_height / 2.0;
    }
    Ok(Some(transform))
}

/// Decodes the first image of a TIFF file, chunky or planar.
pub fn read_geotiff(path: &Path) -> Result<GeoTiff> {
    let file = File::open(path).with_context(|| format!("Failed to open raster {:?}", path))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("Failed to decode TIFF {:?}", path))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let (cols, rows) = (width as usize, height as usize);
    let transform = read_georeference(&mut decoder)
        .with_context(|| format!("Failed to read the georeference of {:?}", path))?;

    let mut result = DecodingResult::U8(vec![]);
    let layout = decoder
        .read_image_to_buffer(&mut result)
        .with_context(|| format!("Failed to read pixels of {:?}", path))?;
    let (sample, values) = samples(result)?;

    let size = rows * cols;
    if size == 0 || values.len() % size != 0 {
        anyhow::bail!("{:?}: {} samples do not fill {}x{} px", path, values.len(), cols, rows);
    }
    let bands = values.len() / size;

    let data = if layout.planes > 1 {
        RasterData::new(bands, rows, cols, sample, values)
    } else {
        let mut planar = vec![0.0; values.len()];
        for (i, v) in values.into_iter().enumerate() {
            planar[(i % bands) * size + i / bands] = v;
        }
        RasterData::new(bands, rows, cols, sample, planar)
    };

    Ok(GeoTiff { data, transform })
}

fn write_geokeys<W: Write + Seek>(
    dir: &mut DirectoryEncoder<'_, W, TiffKindStandard>,
    transform: &AffineTransform,
) -> Result<()> {
    if transform.rotation_x != 0.0 || transform.rotation_y != 0.0 {
        let matrix = [
            transform.pixel_width,
            transform.rotation_x,
            0.0,
            transform.origin_x,
            transform.rotation_y,
            transform.pixel_height,
            0.0,
            transform.origin_y,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
        ];
        dir.write_tag(Tag::ModelTransformationTag, &matrix[..])?;
    } else {
        let scale = [transform.pixel_width, -transform.pixel_height, 0.0];
        dir.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
        let tie = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
        dir.write_tag(Tag::ModelTiepointTag, &tie[..])?;
    }

    let keys: [u16; 12] = [
        1, 1, 0, 2, // version, revision, minor, key count
        GT_MODEL_TYPE_GEO_KEY, 0, 1, MODEL_TYPE_PROJECTED,
        GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
    ];
    dir.write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
    Ok(())
}

fn encode<C, W>(
    encoder: &mut TiffEncoder<W>,
    cols: u32,
    rows: u32,
    bands: usize,
    transform: &AffineTransform,
    pixels: &[C::Inner],
) -> Result<()>
where
    C: ColorType,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let mut image = encoder.new_image::<C>(cols, rows)?;
    let extra = bands.saturating_sub(C::BITS_PER_SAMPLE.len());
    if extra > 0 {
        image.extra_samples(&vec![ExtraSamples::Unspecified; extra])?;
    }
    write_geokeys(image.encoder(), transform)?;
    image.write_data(pixels)?;
    Ok(())
}

fn interleaved<T>(data: &RasterData, cast: impl Fn(f32) -> T) -> Vec<T> {
    let size = data.rows * data.cols;
    let mut out = Vec::with_capacity(data.values.len());
    for px in 0..size {
        for band in 0..data.bands {
            out.push(cast(data.values[band * size + px]));
        }
    }
    out
}

/// Writes band-major data as an uncompressed GeoTIFF. Three bands are tagged
/// RGB, any other count gray plus unspecified extra samples.
pub fn write_geotiff(path: &Path, data: &RasterData, transform: &AffineTransform) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let (cols, rows, bands) = (data.cols as u32, data.rows as u32, data.bands);
    let rgb = bands == 3;

    match data.sample {
        SampleType::U8 => {
            let px = interleaved(data, |v| v.clamp(0.0, 255.0) as u8);
            if rgb {
                encode::<RGB8, _>(&mut encoder, cols, rows, bands, transform, &px)
            } else {
                encode::<Gray8, _>(&mut encoder, cols, rows, bands, transform, &px)
            }
        }
        SampleType::U16 => {
            let px = interleaved(data, |v| v.clamp(0.0, 65535.0) as u16);
            if rgb {
                encode::<RGB16, _>(&mut encoder, cols, rows, bands, transform, &px)
            } else {
                encode::<Gray16, _>(&mut encoder, cols, rows, bands, transform, &px)
            }
        }
        SampleType::I16 => {
            let px = interleaved(data, |v| v.clamp(-32768.0, 32767.0) as i16);
            encode::<GrayI16, _>(&mut encoder, cols, rows, bands, transform, &px)
        }
        SampleType::F32 => {
            let px = interleaved(data, |v| v);
            if rgb {
                encode::<RGB32Float, _>(&mut encoder, cols, rows, bands, transform, &px)
            } else {
                encode::<Gray32Float, _>(&mut encoder, cols, rows, bands, transform, &px)
            }
        }
    }
    .with_context(|| format!("Failed to encode {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_pixel_scale_and_tiepoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.tif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
            let mut image = encoder.new_image::<RGB8>(4, 4).unwrap();
            image
                .encoder()
                .write_tag(Tag::ModelPixelScaleTag, &[0.5, 0.5, 0.0][..])
                .unwrap();
            image
                .encoder()
                .write_tag(
                    Tag::ModelTiepointTag,
                    &[0.0, 0.0, 0.0, 500000.0, 4000000.0, 0.0][..],
                )
                .unwrap();
            image.write_data(&[7u8; 4 * 4 * 3]).unwrap();
        }

        let tif = read_geotiff(&path).unwrap();
        assert_eq!(
            tif.transform,
            Some(AffineTransform::new(500000.0, 4000000.0, 0.5, -0.5))
        );
        assert_eq!((tif.data.bands, tif.data.cols, tif.data.rows), (3, 4, 4));
        assert_eq!(tif.data.sample, SampleType::U8);
    }

    #[test]
    fn test_untagged_tiff_has_no_transform() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.tif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
            encoder.write_image::<Gray8>(2, 2, &[1, 2, 3, 4]).unwrap();
        }
        let tif = read_geotiff(&path).unwrap();
        assert!(tif.transform.is_none());
        assert_eq!(tif.data.values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_five_band_int16_keeps_values_and_georeference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multi.tif");
        let values: Vec<f32> = (0..5 * 2 * 3).map(|v| (v as f32 - 10.0) * 100.0).collect();
        let data = RasterData::new(5, 2, 3, SampleType::I16, values);
        let gt = AffineTransform::new(300.0, 900.0, 10.0, -10.0);

        write_geotiff(&path, &data, &gt).unwrap();
        let back = read_geotiff(&path).unwrap();
        assert_eq!(back.transform, Some(gt));
        assert_eq!(back.data, data);
    }

    #[test]
    fn test_rotated_transform_uses_model_transformation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotated.tif");
        let data = RasterData::new(1, 1, 2, SampleType::F32, vec![0.25, -4.0]);
        let gt = AffineTransform {
            rotation_x: 0.5,
            rotation_y: 0.25,
            ..AffineTransform::new(10.0, 20.0, 2.0, -2.0)
        };

        write_geotiff(&path, &data, &gt).unwrap();
        let back = read_geotiff(&path).unwrap();
        assert_eq!(back.transform, Some(gt));
        assert_eq!(back.data.values, vec![0.25, -4.0]);
    }
}
