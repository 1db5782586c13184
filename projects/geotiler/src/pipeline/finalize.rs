use crate::error::SampleError;
use crate::pipeline::stretch::{stretch, BandLayout, StretchMethod};
use crate::pipeline::transform::AffineTransform;
use crate::pipeline::types::{PixelBox, SpatialRef};
use crate::raster::writer::{write_tile, ImageFormat};
use crate::raster::{RasterData, SampleType};
use ab_glyph::{Font, FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::fs;
use std::path::{Path, PathBuf};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 200]);
const BOX_THICKNESS: u32 = 2;
const TEXT_SCALE: f32 = 16.0;

/// Fonts tried when no label font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Loads the font used for class names on vision copies. An explicit path
/// must hold a valid font; otherwise the first usable system font is taken,
/// and `None` means boxes are drawn without names.
pub fn load_label_font(path: Option<&Path>) -> Result<Option<FontVec>> {
    if let Some(path) = path {
        let bytes = fs::read(path).with_context(|| format!("Failed to read font {:?}", path))?;
        let font = FontVec::try_from_vec(bytes).map_err(|_| {
            SampleError::config(format!("{:?} is not a TrueType/OpenType font", path))
        })?;
        return Ok(Some(font));
    }

    for candidate in SYSTEM_FONTS {
        let Ok(bytes) = fs::read(candidate) else {
            continue;
        };
        if let Ok(font) = FontVec::try_from_vec(bytes) {
            tracing::debug!("Labelling vision copies with {}", candidate);
            return Ok(Some(font));
        }
    }

    tracing::warn!("No label font found, vision copies show boxes without class names");
    Ok(None)
}

/// Outlines each box with a `thickness` pixel border growing inwards.
pub fn draw_boxes(img: &mut RgbImage, boxes: &[PixelBox], color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }

    for b in boxes {
        let (x0, x1) = (b.x0.min(w - 1), b.x1.min(w - 1));
        let (y0, y1) = (b.y0.min(h - 1), b.y1.min(h - 1));
        for t in 0..thickness {
            let (left, top) = (x0 + t, y0 + t);
            if left > x1.saturating_sub(t) || top > y1.saturating_sub(t) {
                break;
            }
            let width = x1 - t - left + 1;
            let height = y1 - t - top + 1;
            draw_hollow_rect_mut(
                img,
                Rect::at(left as i32, top as i32).of_size(width, height),
                color,
            );
        }
    }
}

/// Writes each box's class name with its baseline starting at the box centre.
pub fn draw_labels(img: &mut RgbImage, boxes: &[PixelBox], color: Rgb<u8>, font: &impl Font) {
    let scale = PxScale::from(TEXT_SCALE);
    for b in boxes {
        let text = b.label.as_str();
        if text.is_empty() {
            continue;
        }
        let (_, text_h) = text_size(scale, font, text);
        let cx = (b.x0 + b.x1) / 2;
        let cy = (b.y0 + b.y1) / 2;
        draw_text_mut(img, color, cx as i32, cy as i32 - text_h as i32, scale, font, text);
    }
}

/// 8-bit RGB view of a written tile: 16-bit and float tiles are stretched,
/// a single band is shown as gray.
fn to_rgb8(tile: &RasterData, stretch_method: StretchMethod) -> Result<RgbImage> {
    let bands: Vec<usize> = match tile.bands {
        1 => vec![1, 1, 1],
        n if n >= 3 => vec![1, 2, 3],
        n => {
            return Err(SampleError::config(format!(
                "vision copies need 1 or 3 bands, the tile has {}",
                n
            ))
            .into())
        }
    };
    let rgb = tile.select_bands(&bands);
    let size = rgb.rows * rgb.cols;
    let mut pixels = Vec::with_capacity(size * 3);
    for px in 0..size {
        for band in 0..3 {
            pixels.push(rgb.values[band * size + px]);
        }
    }

    let bytes: Vec<u8> = if rgb.sample == SampleType::U8 {
        pixels.iter().map(|&v| v.clamp(0.0, 255.0) as u8).collect()
    } else {
        stretch(&pixels, (3, rgb.rows, rgb.cols), BandLayout::BandLast, stretch_method)
    };
    RgbImage::from_raw(rgb.cols as u32, rgb.rows as u32, bytes)
        .ok_or_else(|| anyhow::anyhow!("Tile buffer does not match {}x{}", rgb.cols, rgb.rows))
}

/// Writes JPEG copies of detection tiles with their boxes and class names
/// drawn, into `<output>/vision`.
pub struct VisionWriter {
    dir: PathBuf,
    font: Option<FontVec>,
    stretch: StretchMethod,
}

impl VisionWriter {
    pub fn new(dir: PathBuf, font: Option<FontVec>, stretch: StretchMethod) -> Self {
        Self { dir, font, stretch }
    }

    /// Writes `<dir>/<stem>.jpg`.
    pub fn write(&self, stem: &str, tile: &RasterData, boxes: &[PixelBox]) -> Result<PathBuf> {
        let mut img = to_rgb8(tile, self.stretch)?;
        draw_boxes(&mut img, boxes, BOX_COLOR, BOX_THICKNESS);
        if let Some(font) = &self.font {
            draw_labels(&mut img, boxes, TEXT_COLOR, font);
        }

        let path = self.dir.join(format!("{}.jpg", stem));
        img.save_with_format(&path, image::ImageFormat::Jpeg)
            .with_context(|| format!("Failed to write vision copy {:?}", path))?;
        Ok(path)
    }
}

/// Writes a gray label as an RGB PNG (value replicated in each channel) with
/// its world file.
pub fn write_label_png(
    dir: &Path,
    stem: &str,
    label: &[u8],
    cols: usize,
    rows: usize,
    transform: &AffineTransform,
    srs: &SpatialRef,
) -> Result<PathBuf> {
    let gray: Vec<f32> = label.iter().map(|&v| f32::from(v)).collect();
    let mut values = Vec::with_capacity(gray.len() * 3);
    for _ in 0..3 {
        values.extend_from_slice(&gray);
    }
    let data = RasterData::new(3, rows, cols, SampleType::U8, values);
    write_tile(dir, stem, &data, ImageFormat::Png, transform, srs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Label;

    fn pixel_box(x0: u32, y0: u32, x1: u32, y1: u32) -> PixelBox {
        PixelBox {
            x0,
            y0,
            x1,
            y1,
            label: Label::from("car"),
            truncated: 0.0,
        }
    }

    #[test]
    fn test_draw_boxes_outlines_only() {
        let mut img = RgbImage::new(20, 20);
        draw_boxes(&mut img, &[pixel_box(2, 3, 12, 15)], BOX_COLOR, 2);

        assert_eq!(*img.get_pixel(2, 3), BOX_COLOR);
        assert_eq!(*img.get_pixel(12, 15), BOX_COLOR);
        assert_eq!(*img.get_pixel(3, 4), BOX_COLOR);
        assert_eq!(*img.get_pixel(7, 9), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(1, 3), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_boxes_clamps_to_image() {
        let mut img = RgbImage::new(8, 8);
        draw_boxes(&mut img, &[pixel_box(0, 0, 30, 30)], BOX_COLOR, 2);
        assert_eq!(*img.get_pixel(7, 7), BOX_COLOR);
        assert_eq!(*img.get_pixel(4, 4), Rgb([0, 0, 0]));
    }

    fn system_font() -> Option<FontVec> {
        load_label_font(None).unwrap()
    }

    #[test]
    fn test_vision_copy_of_sixteen_bit_tile() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<f32> = (0..16 * 16).map(|v| v as f32 * 100.0).collect();
        let tile = RasterData::new(1, 16, 16, SampleType::U16, values);

        let writer = VisionWriter::new(dir.path().to_path_buf(), None, StretchMethod::MinMax);
        let path = writer.write("000003", &tile, &[pixel_box(1, 1, 10, 10)]).unwrap();
        assert!(path.ends_with("000003.jpg"));
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (16, 16));
    }

    #[test]
    fn test_vision_copy_rejects_two_bands() {
        let dir = tempfile::tempdir().unwrap();
        let tile = RasterData::zeros(2, 4, 4, SampleType::U8);
        let writer = VisionWriter::new(dir.path().to_path_buf(), None, StretchMethod::MinMax);
        assert!(writer.write("x", &tile, &[]).is_err());
    }

    #[test]
    fn test_labels_are_drawn_from_the_box_centre() {
        let Some(font) = system_font() else {
            return;
        };
        let mut img = RgbImage::new(80, 80);
        draw_labels(&mut img, &[pixel_box(10, 10, 70, 70)], TEXT_COLOR, &font);

        let inked: Vec<(u32, u32)> = img
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0 != [0, 0, 0])
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!inked.is_empty());
        // Right of and above the centre, give or take glyph bearings
        assert!(inked.iter().all(|&(x, y)| x >= 38 && y <= 42));
        assert!(inked.iter().any(|&(x, _)| x > 48));
    }

    #[test]
    fn test_missing_font_file_is_an_error() {
        assert!(load_label_font(Some(Path::new("/nonexistent/font.ttf"))).is_err());

        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.ttf");
        fs::write(&bogus, b"not a font").unwrap();
        let err = load_label_font(Some(&bogus)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SampleError>(),
            Some(SampleError::Configuration(_))
        ));
    }

    #[test]
    fn test_label_png_is_gray_rgb_with_world_file() {
        let dir = tempfile::tempdir().unwrap();
        let gt = AffineTransform::new(0.0, 4.0, 1.0, -1.0);
        let label = vec![0, 1, 2, 255];

        let path =
            write_label_png(dir.path(), "000000", &label, 2, 2, &gt, &SpatialRef::default()).unwrap();
        assert!(dir.path().join("000000.pgw").is_file());

        let img = image::open(&path).unwrap().into_rgb8();
        assert_eq!(*img.get_pixel(1, 0), Rgb([1, 1, 1]));
        assert_eq!(*img.get_pixel(1, 1), Rgb([255, 255, 255]));
    }
}
