use anyhow::{Context, Result};
use std::fmt::Write as _;

/// Six-parameter affine pixel <-> world mapping of a north-up raster.
///
/// ```text
/// x = origin_x + col * pixel_width
/// y = origin_y + row * pixel_height
/// ```
///
/// `pixel_height` is negative for north-up imagery. Rotation terms are carried
/// through to world files but not applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
    pub origin_x: f64,
    pub origin_y: f64,
}

impl AffineTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            pixel_width,
            rotation_x: 0.0,
            rotation_y: 0.0,
            pixel_height,
            origin_x,
            origin_y,
        }
    }

    pub fn cell_width(&self) -> f64 {
        self.pixel_width.abs()
    }

    pub fn cell_height(&self) -> f64 {
        self.pixel_height.abs()
    }

    pub fn pixel_to_world(&self, row: f64, col: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y + row * self.pixel_height,
        )
    }

    /// Pixel containing `(x, y)` as `(col, row)`, floored toward the origin side.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (i64, i64) {
        let col = ((x - self.origin_x) / self.pixel_width).floor();
        let row = ((y - self.origin_y) / self.pixel_height).floor();
        (col as i64, row as i64)
    }

    /// Transform of a window whose upper-left pixel is `(origin_row, origin_col)`
    /// in this raster.
    pub fn offset(&self, origin_row: f64, origin_col: f64) -> Self {
        let (x, y) = self.pixel_to_world(origin_row, origin_col);
        Self {
            origin_x: x,
            origin_y: y,
            ..*self
        }
    }

    /// Same origin, pixels rescaled so `cols` x `rows` pixels span `new_cols` x `new_rows`.
    pub fn rescaled(&self, cols: usize, rows: usize, new_cols: usize, new_rows: usize) -> Self {
        Self {
            pixel_width: self.pixel_width * cols as f64 / new_cols as f64,
            pixel_height: self.pixel_height * rows as f64 / new_rows as f64,
            ..*self
        }
    }

    /// Parses an ESRI world file (A, D, B, E, C, F; C/F address the centre of
    /// the upper-left pixel).
    pub fn from_world_file(content: &str) -> Result<Self> {
        let values: Vec<f64> = content
            .split(|c: char| c == '\n' || c == ',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>()
                    .with_context(|| format!("Invalid world file value: {:?}", s))
            })
            .collect::<Result<_>>()?;

        if values.len() < 6 {
            anyhow::bail!("World file needs 6 values, found {}", values.len());
        }

        let (a, d, b, e, c, f) = (
            values[0], values[1], values[2], values[3], values[4], values[5],
        );

        Ok(Self {
            pixel_width: a,
            rotation_y: d,
            rotation_x: b,
            pixel_height: e,
            origin_x: c - a / 2.0 - b / 2.0,
            origin_y: f - d / 2.0 - e / 2.0,
        })
    }

    pub fn to_world_file(&self) -> String {
        let c = self.origin_x + self.pixel_width / 2.0 + self.rotation_x / 2.0;
        let f = self.origin_y + self.rotation_y / 2.0 + self.pixel_height / 2.0;
        let mut out = String::new();
        for v in [
            self.pixel_width,
            self.rotation_y,
            self.rotation_x,
            self.pixel_height,
            c,
            f,
        ] {
            let _ = writeln!(out, "{}", v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AffineTransform {
        AffineTransform::new(500_000.0, 4_000_000.0, 0.5, -0.5)
    }

    #[test]
    fn test_pixel_world_round_trip() {
        let gt = sample();
        let (x, y) = gt.pixel_to_world(10.0, 20.0);
        assert_eq!((x, y), (500_010.0, 3_999_995.0));
        assert_eq!(gt.world_to_pixel(x, y), (20, 10));
        // Anywhere inside the pixel floors back to it
        assert_eq!(gt.world_to_pixel(x + 0.49, y - 0.49), (20, 10));
    }

    #[test]
    fn test_world_to_pixel_floors_outside_origin() {
        let gt = sample();
        assert_eq!(gt.world_to_pixel(499_999.9, 4_000_000.1), (-1, -1));
    }

    #[test]
    fn test_offset_keeps_pixel_size() {
        let gt = sample();
        let tile = gt.offset(100.0, 40.0);
        assert_eq!(tile.origin_x, 500_020.0);
        assert_eq!(tile.origin_y, 3_999_950.0);
        assert_eq!(tile.pixel_width, gt.pixel_width);
        assert_eq!(tile.pixel_height, gt.pixel_height);
        assert_eq!(tile.pixel_to_world(0.0, 0.0), gt.pixel_to_world(100.0, 40.0));
    }

    #[test]
    fn test_world_file_uses_pixel_centres() {
        let gt = AffineTransform::from_world_file("2.0\n0.0\n0.0\n-2.0\n101.0\n199.0\n").unwrap();
        assert_eq!(gt.origin_x, 100.0);
        assert_eq!(gt.origin_y, 200.0);
        assert_eq!((gt.cell_width(), gt.cell_height()), (2.0, 2.0));

        let parsed = AffineTransform::from_world_file(&gt.to_world_file()).unwrap();
        assert_eq!(parsed, gt);
    }

    #[test]
    fn test_world_file_too_short() {
        assert!(AffineTransform::from_world_file("1.0\n0.0\n").is_err());
        assert!(AffineTransform::from_world_file("1\n0\n0\n-1\nabc\n0\n").is_err());
    }
}
