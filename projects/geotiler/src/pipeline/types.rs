use geo_types::{LineString, Polygon};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Opaque spatial reference token (usually WKT from a `.prj` sidecar).
/// Carried through the pipeline and written back out, never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpatialRef(Option<Arc<str>>);

impl SpatialRef {
    pub fn from_wkt(wkt: &str) -> Self {
        let trimmed = wkt.trim();
        if trimmed.is_empty() {
            Self(None)
        } else {
            Self(Some(Arc::from(trimmed)))
        }
    }

    pub fn wkt(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Name of the reference system: the first quoted token of the WKT.
    pub fn name(&self) -> &str {
        self.wkt()
            .and_then(|w| w.split('"').nth(1))
            .unwrap_or("Unknown")
    }
}

/// Axis-aligned bounding box in world coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Extent {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
    pub srs: SpatialRef,
}

impl Extent {
    /// Builds an extent from two corners in any order.
    pub fn new(x1: f64, x2: f64, y1: f64, y2: f64, srs: SpatialRef) -> Self {
        Self {
            xmin: x1.min(x2),
            xmax: x1.max(x2),
            ymin: y1.min(y2),
            ymax: y1.max(y2),
            srs,
        }
    }

    /// Box of `width` x `height` world units centred on `(cx, cy)`.
    pub fn centered(cx: f64, cy: f64, width: f64, height: f64, srs: SpatialRef) -> Self {
        let hw = width / 2.0;
        let hh = height / 2.0;
        Self::new(cx - hw, cx + hw, cy - hh, cy + hh, srs)
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.xmin + self.xmax) / 2.0, (self.ymin + self.ymax) / 2.0)
    }

    pub fn contains(&self, other: &Extent) -> bool {
        other.xmin >= self.xmin
            && other.xmax <= self.xmax
            && other.ymin >= self.ymin
            && other.ymax <= self.ymax
    }

    /// True when the boxes share any point, edges included.
    pub fn intersects(&self, other: &Extent) -> bool {
        !(other.xmin > self.xmax
            || other.xmax < self.xmin
            || other.ymin > self.ymax
            || other.ymax < self.ymin)
    }

    /// Euclidean distance between the two rectangles; 0 when they touch or overlap.
    pub fn distance_to(&self, other: &Extent) -> f64 {
        let dx = (other.xmin - self.xmax).max(self.xmin - other.xmax).max(0.0);
        let dy = (other.ymin - self.ymax).max(self.ymin - other.ymax).max(0.0);
        dx.hypot(dy)
    }

    /// Closed ring (xmin,ymin) -> (xmax,ymin) -> (xmax,ymax) -> (xmin,ymax).
    pub fn to_polygon(&self) -> Polygon<f64> {
        let ring = LineString::from(vec![
            (self.xmin, self.ymin),
            (self.xmax, self.ymin),
            (self.xmax, self.ymax),
            (self.xmin, self.ymax),
            (self.xmin, self.ymin),
        ]);
        Polygon::new(ring, vec![])
    }

    pub fn from_rect(rect: geo_types::Rect<f64>, srs: SpatialRef) -> Self {
        let min = rect.min();
        let max = rect.max();
        Self::new(min.x, max.x, min.y, max.y, srs)
    }
}

/// Class value of a feature, kept as text. Numeric JSON values keep their
/// JSON spelling so `3` and `"3"` map to the same class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Label(pub String);

impl Label {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the label is a non-negative integer literal.
    pub fn is_digit(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(|c| c.is_ascii_digit())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One ground-truth object, or a fragment of one after splitting.
/// `truncated` is the fraction of the original object lying outside this fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxInfo {
    pub extent: Extent,
    pub label: Label,
    pub truncated: f64,
}

impl BoxInfo {
    pub fn new(extent: Extent, label: Label, truncated: f64) -> Self {
        Self {
            extent,
            label,
            truncated,
        }
    }
}

/// A candidate sampling tile produced by one tiling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSpec {
    pub extent: Extent,
    pub source_row: usize,
    pub source_col: usize,
}

/// Object box in tile pixel space, clipped to `[0, tile_size - 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PixelBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub label: Label,
    pub truncated: f64,
}

/// Final per-tile unit handed to the raster-clip and label writers.
#[derive(Debug, Clone)]
pub struct ObjectSample {
    pub tile_extent: Extent,
    pub boxes: Vec<PixelBox>,
}
