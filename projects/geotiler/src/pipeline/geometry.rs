use crate::pipeline::types::{Extent, SpatialRef};
use geo::{Area, BooleanOps, BoundingRect, Simplify};
use geo_types::{Coord, Line, LineString, MultiPolygon, Polygon};
use std::f64::consts::PI;

/// Bounding extent of a polygon; `None` for an empty ring.
pub fn polygon_extent(poly: &Polygon<f64>, srs: &SpatialRef) -> Option<Extent> {
    poly.bounding_rect()
        .map(|rect| Extent::from_rect(rect, srs.clone()))
}

pub fn multipolygon_extent(mp: &MultiPolygon<f64>, srs: &SpatialRef) -> Option<Extent> {
    mp.bounding_rect()
        .map(|rect| Extent::from_rect(rect, srs.clone()))
}

/// Dissolves all parts into one multipolygon, reducing pairwise unions as a
/// balanced tree.
pub fn union_all(mut parts: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    if parts.is_empty() {
        return MultiPolygon(vec![]);
    }

    while parts.len() > 1 {
        let mut next = Vec::with_capacity(parts.len() / 2 + 1);
        let mut iter = parts.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => next.push(a.union(&b)),
                None => next.push(a),
            }
        }
        parts = next;
    }

    parts.pop().unwrap_or_else(|| MultiPolygon(vec![]))
}

/// Vertices of the polygon approximating each round join; a multiple of 4 so
/// the axis-aligned extremes sit exactly at the buffer distance.
const ROUND_SEGMENTS: usize = 32;

/// Simplified rings keeping less than this share of the original area are
/// discarded in favour of the original.
const MIN_SIMPLIFIED_AREA: f64 = 0.9;

fn disk(center: Coord<f64>, radius: f64) -> Polygon<f64> {
    let ring: Vec<(f64, f64)> = (0..ROUND_SEGMENTS)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / ROUND_SEGMENTS as f64;
            (center.x + radius * angle.cos(), center.y + radius * angle.sin())
        })
        .collect();
    Polygon::new(LineString::from(ring), vec![])
}

/// Rectangle swept by a segment moved `dist` to either side.
fn edge_band(line: &Line<f64>, dist: f64) -> Option<Polygon<f64>> {
    let (dx, dy) = (line.dx(), line.dy());
    let len = dx.hypot(dy);
    if len == 0.0 {
        return None;
    }
    let (nx, ny) = (-dy / len * dist, dx / len * dist);
    let (a, b) = (line.start, line.end);
    Some(Polygon::new(
        LineString::from(vec![
            (a.x + nx, a.y + ny),
            (b.x + nx, b.y + ny),
            (b.x - nx, b.y - ny),
            (a.x - nx, a.y - ny),
        ]),
        vec![],
    ))
}

/// Round buffer: the polygon plus every point within `dist` of its boundary,
/// built as the union of the polygon, one band per edge and one disk per
/// vertex.
pub fn round_buffer(poly: &Polygon<f64>, dist: f64) -> MultiPolygon<f64> {
    if dist <= 0.0 {
        return MultiPolygon(vec![poly.clone()]);
    }

    let mut parts = vec![MultiPolygon(vec![poly.clone()])];
    for ring in std::iter::once(poly.exterior()).chain(poly.interiors()) {
        for line in ring.lines() {
            if let Some(band) = edge_band(&line, dist) {
                parts.push(MultiPolygon(vec![band]));
            }
            parts.push(MultiPolygon(vec![disk(line.start, dist)]));
        }
    }
    union_all(parts)
}

fn simplified(poly: &Polygon<f64>, tolerance: f64) -> Polygon<f64> {
    if tolerance <= 0.0 {
        return poly.clone();
    }
    let candidate = poly.simplify(&tolerance);
    let area = poly.unsigned_area();
    if candidate.unsigned_area() >= area * MIN_SIMPLIFIED_AREA {
        candidate
    } else {
        poly.clone()
    }
}

/// Simplify each feature, round-buffer it by `buffer_dist`, dissolve the
/// result and explode it back into single-part polygons.
pub fn buffered_regions(
    polygons: &[Polygon<f64>],
    simplify_tolerance: f64,
    buffer_dist: f64,
) -> Vec<Polygon<f64>> {
    let buffered: Vec<MultiPolygon<f64>> = polygons
        .iter()
        .map(|poly| round_buffer(&simplified(poly, simplify_tolerance), buffer_dist))
        .collect();

    union_all(buffered).0
}
