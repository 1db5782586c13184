use crate::pipeline::geometry::union_all;
use crate::pipeline::transform::AffineTransform;
use geo_types::{MultiPolygon, Polygon, Rect};
use std::collections::{BTreeMap, HashMap};

fn pixel_rect(
    transform: &AffineTransform,
    col0: usize,
    col1: usize,
    row0: usize,
    row1: usize,
) -> MultiPolygon<f64> {
    let (x0, y0) = transform.pixel_to_world(row0 as f64, col0 as f64);
    let (x1, y1) = transform.pixel_to_world(row1 as f64, col1 as f64);
    MultiPolygon(vec![Rect::new((x0, y0), (x1, y1)).to_polygon()])
}

/// Traces regions of equal value in a label map into world-space polygons.
///
/// Each row is split into runs of equal label; runs repeating with the same
/// span on consecutive rows are stacked into one rectangle. The rectangles of
/// a label are then dissolved, one output polygon per connected region.
pub fn polygonize(
    labels: &[i64],
    cols: usize,
    rows: usize,
    transform: &AffineTransform,
) -> Vec<(Polygon<f64>, i64)> {
    let mut pieces: BTreeMap<i64, Vec<MultiPolygon<f64>>> = BTreeMap::new();
    // (start, end, label) -> first row of the stacked rectangle
    let mut open: HashMap<(usize, usize, i64), usize> = HashMap::new();

    for row in 0..=rows {
        let mut next = HashMap::new();
        if row < rows {
            let line = &labels[row * cols..(row + 1) * cols];
            let mut start = 0;
            while start < cols {
                let label = line[start];
                let mut end = start + 1;
                while end < cols && line[end] == label {
                    end += 1;
                }
                let key = (start, end, label);
                let top = open.remove(&key).unwrap_or(row);
                next.insert(key, top);
                start = end;
            }
        }

        for ((start, end, label), top) in open.drain() {
            pieces
                .entry(label)
                .or_default()
                .push(pixel_rect(transform, start, end, top, row));
        }
        open = next;
    }

    pieces
        .into_iter()
        .flat_map(|(label, rects)| {
            union_all(rects)
                .0
                .into_iter()
                .map(move |polygon| (polygon, label))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    #[test]
    fn test_polygonize_regions() {
        let gt = AffineTransform::new(100.0, 200.0, 2.0, -2.0);
        #[rustfmt::skip]
        let labels = vec![
            1, 1, 2, 2,
            1, 1, 2, 2,
            1, 1, 1, 1,
            3, 3, 3, 1,
        ];
        let polygons = polygonize(&labels, 4, 4, &gt);

        let area = |label: i64| -> f64 {
            polygons
                .iter()
                .filter(|(_, l)| *l == label)
                .map(|(p, _)| p.unsigned_area())
                .sum()
        };
        // Each pixel is 4 square units
        assert_eq!(area(1), 9.0 * 4.0);
        assert_eq!(area(2), 4.0 * 4.0);
        assert_eq!(area(3), 3.0 * 4.0);

        // Label 1 is one connected region
        assert_eq!(polygons.iter().filter(|(_, l)| *l == 1).count(), 1);
    }

    #[test]
    fn test_uniform_map_is_one_rectangle() {
        let gt = AffineTransform::new(0.0, 10.0, 1.0, -1.0);
        let polygons = polygonize(&[5; 30], 6, 5, &gt);
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].1, 5);
        assert_eq!(polygons[0].0.unsigned_area(), 30.0);
    }

    #[test]
    fn test_separate_regions_stay_separate() {
        let gt = AffineTransform::new(0.0, 0.0, 1.0, -1.0);
        let labels = vec![7, 0, 7];
        let polygons = polygonize(&labels, 3, 1, &gt);
        assert_eq!(polygons.iter().filter(|(_, l)| *l == 7).count(), 2);
        assert_eq!(polygons.iter().filter(|(_, l)| *l == 0).count(), 1);
    }
}
