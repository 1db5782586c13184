use crate::error::SampleError;
use crate::pipeline::types::{Extent, TileSpec};
use anyhow::Result;

/// Tile size and overlap, both in pixels.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct SliceConfig {
    /// Size of each square tile (e.g., 512)
    pub tile_size: u32,
    /// Overlap between neighbouring tiles in pixels
    pub overlap: u32,
}

impl SliceConfig {
    pub fn new(tile_size: u32, overlap: u32) -> Result<Self> {
        if tile_size == 0 {
            return Err(SampleError::config("tile size must be greater than 0").into());
        }
        if overlap >= tile_size {
            return Err(SampleError::config(format!(
                "overlap ({}) must be smaller than tile size ({})",
                overlap, tile_size
            ))
            .into());
        }
        Ok(Self { tile_size, overlap })
    }

    /// Distance between the origins of two neighbouring tiles
    pub fn stride(&self) -> u32 {
        self.tile_size - self.overlap
    }
}

/// Where tiles are anchored when a feature is split.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum TileOriginMode {
    /// Fixed T x T tiles stepped from the feature centroid.
    Center,
    /// Strips anchored on the feature edges; small features keep their own extent.
    Edge,
}

/// Helper to generate tile offsets along one dimension.
///
/// Offsets start at 0 and step while the tile still fits; a final tile flush
/// against the far edge closes any remaining gap.
fn generate_offsets(total: f64, tile: f64, stride: f64) -> Vec<f64> {
    if total <= tile {
        return vec![0.0];
    }

    let limit = total - tile;
    let mut offsets = Vec::new();
    let mut pos = 0.0;
    while pos <= limit {
        offsets.push(pos);
        pos += stride;
    }

    if let Some(&last) = offsets.last() {
        if last < limit {
            offsets.push(limit);
        }
    }

    offsets
}

/// Tile centres along one axis, walking away from `center` by `stride` in both
/// directions. The backward walk includes `center`; the forward walk starts one
/// stride past it. Returned in ascending order.
fn walk_centers(center: f64, lo: f64, hi: f64, half: f64, stride: f64) -> Vec<f64> {
    let mut backward = Vec::new();
    let mut c = center;
    loop {
        backward.push(c);
        c -= stride;
        if c + half <= lo {
            break;
        }
    }

    let mut centers: Vec<f64> = backward.into_iter().rev().collect();
    let mut c = center + stride;
    while c - half < hi {
        centers.push(c);
        c += stride;
    }
    centers
}

/// Partitions `extent` into tiles of `config.tile_size` pixels.
///
/// The case is chosen by comparing the rounded pixel width/height with
/// `multiple * tile_size`. At least one tile is always returned.
pub fn split_extent(
    extent: &Extent,
    cell_width: f64,
    cell_height: f64,
    config: &SliceConfig,
    mode: TileOriginMode,
    multiple: u32,
) -> Vec<TileSpec> {
    let t = config.tile_size as f64;
    let threshold = (multiple.max(1) * config.tile_size) as f64;
    let width_px = (extent.width() / cell_width).round();
    let height_px = (extent.height() / cell_height).round();

    let tile_w = t * cell_width;
    let tile_h = t * cell_height;
    let stride_w = config.stride() as f64 * cell_width;
    let stride_h = config.stride() as f64 * cell_height;
    let (cx, cy) = extent.center();
    let srs = &extent.srs;

    let wide = width_px >= threshold;
    let tall = height_px >= threshold;

    match (wide, tall, mode) {
        (false, false, TileOriginMode::Center) => vec![TileSpec {
            extent: Extent::centered(cx, cy, tile_w, tile_h, srs.clone()),
            source_row: 0,
            source_col: 0,
        }],
        (false, false, TileOriginMode::Edge) => vec![TileSpec {
            extent: extent.clone(),
            source_row: 0,
            source_col: 0,
        }],
        (true, false, TileOriginMode::Center) => {
            walk_centers(cx, extent.xmin, extent.xmax, tile_w / 2.0, stride_w)
                .into_iter()
                .enumerate()
                .map(|(col, x)| TileSpec {
                    extent: Extent::centered(x, cy, tile_w, tile_h, srs.clone()),
                    source_row: 0,
                    source_col: col,
                })
                .collect()
        }
        (false, true, TileOriginMode::Center) => {
            // Ascending y is bottom-up; rows count from the top
            let mut centers = walk_centers(cy, extent.ymin, extent.ymax, tile_h / 2.0, stride_h);
            centers.reverse();
            centers
                .into_iter()
                .enumerate()
                .map(|(row, y)| TileSpec {
                    extent: Extent::centered(cx, y, tile_w, tile_h, srs.clone()),
                    source_row: row,
                    source_col: 0,
                })
                .collect()
        }
        (true, false, TileOriginMode::Edge) => {
            generate_offsets(extent.width(), tile_w, stride_w)
                .into_iter()
                .enumerate()
                .map(|(col, dx)| TileSpec {
                    extent: Extent::new(
                        extent.xmin + dx,
                        extent.xmin + dx + tile_w,
                        extent.ymin,
                        extent.ymax,
                        srs.clone(),
                    ),
                    source_row: 0,
                    source_col: col,
                })
                .collect()
        }
        (false, true, TileOriginMode::Edge) => {
            generate_offsets(extent.height(), tile_h, stride_h)
                .into_iter()
                .enumerate()
                .map(|(row, dy)| TileSpec {
                    extent: Extent::new(
                        extent.xmin,
                        extent.xmax,
                        extent.ymax - dy - tile_h,
                        extent.ymax - dy,
                        srs.clone(),
                    ),
                    source_row: row,
                    source_col: 0,
                })
                .collect()
        }
        (true, true, _) => {
            let x_offsets = generate_offsets(extent.width(), tile_w, stride_w);
            let y_offsets = generate_offsets(extent.height(), tile_h, stride_h);

            let mut tiles = Vec::with_capacity(x_offsets.len() * y_offsets.len());
            for (row, &dy) in y_offsets.iter().enumerate() {
                for (col, &dx) in x_offsets.iter().enumerate() {
                    let xmin = extent.xmin + dx;
                    let ymax = extent.ymax - dy;
                    tiles.push(TileSpec {
                        extent: Extent::new(xmin, xmin + tile_w, ymax - tile_h, ymax, srs.clone()),
                        source_row: row,
                        source_col: col,
                    });
                }
            }
            tiles
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::SpatialRef;

    fn ext(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Extent {
        Extent::new(xmin, xmax, ymin, ymax, SpatialRef::default())
    }

    fn covered(tiles: &[TileSpec], x: f64, y: f64) -> bool {
        tiles.iter().any(|t| {
            let e = &t.extent;
            x >= e.xmin && x <= e.xmax && y >= e.ymin && y <= e.ymax
        })
    }

    #[test]
    fn test_slice_config_validation() {
        assert_eq!(SliceConfig::new(512, 16).unwrap().stride(), 496);
        assert!(SliceConfig::new(512, 512).is_err());
        assert!(SliceConfig::new(512, 600).is_err());
        assert!(SliceConfig::new(0, 0).is_err());
    }

    #[test]
    fn test_generate_offsets_adds_flush_tile() {
        assert_eq!(generate_offsets(100.0, 100.0, 80.0), vec![0.0]);
        assert_eq!(generate_offsets(260.0, 100.0, 80.0), vec![0.0, 80.0, 160.0]);
        assert_eq!(generate_offsets(300.0, 100.0, 80.0), vec![0.0, 80.0, 160.0, 200.0]);
    }

    #[test]
    fn test_small_feature_center_and_edge() {
        let config = SliceConfig::new(256, 0).unwrap();
        let feature = ext(10.0, 60.0, 20.0, 40.0);

        let center = split_extent(&feature, 1.0, 1.0, &config, TileOriginMode::Center, 1);
        assert_eq!(center.len(), 1);
        assert_eq!(center[0].extent, ext(-93.0, 163.0, -98.0, 158.0));

        let edge = split_extent(&feature, 1.0, 1.0, &config, TileOriginMode::Edge, 1);
        assert_eq!(edge.len(), 1);
        assert_eq!(edge[0].extent, feature);
    }

    #[test]
    fn test_wide_scenario() {
        let config = SliceConfig::new(512, 16).unwrap();
        let feature = ext(0.0, 2000.0, 0.0, 300.0);
        let tiles = split_extent(&feature, 1.0, 1.0, &config, TileOriginMode::Center, 1);

        assert_eq!(tiles.len(), 5);
        for tile in &tiles {
            assert_eq!(tile.extent.width(), 512.0);
            assert_eq!(tile.extent.height(), 512.0);
            assert!(tile.extent.xmin >= -256.0);
            assert!(tile.extent.xmax <= 2256.0);
            assert_eq!(tile.source_row, 0);
        }
        let columns: Vec<usize> = tiles.iter().map(|t| t.source_col).collect();
        assert_eq!(columns, vec![0, 1, 2, 3, 4]);

        // No duplicate tile at the centroid
        let centroid_tiles = tiles
            .iter()
            .filter(|t| t.extent.center() == (1000.0, 150.0))
            .count();
        assert_eq!(centroid_tiles, 1);

        for x in (0..=2000).step_by(25) {
            assert!(covered(&tiles, x as f64, 150.0), "x={} not covered", x);
        }
    }

    #[test]
    fn test_tall_center_walk_is_top_down() {
        let config = SliceConfig::new(100, 20).unwrap();
        let feature = ext(0.0, 50.0, 0.0, 400.0);
        let tiles = split_extent(&feature, 1.0, 1.0, &config, TileOriginMode::Center, 1);

        assert!(tiles.len() >= 5);
        for pair in tiles.windows(2) {
            assert!(pair[0].extent.ymax > pair[1].extent.ymax);
        }
        for y in (0..=400).step_by(10) {
            assert!(covered(&tiles, 25.0, y as f64));
        }
    }

    #[test]
    fn test_wide_edge_strips_span_full_height() {
        let config = SliceConfig::new(100, 20).unwrap();
        let feature = ext(0.0, 300.0, 0.0, 40.0);
        let tiles = split_extent(&feature, 1.0, 1.0, &config, TileOriginMode::Edge, 1);

        let xs: Vec<(f64, f64)> = tiles
            .iter()
            .map(|t| (t.extent.xmin, t.extent.xmax))
            .collect();
        assert_eq!(
            xs,
            vec![(0.0, 100.0), (80.0, 180.0), (160.0, 260.0), (200.0, 300.0)]
        );
        assert!(tiles.iter().all(|t| t.extent.ymin == 0.0 && t.extent.ymax == 40.0));
    }

    #[test]
    fn test_tall_edge_starts_at_top_and_ends_flush() {
        let config = SliceConfig::new(100, 0).unwrap();
        let feature = ext(0.0, 40.0, 0.0, 250.0);
        let tiles = split_extent(&feature, 1.0, 1.0, &config, TileOriginMode::Edge, 1);

        let ys: Vec<(f64, f64)> = tiles
            .iter()
            .map(|t| (t.extent.ymin, t.extent.ymax))
            .collect();
        assert_eq!(ys, vec![(150.0, 250.0), (50.0, 150.0), (0.0, 100.0)]);
    }

    #[test]
    fn test_large_case_covers_feature_row_major() {
        let config = SliceConfig::new(64, 8).unwrap();
        let feature = ext(1000.0, 1300.0, 5000.0, 5150.0);

        for mode in [TileOriginMode::Center, TileOriginMode::Edge] {
            let tiles = split_extent(&feature, 0.5, 0.5, &config, mode, 1);

            for tile in &tiles {
                assert!(feature.contains(&tile.extent));
                assert_eq!(tile.extent.width(), 32.0);
                assert_eq!(tile.extent.height(), 32.0);
            }

            // Row-major, top to bottom then left to right
            for pair in tiles.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                assert!(
                    (a.source_row, a.source_col) < (b.source_row, b.source_col),
                    "tiles out of order"
                );
                if a.source_row == b.source_row {
                    assert!(a.extent.xmin < b.extent.xmin);
                } else {
                    assert!(a.extent.ymax > b.extent.ymax);
                }
            }

            let mut y = feature.ymin;
            while y <= feature.ymax {
                let mut x = feature.xmin;
                while x <= feature.xmax {
                    assert!(covered(&tiles, x, y), "({}, {}) not covered", x, y);
                    x += 7.5;
                }
                y += 7.5;
            }
        }
    }

    /// Points on a `steps` x `steps` lattice spanning the extent, edges included.
    fn lattice(e: &Extent, steps: usize) -> Vec<(f64, f64)> {
        let mut points = Vec::with_capacity(steps * steps);
        for i in 0..steps {
            for j in 0..steps {
                let fx = i as f64 / (steps - 1) as f64;
                let fy = j as f64 / (steps - 1) as f64;
                points.push((e.xmin + fx * e.width(), e.ymin + fy * e.height()));
            }
        }
        points
    }

    fn covered_within(tiles: &[TileSpec], x: f64, y: f64, eps: f64) -> bool {
        tiles.iter().any(|t| {
            let e = &t.extent;
            x >= e.xmin - eps && x <= e.xmax + eps && y >= e.ymin - eps && y <= e.ymax + eps
        })
    }

    #[test]
    fn test_large_case_coverage_across_sizes_and_overlaps() {
        for tile_size in [16u32, 64, 100] {
            for overlap in [0, 1, tile_size / 4, tile_size / 2, tile_size - 1] {
                let config = SliceConfig::new(tile_size, overlap).unwrap();
                for cell in [0.3, 1.0, 2.5] {
                    for (fw, fh) in [(1.0, 1.0), (1.37, 2.61), (3.29, 1.08)] {
                        // Extents that do not land on whole pixels
                        let width = (tile_size as f64 * fw + 0.37) * cell;
                        let height = (tile_size as f64 * fh + 0.81) * cell;
                        let feature = ext(1234.567, 1234.567 + width, -987.65, -987.65 + height);

                        for mode in [TileOriginMode::Center, TileOriginMode::Edge] {
                            let tiles = split_extent(&feature, cell, cell, &config, mode, 1);
                            assert!(!tiles.is_empty());
                            for t in &tiles {
                                assert!((t.extent.width() - tile_size as f64 * cell).abs() < 1e-6);
                                assert!((t.extent.height() - tile_size as f64 * cell).abs() < 1e-6);
                            }
                            for (x, y) in lattice(&feature, 17) {
                                assert!(
                                    covered_within(&tiles, x, y, 1e-6),
                                    "T={} O={} cell={} {:?}: ({}, {}) not covered",
                                    tile_size,
                                    overlap,
                                    cell,
                                    mode,
                                    x,
                                    y
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_directional_center_walks_cover_the_feature() {
        for tile_size in [32u32, 100] {
            for overlap in [0, tile_size / 3, tile_size - 1] {
                let config = SliceConfig::new(tile_size, overlap).unwrap();
                for cell in [0.5, 3.0] {
                    let long = (tile_size as f64 * 4.43) * cell;
                    let short = (tile_size as f64 * 0.4) * cell;
                    let wide = ext(10.1, 10.1 + long, 20.2, 20.2 + short);
                    let tall = ext(10.1, 10.1 + short, 20.2, 20.2 + long);

                    for feature in [wide, tall] {
                        let tiles =
                            split_extent(&feature, cell, cell, &config, TileOriginMode::Center, 1);
                        assert!(tiles.len() > 1);
                        for (x, y) in lattice(&feature, 25) {
                            assert!(covered_within(&tiles, x, y, 1e-6));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_multiple_raises_threshold() {
        let config = SliceConfig::new(100, 0).unwrap();
        let feature = ext(0.0, 150.0, 0.0, 150.0);

        let single = split_extent(&feature, 1.0, 1.0, &config, TileOriginMode::Center, 1);
        assert_eq!(single.len(), 4);

        let doubled = split_extent(&feature, 1.0, 1.0, &config, TileOriginMode::Center, 2);
        assert_eq!(doubled.len(), 1);
    }
}
