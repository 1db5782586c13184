use crate::pipeline::geometry::multipolygon_extent;
use crate::pipeline::slicing::{split_extent, SliceConfig, TileOriginMode};
use crate::pipeline::types::{BoxInfo, Extent, SpatialRef};
use crate::vector::Feature;
use geo::{Area, BooleanOps};
use geo_types::{MultiPolygon, Polygon};

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Boxes whose distance to `tile` is strictly below half a tile in world units.
pub fn find_neighbors<'a>(
    tile: &Extent,
    boxes: &'a [BoxInfo],
    cell_width: f64,
    tile_size: u32,
) -> Vec<&'a BoxInfo> {
    let radius = cell_width * tile_size as f64 / 2.0;
    boxes
        .iter()
        .filter(|b| tile.distance_to(&b.extent) < radius)
        .collect()
}

/// Portion of `object` inside `tile`.
///
/// Returns the extent of the overlap and the fraction of the object left
/// outside, or `None` when they are disjoint or only share an edge.
pub fn truncation(
    tile: &Polygon<f64>,
    object: &MultiPolygon<f64>,
    srs: &SpatialRef,
) -> Option<(Extent, f64)> {
    let object_area = object.unsigned_area();
    if object_area <= 0.0 {
        return None;
    }

    let overlap = MultiPolygon(vec![tile.clone()]).intersection(object);
    let overlap_area = overlap.unsigned_area();
    if overlap_area <= 0.0 {
        return None;
    }

    let extent = multipolygon_extent(&overlap, srs)?;
    let t = (1.0 - overlap_area / object_area).max(0.0);
    Some((extent, t))
}

/// Combines a box's existing truncation with the one from a new tile.
pub fn merge_truncation(prior: f64, fresh: f64) -> f64 {
    let merged = if prior == 0.0 && fresh != 0.0 {
        fresh
    } else if prior != 0.0 && fresh == 0.0 {
        prior
    } else {
        prior * fresh
    };
    round3(merged)
}

/// All boxes that land inside `tile`, clipped to it, with merged truncation.
/// An empty result means the tile carries no object and is skipped.
pub fn resolve_tile(
    tile: &Extent,
    boxes: &[BoxInfo],
    cell_width: f64,
    tile_size: u32,
) -> Vec<BoxInfo> {
    let tile_poly = tile.to_polygon();
    find_neighbors(tile, boxes, cell_width, tile_size)
        .into_iter()
        .filter_map(|neighbor| {
            let object = MultiPolygon(vec![neighbor.extent.to_polygon()]);
            truncation(&tile_poly, &object, &tile.srs).map(|(extent, t)| {
                BoxInfo::new(
                    extent,
                    neighbor.label.clone(),
                    merge_truncation(neighbor.truncated, t),
                )
            })
        })
        .collect()
}

/// Tile of `tile_size` pixels centred on `extent`.
pub fn centered_tile(extent: &Extent, cell_width: f64, cell_height: f64, tile_size: u32) -> Extent {
    let (cx, cy) = extent.center();
    Extent::centered(
        cx,
        cy,
        cell_width * tile_size as f64,
        cell_height * tile_size as f64,
        extent.srs.clone(),
    )
}

/// Detection objects: features that do not fit in one tile are cut into the
/// pieces covered by a center-anchored tiling, each carrying the share of the
/// feature it lost.
pub fn split_large_objects(
    features: &[Feature],
    cell_width: f64,
    cell_height: f64,
    config: &SliceConfig,
    srs: &SpatialRef,
) -> Vec<BoxInfo> {
    let mut out = Vec::new();
    for feature in features {
        let Some(extent) = multipolygon_extent(&feature.geometry, srs) else {
            continue;
        };

        let tile = centered_tile(&extent, cell_width, cell_height, config.tile_size);
        if tile.contains(&extent) {
            out.push(BoxInfo::new(extent, feature.label.clone(), 0.0));
            continue;
        }

        for spec in split_extent(
            &extent,
            cell_width,
            cell_height,
            config,
            TileOriginMode::Center,
            1,
        ) {
            if let Some((piece, t)) = truncation(&spec.extent.to_polygon(), &feature.geometry, srs)
            {
                out.push(BoxInfo::new(piece, feature.label.clone(), round3(t)));
            }
        }
    }
    out
}

/// Classification targets: oversized features are replaced by their
/// edge-anchored tiles, each a complete sample of the class.
pub fn split_large_targets(
    features: &[Feature],
    cell_width: f64,
    cell_height: f64,
    config: &SliceConfig,
    srs: &SpatialRef,
) -> Vec<BoxInfo> {
    let mut out = Vec::new();
    for feature in features {
        let Some(extent) = multipolygon_extent(&feature.geometry, srs) else {
            continue;
        };

        let tile = centered_tile(&extent, cell_width, cell_height, config.tile_size);
        if tile.contains(&extent) {
            out.push(BoxInfo::new(extent, feature.label.clone(), 0.0));
            continue;
        }

        out.extend(
            split_extent(
                &extent,
                cell_width,
                cell_height,
                config,
                TileOriginMode::Edge,
                1,
            )
            .into_iter()
            .map(|spec| BoxInfo::new(spec.extent, feature.label.clone(), 0.0)),
        );
    }
    out
}
