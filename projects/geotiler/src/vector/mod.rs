pub mod polygonize;
pub mod rasterize;

use crate::error::SampleError;
use crate::pipeline::types::Label;
use anyhow::{Context, Result};
use geojson::{Feature as GeoJsonFeature, FeatureCollection, GeoJson, Geometry, JsonObject};
use geo_types::{MultiPolygon, Polygon};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Annotated polygon read from the input vector file.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: MultiPolygon<f64>,
    pub label: Label,
}

fn label_from_json(value: &Value) -> Option<Label> {
    match value {
        Value::String(s) => Some(Label(s.clone())),
        Value::Number(n) => Some(Label(n.to_string())),
        Value::Bool(b) => Some(Label(b.to_string())),
        _ => None,
    }
}

fn to_multipolygon(geometry: geo_types::Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        geo_types::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        geo_types::Geometry::MultiPolygon(mp) => Some(mp),
        geo_types::Geometry::Rect(r) => Some(MultiPolygon(vec![r.to_polygon()])),
        _ => None,
    }
}

/// Reads polygon features from a GeoJSON file. Every feature must carry
/// `class_field`; non-polygonal geometries are skipped with a warning.
pub fn read_features(path: &Path, class_field: &str) -> Result<Vec<Feature>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read features {:?}", path))?;
    let geojson: GeoJson = text
        .parse()
        .with_context(|| format!("Failed to parse GeoJSON {:?}", path))?;

    let raw: Vec<GeoJsonFeature> = match geojson {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(_) => {
            return Err(SampleError::config(format!(
                "{:?} holds a bare geometry; features with a {:?} property are required",
                path, class_field
            ))
            .into())
        }
    };

    let mut features = Vec::with_capacity(raw.len());
    for (i, feature) in raw.into_iter().enumerate() {
        let label = feature
            .property(class_field)
            .and_then(label_from_json)
            .ok_or_else(|| {
                SampleError::config(format!(
                    "feature {} has no {:?} value",
                    i, class_field
                ))
            })?;

        let Some(geometry) = feature.geometry else {
            tracing::warn!("Feature {} has no geometry, skipping", i);
            continue;
        };
        let geometry = geo_types::Geometry::<f64>::try_from(geometry)
            .with_context(|| format!("Invalid geometry in feature {}", i))?;
        match to_multipolygon(geometry) {
            Some(geometry) => features.push(Feature { geometry, label }),
            None => tracing::warn!("Feature {} is not a polygon, skipping", i),
        }
    }

    tracing::info!("Read {} feature(s) from {:?}", features.len(), path);
    Ok(features)
}

pub fn distinct_labels(features: &[Feature]) -> BTreeSet<Label> {
    features.iter().map(|f| f.label.clone()).collect()
}

/// Output polygon layer with an integer `class` attribute (null for background).
#[derive(Debug, Default)]
pub struct FeatureLayer {
    features: Vec<(Polygon<f64>, Option<i64>)>,
}

impl FeatureLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, polygon: Polygon<f64>, class: Option<i64>) {
        self.features.push((polygon, class));
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[(Polygon<f64>, Option<i64>)] {
        &self.features
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .features
            .iter()
            .map(|(polygon, class)| {
                let mut properties = JsonObject::new();
                properties.insert(
                    "class".to_string(),
                    class.map(Value::from).unwrap_or(Value::Null),
                );
                GeoJsonFeature {
                    bbox: None,
                    geometry: Some(Geometry::new(geojson::Value::from(polygon))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    pub fn write_geojson(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string(&self.to_feature_collection())?;
        fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Extent, SpatialRef};

    const SAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"class": "ship"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,5],[0,5],[0,0]]]}},
            {"type": "Feature", "properties": {"class": 3},
             "geometry": {"type": "MultiPolygon", "coordinates": [[[[20,20],[30,20],[30,30],[20,20]]]]}},
            {"type": "Feature", "properties": {"class": "road"},
             "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]}}
        ]
    }"#;

    #[test]
    fn test_read_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.geojson");
        fs::write(&path, SAMPLE).unwrap();

        let features = read_features(&path, "class").unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].label.as_str(), "ship");
        assert_eq!(features[1].label.as_str(), "3");

        let labels: Vec<String> = distinct_labels(&features)
            .into_iter()
            .map(|l| l.0)
            .collect();
        assert_eq!(labels, vec!["3", "ship"]);
    }

    #[test]
    fn test_missing_class_field_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.geojson");
        fs::write(&path, SAMPLE).unwrap();

        let err = read_features(&path, "category").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SampleError>(),
            Some(SampleError::Configuration(_))
        ));
    }

    #[test]
    fn test_feature_layer_geojson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.geojson");
        let square = Extent::new(0.0, 1.0, 0.0, 1.0, SpatialRef::default()).to_polygon();

        let mut layer = FeatureLayer::new();
        layer.push(square.clone(), Some(4));
        layer.push(square, None);
        layer.write_geojson(&path).unwrap();

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["type"], "FeatureCollection");
        assert_eq!(written["features"][0]["properties"]["class"], 4);
        assert!(written["features"][1]["properties"]["class"].is_null());
        assert_eq!(written["features"][0]["geometry"]["type"], "Polygon");
    }
}
