//! Minimal GeoJSON codec for fences, the land mask, diagnostics and output.
//!
//! Only polygonal geometries matter to the pipeline; any other geometry type
//! is parsed as [`Geometry::Unsupported`] and skipped by the callers.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

type Ring = Vec<[f64; 2]>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: FeatureTag,
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureTag {
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureCollectionTag {
    FeatureCollection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: FeatureCollectionTag,
    pub features: Vec<Feature>,
}

/// Any top-level GeoJSON document the pipeline reads.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Collection(FeatureCollection),
    Feature(Feature),
    Geometry(Geometry),
}

impl Document {
    /// Dispatches on the top-level `type` member so that a malformed
    /// collection is reported instead of being read as some other shape.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        match value.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => serde_json::from_value(value).map(Document::Collection),
            Some("Feature") => serde_json::from_value(value).map(Document::Feature),
            _ => serde_json::from_value(value).map(Document::Geometry),
        }
    }

    /// Every polygon in the document, with multipolygons flattened.
    pub fn polygons(&self) -> Vec<Polygon<f64>> {
        let geometries: Vec<&Geometry> = match self {
            Document::Collection(fc) => fc.features.iter().filter_map(|f| f.geometry.as_ref()).collect(),
            Document::Feature(f) => f.geometry.iter().collect(),
            Document::Geometry(g) => vec![g],
        };
        geometries.into_iter().flat_map(Geometry::polygons).collect()
    }
}

impl Geometry {
    pub fn polygons(&self) -> Vec<Polygon<f64>> {
        match self {
            Geometry::Polygon { coordinates } => vec![polygon_from_rings(coordinates)],
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().map(|rings| polygon_from_rings(rings)).collect()
            }
            Geometry::Unsupported => Vec::new(),
        }
    }
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Map<String, Value>) -> Self {
        Self {
            kind: FeatureTag::Feature,
            geometry: Some(geometry),
            properties,
        }
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: FeatureCollectionTag::FeatureCollection,
            features,
        }
    }
}

fn line_string(ring: &[[f64; 2]]) -> LineString<f64> {
    LineString::from(ring.iter().map(|&[x, y]| Coord { x, y }).collect::<Vec<_>>())
}

fn polygon_from_rings(rings: &[Ring]) -> Polygon<f64> {
    let mut iter = rings.iter();
    let exterior = iter.next().map(|r| line_string(r)).unwrap_or_else(|| LineString::new(Vec::new()));
    let interiors = iter.map(|r| line_string(r)).collect();
    Polygon::new(exterior, interiors)
}

fn ring_coordinates(ring: &LineString<f64>) -> Ring {
    ring.coords().map(|c| [c.x, c.y]).collect()
}

fn polygon_rings(polygon: &Polygon<f64>) -> Vec<Ring> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring_coordinates)
        .collect()
}

impl From<&MultiPolygon<f64>> for Geometry {
    fn from(mp: &MultiPolygon<f64>) -> Self {
        Geometry::MultiPolygon {
            coordinates: mp.0.iter().map(polygon_rings).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_reads_feature_collection_and_skips_other_geometries() {
        let doc = Document::from_slice(
            br#"{
                "type": "FeatureCollection",
                "features": [
                    {"type": "Feature", "properties": {"name": "a"},
                     "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
                    {"type": "Feature", "properties": {},
                     "geometry": {"type": "Point", "coordinates": [5, 5]}},
                    {"type": "Feature", "properties": {}, "geometry": null},
                    {"type": "Feature",
                     "geometry": {"type": "MultiPolygon", "coordinates": [
                        [[[2,2],[3,2],[3,3],[2,2]]],
                        [[[4,4],[5,4],[5,5],[4,4]], [[4.2,4.1],[4.8,4.1],[4.8,4.6],[4.2,4.1]]]
                     ]}}
                ]
            }"#,
        )
        .unwrap();

        let polygons = doc.polygons();
        assert_eq!(polygons.len(), 3);
        assert_eq!(polygons[2].interiors().len(), 1);
    }

    #[test]
    fn test_reads_bare_feature_and_geometry() {
        let feature = Document::from_slice(
            br#"{"type":"Feature","properties":{},"geometry":{"type":"MultiPolygon","coordinates":[[[[0,0],[1,0],[1,1],[0,0]]]]}}"#,
        )
        .unwrap();
        assert_eq!(feature.polygons().len(), 1);

        let geometry =
            Document::from_slice(br#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}"#).unwrap();
        assert_eq!(geometry.polygons().len(), 1);
    }

    #[test]
    fn test_malformed_collection_is_an_error() {
        let result = Document::from_slice(br#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Polygon","coordinates":"oops"}}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_multipolygon_serializes_as_geojson() {
        let mp = MultiPolygon(vec![polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)]]);
        let mut properties = Map::new();
        properties.insert("language".into(), Value::from("eu"));
        let fc = FeatureCollection::new(vec![Feature::new(Geometry::from(&mp), properties)]);

        let json = serde_json::to_value(&fc).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"][0]["type"], "Feature");
        assert_eq!(json["features"][0]["properties"]["language"], "eu");
        assert_eq!(json["features"][0]["geometry"]["type"], "MultiPolygon");
        // geo closes rings, so the first point is repeated at the end.
        assert_eq!(json["features"][0]["geometry"]["coordinates"][0][0].as_array().unwrap().len(), 4);
    }
}
