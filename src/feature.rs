use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A planar coordinate pair (tile-local units once a tile is decoded)
pub type Coord = (f64, f64);

/// Feature properties as decoded from the wire
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Decoded source layers of one tile, keyed on source-layer name
pub type SourceLayers = HashMap<String, RawSourceLayer>;

/// GeoJSON-like geometry. Polygons list the outer ring first, holes after.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Coord),
    MultiPoint(Vec<Coord>),
    LineString(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    Polygon(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
}

/// Geometry class used by `$type` filters. Multi* variants collapse onto
/// their single counterpart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeomType {
    Point,
    LineString,
    Polygon,
}

impl GeomType {
    pub fn as_str(self) -> &'static str {
        match self {
            GeomType::Point => "Point",
            GeomType::LineString => "LineString",
            GeomType::Polygon => "Polygon",
        }
    }
}

impl Geometry {
    pub fn geom_type(&self) -> GeomType {
        match self {
            Geometry::Point(_) | Geometry::MultiPoint(_) => GeomType::Point,
            Geometry::LineString(_) | Geometry::MultiLineString(_) => GeomType::LineString,
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => GeomType::Polygon,
        }
    }

    /// Convert a GeoJSON geometry value. Geometry collections and
    /// positions with fewer than two ordinates are rejected.
    pub fn from_geojson(value: &geojson::Value) -> Option<Self> {
        fn coord(position: &[f64]) -> Option<Coord> {
            match position {
                [x, y, ..] => Some((*x, *y)),
                _ => None,
            }
        }
        fn line(positions: &[Vec<f64>]) -> Option<Vec<Coord>> {
            positions.iter().map(|p| coord(p)).collect()
        }
        fn rings(lines: &[Vec<Vec<f64>>]) -> Option<Vec<Vec<Coord>>> {
            lines.iter().map(|l| line(l)).collect()
        }

        match value {
            geojson::Value::Point(p) => coord(p).map(Geometry::Point),
            geojson::Value::MultiPoint(points) => line(points).map(Geometry::MultiPoint),
            geojson::Value::LineString(coords) => line(coords).map(Geometry::LineString),
            geojson::Value::MultiLineString(lines) => rings(lines).map(Geometry::MultiLineString),
            geojson::Value::Polygon(polygon) => rings(polygon).map(Geometry::Polygon),
            geojson::Value::MultiPolygon(polygons) => polygons
                .iter()
                .map(|p| rings(p))
                .collect::<Option<Vec<_>>>()
                .map(Geometry::MultiPolygon),
            geojson::Value::GeometryCollection(_) => None,
        }
    }

    /// Apply `f` to every coordinate
    pub fn map_coords(&self, f: impl Fn(Coord) -> Coord + Copy) -> Geometry {
        let map_line = |l: &Vec<Coord>| l.iter().map(|&c| f(c)).collect::<Vec<_>>();
        match self {
            Geometry::Point(c) => Geometry::Point(f(*c)),
            Geometry::MultiPoint(points) => Geometry::MultiPoint(map_line(points)),
            Geometry::LineString(l) => Geometry::LineString(map_line(l)),
            Geometry::MultiLineString(lines) => {
                Geometry::MultiLineString(lines.iter().map(map_line).collect())
            }
            Geometry::Polygon(rings) => Geometry::Polygon(rings.iter().map(map_line).collect()),
            Geometry::MultiPolygon(polygons) => Geometry::MultiPolygon(
                polygons
                    .iter()
                    .map(|rings| rings.iter().map(map_line).collect())
                    .collect(),
            ),
        }
    }

    /// Bounding box as (min_x, min_y, max_x, max_y). `None` for empty geometry.
    pub fn bbox(&self) -> Option<(f64, f64, f64, f64)> {
        let mut bounds: Option<(f64, f64, f64, f64)> = None;
        self.for_each_coord(|(x, y)| {
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        });
        bounds
    }

    fn for_each_coord(&self, mut f: impl FnMut(Coord)) {
        match self {
            Geometry::Point(c) => f(*c),
            Geometry::MultiPoint(l) | Geometry::LineString(l) => l.iter().copied().for_each(f),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                lines.iter().flatten().copied().for_each(f)
            }
            Geometry::MultiPolygon(polygons) => {
                polygons.iter().flatten().flatten().copied().for_each(f)
            }
        }
    }
}

/// One decoded feature
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Properties) -> Self {
        Self {
            geometry,
            properties,
            id: None,
        }
    }

    /// Convert a GeoJSON feature; features without usable geometry are skipped
    pub fn from_geojson(feature: &geojson::Feature) -> Option<Self> {
        let geometry = Geometry::from_geojson(&feature.geometry.as_ref()?.value)?;
        let id = feature.id.as_ref().map(|id| match id {
            geojson::feature::Id::String(s) => serde_json::Value::from(s.clone()),
            geojson::feature::Id::Number(n) => serde_json::Value::Number(n.clone()),
        });
        Some(Self {
            geometry,
            properties: feature.properties.clone().unwrap_or_default(),
            id,
        })
    }
}

/// Per-tile, per-source-layer bag of features
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSourceLayer {
    pub extent: u32,
    pub features: Vec<Feature>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_types_collapse() {
        let g = Geometry::MultiPolygon(vec![vec![vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]]]);
        assert_eq!(g.geom_type(), GeomType::Polygon);
        assert_eq!(Geometry::MultiPoint(vec![]).geom_type().as_str(), "Point");
    }

    #[test]
    fn test_from_geojson_polygon() {
        let value = geojson::Value::Polygon(vec![vec![
            vec![0.0, 0.0],
            vec![4.0, 0.0],
            vec![0.0, 3.0],
            vec![0.0, 0.0],
        ]]);
        let geometry = Geometry::from_geojson(&value).unwrap();
        assert_eq!(geometry.bbox(), Some((0.0, 0.0, 4.0, 3.0)));
    }

    #[test]
    fn test_short_position_rejected() {
        let value = geojson::Value::Point(vec![1.0]);
        assert!(Geometry::from_geojson(&value).is_none());
    }

    #[test]
    fn test_serializes_as_geojson_shape() {
        let json = serde_json::to_value(Geometry::Point((1.0, 2.0))).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Point", "coordinates": [1.0, 2.0]}));
    }
}
