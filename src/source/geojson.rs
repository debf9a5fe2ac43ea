//! In-memory GeoJSON source, sliced into tiles on request.

use geojson::GeoJson;
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::{debug, info};

use super::projection::{project, TileTransform};
use super::spatial::FeatureGrid;
use super::{AbortSignal, TileCoords, TileSource};
use crate::error::{SetupError, TileError};
use crate::feature::{Feature, GeomType, RawSourceLayer, SourceLayers};

/// Name of the single source layer a GeoJSON source exposes
pub const GEOJSON_SOURCE_LAYER: &str = "geojson";
/// Tile-local coordinate range of GeoJSON tiles
pub const GEOJSON_EXTENT: u32 = 512;
/// Features within this many tile units of the edge are included
pub const GEOJSON_BUFFER: f64 = 64.0;

const GRID_CELL: f64 = 1.0 / 64.0;

struct IndexedFeature {
    /// Geometry in Web Mercator unit space
    feature: Feature,
    bbox: (f64, f64, f64, f64),
}

pub struct GeoJsonSource {
    features: Vec<IndexedFeature>,
    grid: FeatureGrid,
    geom_types: HashSet<GeomType>,
}

impl GeoJsonSource {
    pub fn new(data: &GeoJson) -> Result<Self, SetupError> {
        let raw: Vec<&geojson::Feature> = match data {
            GeoJson::FeatureCollection(fc) => fc.features.iter().collect(),
            GeoJson::Feature(f) => vec![f],
            GeoJson::Geometry(_) => {
                return Err(SetupError::GeoJson(
                    "expected a Feature or FeatureCollection".into(),
                ))
            }
        };

        let features: Vec<IndexedFeature> = raw
            .par_iter()
            .filter_map(|f| {
                let mut feature = Feature::from_geojson(f)?;
                feature.geometry = feature.geometry.map_coords(|(lon, lat)| {
                    let p = project(lon, lat);
                    (p.x, p.y)
                });
                let bbox = feature.geometry.bbox()?;
                Some(IndexedFeature { feature, bbox })
            })
            .collect();

        let skipped = raw.len() - features.len();
        info!(features = features.len(), skipped, "indexed GeoJSON source");

        let grid = FeatureGrid::build(features.iter().map(|f| f.bbox), GRID_CELL);
        let geom_types = features
            .iter()
            .map(|f| f.feature.geometry.geom_type())
            .collect();
        Ok(Self {
            features,
            grid,
            geom_types,
        })
    }

    /// Geometry classes present anywhere in the data
    pub fn geom_types(&self) -> &HashSet<GeomType> {
        &self.geom_types
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features overlapping the (buffered) tile, in tile-local coordinates
    pub fn tile(&self, coords: &TileCoords) -> Vec<Feature> {
        let transform = TileTransform::new(coords.z, coords.x, coords.y, GEOJSON_EXTENT);
        let (min_x, min_y, max_x, max_y) = transform.unit_bounds(GEOJSON_EXTENT, GEOJSON_BUFFER);

        self.grid
            .query(min_x, min_y, max_x, max_y)
            .into_iter()
            .filter_map(|idx| self.features.get(idx))
            .filter(|f| {
                let (x0, y0, x1, y1) = f.bbox;
                x1 >= min_x && x0 <= max_x && y1 >= min_y && y0 <= max_y
            })
            .map(|f| Feature {
                geometry: f.feature.geometry.map_coords(|c| transform.apply(c)),
                properties: f.feature.properties.clone(),
                id: f.feature.id.clone(),
            })
            .collect()
    }
}

impl TileSource for GeoJsonSource {
    fn load(&self, coords: &TileCoords, abort: &AbortSignal) -> Result<SourceLayers, TileError> {
        if abort.is_aborted() {
            return Err(TileError::Transport("request aborted".into()));
        }
        let features = self.tile(coords);
        debug!(%coords, features = features.len(), "sliced GeoJSON tile");

        let mut layers = SourceLayers::new();
        if !features.is_empty() {
            layers.insert(
                GEOJSON_SOURCE_LAYER.to_string(),
                RawSourceLayer {
                    extent: GEOJSON_EXTENT,
                    features,
                },
            );
        }
        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Geometry;

    fn collection() -> GeoJson {
        r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": 7, "properties": {"name": "null island"},
                 "geometry": {"type": "Point", "coordinates": [0.5, 0.5]}},
                {"type": "Feature", "properties": {"name": "far east"},
                 "geometry": {"type": "Point", "coordinates": [170.0, -10.0]}},
                {"type": "Feature", "properties": null, "geometry": null}
            ]
        }"#
        .parse()
        .unwrap()
    }

    #[test]
    fn test_features_projected_and_indexed() {
        let source = GeoJsonSource::new(&collection()).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.geom_types(), &HashSet::from([GeomType::Point]));
    }

    #[test]
    fn test_tile_selects_and_transforms() {
        let source = GeoJsonSource::new(&collection()).unwrap();
        // Zoom 1 tile south-east of null island
        let layers = source
            .load(&TileCoords { z: 1, x: 1, y: 1 }, &AbortSignal::new())
            .unwrap();
        let layer = &layers[GEOJSON_SOURCE_LAYER];
        assert_eq!(layer.extent, 512);
        assert_eq!(layer.features.len(), 2);
        let null_island = layer
            .features
            .iter()
            .find(|f| f.id == Some(serde_json::json!(7)))
            .unwrap();
        let Geometry::Point((x, y)) = null_island.geometry else {
            panic!("expected a point");
        };
        // Slightly north-east of the tile's top-left corner, inside the buffer
        assert!(x > 0.0 && x < 64.0);
        assert!(y < 0.0 && y > -64.0);
    }

    #[test]
    fn test_empty_tile_has_no_layers() {
        let source = GeoJsonSource::new(&collection()).unwrap();
        let layers = source
            .load(&TileCoords { z: 4, x: 0, y: 0 }, &AbortSignal::new())
            .unwrap();
        assert!(layers.is_empty());
    }

    #[test]
    fn test_bare_geometry_rejected() {
        let data: GeoJson = r#"{"type": "Point", "coordinates": [0, 0]}"#.parse().unwrap();
        assert!(matches!(GeoJsonSource::new(&data), Err(SetupError::GeoJson(_))));
    }
}
