//! Setup parameters and their validation.

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::SetupError;
use crate::feature::GeomType;
use crate::label::{GlyphAtlasBuilder, UniformAtlasBuilder};
use crate::source::{
    GeoJsonSource, TileDecoder, TileFetcher, TileSource, UrlTemplates, VectorTileSource,
    GEOJSON_SOURCE_LAYER,
};
use crate::style::{LayerType, StyleLayer, StyleLayerDescriptor};

pub const DEFAULT_THREADS: usize = 2;
/// Upper bound on the serialized size of one streamed chunk
pub const DEFAULT_CHUNK_BYTES: usize = 100_000;

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_chunk_bytes() -> usize {
    DEFAULT_CHUNK_BYTES
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Vector {
        #[serde(default)]
        tiles: Vec<String>,
    },
    Geojson {
        data: geojson::GeoJson,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupParams {
    #[serde(default, alias = "styleLayers")]
    pub layers: Vec<StyleLayerDescriptor>,
    #[serde(default)]
    pub source: Option<SourceConfig>,
    #[serde(default, alias = "glyphEndpoint")]
    pub glyphs: Option<String>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
}

impl SetupParams {
    pub fn new(layers: Vec<StyleLayerDescriptor>, source: SourceConfig) -> Self {
        Self {
            layers,
            source: Some(source),
            glyphs: None,
            threads: DEFAULT_THREADS,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        let first = self.layers.first().ok_or(SetupError::NoLayers)?;

        for layer in &self.layers {
            if LayerType::parse(&layer.kind).is_none() {
                return Err(SetupError::NotVectorLayer {
                    id: layer.id.clone(),
                    kind: layer.kind.clone(),
                });
            }
            if layer.source != first.source {
                return Err(SetupError::MixedSources {
                    first: first.source.clone().unwrap_or_default(),
                    other: layer.source.clone().unwrap_or_default(),
                });
            }
        }

        match &self.source {
            None => return Err(SetupError::MissingSource),
            Some(SourceConfig::Vector { tiles }) if tiles.is_empty() => {
                return Err(SetupError::NoTileEndpoints)
            }
            Some(_) => {}
        }

        if self.threads == 0 {
            return Err(SetupError::NoThreads);
        }
        Ok(())
    }

    /// Compile every style layer. GeoJSON sources have a single source
    /// layer, which layers without a `source-layer` read from.
    pub fn compile_layers(&self) -> Result<Vec<Arc<StyleLayer>>, SetupError> {
        let fallback = match self.source {
            Some(SourceConfig::Geojson { .. }) => Some(GEOJSON_SOURCE_LAYER),
            _ => None,
        };
        self.layers
            .iter()
            .map(|desc| StyleLayer::compile(desc, fallback).map(Arc::new))
            .collect()
    }
}

/// Empty data is consistent with every layer
fn check_geometry(layers: &[Arc<StyleLayer>], present: &HashSet<GeomType>) -> Result<(), SetupError> {
    if present.is_empty() {
        return Ok(());
    }
    for layer in layers {
        if !present.iter().any(|&geom| layer.layer_type.accepts(geom)) {
            return Err(SetupError::GeometryMismatch {
                layer: layer.id.clone(),
                expected: layer.layer_type.expected_geometry(),
            });
        }
    }
    Ok(())
}

/// Externally supplied implementations of the pool's environment
#[derive(Clone, Default)]
pub struct Collaborators {
    pub fetcher: Option<Arc<dyn TileFetcher>>,
    pub decoder: Option<Arc<dyn TileDecoder>>,
    pub atlas: Option<Arc<dyn GlyphAtlasBuilder>>,
}

impl Collaborators {
    pub fn vector(fetcher: Arc<dyn TileFetcher>, decoder: Arc<dyn TileDecoder>) -> Self {
        Self {
            fetcher: Some(fetcher),
            decoder: Some(decoder),
            atlas: None,
        }
    }

    pub fn with_atlas(mut self, atlas: Arc<dyn GlyphAtlasBuilder>) -> Self {
        self.atlas = Some(atlas);
        self
    }

    pub fn atlas_builder(&self) -> Arc<dyn GlyphAtlasBuilder> {
        self.atlas
            .clone()
            .unwrap_or_else(|| Arc::new(UniformAtlasBuilder::default()))
    }

    /// Build the tile source. GeoJSON data must contain at least one
    /// feature each style layer can draw.
    pub fn build_source(
        &self,
        config: &SourceConfig,
        layers: &[Arc<StyleLayer>],
    ) -> Result<Arc<dyn TileSource>, SetupError> {
        match config {
            SourceConfig::Vector { tiles } => {
                let urls = UrlTemplates::new(tiles.clone())?;
                let fetcher = self
                    .fetcher
                    .clone()
                    .ok_or(SetupError::MissingCollaborator("tile fetcher"))?;
                let decoder = self
                    .decoder
                    .clone()
                    .ok_or(SetupError::MissingCollaborator("tile decoder"))?;
                Ok(Arc::new(VectorTileSource::new(urls, fetcher, decoder)))
            }
            SourceConfig::Geojson { data } => {
                let source = GeoJsonSource::new(data)?;
                check_geometry(layers, source.geom_types())?;
                Ok(Arc::new(source))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> SetupParams {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_and_aliases() {
        let p = params(json!({
            "styleLayers": [{"id": "a", "type": "fill", "source-layer": "x"}],
            "source": {"type": "vector", "tiles": ["https://t/{z}/{x}/{y}"]},
            "glyphEndpoint": "https://g/{fontstack}/{range}.pbf"
        }));
        assert_eq!(p.threads, 2);
        assert_eq!(p.chunk_bytes, 100_000);
        assert_eq!(p.layers.len(), 1);
        assert!(p.glyphs.is_some());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_setup_errors() {
        let vector = json!({"type": "vector", "tiles": ["t"]});
        assert!(matches!(
            params(json!({"layers": [], "source": vector})).validate(),
            Err(SetupError::NoLayers)
        ));
        assert!(matches!(
            params(json!({"layers": [{"id": "r", "type": "raster"}], "source": vector})).validate(),
            Err(SetupError::NotVectorLayer { .. })
        ));
        assert!(matches!(
            params(json!({
                "layers": [
                    {"id": "a", "type": "fill", "source": "one"},
                    {"id": "b", "type": "line", "source": "two"}
                ],
                "source": vector
            }))
            .validate(),
            Err(SetupError::MixedSources { .. })
        ));
        assert!(matches!(
            params(json!({"layers": [{"id": "a", "type": "fill"}]})).validate(),
            Err(SetupError::MissingSource)
        ));
        assert!(matches!(
            params(json!({"layers": [{"id": "a", "type": "fill"}], "source": {"type": "vector"}}))
                .validate(),
            Err(SetupError::NoTileEndpoints)
        ));
        assert!(matches!(
            params(json!({"layers": [{"id": "a", "type": "fill"}], "source": vector, "threads": 0}))
                .validate(),
            Err(SetupError::NoThreads)
        ));
    }

    #[test]
    fn test_geometry_must_match_layer_types() {
        let line = json!({
            "type": "Feature",
            "properties": {},
            "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]}
        });
        let with_layers = |layers: serde_json::Value| {
            let p = params(json!({
                "layers": layers,
                "source": {"type": "geojson", "data": {"type": "FeatureCollection", "features": [line.clone()]}}
            }));
            let layers = p.compile_layers().unwrap();
            let config = p.source.clone().unwrap();
            Collaborators::default().build_source(&config, &layers).map(|_| ())
        };

        assert!(with_layers(json!([{"id": "roads", "type": "line"}])).is_ok());
        assert!(matches!(
            with_layers(json!([
                {"id": "roads", "type": "line"},
                {"id": "parks", "type": "fill"}
            ])),
            Err(SetupError::GeometryMismatch { layer, expected: "Polygon" }) if layer == "parks"
        ));
        assert!(matches!(
            with_layers(json!([{"id": "pois", "type": "circle"}])),
            Err(SetupError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_geojson_matches_any_layer() {
        let p = params(json!({
            "layers": [{"id": "parks", "type": "fill"}],
            "source": {"type": "geojson", "data": {"type": "FeatureCollection", "features": []}}
        }));
        let layers = p.compile_layers().unwrap();
        let config = p.source.clone().unwrap();
        assert!(Collaborators::default().build_source(&config, &layers).is_ok());
    }

    #[test]
    fn test_geojson_layers_default_source_layer() {
        let p = params(json!({
            "layers": [{"id": "pts", "type": "circle"}],
            "source": {"type": "geojson", "data": {"type": "FeatureCollection", "features": []}}
        }));
        let layers = p.compile_layers().unwrap();
        assert_eq!(layers[0].source_layer, GEOJSON_SOURCE_LAYER);
    }

    #[test]
    fn test_vector_source_needs_collaborators() {
        let config = SourceConfig::Vector {
            tiles: vec!["t/{z}/{x}/{y}".into()],
        };
        assert!(matches!(
            Collaborators::default().build_source(&config, &[]),
            Err(SetupError::MissingCollaborator(_))
        ));
    }
}
