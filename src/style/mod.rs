//! Style compilation: raw style-layer descriptors become immutable
//! [`StyleLayer`]s with a [`StyleFunction`] for every paint and layout
//! property, defaults filled in.

mod defaults;
mod function;

pub use function::{FunctionInput, StyleFunction};

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::SetupError;
use crate::feature::GeomType;
use crate::filter::FilterExpr;

/// Problems compiling a style function
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StyleError {
    #[error("stop function needs at least two stops")]
    MissingStops,
    #[error("stops must be [number, value] pairs")]
    BadStop,
    #[error("property '{0}' must be a JSON object")]
    NotAnObject(&'static str),
}

/// The vector layer types this pool knows how to render
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerType {
    Fill,
    Line,
    Circle,
    Symbol,
}

impl LayerType {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "fill" => Some(LayerType::Fill),
            "line" => Some(LayerType::Line),
            "circle" => Some(LayerType::Circle),
            "symbol" => Some(LayerType::Symbol),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LayerType::Fill => "fill",
            LayerType::Line => "line",
            LayerType::Circle => "circle",
            LayerType::Symbol => "symbol",
        }
    }

    /// Whether features of this geometry class can be drawn by the layer
    pub fn accepts(self, geom: GeomType) -> bool {
        match self {
            LayerType::Circle | LayerType::Symbol => geom == GeomType::Point,
            LayerType::Line => geom != GeomType::Point,
            LayerType::Fill => geom == GeomType::Polygon,
        }
    }

    pub fn expected_geometry(self) -> &'static str {
        match self {
            LayerType::Circle | LayerType::Symbol => "Point",
            LayerType::Line => "LineString or Polygon",
            LayerType::Fill => "Polygon",
        }
    }
}

/// A style layer as written in a style document
#[derive(Clone, Debug, Deserialize)]
pub struct StyleLayerDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, rename = "source-layer")]
    pub source_layer: Option<String>,
    #[serde(default)]
    pub minzoom: Option<f64>,
    #[serde(default)]
    pub maxzoom: Option<f64>,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub layout: Option<Value>,
    #[serde(default)]
    pub paint: Option<Value>,
    #[serde(default)]
    pub interactive: bool,
}

static MISSING: StyleFunction = StyleFunction::Constant(Value::Null);

/// Compiled, immutable style layer shared by workers and the host queue
#[derive(Clone, Debug)]
pub struct StyleLayer {
    pub id: String,
    pub layer_type: LayerType,
    pub source_layer: String,
    pub minzoom: f64,
    pub maxzoom: f64,
    pub filter: Option<FilterExpr>,
    pub layout: BTreeMap<String, StyleFunction>,
    pub paint: BTreeMap<String, StyleFunction>,
    pub interactive: bool,
}

impl StyleLayer {
    /// Compile a descriptor. `fallback_source_layer` names the source layer
    /// used when the descriptor has none (GeoJSON sources).
    pub fn compile(
        desc: &StyleLayerDescriptor,
        fallback_source_layer: Option<&str>,
    ) -> Result<Self, SetupError> {
        let layer_type = LayerType::parse(&desc.kind).ok_or_else(|| SetupError::NotVectorLayer {
            id: desc.id.clone(),
            kind: desc.kind.clone(),
        })?;

        let source_layer = desc
            .source_layer
            .as_deref()
            .or(fallback_source_layer)
            .ok_or_else(|| SetupError::MissingSourceLayer(desc.id.clone()))?
            .to_string();

        let filter = desc
            .filter
            .as_ref()
            .map(FilterExpr::parse)
            .transpose()
            .map_err(|source| SetupError::Filter {
                layer: desc.id.clone(),
                source,
            })?;

        let style_err = |source| SetupError::Style {
            layer: desc.id.clone(),
            source,
        };
        let layout = compile_properties(
            desc.layout.as_ref(),
            defaults::layout_defaults(layer_type),
            "layout",
        )
        .map_err(style_err)?;
        let paint = compile_properties(
            desc.paint.as_ref(),
            defaults::paint_defaults(layer_type),
            "paint",
        )
        .map_err(style_err)?;

        Ok(Self {
            id: desc.id.clone(),
            layer_type,
            source_layer,
            minzoom: desc.minzoom.unwrap_or(0.0),
            maxzoom: desc.maxzoom.unwrap_or(99.0),
            filter,
            layout,
            paint,
            interactive: desc.interactive,
        })
    }

    pub fn layout(&self, name: &str) -> &StyleFunction {
        self.layout.get(name).unwrap_or(&MISSING)
    }

    pub fn paint(&self, name: &str) -> &StyleFunction {
        self.paint.get(name).unwrap_or(&MISSING)
    }

    /// Names of feature properties read by property-keyed paint functions.
    /// These, and only these, decide which features render identically.
    pub fn render_properties(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.paint.values().filter_map(StyleFunction::property) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

fn compile_properties(
    raw: Option<&Value>,
    defaults: Vec<(&'static str, Value)>,
    section: &'static str,
) -> Result<BTreeMap<String, StyleFunction>, StyleError> {
    let raw = match raw {
        None => None,
        Some(Value::Object(object)) => Some(object),
        Some(_) => return Err(StyleError::NotAnObject(section)),
    };

    let mut functions = BTreeMap::new();
    for (name, default) in &defaults {
        let supplied = raw.and_then(|r| r.get(*name));
        functions.insert(name.to_string(), StyleFunction::compile(supplied, default)?);
    }
    // Properties without a default are still honoured
    for (name, value) in raw.into_iter().flatten() {
        if !functions.contains_key(name) {
            functions.insert(name.clone(), StyleFunction::compile(Some(value), &Value::Null)?);
        }
    }
    Ok(functions)
}
