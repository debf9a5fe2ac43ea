//! Feature filtering.
//!
//! Filter expressions are parsed once into a [`FilterExpr`] tree and
//! evaluated by a small recursive interpreter. [`LayerFilter`] combines a
//! style layer's explicit filter with the geometry filter implied by its
//! type, its zoom range and its source-layer name.

use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::feature::{Feature, SourceLayers};
use crate::style::{LayerType, StyleLayer};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("filter must be a non-empty array starting with an operator")]
    NotAnArray,
    #[error("unknown filter operator '{0}'")]
    UnknownOperator(String),
    #[error("operator '{0}' expects a string key")]
    BadKey(String),
    #[error("operator '{op}' expects {expected} arguments")]
    Arity { op: String, expected: &'static str },
}

/// What a filter reads from a feature
#[derive(Clone, Debug, PartialEq)]
pub enum Key {
    /// `$type`: Point, LineString or Polygon
    GeomType,
    /// `$id`
    Id,
    Property(String),
}

impl Key {
    fn parse(op: &str, raw: &Value) -> Result<Self, FilterError> {
        match raw.as_str() {
            Some("$type") => Ok(Key::GeomType),
            Some("$id") => Ok(Key::Id),
            Some(name) => Ok(Key::Property(name.to_string())),
            None => Err(FilterError::BadKey(op.to_string())),
        }
    }

    fn lookup<'a>(&self, feature: &'a Feature) -> Option<Cow<'a, Value>> {
        match self {
            Key::GeomType => Some(Cow::Owned(Value::from(
                feature.geometry.geom_type().as_str(),
            ))),
            Key::Id => feature.id.as_ref().map(Cow::Borrowed),
            Key::Property(name) => feature.properties.get(name).map(Cow::Borrowed),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterExpr {
    Always,
    All(Vec<FilterExpr>),
    Any(Vec<FilterExpr>),
    None(Vec<FilterExpr>),
    Has(Key),
    NotHas(Key),
    Compare(Key, CmpOp, Value),
    In(Key, Vec<Value>),
    NotIn(Key, Vec<Value>),
}

impl FilterExpr {
    pub fn parse(raw: &Value) -> Result<Self, FilterError> {
        let items = raw.as_array().ok_or(FilterError::NotAnArray)?;
        let (op, args) = match items.split_first() {
            Some((Value::String(op), args)) => (op.as_str(), args),
            _ => return Err(FilterError::NotAnArray),
        };

        let children = || args.iter().map(FilterExpr::parse).collect::<Result<Vec<_>, _>>();
        let arity = |expected| FilterError::Arity {
            op: op.to_string(),
            expected,
        };

        let expr = match op {
            "all" => FilterExpr::All(children()?),
            "any" => FilterExpr::Any(children()?),
            "none" => FilterExpr::None(children()?),
            "has" | "!has" => {
                let [key] = args else {
                    return Err(arity("1"));
                };
                let key = Key::parse(op, key)?;
                if op == "has" {
                    FilterExpr::Has(key)
                } else {
                    FilterExpr::NotHas(key)
                }
            }
            "==" | "!=" | ">" | ">=" | "<" | "<=" => {
                let [key, value] = args else {
                    return Err(arity("2"));
                };
                let cmp = match op {
                    "==" => CmpOp::Eq,
                    "!=" => CmpOp::Ne,
                    ">" => CmpOp::Gt,
                    ">=" => CmpOp::Ge,
                    "<" => CmpOp::Lt,
                    _ => CmpOp::Le,
                };
                FilterExpr::Compare(Key::parse(op, key)?, cmp, value.clone())
            }
            "in" | "!in" => {
                let Some((key, values)) = args.split_first() else {
                    return Err(arity("at least 1"));
                };
                let key = Key::parse(op, key)?;
                if op == "in" {
                    FilterExpr::In(key, values.to_vec())
                } else {
                    FilterExpr::NotIn(key, values.to_vec())
                }
            }
            other => return Err(FilterError::UnknownOperator(other.to_string())),
        };
        Ok(expr)
    }

    pub fn evaluate(&self, feature: &Feature) -> bool {
        match self {
            FilterExpr::Always => true,
            FilterExpr::All(children) => children.iter().all(|c| c.evaluate(feature)),
            FilterExpr::Any(children) => children.iter().any(|c| c.evaluate(feature)),
            FilterExpr::None(children) => !children.iter().any(|c| c.evaluate(feature)),
            FilterExpr::Has(key) => present(key, feature),
            FilterExpr::NotHas(key) => !present(key, feature),
            FilterExpr::Compare(key, op, expected) => match key.lookup(feature) {
                None => *op == CmpOp::Ne,
                Some(actual) => compare(&actual, *op, expected),
            },
            FilterExpr::In(key, values) => key
                .lookup(feature)
                .is_some_and(|actual| values.iter().any(|v| values_equal(&actual, v))),
            FilterExpr::NotIn(key, values) => !key
                .lookup(feature)
                .is_some_and(|actual| values.iter().any(|v| values_equal(&actual, v))),
        }
    }
}

/// `null`, `false`, `0`, NaN and `""` all count as absent
fn present(key: &Key, feature: &Feature) -> bool {
    key.lookup(feature).is_some_and(|v| match v.as_ref() {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}

fn compare(actual: &Value, op: CmpOp, expected: &Value) -> bool {
    match op {
        CmpOp::Eq => return values_equal(actual, expected),
        CmpOp::Ne => return !values_equal(actual, expected),
        _ => {}
    }

    // Ordering only between values of the same kind
    let ordering = match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Eq | CmpOp::Ne => false,
    }
}

/// Features of one source layer that passed one style layer's filter
#[derive(Clone, Debug)]
pub struct FilteredLayer {
    pub layer: Arc<StyleLayer>,
    pub extent: u32,
    pub features: Vec<Feature>,
}

impl FilteredLayer {
    pub fn id(&self) -> &str {
        &self.layer.id
    }
}

/// Geometry restriction implied by a layer type
fn geometry_filter(layer_type: LayerType) -> FilterExpr {
    let geom = |op, name: &str| FilterExpr::Compare(Key::GeomType, op, Value::from(name));
    match layer_type {
        LayerType::Circle | LayerType::Symbol => geom(CmpOp::Eq, "Point"),
        LayerType::Line => geom(CmpOp::Ne, "Point"),
        LayerType::Fill => geom(CmpOp::Eq, "Polygon"),
    }
}

#[derive(Clone, Debug)]
pub struct LayerFilter {
    layer: Arc<StyleLayer>,
    expr: FilterExpr,
}

impl LayerFilter {
    pub fn new(layer: Arc<StyleLayer>) -> Self {
        let geom = geometry_filter(layer.layer_type);
        let expr = match &layer.filter {
            Some(explicit) => FilterExpr::All(vec![geom, explicit.clone()]),
            None => geom,
        };
        Self { layer, expr }
    }

    /// Zoom range is half-open: `[minzoom, maxzoom)`
    pub fn in_range(&self, zoom: f64) -> bool {
        zoom >= self.layer.minzoom && zoom < self.layer.maxzoom
    }

    /// `None` when the layer has nothing to contribute for this tile
    pub fn apply(&self, source: &SourceLayers, zoom: f64) -> Option<FilteredLayer> {
        if !self.in_range(zoom) {
            return None;
        }
        let raw = source.get(&self.layer.source_layer)?;
        let features: Vec<Feature> = raw
            .features
            .iter()
            .filter(|f| self.expr.evaluate(f))
            .cloned()
            .collect();
        if features.is_empty() {
            return None;
        }
        Some(FilteredLayer {
            layer: Arc::clone(&self.layer),
            extent: raw.extent,
            features,
        })
    }
}

/// Filters for every style layer, applied in style order
#[derive(Clone, Debug)]
pub struct SourceFilter {
    filters: Vec<LayerFilter>,
}

impl SourceFilter {
    pub fn new(layers: &[Arc<StyleLayer>]) -> Self {
        Self {
            filters: layers.iter().cloned().map(LayerFilter::new).collect(),
        }
    }

    pub fn apply(&self, source: &SourceLayers, zoom: f64) -> Vec<FilteredLayer> {
        self.filters
            .iter()
            .filter_map(|f| f.apply(source, zoom))
            .collect()
    }
}
