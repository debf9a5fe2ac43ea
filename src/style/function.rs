use serde_json::Value;

use crate::feature::Properties;
use crate::style::StyleError;

/// What a style function is keyed on
#[derive(Clone, Debug, PartialEq)]
pub enum FunctionInput {
    Zoom,
    Property(String),
}

/// A compiled paint or layout property
#[derive(Clone, Debug, PartialEq)]
pub enum StyleFunction {
    Constant(Value),
    Identity(FunctionInput),
    Stops {
        input: FunctionInput,
        stops: Vec<(f64, Value)>,
        base: f64,
    },
}

impl StyleFunction {
    /// Compile a raw property value, falling back to `default` when absent
    pub fn compile(raw: Option<&Value>, default: &Value) -> Result<Self, StyleError> {
        let object = match raw {
            None => return Ok(StyleFunction::Constant(default.clone())),
            Some(Value::Object(object)) => object,
            Some(other) => return Ok(StyleFunction::Constant(other.clone())),
        };

        let input = match object.get("property").and_then(Value::as_str) {
            None | Some("zoom") => FunctionInput::Zoom,
            Some(name) => FunctionInput::Property(name.to_string()),
        };

        if object.get("type").and_then(Value::as_str) == Some("identity") {
            return Ok(StyleFunction::Identity(input));
        }

        let stops = object
            .get("stops")
            .and_then(Value::as_array)
            .ok_or(StyleError::MissingStops)?;
        if stops.len() < 2 {
            return Err(StyleError::MissingStops);
        }
        let stops = stops
            .iter()
            .map(|stop| match stop.as_array().map(Vec::as_slice) {
                Some([x, y]) => x
                    .as_f64()
                    .map(|x| (x, y.clone()))
                    .ok_or(StyleError::BadStop),
                _ => Err(StyleError::BadStop),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let base = object.get("base").and_then(Value::as_f64).unwrap_or(1.0);

        Ok(StyleFunction::Stops { input, stops, base })
    }

    /// The feature property this function reads, if it is property-keyed
    pub fn property(&self) -> Option<&str> {
        match self {
            StyleFunction::Identity(FunctionInput::Property(name))
            | StyleFunction::Stops {
                input: FunctionInput::Property(name),
                ..
            } => Some(name),
            _ => None,
        }
    }

    pub fn evaluate(&self, zoom: f64, properties: &Properties) -> Value {
        let input = |input: &FunctionInput| match input {
            FunctionInput::Zoom => Value::from(zoom),
            FunctionInput::Property(name) => properties.get(name).cloned().unwrap_or(Value::Null),
        };

        match self {
            StyleFunction::Constant(value) => value.clone(),
            StyleFunction::Identity(source) => input(source),
            StyleFunction::Stops {
                input: source,
                stops,
                base,
            } => match input(source).as_f64() {
                Some(x) => evaluate_stops(stops, *base, x),
                // Non-numeric input: fall back to the first stop's output
                None => stops[0].1.clone(),
            },
        }
    }

    pub fn number(&self, zoom: f64, properties: &Properties) -> f64 {
        self.evaluate(zoom, properties).as_f64().unwrap_or(0.0)
    }

    pub fn string(&self, zoom: f64, properties: &Properties) -> String {
        match self.evaluate(zoom, properties) {
            Value::String(s) => s,
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(","),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn pair(&self, zoom: f64, properties: &Properties) -> [f64; 2] {
        match self.evaluate(zoom, properties) {
            Value::Array(items) => [
                items.first().and_then(Value::as_f64).unwrap_or(0.0),
                items.get(1).and_then(Value::as_f64).unwrap_or(0.0),
            ],
            _ => [0.0, 0.0],
        }
    }
}

fn evaluate_stops(stops: &[(f64, Value)], base: f64, x: f64) -> Value {
    let Some(upper) = stops.iter().position(|(stop, _)| *stop > x) else {
        return stops[stops.len() - 1].1.clone();
    };
    if upper == 0 {
        return stops[0].1.clone();
    }

    let (x0, v0) = &stops[upper - 1];
    let (x1, v1) = &stops[upper];
    let t = interpolation_factor(base, *x0, x, *x1);
    interpolate(v0, t, v1)
}

/// Relative position of x between a and b, exponential when base != 1
fn interpolation_factor(base: f64, a: f64, x: f64, b: f64) -> f64 {
    if a == b {
        0.0
    } else if base == 1.0 {
        (x - a) / (b - a)
    } else {
        (base.powf(x - a) - 1.0) / (base.powf(b - a) - 1.0)
    }
}

/// Numbers and numeric arrays interpolate linearly; everything else steps
fn interpolate(v0: &Value, t: f64, v1: &Value) -> Value {
    match (v0, v1) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Value::from(a + t * (b - a)),
            _ => v0.clone(),
        },
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            let mixed: Option<Vec<Value>> = a
                .iter()
                .zip(b)
                .map(|(a, b)| Some(Value::from(a.as_f64()? + t * (b.as_f64()? - a.as_f64()?))))
                .collect();
            mixed.map(Value::Array).unwrap_or_else(|| v0.clone())
        }
        _ => v0.clone(),
    }
}
