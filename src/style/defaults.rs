//! Default paint and layout values per vector layer type.

use serde_json::{json, Value};

use super::LayerType;

pub fn layout_defaults(layer_type: LayerType) -> Vec<(&'static str, Value)> {
    let mut defaults = vec![("visibility", json!("visible"))];
    match layer_type {
        LayerType::Fill | LayerType::Circle => {}
        LayerType::Line => defaults.extend([
            ("line-cap", json!("butt")),
            ("line-join", json!("miter")),
            ("line-miter-limit", json!(2)),
            ("line-round-limit", json!(1.05)),
        ]),
        LayerType::Symbol => defaults.extend([
            ("symbol-placement", json!("point")),
            ("symbol-spacing", json!(250)),
            ("text-field", json!("")),
            ("text-font", json!(["Open Sans Regular", "Arial Unicode MS Regular"])),
            ("text-size", json!(16)),
            ("text-max-width", json!(10)),
            ("text-line-height", json!(1.2)),
            ("text-letter-spacing", json!(0)),
            ("text-justify", json!("center")),
            ("text-anchor", json!("center")),
            ("text-rotate", json!(0)),
            ("text-padding", json!(2.0)),
            ("text-transform", json!("none")),
            ("text-offset", json!([0, 0])),
            ("text-allow-overlap", json!(false)),
        ]),
    }
    defaults
}

pub fn paint_defaults(layer_type: LayerType) -> Vec<(&'static str, Value)> {
    match layer_type {
        LayerType::Fill => vec![
            ("fill-antialias", json!(true)),
            ("fill-opacity", json!(1)),
            ("fill-color", json!("#000000")),
            ("fill-translate", json!([0, 0])),
        ],
        LayerType::Line => vec![
            ("line-opacity", json!(1)),
            ("line-color", json!("#000000")),
            ("line-translate", json!([0, 0])),
            ("line-width", json!(1)),
            ("line-gap-width", json!(0)),
            ("line-offset", json!(0)),
            ("line-blur", json!(0)),
        ],
        LayerType::Circle => vec![
            ("circle-radius", json!(5)),
            ("circle-color", json!("#000000")),
            ("circle-blur", json!(0)),
            ("circle-opacity", json!(1)),
            ("circle-translate", json!([0, 0])),
            ("circle-stroke-width", json!(0)),
            ("circle-stroke-color", json!("#000000")),
            ("circle-stroke-opacity", json!(1)),
        ],
        LayerType::Symbol => vec![
            ("icon-opacity", json!(1)),
            ("text-opacity", json!(1)),
            ("text-color", json!("#000000")),
            ("text-halo-color", json!("rgba(0, 0, 0, 0)")),
            ("text-halo-width", json!(0)),
            ("text-halo-blur", json!(0)),
            ("text-translate", json!([0, 0])),
        ],
    }
}
