//! Geometry serialization: filtered features become render-ready buffers.
//!
//! Builders return `None` for features with nothing to draw; such
//! features are dropped silently.

pub mod collision;
pub mod fill;
pub mod line;

pub use collision::CollisionIndex;

use crate::compress::{Buffers, FeatureGroup, GroupMember, GroupedFeature};
use crate::feature::{Coord, Geometry};
use crate::label::{shape, Atlas, TextLayout};
use crate::style::{LayerType, StyleLayer};

/// Per-tile state shared by every serialization step of one tile
pub struct TileContext<'a> {
    pub zoom: f64,
    pub atlas: Option<&'a Atlas>,
    pub collisions: &'a mut CollisionIndex,
}

fn label_points(geometry: &Geometry) -> Vec<Coord> {
    match geometry {
        Geometry::Point(c) => vec![*c],
        Geometry::MultiPoint(points) => points.clone(),
        _ => Vec::new(),
    }
}

fn serialize_symbol(layer: &StyleLayer, member: &GroupMember, ctx: &mut TileContext) -> Option<Buffers> {
    let label = member.label.as_ref()?;
    let atlas = ctx.atlas?;
    let properties = &member.feature.properties;
    let layout = TextLayout::resolve(layer, ctx.zoom, properties);
    let allow_overlap = layer
        .layout("text-allow-overlap")
        .evaluate(ctx.zoom, properties)
        .as_bool()
        .unwrap_or(false);

    let mut merged: Option<Buffers> = None;
    for point in label_points(&member.feature.geometry) {
        let Some(shaped) = shape(&label.text, &label.font, point, &layout, atlas) else {
            continue;
        };
        if !allow_overlap && !ctx.collisions.try_insert(shaped.bbox) {
            continue;
        }
        match merged.as_mut() {
            Some(m) => m.append(shaped.buffers),
            None => merged = Some(shaped.buffers),
        }
    }
    merged
}

/// Buffers for one feature of a layer
pub fn serialize_feature(
    layer: &StyleLayer,
    member: &GroupMember,
    ctx: &mut TileContext,
) -> Option<Buffers> {
    match layer.layer_type {
        LayerType::Fill => fill::triangulate(&member.feature.geometry),
        LayerType::Line => line::control_points(&member.feature.geometry),
        LayerType::Circle => line::point_positions(&member.feature.geometry),
        LayerType::Symbol => serialize_symbol(layer, member, ctx),
    }
}

/// Serialize and merge every member of a group. `None` if no member
/// produced anything drawable.
pub fn serialize_group(
    layer: &StyleLayer,
    group: &FeatureGroup,
    ctx: &mut TileContext,
) -> Option<GroupedFeature> {
    let mut merged: Option<Buffers> = None;
    for buffers in group
        .members
        .iter()
        .filter_map(|member| serialize_feature(layer, member, ctx))
    {
        match merged.as_mut() {
            Some(m) => m.append(buffers),
            None => merged = Some(buffers),
        }
    }
    Some(GroupedFeature {
        properties: group.properties.clone(),
        buffers: merged?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::label::{GlyphAtlasBuilder, GlyphRequest, LabelText, UniformAtlasBuilder};
    use crate::style::StyleLayerDescriptor;
    use serde_json::json;

    fn layer(value: serde_json::Value) -> StyleLayer {
        let desc: StyleLayerDescriptor = serde_json::from_value(value).unwrap();
        StyleLayer::compile(&desc, None).unwrap()
    }

    fn member(geometry: Geometry, label: Option<&str>) -> GroupMember {
        GroupMember {
            feature: Feature::new(geometry, Default::default()),
            label: label.map(|text| LabelText {
                text: text.into(),
                font: "Sans".into(),
            }),
        }
    }

    fn atlas() -> Atlas {
        let mut request = GlyphRequest::new();
        request.insert("Sans".into(), "abc".chars().collect());
        UniformAtlasBuilder::default().build(&request).unwrap()
    }

    #[test]
    fn test_group_merges_and_drops_degenerate() {
        let fills = layer(json!({"id": "f", "type": "fill", "source-layer": "x"}));
        let triangle = vec![(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (0.0, 0.0)];
        let group = FeatureGroup {
            properties: Default::default(),
            members: vec![
                member(Geometry::Polygon(vec![triangle.clone()]), None),
                member(Geometry::Polygon(vec![]), None),
                member(Geometry::Polygon(vec![triangle]), None),
            ],
        };
        let mut collisions = CollisionIndex::new();
        let mut ctx = TileContext {
            zoom: 10.0,
            atlas: None,
            collisions: &mut collisions,
        };
        let grouped = serialize_group(&fills, &group, &mut ctx).unwrap();
        assert_eq!(grouped.buffers.vertex_count(), 6);
        let indices = grouped.buffers.indices.unwrap();
        assert_eq!(indices.len(), 6);
        assert!(indices[3..].iter().all(|&i| (3..6).contains(&i)));
    }

    #[test]
    fn test_empty_group_is_none() {
        let fills = layer(json!({"id": "f", "type": "fill", "source-layer": "x"}));
        let group = FeatureGroup {
            properties: Default::default(),
            members: vec![member(Geometry::Polygon(vec![]), None)],
        };
        let mut collisions = CollisionIndex::new();
        let mut ctx = TileContext {
            zoom: 10.0,
            atlas: None,
            collisions: &mut collisions,
        };
        assert!(serialize_group(&fills, &group, &mut ctx).is_none());
    }

    #[test]
    fn test_overlapping_labels_collide() {
        let places = layer(json!({"id": "p", "type": "symbol", "source-layer": "x"}));
        let atlas = atlas();
        let mut collisions = CollisionIndex::new();
        let mut ctx = TileContext {
            zoom: 10.0,
            atlas: Some(&atlas),
            collisions: &mut collisions,
        };
        let first = member(Geometry::Point((100.0, 100.0)), Some("abc"));
        let near = member(Geometry::Point((102.0, 101.0)), Some("abc"));
        let far = member(Geometry::Point((400.0, 400.0)), Some("abc"));
        let unlabeled = member(Geometry::Point((300.0, 50.0)), None);

        assert!(serialize_feature(&places, &first, &mut ctx).is_some());
        assert!(serialize_feature(&places, &near, &mut ctx).is_none());
        assert!(serialize_feature(&places, &far, &mut ctx).is_some());
        assert!(serialize_feature(&places, &unlabeled, &mut ctx).is_none());
        assert_eq!(ctx.collisions.len(), 2);
    }

    #[test]
    fn test_allow_overlap_skips_collision() {
        let places = layer(json!({
            "id": "p", "type": "symbol", "source-layer": "x",
            "layout": {"text-allow-overlap": true}
        }));
        let atlas = atlas();
        let mut collisions = CollisionIndex::new();
        let mut ctx = TileContext {
            zoom: 10.0,
            atlas: Some(&atlas),
            collisions: &mut collisions,
        };
        let a = member(Geometry::Point((100.0, 100.0)), Some("abc"));
        assert!(serialize_feature(&places, &a, &mut ctx).is_some());
        assert!(serialize_feature(&places, &a, &mut ctx).is_some());
    }
}
