//! Feature compression: features that render identically are grouped so
//! the renderer can draw each group with one call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::feature::{Feature, Properties};
use crate::label::LabelText;
use crate::style::{LayerType, StyleLayer};

/// A feature travelling through the pipeline with its resolved label
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub feature: Feature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<LabelText>,
}

/// Features sharing the same render-relevant property values, not yet
/// serialized into buffers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureGroup {
    pub properties: Properties,
    pub members: Vec<GroupMember>,
}

/// Groups features on the values of property-keyed paint functions
#[derive(Clone, Debug)]
pub struct FeatureGrouper {
    render_properties: Vec<String>,
}

impl FeatureGrouper {
    pub fn new(layer: &StyleLayer) -> Self {
        Self {
            render_properties: layer.render_properties(),
        }
    }

    pub fn render_properties(&self) -> &[String] {
        &self.render_properties
    }

    /// Groups come out in order of first appearance
    pub fn group(&self, members: impl IntoIterator<Item = GroupMember>) -> Vec<FeatureGroup> {
        let mut groups: Vec<FeatureGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for member in members {
            let values: Vec<Value> = self
                .render_properties
                .iter()
                .map(|name| grouping_value(member.feature.properties.get(name)))
                .collect();
            let key = serde_json::to_string(&values).unwrap_or_default();

            let slot = *index.entry(key).or_insert_with(|| {
                let properties = self
                    .render_properties
                    .iter()
                    .filter_map(|name| {
                        let value = member.feature.properties.get(name)?;
                        Some((name.clone(), value.clone()))
                    })
                    .collect();
                groups.push(FeatureGroup {
                    properties,
                    members: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].members.push(member);
        }
        groups
    }
}

/// Numbers compare by value, so `1` and `1.0` land in the same group
fn grouping_value(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Number(n)) => n.as_f64().map_or(Value::Null, Value::from),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

/// One vertex attribute: `components` floats per vertex
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Attribute {
    pub components: usize,
    pub data: Vec<f32>,
}

/// Render-ready typed buffers. All attributes describe the same vertices;
/// `indices` (if any) point into them.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Buffers {
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indices: Option<Vec<u32>>,
}

impl Buffers {
    pub fn with_attribute(mut self, name: &str, components: usize, data: Vec<f32>) -> Self {
        self.attributes
            .insert(name.to_string(), Attribute { components, data });
        self
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.attributes
            .values()
            .next()
            .map(|a| a.data.len() / a.components.max(1))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0
    }

    /// Concatenate `other`, rebasing its indices past the vertices already here
    pub fn append(&mut self, other: Buffers) {
        let shift = self.vertex_count() as u32;
        for (name, attribute) in other.attributes {
            match self.attributes.get_mut(&name) {
                Some(existing) => existing.data.extend(attribute.data),
                None => {
                    self.attributes.insert(name, attribute);
                }
            }
        }
        if let Some(indices) = other.indices {
            self.indices
                .get_or_insert_with(Vec::new)
                .extend(indices.into_iter().map(|i| i + shift));
        }
    }
}

/// A merged render unit
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupedFeature {
    pub properties: Properties,
    pub buffers: Buffers,
}

/// Final per-style-layer output of a tile
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompressedLayer {
    #[serde(rename = "type", serialize_with = "layer_type_name")]
    pub layer_type: LayerType,
    pub extent: u32,
    pub compressed: Vec<GroupedFeature>,
    /// Untouched features kept for hit-testing on interactive layers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<Feature>>,
}

fn layer_type_name<S: serde::Serializer>(t: &LayerType, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(t.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Geometry;
    use crate::style::StyleLayerDescriptor;
    use serde_json::json;

    fn layer() -> StyleLayer {
        let desc: StyleLayerDescriptor = serde_json::from_value(json!({
            "id": "roads", "type": "line", "source-layer": "road",
            "paint": {
                "line-color": {"property": "class", "stops": [[0, "#000"], [1, "#fff"]]},
                "line-width": {"property": "lanes", "type": "identity"},
                "line-opacity": {"stops": [[0, 0], [10, 1]]}
            }
        }))
        .unwrap();
        StyleLayer::compile(&desc, None).unwrap()
    }

    fn member(props: Value) -> GroupMember {
        GroupMember {
            feature: Feature::new(
                Geometry::LineString(vec![(0.0, 0.0), (1.0, 1.0)]),
                props.as_object().cloned().unwrap_or_default(),
            ),
            label: None,
        }
    }

    #[test]
    fn test_groups_on_property_functions_only() {
        let grouper = FeatureGrouper::new(&layer());
        assert_eq!(grouper.render_properties(), ["class", "lanes"]);

        let groups = grouper.group(vec![
            member(json!({"class": 1, "lanes": 2, "name": "a"})),
            member(json!({"class": 0, "lanes": 2, "name": "b"})),
            member(json!({"class": 1, "lanes": 2, "name": "c"})),
            member(json!({"class": 1, "name": "d"})),
        ]);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].members.len(), 2);
        // Only render-relevant properties survive on the group
        assert_eq!(groups[0].properties, json!({"class": 1, "lanes": 2}).as_object().cloned().unwrap());
        assert_eq!(groups[2].properties, json!({"class": 1}).as_object().cloned().unwrap());
    }

    #[test]
    fn test_integer_and_float_values_share_a_group() {
        let grouper = FeatureGrouper::new(&layer());
        let groups = grouper.group(vec![
            member(json!({"class": 1, "lanes": 2})),
            member(json!({"class": 1.0, "lanes": 2.0})),
            member(json!({"class": 1.5, "lanes": 2})),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members.len(), 2);
        // The first member's values are kept as written
        assert_eq!(groups[0].properties["class"], json!(1));
    }

    #[test]
    fn test_grouping_is_idempotent() {
        let grouper = FeatureGrouper::new(&layer());
        let first = grouper.group(vec![
            member(json!({"class": 1, "lanes": 2})),
            member(json!({"class": 0, "lanes": 2})),
            member(json!({"class": 1, "lanes": 2})),
            member(json!({"class": 0, "lanes": 4})),
        ]);
        let again = grouper.group(first.iter().map(|g| member(Value::Object(g.properties.clone()))));
        assert_eq!(again.len(), first.len());
        assert!(again.iter().all(|g| g.members.len() == 1));
    }

    #[test]
    fn test_append_rebases_indices() {
        let triangle = || {
            Buffers::default()
                .with_attribute("position", 2, vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0])
                .with_indices(vec![0, 1, 2])
        };
        let mut merged = triangle();
        merged.append(triangle());
        merged.append(triangle());

        assert_eq!(merged.vertex_count(), 9);
        assert_eq!(merged.indices.as_deref(), Some(&[0, 1, 2, 3, 4, 5, 6, 7, 8][..]));
        let position = &merged.attributes["position"];
        let vertices = position.data.len() / position.components;
        assert!(merged.indices.unwrap().iter().all(|&i| (i as usize) < vertices));
    }

    #[test]
    fn test_append_into_empty() {
        let mut merged = Buffers::default();
        merged.append(Buffers::default().with_attribute("points", 3, vec![1.0, 2.0, 0.0]));
        assert_eq!(merged.vertex_count(), 1);
        assert!(merged.indices.is_none());
    }
}
