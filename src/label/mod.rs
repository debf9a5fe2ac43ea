//! Label text resolution and layout for symbol layers.

pub mod atlas;
pub mod linebreak;
pub mod shaping;
pub mod text;

pub use atlas::{Atlas, GlyphAtlasBuilder, GlyphRequest, UniformAtlasBuilder};
pub use shaping::{shape, ShapedLabel, TextLayout};

use serde::{Deserialize, Serialize};

use crate::feature::Properties;
use crate::style::{LayerType, StyleLayer};

/// Font size glyphs are rasterized at
pub const ONE_EM: f64 = 24.0;
const GLYPH_BORDER: f64 = 3.0;
const ATLAS_PADDING: f64 = 1.0;
/// Margin around each glyph rect in the atlas
pub const RECT_BUFFER: f64 = GLYPH_BORDER + ATLAS_PADDING;

/// Resolved label text for one feature and the font stack to set it in
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelText {
    pub text: String,
    pub font: String,
}

impl LabelText {
    /// `None` for non-symbol layers and for features whose text is empty
    pub fn resolve(layer: &StyleLayer, zoom: f64, properties: &Properties) -> Option<Self> {
        if layer.layer_type != LayerType::Symbol {
            return None;
        }
        let field = layer.layout("text-field").string(zoom, properties);
        let text = text::substitute_tokens(&field, properties);
        if text.is_empty() {
            return None;
        }
        let transform = layer.layout("text-transform").string(zoom, properties);
        Some(Self {
            text: text::transform(&text, &transform),
            font: layer.layout("text-font").string(zoom, properties),
        })
    }

    pub fn collect_into(&self, request: &mut GlyphRequest) {
        request
            .entry(self.font.clone())
            .or_default()
            .extend(self.text.chars());
    }
}
