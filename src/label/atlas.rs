//! Glyph atlases: a bitmap plus the position of every glyph within it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{ONE_EM, RECT_BUFFER};
use crate::error::TileError;

/// Characters needed per font stack for one tile
pub type GlyphRequest = BTreeMap<String, BTreeSet<char>>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphMetrics {
    pub width: f64,
    pub height: f64,
    pub left: f64,
    pub top: f64,
    pub advance: f64,
}

/// Glyph cell within the atlas bitmap, in pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphPosition {
    pub metrics: GlyphMetrics,
    pub rect: GlyphRect,
}

/// Single-channel glyph bitmap with its position index
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Atlas {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub positions: HashMap<String, HashMap<char, GlyphPosition>>,
}

impl Atlas {
    pub fn glyph(&self, font: &str, c: char) -> Option<&GlyphPosition> {
        self.positions.get(font)?.get(&c)
    }
}

/// Produces the atlas for a tile's glyph request
pub trait GlyphAtlasBuilder: Send + Sync {
    fn build(&self, request: &GlyphRequest) -> Result<Atlas, TileError>;
}

/// Monospaced placeholder atlas: every glyph gets an identical cell on a
/// square grid and a zeroed bitmap. Useful when real SDF glyphs are not
/// available, and in tests.
#[derive(Clone, Debug)]
pub struct UniformAtlasBuilder {
    pub advance: f64,
}

impl Default for UniformAtlasBuilder {
    fn default() -> Self {
        Self {
            advance: ONE_EM / 2.0,
        }
    }
}

impl GlyphAtlasBuilder for UniformAtlasBuilder {
    fn build(&self, request: &GlyphRequest) -> Result<Atlas, TileError> {
        let count: usize = request.values().map(BTreeSet::len).sum();
        if count == 0 {
            return Ok(Atlas::default());
        }

        let buffer = RECT_BUFFER as u32;
        let cell_w = self.advance.ceil() as u32 + 2 * buffer;
        let cell_h = ONE_EM as u32 + 2 * buffer;
        let columns = (count as f64).sqrt().ceil() as u32;
        let rows = (count as u32).div_ceil(columns);

        let metrics = GlyphMetrics {
            width: self.advance,
            height: ONE_EM,
            left: 0.0,
            top: 0.0,
            advance: self.advance,
        };

        let mut positions: HashMap<String, HashMap<char, GlyphPosition>> = HashMap::new();
        let mut slot = 0u32;
        for (font, chars) in request {
            let glyphs = positions.entry(font.clone()).or_default();
            for &c in chars {
                let rect = GlyphRect {
                    x: (slot % columns) * cell_w,
                    y: (slot / columns) * cell_h,
                    w: cell_w,
                    h: cell_h,
                };
                glyphs.insert(c, GlyphPosition { metrics, rect });
                slot += 1;
            }
        }

        let width = columns * cell_w;
        let height = rows * cell_h;
        Ok(Atlas {
            width,
            height,
            data: vec![0; (width * height) as usize],
            positions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_atlas_layout() {
        let mut request = GlyphRequest::new();
        request.insert("Sans".into(), "abcde".chars().collect());
        let atlas = UniformAtlasBuilder::default().build(&request).unwrap();

        // 5 glyphs on a 3-column grid
        let cell_w = 12 + 2 * RECT_BUFFER as u32;
        let cell_h = 24 + 2 * RECT_BUFFER as u32;
        assert_eq!((atlas.width, atlas.height), (3 * cell_w, 2 * cell_h));
        assert_eq!(atlas.data.len(), (atlas.width * atlas.height) as usize);
        let e = atlas.glyph("Sans", 'e').unwrap();
        assert_eq!((e.rect.x, e.rect.y), (cell_w, cell_h));
        assert_eq!(e.metrics.advance, 12.0);
        assert!(atlas.glyph("Serif", 'a').is_none());
    }

    #[test]
    fn test_empty_request() {
        let atlas = UniformAtlasBuilder::default().build(&GlyphRequest::new()).unwrap();
        assert_eq!(atlas, Atlas::default());
    }
}
