//! Glyph layout: turns a label string into per-glyph buffers.

use super::atlas::{Atlas, GlyphPosition};
use super::linebreak::{measure_line, split_lines, Advance};
use super::text::{line_shift, text_box_shift};
use super::{ONE_EM, RECT_BUFFER};
use crate::compress::Buffers;
use crate::feature::{Coord, Properties};
use crate::style::StyleLayer;

#[derive(Clone, Copy, Debug)]
struct ShapedGlyph<'a> {
    code: char,
    position: &'a GlyphPosition,
}

impl Advance for ShapedGlyph<'_> {
    fn code(&self) -> char {
        self.code
    }

    fn advance(&self) -> f64 {
        self.position.metrics.advance
    }
}

/// Layout properties of a symbol layer resolved for one feature. Lengths
/// are in atlas pixels (one em = [`ONE_EM`]).
#[derive(Clone, Debug, PartialEq)]
pub struct TextLayout {
    pub size: f64,
    pub spacing: f64,
    pub max_width: f64,
    pub line_height: f64,
    pub offset: [f64; 2],
    pub anchor: String,
    pub justify: String,
    pub padding: f64,
}

impl TextLayout {
    pub fn resolve(layer: &StyleLayer, zoom: f64, properties: &Properties) -> Self {
        let number = |name| layer.layout(name).number(zoom, properties);
        let [ox, oy] = layer.layout("text-offset").pair(zoom, properties);
        Self {
            size: number("text-size"),
            spacing: number("text-letter-spacing") * ONE_EM,
            max_width: number("text-max-width") * ONE_EM,
            line_height: number("text-line-height") * ONE_EM,
            offset: [ox * ONE_EM, oy * ONE_EM],
            anchor: layer.layout("text-anchor").string(zoom, properties),
            justify: layer.layout("text-justify").string(zoom, properties),
            padding: number("text-padding"),
        }
    }
}

/// A positioned label: glyph buffers plus its collision box in tile units
#[derive(Clone, Debug, PartialEq)]
pub struct ShapedLabel {
    pub buffers: Buffers,
    /// `[min_x, min_y, max_x, max_y]`
    pub bbox: [f64; 4],
}

/// Lay out `text` at `point`. Characters missing from the atlas are
/// skipped; `None` when nothing visible remains.
pub fn shape(
    text: &str,
    font: &str,
    point: Coord,
    layout: &TextLayout,
    atlas: &Atlas,
) -> Option<ShapedLabel> {
    let glyphs: Vec<ShapedGlyph> = text
        .chars()
        .filter_map(|code| {
            let position = atlas.glyph(font, code)?;
            Some(ShapedGlyph { code, position })
        })
        .collect();

    let lines = split_lines(&glyphs, layout.spacing, layout.max_width);
    let glyph_count: usize = lines.iter().map(|l| l.len()).sum();
    if glyph_count == 0 {
        return None;
    }

    let line_widths: Vec<f64> = lines
        .iter()
        .map(|l| measure_line(l, layout.spacing))
        .collect();
    let box_size = [
        line_widths.iter().copied().fold(0.0, f64::max),
        lines.len() as f64 * layout.line_height,
    ];
    let box_shift = text_box_shift(&layout.anchor);
    let box_origin = [
        box_shift[0] * box_size[0] + layout.offset[0],
        box_shift[1] * box_size[1] + layout.offset[1],
    ];
    let shift_x = line_shift(&layout.justify, box_shift[0]);

    let mut label_pos = Vec::with_capacity(glyph_count * 2);
    let mut glyph_pos = Vec::with_capacity(glyph_count * 2);
    let mut glyph_rect = Vec::with_capacity(glyph_count * 4);

    for (i, (line, width)) in lines.iter().zip(&line_widths).enumerate() {
        let mut x = (box_size[0] - width) * shift_x + box_origin[0];
        let y = i as f64 * layout.line_height + box_origin[1];

        for glyph in line.iter() {
            let metrics = &glyph.position.metrics;
            glyph_pos.push((x + metrics.left - RECT_BUFFER) as f32);
            glyph_pos.push((y - metrics.top - RECT_BUFFER) as f32);
            x += metrics.advance + layout.spacing;

            label_pos.extend([point.0 as f32, point.1 as f32]);
            let rect = &glyph.position.rect;
            glyph_rect.extend([rect.x as f32, rect.y as f32, rect.w as f32, rect.h as f32]);
        }
    }

    let scale = layout.size / ONE_EM;
    let bbox = [
        point.0 + (box_origin[0] - layout.padding) * scale,
        point.1 + (box_origin[1] - layout.padding) * scale,
        point.0 + (box_origin[0] + box_size[0] + layout.padding) * scale,
        point.1 + (box_origin[1] + box_size[1] + layout.padding) * scale,
    ];

    let buffers = Buffers::default()
        .with_attribute("label_pos", 2, label_pos)
        .with_attribute("glyph_pos", 2, glyph_pos)
        .with_attribute("glyph_rect", 4, glyph_rect);

    Some(ShapedLabel { buffers, bbox })
}
