//! Polygon triangulation for fill layers.

use lyon::math::point;
use lyon::path::Path;
use lyon::tessellation::{BuffersBuilder, FillOptions, FillTessellator, FillVertex, VertexBuffers};
use tracing::warn;

use crate::compress::Buffers;
use crate::feature::{Coord, Geometry};

/// Drop the closing vertex of a ring that repeats its first
fn open_ring(ring: &[Coord]) -> &[Coord] {
    match ring {
        [first, rest @ .., last] if first == last && !rest.is_empty() => &ring[..ring.len() - 1],
        _ => ring,
    }
}

/// Triangulate a polygon (outer ring then holes) into positions and indices
fn triangulate_polygon(tessellator: &mut FillTessellator, rings: &[Vec<Coord>]) -> Option<Buffers> {
    let outer = open_ring(rings.first()?);
    if outer.len() < 3 {
        return None;
    }

    let mut builder = Path::builder();
    for ring in rings.iter().map(|r| open_ring(r)).filter(|r| r.len() >= 3) {
        builder.begin(point(ring[0].0 as f32, ring[0].1 as f32));
        for &(x, y) in &ring[1..] {
            builder.line_to(point(x as f32, y as f32));
        }
        builder.end(true);
    }
    let path = builder.build();

    let mut geometry: VertexBuffers<[f32; 2], u32> = VertexBuffers::new();
    let result = tessellator.tessellate_path(
        &path,
        &FillOptions::default(),
        &mut BuffersBuilder::new(&mut geometry, |vertex: FillVertex| vertex.position().to_array()),
    );
    if let Err(e) = result {
        warn!(error = ?e, "polygon tessellation failed");
        return None;
    }
    if geometry.indices.is_empty() {
        return None;
    }

    let positions = geometry.vertices.into_iter().flatten().collect();
    Some(
        Buffers::default()
            .with_attribute("position", 2, positions)
            .with_indices(geometry.indices),
    )
}

/// `None` for non-polygon or degenerate geometry
pub fn triangulate(geometry: &Geometry) -> Option<Buffers> {
    let mut tessellator = FillTessellator::new();
    let polygons: Vec<&[Vec<Coord>]> = match geometry {
        Geometry::Polygon(rings) => vec![rings.as_slice()],
        Geometry::MultiPolygon(polygons) => polygons.iter().map(Vec::as_slice).collect(),
        _ => return None,
    };

    let mut merged: Option<Buffers> = None;
    for buffers in polygons
        .into_iter()
        .filter_map(|rings| triangulate_polygon(&mut tessellator, rings))
    {
        match merged.as_mut() {
            Some(m) => m.append(buffers),
            None => merged = Some(buffers),
        }
    }
    merged
}
