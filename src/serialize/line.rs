//! Control points for instanced line rendering.
//!
//! Each point is `[x, y, marker]`. A marker of `-2` pads a run so every
//! segment instance can read its neighbours; the renderer draws
//! `points - 3` segment instances per run.

use crate::compress::Buffers;
use crate::feature::{Coord, Geometry};

const CAP: f32 = -2.0;

fn push(points: &mut Vec<f32>, (x, y): Coord, marker: f32) {
    points.extend([x as f32, y as f32, marker]);
}

/// Open line: caps repeat the end vertices
fn line_run(points: &mut Vec<f32>, line: &[Coord]) {
    let (Some(&first), Some(&last)) = (line.first(), line.last()) else {
        return;
    };
    if line.len() < 2 {
        return;
    }
    push(points, first, CAP);
    for &c in line {
        push(points, c, 0.0);
    }
    push(points, last, CAP);
}

/// Closed ring: pads wrap around so the join at the closing vertex is mitred
fn ring_run(points: &mut Vec<f32>, ring: &[Coord]) {
    let n = ring.len();
    if n < 3 {
        return;
    }
    push(points, ring[n - 2], CAP);
    for &c in ring {
        push(points, c, 0.0);
    }
    push(points, ring[1], CAP);
}

/// `None` for points and degenerate lines
pub fn control_points(geometry: &Geometry) -> Option<Buffers> {
    let mut points = Vec::new();
    match geometry {
        Geometry::LineString(line) => line_run(&mut points, line),
        Geometry::MultiLineString(lines) => lines.iter().for_each(|l| line_run(&mut points, l)),
        Geometry::Polygon(rings) => rings.iter().for_each(|r| ring_run(&mut points, r)),
        Geometry::MultiPolygon(polygons) => polygons
            .iter()
            .flatten()
            .for_each(|r| ring_run(&mut points, r)),
        Geometry::Point(_) | Geometry::MultiPoint(_) => {}
    }
    if points.is_empty() {
        return None;
    }
    Some(Buffers::default().with_attribute("points", 3, points))
}

/// Circle layers: one 2-component point per instance
pub fn point_positions(geometry: &Geometry) -> Option<Buffers> {
    let coords: Vec<f32> = match geometry {
        Geometry::Point((x, y)) => vec![*x as f32, *y as f32],
        Geometry::MultiPoint(points) => points
            .iter()
            .flat_map(|&(x, y)| [x as f32, y as f32])
            .collect(),
        _ => return None,
    };
    if coords.is_empty() {
        return None;
    }
    Some(Buffers::default().with_attribute("points", 2, coords))
}
