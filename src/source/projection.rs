use glam::DVec2;
use std::f64::consts::PI;

use crate::feature::Coord;

/// Latitude limit of the square Web Mercator world
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// Project a geographic coordinate (lon, lat) to Web Mercator unit space,
/// where the whole world spans `[0, 1]` on both axes with y pointing south
pub fn project(lon: f64, lat: f64) -> DVec2 {
    let x = (lon + 180.0) / 360.0;
    let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE) * PI / 180.0;
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;
    DVec2::new(x, y)
}

/// Maps unit-space coordinates into one tile's local coordinate system
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileTransform {
    origin: DVec2,
    scale: f64,
}

impl TileTransform {
    pub fn new(z: u8, x: u32, y: u32, extent: u32) -> Self {
        let tiles = f64::from(1u32 << z.min(31));
        Self {
            origin: DVec2::new(f64::from(x) / tiles, f64::from(y) / tiles),
            scale: tiles * f64::from(extent),
        }
    }

    pub fn apply(&self, unit: Coord) -> Coord {
        let local = (DVec2::new(unit.0, unit.1) - self.origin) * self.scale;
        (local.x, local.y)
    }

    /// Unit-space bounds of the tile grown by `buffer` tile-local units,
    /// as (min_x, min_y, max_x, max_y)
    pub fn unit_bounds(&self, extent: u32, buffer: f64) -> (f64, f64, f64, f64) {
        let pad = buffer / self.scale;
        let size = f64::from(extent) / self.scale;
        (
            self.origin.x - pad,
            self.origin.y - pad,
            self.origin.x + size + pad,
            self.origin.y + size + pad,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_center() {
        let p = project(0.0, 0.0);
        assert!((p.x - 0.5).abs() < 1e-12);
        assert!((p.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_poles_clamped() {
        assert!(project(0.0, 90.0).y.abs() < 1e-9);
        assert!((project(0.0, -90.0).y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tile_transform() {
        // Tile 1/1/0 is the north-east quadrant
        let t = TileTransform::new(1, 1, 0, 512);
        assert_eq!(t.apply((0.5, 0.0)), (0.0, 0.0));
        assert_eq!(t.apply((0.75, 0.25)), (256.0, 256.0));
        let (x0, y0, x1, y1) = t.unit_bounds(512, 64.0);
        assert_eq!((x0, y0, x1, y1), (0.4375, -0.0625, 1.0625, 0.5625));
    }
}
