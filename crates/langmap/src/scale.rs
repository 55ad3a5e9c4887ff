//! Coordinate scaling around the origin.
//!
//! Tessellation and boolean operations run on coordinates multiplied by the
//! scale factor; small degree values otherwise produce nearly coincident
//! vertices that the geometry engines reject. Everything that enters the
//! scaled space (sites, cells, land mask) goes through these helpers so the
//! spaces always agree, and [`scale_down`] undoes [`scale_up`].

use crate::config::MAX_OUTPUT_DECIMALS;
use geo::{Coord, MapCoords, MultiPolygon, Polygon, Rect};

#[inline]
pub fn scale_coord(c: Coord<f64>, factor: f64) -> Coord<f64> {
    Coord {
        x: c.x * factor,
        y: c.y * factor,
    }
}

#[inline]
pub fn unscale_coord(c: Coord<f64>, factor: f64) -> Coord<f64> {
    Coord {
        x: c.x / factor,
        y: c.y / factor,
    }
}

pub fn scale_up<G: MapCoords<f64, f64, Output = G>>(geometry: &G, factor: f64) -> G {
    geometry.map_coords(|c| scale_coord(c, factor))
}

/// Divides instead of multiplying by `1 / factor` to keep the round trip exact
/// for power-of-ten factors.
pub fn scale_down<G: MapCoords<f64, f64, Output = G>>(geometry: &G, factor: f64) -> G {
    geometry.map_coords(|c| unscale_coord(c, factor))
}

/// The longitude/latitude plane `[-180, 180] x [-90, 90]` in scaled space.
pub fn world_bounds(factor: f64) -> Rect<f64> {
    Rect::new(
        Coord {
            x: -180.0 * factor,
            y: -90.0 * factor,
        },
        Coord {
            x: 180.0 * factor,
            y: 90.0 * factor,
        },
    )
}

/// Rounds every coordinate to `decimals` places, at most
/// [`MAX_OUTPUT_DECIMALS`]. Larger requests leave the coordinates as they are.
pub fn round_multi_polygon(mp: &MultiPolygon<f64>, decimals: u32) -> MultiPolygon<f64> {
    if decimals > MAX_OUTPUT_DECIMALS {
        return mp.clone();
    }
    let factor = 10f64.powi(decimals as i32);
    mp.map_coords(|c| Coord {
        x: (c.x * factor).round() / factor,
        y: (c.y * factor).round() / factor,
    })
}

pub fn polygon_is_finite(polygon: &Polygon<f64>) -> bool {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .flat_map(|ring| ring.coords())
        .all(|c| c.x.is_finite() && c.y.is_finite())
}
