//! Web Mercator at zoom level 0: the whole world maps onto a 256 x 256 pixel
//! square, with x growing eastwards and y growing southwards.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use crate::{data::osm::MapCoords, lines::LinePoint};

pub const WORLD_SIZE_PX: f64 = 256.0;

const PX_PER_RADIAN: f64 = WORLD_SIZE_PX / (2.0 * PI);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelCoords {
    pub x: f64,
    pub y: f64,
}

impl PixelCoords {
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Undefined at the poles; there the result is not finite or far outside the
/// square. NaN input gives NaN output.
pub fn project_coords(coords: &MapCoords) -> PixelCoords {
    let lat = coords.lat.to_radians();
    let lon = coords.lon.to_radians();

    let x = PI + lon;
    let y = PI - (FRAC_PI_4 + lat / 2.0).tan().ln();

    PixelCoords {
        x: PX_PER_RADIAN * x,
        y: PX_PER_RADIAN * y,
    }
}

pub fn unproject_coords(pixel: &PixelCoords) -> MapCoords {
    let lon = pixel.x / PX_PER_RADIAN - PI;
    let lat = 2.0 * (PI - pixel.y / PX_PER_RADIAN).exp().atan() - FRAC_PI_2;

    MapCoords {
        lat: lat.to_degrees(),
        lon: lon.to_degrees(),
    }
}

/// Projects every point of a line buffer; breaks pass through unchanged.
pub fn project(points: &[LinePoint<MapCoords>]) -> Vec<LinePoint<PixelCoords>> {
    points.iter()
        .map(|point| point.map(|coords| project_coords(&coords)))
        .collect()
}
