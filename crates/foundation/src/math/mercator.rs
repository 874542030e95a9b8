//! Spherical Web Mercator in unit space.
//!
//! `x` and `y` are in `[0, 1]`, with `y = 0` at the northern clamp latitude.
//! One world tile at zoom `z` spans `2^z` units of `extent` pixels.

use std::f64::consts::PI;

/// Latitude at which the square Web Mercator world is clipped.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

pub fn lng_x(lng_deg: f64) -> f64 {
    lng_deg / 360.0 + 0.5
}

pub fn lat_y(lat_deg: f64) -> f64 {
    let sin = lat_deg.to_radians().sin();
    // At the poles the log diverges to ±inf, which the clamp absorbs.
    let y = 0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI;
    y.clamp(0.0, 1.0)
}

pub fn x_lng(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

pub fn y_lat(y: f64) -> f64 {
    let y2 = (180.0 - y * 360.0).to_radians();
    360.0 * y2.exp().atan() / PI - 90.0
}

/// Search radius in unit space for `radius_px` at `zoom` with `extent`-pixel tiles.
pub fn unit_radius(radius_px: f64, extent_px: f64, zoom: u8) -> f64 {
    radius_px / (extent_px * f64::from(1u32 << u32::from(zoom.min(30))))
}

/// Wrap a longitude into `[-180, 180)`.
pub fn wrap_lng(lng_deg: f64) -> f64 {
    ((lng_deg + 180.0) % 360.0 + 360.0) % 360.0 - 180.0
}
