use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// WGS-84 reference point for projecting geodetic coordinates onto the local
/// north/east tangent plane.
///
/// Uses the equirectangular small-area approximation, which is accurate to
/// well under a metre over the few kilometres an origin-relative local frame
/// is used for.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MapProjection {
    ref_lat_rad: f64,
    ref_lon_rad: f64,
}

impl MapProjection {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        MapProjection {
            ref_lat_rad: lat_deg.to_radians(),
            ref_lon_rad: lon_deg.to_radians(),
        }
    }

    /// Project a target location to (north, east) metres from the reference.
    pub fn project(&self, lat_deg: f64, lon_deg: f64) -> (f32, f32) {
        let d_lat = lat_deg.to_radians() - self.ref_lat_rad;
        let d_lon = lon_deg.to_radians() - self.ref_lon_rad;
        let north = EARTH_RADIUS_M * d_lat;
        let east = EARTH_RADIUS_M * d_lon * self.ref_lat_rad.cos();
        (north as f32, east as f32)
    }
}
