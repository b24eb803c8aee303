//! Geographic Primitives
//!
//! Great-circle distance on a spherical Earth, compass bearing, and random
//! point placement around a site. Every proximity decision in the engine goes
//! through [`distance_meters`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::rng::RollSource;

/// Mean Earth radius used by the haversine formula (meters).
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters per degree of latitude, flat-earth approximation.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Coordinate validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeoError {
    /// Latitude or longitude is NaN, infinite, or outside its range.
    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate {
        /// Offending latitude.
        latitude: f64,
        /// Offending longitude.
        longitude: f64,
    },
}

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees, `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in degrees, `[-180, 180]`.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate without validation.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Create a coordinate, rejecting non-finite or out-of-range values.
    pub fn checked(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
        let coord = Self::new(latitude, longitude);
        coord.validate()?;
        Ok(coord)
    }

    /// Check that both components are finite and within range.
    pub fn validate(&self) -> Result<(), GeoError> {
        let lat_ok = self.latitude.is_finite() && (-90.0..=90.0).contains(&self.latitude);
        let lng_ok = self.longitude.is_finite() && (-180.0..=180.0).contains(&self.longitude);
        if lat_ok && lng_ok {
            Ok(())
        } else {
            Err(GeoError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

/// Great-circle distance between two coordinates in meters.
///
/// Haversine on a sphere of radius [`EARTH_RADIUS_METERS`]. Deltas are taken as
/// absolute values so the result is bit-for-bit symmetric in its arguments.
/// Good enough for geofence radii of 10 m and up; not sub-meter precise.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> Result<f64, GeoError> {
    a.validate()?;
    b.validate()?;

    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).abs().to_radians();
    let d_lambda = (b.longitude - a.longitude).abs().to_radians();

    let sin_phi = (d_phi / 2.0).sin();
    let sin_lambda = (d_lambda / 2.0).sin();
    let h = sin_phi * sin_phi + (phi1.cos() * phi2.cos()) * sin_lambda * sin_lambda;
    // Rounding can push h a hair above 1 for antipodal points.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    Ok(EARTH_RADIUS_METERS * c)
}

/// Whether `point` lies within `radius_meters` of `center` (inclusive).
pub fn within_radius(point: Coordinate, center: Coordinate, radius_meters: f64) -> Result<bool, GeoError> {
    Ok(distance_meters(point, center)? <= radius_meters)
}

/// Initial compass bearing from `from` to `to`, in degrees `[0, 360)`.
pub fn bearing_degrees(from: Coordinate, to: Coordinate) -> Result<f64, GeoError> {
    from.validate()?;
    to.validate()?;

    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let d_lambda = (to.longitude - from.longitude).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    let bearing = y.atan2(x).to_degrees();

    Ok((bearing + 360.0) % 360.0)
}

/// Random point within `radius_meters` of `center`.
///
/// Uniform angle and uniform distance, converted to degree offsets with a
/// flat-earth approximation. Points cluster toward the center, which suits
/// spawn placement around a site.
pub fn random_point_within(
    center: Coordinate,
    radius_meters: f64,
    rng: &mut dyn RollSource,
) -> Result<Coordinate, GeoError> {
    center.validate()?;

    let distance = rng.next_unit() * radius_meters.max(0.0);
    let angle = rng.next_unit() * std::f64::consts::TAU;

    let lat_offset = (distance / METERS_PER_DEGREE) * angle.cos();
    let lng_offset = (distance / (METERS_PER_DEGREE * center.latitude.to_radians().cos())) * angle.sin();

    Coordinate::checked(center.latitude + lat_offset, center.longitude + lng_offset)
}

/// Point `meters` due north of `from` on the haversine sphere.
#[cfg(test)]
pub(crate) fn north_of(from: Coordinate, meters: f64) -> Coordinate {
    Coordinate::new(from.latitude + (meters / EARTH_RADIUS_METERS).to_degrees(), from.longitude)
}

// =============================================================================
// TESTS
// =============================================================================
