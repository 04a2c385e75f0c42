//! Geographic coordinates with Web Mercator projection and spherical geodesy.
//!
//! A `Coordinate` stores latitude/longitude in degrees plus the projected
//! planar `(x, y)` in meters, computed once at construction:
//!
//! - x = R * lon * π/180
//! - y = R * ln(tan(π/4 + lat * π/360))
//!
//! with R = 6378137.0 (WGS84 semi-major axis). Geodesic operations (distance,
//! bearing, midpoint, destination) run on a sphere of mean Earth radius.

use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::map::BoundingBox;
use crate::types::{normalize_degrees, Unit};

/// Earth radius used by the planar projection (meters).
pub const PROJECTION_RADIUS_M: f64 = 6_378_137.0;

/// Mean Earth radius used for great-circle math (meters).
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_008.8;

/// Project latitude/longitude (degrees) to planar Web Mercator meters.
pub fn project(latitude: f64, longitude: f64) -> (f64, f64) {
    let x = PROJECTION_RADIUS_M * longitude * PI / 180.0;
    let y = PROJECTION_RADIUS_M * (PI / 4.0 + (latitude * PI / 180.0) / 2.0).tan().ln();
    (x, y)
}

/// Great-circle distance in meters (haversine).
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_MEAN_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// A projected point on the map.
///
/// Latitude/longitude and the projected x/y are only readable: every
/// constructor derives x/y from the geographic position, so the two can never
/// drift apart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
    x: f64,
    y: f64,
    pub timestamp: Option<DateTime<Utc>>,
    /// Reported ground speed in m/s.
    pub speed: Option<f64>,
    /// Altitude in meters.
    pub altitude: Option<f64>,
    passed: bool,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        let (x, y) = project(latitude, longitude);
        Coordinate {
            latitude,
            longitude,
            x,
            y,
            timestamp: None,
            speed: None,
            altitude: None,
            passed: false,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Projected x in meters.
    pub fn x(&self) -> f64 {
        self.x
    }

    /// Projected y in meters.
    pub fn y(&self) -> f64 {
        self.y
    }

    /// True once the moving position has reached this point.
    pub fn is_passed(&self) -> bool {
        self.passed
    }

    pub(crate) fn mark_passed(&mut self) {
        self.passed = true;
    }

    pub(crate) fn reset_passed(&mut self) {
        self.passed = false;
    }

    /// Same geographic position (ignores time, speed, altitude and progress).
    pub fn same_position(&self, other: &Coordinate) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }

    /// Great-circle distance to `other` in `unit`.
    pub fn distance_to(&self, other: &Coordinate, unit: Unit) -> f64 {
        unit.from_meters(self.distance_m(other))
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        haversine_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Forward azimuth to `other` in degrees: 0 = north, 90 = east, range [0, 360).
    pub fn bearing_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
        normalize_degrees(y.atan2(x).to_degrees())
    }

    /// Point halfway along the great circle between `self` and `other`.
    pub fn midpoint_to(&self, other: &Coordinate) -> Coordinate {
        let lat1 = self.latitude.to_radians();
        let lon1 = self.longitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let bx = lat2.cos() * dlon.cos();
        let by = lat2.cos() * dlon.sin();
        let lat = (lat1.sin() + lat2.sin()).atan2(((lat1.cos() + bx).powi(2) + by.powi(2)).sqrt());
        let lon = lon1 + by.atan2(lat1.cos() + bx);

        Coordinate::new(lat.to_degrees(), normalize_longitude(lon.to_degrees()))
    }

    /// Destination after travelling `distance_m` meters on initial bearing
    /// `heading` (degrees).
    pub fn endpoint(&self, heading: f64, distance_m: f64) -> Coordinate {
        let delta = distance_m / EARTH_MEAN_RADIUS_M;
        let theta = heading.to_radians();
        let lat1 = self.latitude.to_radians();
        let lon1 = self.longitude.to_radians();

        let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
        let lon2 = lon1
            + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

        Coordinate::new(lat2.to_degrees(), normalize_longitude(lon2.to_degrees()))
    }

    /// Pixel x relative to the map bounds.
    pub fn display_x(&self, bbox: &BoundingBox) -> f64 {
        self.x - bbox.min_x
    }

    /// Pixel y relative to the map bounds (screen y grows downward).
    pub fn display_y(&self, bbox: &BoundingBox) -> f64 {
        bbox.height() - (self.y - bbox.min_y)
    }
}

/// Wrap a longitude to [-180, 180).
fn normalize_longitude(lon: f64) -> f64 {
    (lon + 540.0).rem_euclid(360.0) - 180.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
