//! Shared types, error enum, and distance units for inkgps-core.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// All errors produced by inkgps-core.
#[derive(Debug, Error)]
pub enum GpsError {
    #[error("file type '{extension}' of {path} is not supported")]
    ExtensionNotSupported { extension: String, path: String },
    #[error("no track named '{0}'")]
    NoTrackFound(String),
    #[error("no track is active")]
    NoActiveTrackFound,
    #[error("track has no points")]
    EmptyTrack,
    #[error("no position received yet")]
    NoPositionFound,
    #[error("need at least {needed} points, got {actual}")]
    NotEnoughPoints { needed: usize, actual: usize },
    #[error("no map bounds available for display coordinates")]
    NoMapContext,
    #[error("signal busy: {0}")]
    Busy(&'static str),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("GPX error: {0}")]
    Gpx(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GpsError>;

// ---------------------------------------------------------------------------
// Distance units
// ---------------------------------------------------------------------------

const METERS_PER_KILOMETER: f64 = 1000.0;
const METERS_PER_MILE: f64 = 1609.344;
const METERS_PER_NAUTICAL_MILE: f64 = 1852.0;

/// Unit used for reported distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Unit {
    #[default]
    Meters,
    Kilometers,
    Miles,
    NauticalMiles,
}

impl Unit {
    fn meters_per_unit(self) -> f64 {
        match self {
            Unit::Meters => 1.0,
            Unit::Kilometers => METERS_PER_KILOMETER,
            Unit::Miles => METERS_PER_MILE,
            Unit::NauticalMiles => METERS_PER_NAUTICAL_MILE,
        }
    }

    /// Convert a distance in meters to this unit.
    pub fn from_meters(self, meters: f64) -> f64 {
        meters / self.meters_per_unit()
    }

    /// Convert a distance in this unit to meters.
    pub fn to_meters(self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }

    /// Short label for display next to a value.
    pub fn label(self) -> &'static str {
        match self {
            Unit::Meters => "m",
            Unit::Kilometers => "km",
            Unit::Miles => "mi",
            Unit::NauticalMiles => "nm",
        }
    }

    /// Name used in config files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Unit::Meters => "meters",
            Unit::Kilometers => "kilometers",
            Unit::Miles => "miles",
            Unit::NauticalMiles => "nautical-miles",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Unit {
    type Err = GpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "meters" | "metres" => Ok(Unit::Meters),
            "km" | "kms" | "kilometers" | "kilometres" => Ok(Unit::Kilometers),
            "mi" | "miles" => Ok(Unit::Miles),
            "nm" | "nms" | "nautical-miles" | "nautical_miles" => Ok(Unit::NauticalMiles),
            other => Err(GpsError::Config(format!("unknown unit '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Angle helpers
// ---------------------------------------------------------------------------

/// Normalize an angle in degrees to `[0, 360)`.
pub fn normalize_degrees(deg: f64) -> f64 {
    let d = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if d >= 360.0 {
        0.0
    } else {
        d
    }
}

/// Normalize an angle in degrees to `(-180, 180]`.
pub fn signed_degrees(deg: f64) -> f64 {
    let d = normalize_degrees(deg);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
