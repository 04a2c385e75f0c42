//! gpsd JSON line protocol.
//!
//! gpsd speaks newline-delimited JSON objects, dispatched on `"class"`:
//! - `VERSION`: handshake sent on connect; the client answers with `?WATCH`.
//! - `TPV`:     time-position-velocity fix (`mode` 2 = 2D, 3 = 3D).
//! - `SKY`:     satellite list, each with a `used` flag.
//! - `DEVICE`, `DEVICES`, `WATCH`: acknowledgements.
//!
//! Anything else decodes to `Unknown` and is ignored by the reader.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::coordinate::Coordinate;
use crate::types::{GpsError, Result};

/// Default gpsd TCP port.
pub const DEFAULT_PORT: u16 = 2947;

/// Command enabling JSON watch mode.
pub const WATCH_ENABLE: &str = "?WATCH={\"enable\":true,\"json\":true}\n";

/// Command disabling watch mode before disconnecting.
pub const WATCH_DISABLE: &str = "?WATCH={\"enable\":false}\n";

/// Minimum TPV mode that carries a usable position (2D fix).
pub const MIN_FIX_MODE: u8 = 2;

/// A single server message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "class")]
pub enum GpsdMessage {
    #[serde(rename = "VERSION")]
    Version(Version),
    #[serde(rename = "TPV")]
    Tpv(Tpv),
    #[serde(rename = "SKY")]
    Sky(Sky),
    #[serde(rename = "DEVICE")]
    Device,
    #[serde(rename = "DEVICES")]
    Devices,
    #[serde(rename = "WATCH")]
    Watch,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub proto_major: Option<u32>,
    #[serde(default)]
    pub proto_minor: Option<u32>,
}

/// Time-position-velocity report.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tpv {
    /// 0/1 = no fix, 2 = 2D, 3 = 3D.
    #[serde(default)]
    pub mode: u8,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub alt: Option<f64>,
    /// Ground speed in m/s.
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

impl Tpv {
    /// Convert to a position fix. `None` without at least a 2D lock and both
    /// latitude and longitude.
    pub fn to_fix(&self) -> Option<Fix> {
        if self.mode < MIN_FIX_MODE {
            return None;
        }
        Some(Fix {
            mode: self.mode,
            lat: self.lat?,
            lon: self.lon?,
            alt: self.alt,
            speed: self.speed,
            time: self.time,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sky {
    #[serde(default)]
    pub satellites: Vec<Satellite>,
}

impl Sky {
    pub fn counts(&self) -> SatelliteCount {
        SatelliteCount {
            visible: self.satellites.len(),
            used: self.satellites.iter().filter(|s| s.used).count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Satellite {
    #[serde(default)]
    pub used: bool,
    #[serde(rename = "PRN", default)]
    pub prn: Option<u32>,
}

/// Diagnostic satellite counts from the latest SKY report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SatelliteCount {
    pub visible: usize,
    pub used: usize,
}

/// A usable position sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub mode: u8,
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
    pub speed: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

impl Fix {
    pub fn to_coordinate(&self) -> Coordinate {
        let mut c = Coordinate::new(self.lat, self.lon);
        c.timestamp = self.time;
        c.speed = self.speed;
        c.altitude = self.alt;
        c
    }

    /// True when the position differs from `previous` (or there is none).
    pub fn is_new_measurement(&self, previous: Option<&Fix>) -> bool {
        match previous {
            Some(prev) => prev.lat != self.lat || prev.lon != self.lon,
            None => true,
        }
    }
}

/// Decode a single protocol line.
pub fn parse_line(line: &str) -> Result<GpsdMessage> {
    serde_json::from_str(line.trim()).map_err(|e| GpsError::Protocol(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
