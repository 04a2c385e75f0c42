//! Visible window of the map, centered on the current position.
//!
//! Pure function of device size, current position and map bounds:
//!
//! - x = position.display_x - device_width / 2
//! - y = position.display_y - device_height / 2
//! - real_width = bbox.real_width / bbox.width * device_width (same for height)

use std::fmt;

use serde::Serialize;

use crate::coordinate::Coordinate;
use crate::map::BoundingBox;
use crate::types::{normalize_degrees, signed_degrees, Unit};

/// Pixel window plus its real-world size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Real-world width covered by the device, in `unit`.
    pub real_width: f64,
    /// Real-world height covered by the device, in `unit`.
    pub real_height: f64,
    pub unit: Unit,
    /// Position the window is centered on.
    pub center: Coordinate,
}

impl ViewBox {
    pub fn new(
        device_width: u32,
        device_height: u32,
        position: &Coordinate,
        bbox: &BoundingBox,
    ) -> Self {
        let width = f64::from(device_width);
        let height = f64::from(device_height);
        let unit = bbox.unit;
        ViewBox {
            x: position.display_x(bbox) - width / 2.0,
            y: position.display_y(bbox) - height / 2.0,
            width,
            height,
            real_width: unit.from_meters(bbox.meters_per_unit_x() * width),
            real_height: unit.from_meters(bbox.meters_per_unit_y() * height),
            unit,
            center: position.clone(),
        }
    }

    /// True when `point` is farther from the center than half the real width.
    pub fn is_off_screen(&self, point: &Coordinate) -> bool {
        point.distance_to(&self.center, self.unit) > self.real_width / 2.0
    }

    /// Direction marker towards an off-screen `target`.
    ///
    /// `current_bearing` is the direction of travel; the map is drawn rotated
    /// so travel points up, so the marker heading is relative to it.
    pub fn indicator(
        &self,
        target: &Coordinate,
        current_bearing: f64,
        degree_offset: f64,
    ) -> OffScreenIndicator {
        let bearing = self.center.bearing_to(target);
        let heading = normalize_degrees(bearing - current_bearing);
        OffScreenIndicator {
            target: target.clone(),
            bearing,
            heading,
            distance: self.center.distance_to(target, self.unit),
            unit: self.unit,
            kind: IndicatorKind::for_heading(heading, degree_offset),
        }
    }
}

impl fmt::Display for ViewBox {
    /// SVG `viewBox` attribute order: `x y width height`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.x, self.y, self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Off-screen indicator
// ---------------------------------------------------------------------------

/// Shape of the off-screen marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    /// Target is roughly straight ahead or behind.
    Long,
    /// Target is off to a side.
    Short,
}

impl IndicatorKind {
    /// `Long` within `degree_offset` of 0° or 180°, `Short` otherwise.
    pub fn for_heading(heading: f64, degree_offset: f64) -> Self {
        let off = signed_degrees(heading).abs();
        if off <= degree_offset || off >= 180.0 - degree_offset {
            IndicatorKind::Long
        } else {
            IndicatorKind::Short
        }
    }
}

/// What the renderer needs to point at a target outside the view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffScreenIndicator {
    pub target: Coordinate,
    /// Absolute bearing from the center to the target.
    pub bearing: f64,
    /// Bearing relative to the direction of travel, [0, 360).
    pub heading: f64,
    pub distance: f64,
    pub unit: Unit,
    pub kind: IndicatorKind,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
