//! Render contract: the data an external renderer needs to draw one screen.
//!
//! Everything is in map pixel space (see `Coordinate::display_x`). The
//! renderer applies `Frame::rotation` to the whole map so the direction of
//! travel points up, then clips to `Frame::viewbox`.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::coordinate::Coordinate;
use crate::map::{BoundingBox, Waypoint};
use crate::track::Track;
use crate::types::{GpsError, Result};
use crate::viewbox::{OffScreenIndicator, ViewBox};

// ---------------------------------------------------------------------------
// Style
// ---------------------------------------------------------------------------

/// Stroke dash pattern: alternating dash and gap lengths. Empty is solid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct DashPattern(pub Vec<u32>);

impl DashPattern {
    pub fn solid() -> Self {
        DashPattern(Vec::new())
    }

    pub fn is_solid(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DashPattern {
    /// SVG `stroke-dasharray` form, e.g. `3, 3`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join(", "))
    }
}

impl FromStr for DashPattern {
    type Err = GpsError;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.parse::<u32>()
                    .map_err(|_| GpsError::Config(format!("invalid dash length '{p}'")))
            })
            .collect::<Result<Vec<_>>>()
            .map(DashPattern)
    }
}

/// Line styles and marker geometry handed to the frame builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Style {
    pub active_track_dash: DashPattern,
    /// Off-screen direction pointer.
    pub direction_dash: DashPattern,
    /// Trail of received positions.
    pub signal_dash: DashPattern,
    /// Speed lead line from the position marker.
    pub position_dash: DashPattern,
    /// Degrees either side of straight ahead/behind that still get the long
    /// indicator.
    pub indicator_degree_offset: f64,
    /// The speed lead line shows the distance covered in this many seconds.
    pub lead_seconds: f64,
    pub marker_radius: f64,
}

impl Default for Style {
    fn default() -> Self {
        Style {
            active_track_dash: DashPattern::solid(),
            direction_dash: DashPattern(vec![3, 3]),
            signal_dash: DashPattern(vec![2, 6]),
            position_dash: DashPattern(vec![5, 3]),
            indicator_degree_offset: 35.0,
            lead_seconds: 5.0,
            marker_radius: 4.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame contents
// ---------------------------------------------------------------------------

/// Rotation applied to the map, in SVG `rotate(deg x y)` terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rotation {
    pub degrees_clockwise: f64,
    pub pivot_x: f64,
    pub pivot_y: f64,
}

impl Rotation {
    /// Rotation that turns `bearing` to screen-up around the pivot.
    pub fn new(bearing: f64, pivot_x: f64, pivot_y: f64) -> Self {
        Rotation {
            degrees_clockwise: -bearing,
            pivot_x,
            pivot_y,
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rotate({} {} {})",
            self.degrees_clockwise, self.pivot_x, self.pivot_y
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackPath {
    pub name: String,
    pub active: bool,
    pub points: Vec<(f64, f64)>,
    /// Leading points already passed.
    pub passed: usize,
    pub dash: DashPattern,
}

impl TrackPath {
    fn new(track: &Track, bbox: &BoundingBox, dash: DashPattern) -> Self {
        TrackPath {
            name: track.name().to_string(),
            active: track.is_active(),
            points: track.display_points(bbox),
            passed: track.passed_count(),
            dash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionMarker {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub bearing: Option<f64>,
    pub speed: Option<f64>,
    /// End of the speed lead line, when bearing and speed are known.
    pub lead: Option<(f64, f64)>,
    pub dash: DashPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointMarker {
    pub x: f64,
    pub y: f64,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

/// One complete screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub viewbox: ViewBox,
    pub rotation: Option<Rotation>,
    pub tracks: Vec<TrackPath>,
    pub signal: TrackPath,
    pub position: PositionMarker,
    pub waypoints: Vec<PointMarker>,
    /// Present when the route is out of view.
    pub indicator: Option<OffScreenIndicator>,
}

/// Inputs for `Frame::build`.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub tracks: &'a [Track],
    pub waypoints: &'a [Waypoint],
    pub live: &'a Track,
    /// Route with current progress. Replaces the map track of the same name.
    pub route: Option<&'a Track>,
    pub bbox: &'a BoundingBox,
    pub device_width: u32,
    pub device_height: u32,
    pub speed: Option<f64>,
    pub style: &'a Style,
}

impl Frame {
    pub fn build(input: FrameInput<'_>) -> Result<Frame> {
        let FrameInput {
            bbox, style, live, ..
        } = input;
        let position = live.last().ok_or(GpsError::NoPositionFound)?;
        let bearing = match live.points() {
            [.., a, b] => Some(a.bearing_to(b)),
            _ => None,
        };
        let (x, y) = (position.display_x(bbox), position.display_y(bbox));
        let viewbox = ViewBox::new(input.device_width, input.device_height, position, bbox);

        // The followed route stands in for the first map track of its name
        // and is then the only active path.
        let mut pending_route = input.route;
        let tracks = input
            .tracks
            .iter()
            .map(|track| match pending_route {
                Some(route) if route.name() == track.name() => {
                    pending_route = None;
                    let mut path = TrackPath::new(route, bbox, style.active_track_dash.clone());
                    path.active = true;
                    path
                }
                _ => {
                    let active = track.is_active() && input.route.is_none();
                    let dash = if active {
                        style.active_track_dash.clone()
                    } else {
                        DashPattern::solid()
                    };
                    let mut path = TrackPath::new(track, bbox, dash);
                    path.active = active;
                    path
                }
            })
            .collect();

        let lead = match (bearing, input.speed) {
            (Some(bearing), Some(speed)) if speed > 0.0 => {
                let end = position.endpoint(bearing, speed * style.lead_seconds);
                Some((end.display_x(bbox), end.display_y(bbox)))
            }
            _ => None,
        };

        let waypoints = input
            .waypoints
            .iter()
            .map(|w| PointMarker {
                x: w.coordinate.display_x(bbox),
                y: w.coordinate.display_y(bbox),
                name: w.name.clone(),
                symbol: w.symbol.clone(),
            })
            .collect();

        let route = input
            .route
            .or_else(|| input.tracks.iter().find(|t| t.is_active()));
        let indicator = match route {
            Some(route) => route_indicator(&viewbox, route, position, bearing, style)?,
            None => None,
        };

        Ok(Frame {
            rotation: bearing.map(|b| Rotation::new(b, x, y)),
            viewbox,
            tracks,
            signal: TrackPath::new(live, bbox, style.signal_dash.clone()),
            position: PositionMarker {
                x,
                y,
                radius: style.marker_radius,
                bearing,
                speed: input.speed,
                lead,
                dash: style.position_dash.clone(),
            },
            waypoints,
            indicator,
        })
    }
}

/// Indicator towards the nearest route point when it is out of view.
pub fn route_indicator(
    viewbox: &ViewBox,
    route: &Track,
    position: &Coordinate,
    bearing: Option<f64>,
    style: &Style,
) -> Result<Option<OffScreenIndicator>> {
    if route.is_empty() {
        return Ok(None);
    }
    let nearest = route.nearest_point_to(position)?;
    if !viewbox.is_off_screen(nearest) {
        return Ok(None);
    }
    Ok(Some(viewbox.indicator(
        nearest,
        bearing.unwrap_or(0.0),
        style.indicator_degree_offset,
    )))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
