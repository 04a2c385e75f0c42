//! Session: one map, one position source, one configuration.
//!
//! Routes loaded files to their owners: tracks and points of interest go to
//! the map, a track named `gps` becomes the signal's live track, and
//! waypoints named `me`, `me1`, `me2`… are inserted into the live track as
//! fixed positions.

use std::path::Path;

use tracing::{debug, info};

use crate::config::Config;
use crate::coordinate::Coordinate;
use crate::loader::{LoadedFile, LoaderRegistry};
use crate::map::{BoundingBox, Map};
use crate::render::{route_indicator, Frame, FrameInput};
use crate::signal::{Signal, LIVE_TRACK_NAME};
use crate::track::Track;
use crate::types::{GpsError, Result};
use crate::viewbox::{OffScreenIndicator, ViewBox};

pub struct Session {
    config: Config,
    map: Map,
    signal: Signal,
    loaders: LoaderRegistry,
}

impl Default for Session {
    fn default() -> Self {
        Session::new(Config::default())
    }
}

impl Session {
    pub fn new(config: Config) -> Self {
        Session {
            map: Map::new(config.units),
            signal: Signal::new(config.signal_config()),
            loaders: LoaderRegistry::with_defaults(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn map(&self) -> &Map {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut Map {
        &mut self.map
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn loaders_mut(&mut self) -> &mut LoaderRegistry {
        &mut self.loaders
    }

    // -- Loading -----------------------------------------------------------

    /// Load one track file.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let loaded = self.loaders.load(path)?;
        self.absorb(loaded)
    }

    /// Load every supported file in `dir`.
    pub fn load_folder(&mut self, dir: &Path) -> Result<()> {
        for loaded in self.loaders.load_folder(dir)? {
            self.absorb(loaded)?;
        }
        Ok(())
    }

    /// Load a file, or every supported file when `path` is a directory.
    pub fn load_path(&mut self, path: &Path) -> Result<()> {
        if path.is_dir() {
            self.load_folder(path)
        } else {
            self.load_file(path)
        }
    }

    fn absorb(&mut self, loaded: LoadedFile) -> Result<()> {
        for waypoint in loaded.waypoints {
            match waypoint.name.as_deref().and_then(signal_slot) {
                Some(at) => {
                    debug!(name = ?waypoint.name, "Waypoint used as live position");
                    self.signal.inject(waypoint.coordinate, at)?;
                }
                None => self.map.add_point(waypoint),
            }
        }
        for track in loaded.tracks {
            if track.name() == LIVE_TRACK_NAME {
                debug!(points = track.len(), "Track used as live signal");
                self.signal.set_track(track)?;
            } else {
                self.map.add_track(track);
            }
        }
        Ok(())
    }

    // -- Route -------------------------------------------------------------

    /// Make `name` the active track and the route live fixes advance along.
    pub fn set_active_track(&mut self, name: &str) -> Result<()> {
        self.map.set_active_track(name)?;
        let route = self.map.active_track()?.snapshot();
        self.signal.follow(Some(route));
        Ok(())
    }

    // -- Viewport ----------------------------------------------------------

    fn position(&self) -> Result<Coordinate> {
        self.signal.current_position()
    }

    /// Map bounds including the current position, when there is one.
    pub fn bounding_box(&self) -> Result<BoundingBox> {
        let position = self.signal.current_position().ok();
        self.map.bounding_box(position.as_ref())
    }

    pub fn view_box(&self) -> Result<ViewBox> {
        let position = self.position()?;
        let bbox = self.map.bounding_box(Some(&position))?;
        Ok(ViewBox::new(
            self.config.display.width,
            self.config.display.height,
            &position,
            &bbox,
        ))
    }

    /// Indicator towards the route when it is out of view. `None` when the
    /// route is visible or no route is set.
    pub fn off_screen_indicator(&self) -> Result<Option<OffScreenIndicator>> {
        let route = match self.signal.route() {
            Some(route) => route,
            None => match self.map.active_track() {
                Ok(track) => track.snapshot(),
                Err(_) => return Ok(None),
            },
        };
        let position = self.position()?;
        let viewbox = self.view_box()?;
        let bearing = self.signal.current_bearing().ok();
        route_indicator(&viewbox, &route, &position, bearing, &self.config.style)
    }

    /// The current screen.
    pub fn frame(&self) -> Result<Frame> {
        let live = self.signal.live_track();
        let position = live.last().ok_or(GpsError::NoPositionFound)?;
        let bbox = self.map.bounding_box(Some(position))?;
        let route = self.signal.route();
        Frame::build(FrameInput {
            tracks: self.map.tracks(),
            waypoints: self.map.points(),
            live: &live,
            route: route.as_ref(),
            bbox: &bbox,
            device_width: self.config.display.width,
            device_height: self.config.display.height,
            speed: self.signal.speed(),
            style: &self.config.style,
        })
    }

    // -- Simulation --------------------------------------------------------

    /// Replay the map track `name` and hand a `Frame` to `on_frame` per step.
    ///
    /// The track becomes the active track and the followed route. The
    /// progress made by the walk is kept on both. Returns the number of
    /// frames.
    pub fn simulate<F>(&mut self, name: &str, mut on_frame: F) -> Result<usize>
    where
        F: FnMut(&Frame),
    {
        self.set_active_track(name)?;
        let source = self.map.active_track()?.snapshot();
        let max_segment = self.config.tracking.max_segment;
        let speed = Some(self.config.tracking.simulation_speed);
        let (width, height) = (self.config.display.width, self.config.display.height);

        let map = &self.map;
        let style = &self.config.style;
        let mut failure: Option<GpsError> = None;
        let mut walked: Option<Track> = None;
        let frames = self.signal.simulate(&source, max_segment, |step| {
            if step.index == step.total {
                walked = Some(step.route.snapshot());
            }
            if failure.is_some() {
                return;
            }
            let built = map.bounding_box(Some(step.position)).and_then(|bbox| {
                Frame::build(FrameInput {
                    tracks: map.tracks(),
                    waypoints: map.points(),
                    live: step.live,
                    route: Some(step.route),
                    bbox: &bbox,
                    device_width: width,
                    device_height: height,
                    speed,
                    style,
                })
            });
            match built {
                Ok(frame) => on_frame(&frame),
                Err(e) => failure = Some(e),
            }
        })?;

        if let Some(e) = failure {
            return Err(e);
        }
        if let Some(walked) = walked {
            self.map.active_track_mut()?.restore(walked.snapshot());
            self.signal.resume(walked);
        }
        info!(track = name, frames, "Simulation rendered");
        Ok(frames)
    }

    // -- Live tracking -----------------------------------------------------

    pub fn start_tracking(&self) -> Result<()> {
        self.signal.start_tracking()
    }

    pub fn stop_tracking(&self) {
        self.signal.stop_tracking()
    }
}

/// Live track slot for test waypoints named `me` or `me<N>`: `me<N>` goes to
/// index N-1, plain `me` (or `me0`) is appended.
fn signal_slot(name: &str) -> Option<Option<usize>> {
    let digits = name.strip_prefix("me")?;
    if digits.is_empty() {
        return Some(None);
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match digits.parse::<usize>() {
        Ok(0) => Some(None),
        Ok(n) => Some(Some(n - 1)),
        Err(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TRACKS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <wpt lat="52.0005" lon="4.0005"><name>bench</name></wpt>
  <trk><name>track 1</name><trkseg>
    <trkpt lat="52.0" lon="4.0"></trkpt>
    <trkpt lat="52.0004" lon="4.0"></trkpt>
    <trkpt lat="52.0004" lon="4.0006"></trkpt>
  </trkseg></trk>
</gpx>"#;

    const SIGNAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <wpt lat="52.0002" lon="4.0"><name>me2</name></wpt>
  <wpt lat="52.0" lon="4.0"><name>me1</name></wpt>
  <wpt lat="52.1" lon="4.1"><name>meadow</name></wpt>
</gpx>"#;

    const GPS_TRACK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><name>gps</name><trkseg>
    <trkpt lat="52.0" lon="4.0"></trkpt>
    <trkpt lat="52.001" lon="4.0"></trkpt>
  </trkseg></trk>
</gpx>"#;

    const SECOND_TRACK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><name>track 2</name><trkseg>
    <trkpt lat="52.05" lon="4.0"></trkpt>
    <trkpt lat="52.0504" lon="4.0"></trkpt>
    <trkpt lat="52.0504" lon="4.0006"></trkpt>
  </trkseg></trk>
</gpx>"#;

    fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_signal_slot() {
        assert_eq!(signal_slot("me"), Some(None));
        assert_eq!(signal_slot("me0"), Some(None));
        assert_eq!(signal_slot("me1"), Some(Some(0)));
        assert_eq!(signal_slot("me12"), Some(Some(11)));
        assert_eq!(signal_slot("meadow"), None);
        assert_eq!(signal_slot("home"), None);
    }

    #[test]
    fn test_load_routes_tracks_and_waypoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::default();
        session
            .load_file(&write(dir.path(), "t.gpx", TRACKS))
            .unwrap();
        session
            .load_file(&write(dir.path(), "s.gpx", SIGNAL))
            .unwrap();

        assert_eq!(session.map().tracks().len(), 1);
        let names: Vec<_> = session
            .map()
            .points()
            .iter()
            .map(|w| w.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["bench", "meadow"]);

        // me2 arrived first but me1 is inserted in front of it
        let live = session.signal().live_track();
        assert_eq!(live.len(), 2);
        assert_eq!(live.points()[0].latitude(), 52.0);
        assert_eq!(live.points()[1].latitude(), 52.0002);
    }

    #[test]
    fn test_gps_track_becomes_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::default();
        session
            .load_file(&write(dir.path(), "gps.gpx", GPS_TRACK))
            .unwrap();

        assert!(session.map().tracks().is_empty());
        let bearing = session.signal().current_bearing().unwrap();
        assert!(bearing.abs() < 1e-6, "got {bearing}");
    }

    #[test]
    fn test_load_folder() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.gpx", TRACKS);
        write(dir.path(), "b.gpx", GPS_TRACK);
        write(dir.path(), "readme.md", "# tracks");

        let mut session = Session::default();
        session.load_path(dir.path()).unwrap();
        assert_eq!(session.map().tracks().len(), 1);
        assert_eq!(session.signal().live_track().len(), 2);
    }

    #[test]
    fn test_unsupported_single_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "route.kml", "<kml/>");
        let mut session = Session::default();
        assert!(matches!(
            session.load_file(&path),
            Err(GpsError::ExtensionNotSupported { .. })
        ));
    }

    #[test]
    fn test_view_box_needs_position() {
        let session = Session::default();
        assert!(matches!(session.view_box(), Err(GpsError::NoPositionFound)));
        assert!(matches!(session.bounding_box(), Err(GpsError::NoMapContext)));
    }

    #[test]
    fn test_frame_and_view_box() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::default();
        session
            .load_file(&write(dir.path(), "t.gpx", TRACKS))
            .unwrap();
        session
            .load_file(&write(dir.path(), "s.gpx", SIGNAL))
            .unwrap();
        session.set_active_track("track 1").unwrap();

        let viewbox = session.view_box().unwrap();
        assert_eq!(viewbox.width, 264.0);
        assert_eq!(viewbox.height, 176.0);

        let frame = session.frame().unwrap();
        assert_eq!(frame.viewbox, viewbox);
        assert_eq!(frame.tracks.len(), 1);
        assert!(frame.tracks[0].active);
        assert_eq!(frame.waypoints.len(), 2);
        assert!(frame.rotation.is_some());

        // "meadow" stretches the map to 52.1/4.1, but the route stays near
        assert!(session.off_screen_indicator().unwrap().is_none());
    }

    #[test]
    fn test_set_active_track_unknown() {
        let mut session = Session::default();
        assert!(matches!(
            session.set_active_track("nope"),
            Err(GpsError::NoTrackFound(_))
        ));
        assert!(session.signal().route().is_none());
    }

    #[test]
    fn test_simulate_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::default();
        session
            .load_file(&write(dir.path(), "t.gpx", TRACKS))
            .unwrap();

        let mut frames = Vec::new();
        let count = session
            .simulate("track 1", |frame| frames.push(frame.clone()))
            .unwrap();

        assert_eq!(count, frames.len());
        assert!(count >= 5, "44m + 41m legs at 15m steps, got {count}");
        assert!(session.map().active_track().is_ok());
        for frame in &frames {
            assert_eq!(frame.position.speed, Some(5.0));
            assert!(frame.position.lead.is_some());
            assert!(frame.indicator.is_none());
        }
        let last = frames.last().unwrap();
        assert_eq!(last.tracks[0].passed, 3);
        // The signal's own live track is back to empty
        assert!(session.signal().live_track().is_empty());
    }

    #[test]
    fn test_simulate_switches_followed_route() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::default();
        session
            .load_file(&write(dir.path(), "t.gpx", TRACKS))
            .unwrap();
        session
            .load_file(&write(dir.path(), "t2.gpx", SECOND_TRACK))
            .unwrap();
        session.set_active_track("track 1").unwrap();

        session.simulate("track 2", |_| {}).unwrap();

        let route = session.signal().route().unwrap();
        assert_eq!(route.name(), "track 2");
        assert_eq!(route.passed_count(), 3, "walk progress is kept");
        let active = session.map().active_track().unwrap();
        assert_eq!(active.name(), "track 2");
        assert_eq!(active.passed_count(), 3);

        // Stand at the end of track 2, 5.5km away from track 1
        for lat in [52.0504, 52.05041] {
            session
                .signal()
                .inject(Coordinate::new(lat, 4.0006), None)
                .unwrap();
        }
        let frame = session.frame().unwrap();
        let active: Vec<_> = frame
            .tracks
            .iter()
            .filter(|t| t.active)
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(active, vec!["track 2"]);
        assert!(frame.indicator.is_none());
        assert!(session.off_screen_indicator().unwrap().is_none());
    }

    #[test]
    fn test_simulate_unknown_track() {
        let mut session = Session::default();
        assert!(matches!(
            session.simulate("nope", |_| {}),
            Err(GpsError::NoTrackFound(_))
        ));
    }
}
