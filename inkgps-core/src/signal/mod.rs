//! Position source: live gpsd tracking or scripted replay of a track.
//!
//! Connection states run `Idle → Connecting → Streaming`, with
//! `Streaming ⇄ Reconnecting` on transient I/O failures. Simulation is an
//! orthogonal mode that parks the live track on the history stack, walks a
//! subdivided copy of a route, and restores the parked track when done.
//!
//! All mutation of the live track and of the dedupe state (`last_fix`,
//! satellites) happens under one mutex. During streaming the background
//! reader is its only writer; during simulation the caller's thread is.

pub mod gpsd;
mod worker;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::coordinate::Coordinate;
use crate::map::BoundingBox;
use crate::render::Rotation;
use crate::track::Track;
use crate::types::{GpsError, Result};
use gpsd::{Fix, SatelliteCount};
use worker::{Worker, WorkerContext};

/// Name of the track holding live or simulated positions.
pub const LIVE_TRACK_NAME: &str = "gps";

/// Callback invoked with the live track after each accepted fix.
pub type UpdateCallback = Arc<dyn Fn(&Track) + Send + Sync>;

type UpdateSlot = Arc<Mutex<Option<UpdateCallback>>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Thresholds and endpoints for a `Signal`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub host: String,
    pub port: u16,
    /// Fixes at or below this speed (m/s) are treated as stationary jitter.
    pub min_speed: f64,
    /// Distance (m) at which the next route point counts as passed.
    pub pass_threshold: f64,
    /// Distance (m) of the synthetic second point seeded by a simulation.
    pub lead_distance: f64,
    /// Speed (m/s) reported while simulating.
    pub simulation_speed: f64,
    pub read_timeout: Duration,
    pub reconnect_delay: Duration,
    /// How long `stop_tracking` waits before closing the socket under the reader.
    pub stop_timeout: Duration,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            host: "127.0.0.1".to_string(),
            port: gpsd::DEFAULT_PORT,
            min_speed: 0.5,
            pass_threshold: 10.0,
            lead_distance: 5.0,
            simulation_speed: 5.0,
            read_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_millis(2000),
            stop_timeout: Duration::from_millis(3000),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub(crate) struct SignalState {
    live_track: Track,
    history: Vec<Track>,
    /// Route whose points are marked passed as live fixes arrive.
    route: Option<Track>,
    last_fix: Option<Fix>,
    satellites: SatelliteCount,
    connection: ConnectionState,
    simulating: bool,
    synthetic_speed: Option<f64>,
}

impl Default for SignalState {
    fn default() -> Self {
        SignalState {
            live_track: Track::new(LIVE_TRACK_NAME, Vec::new()),
            history: Vec::new(),
            route: None,
            last_fix: None,
            satellites: SatelliteCount::default(),
            connection: ConnectionState::Idle,
            simulating: false,
            synthetic_speed: None,
        }
    }
}

impl SignalState {
    /// Append an accepted fix and advance route progress.
    pub(crate) fn accept_fix(&mut self, fix: Fix, pass_threshold: f64) {
        let point = fix.to_coordinate();
        if let Some(route) = self.route.as_mut() {
            if let Some(index) = route.mark_progress(&point, pass_threshold) {
                debug!(index, route = route.name(), "Route point passed");
            }
        }
        self.live_track.append(point, None);
        self.last_fix = Some(fix);
    }

    /// Park the live track on the history stack and start an empty one.
    fn push_history(&mut self) {
        let parked = std::mem::replace(
            &mut self.live_track,
            Track::new(LIVE_TRACK_NAME, Vec::new()),
        );
        self.history.push(parked);
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.simulating {
            return Err(GpsError::Busy("simulation in progress"));
        }
        if self.connection != ConnectionState::Idle {
            return Err(GpsError::Busy("live tracking in progress"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Simulation frame
// ---------------------------------------------------------------------------

/// One step of a simulated walk, handed to the frame callback.
#[derive(Debug, Clone, Copy)]
pub struct SimulationFrame<'a> {
    /// 1-based frame number.
    pub index: usize,
    pub total: usize,
    pub position: &'a Coordinate,
    pub bearing: f64,
    /// Simulated live track so far.
    pub live: &'a Track,
    /// Route being walked, with progress marked.
    pub route: &'a Track,
}

/// Restores the parked live track even if a frame callback panics.
struct SimulationGuard<'a> {
    state: &'a Mutex<SignalState>,
}

impl Drop for SimulationGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        if let Some(parked) = state.history.pop() {
            state.live_track = parked;
        }
        state.simulating = false;
        state.synthetic_speed = None;
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

pub struct Signal {
    config: SignalConfig,
    state: Arc<Mutex<SignalState>>,
    on_update: UpdateSlot,
    worker: Mutex<Option<Worker>>,
}

impl Default for Signal {
    fn default() -> Self {
        Signal::new(SignalConfig::default())
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("config", &self.config)
            .field("state", &*lock(&self.state))
            .finish_non_exhaustive()
    }
}

impl Signal {
    pub fn new(config: SignalConfig) -> Self {
        Signal {
            config,
            state: Arc::new(Mutex::new(SignalState::default())),
            on_update: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, SignalState> {
        lock(&self.state)
    }

    // -- Live track management ---------------------------------------------

    /// Replace the live track's points with those of `track`.
    pub fn set_track(&self, track: Track) -> Result<()> {
        let mut state = self.state();
        state.ensure_idle()?;
        state.live_track.set_points(track.points().to_vec());
        state.last_fix = None;
        Ok(())
    }

    /// Insert a point into the live track (at the tail when `at` is `None`).
    pub fn inject(&self, point: Coordinate, at: Option<usize>) -> Result<()> {
        let mut state = self.state();
        state.ensure_idle()?;
        state.live_track.append(point, at);
        Ok(())
    }

    /// Park the live track on the history stack and start an empty one.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state();
        state.ensure_idle()?;
        state.push_history();
        state.last_fix = None;
        Ok(())
    }

    /// Bring back the most recently parked live track. `false` when the
    /// history is empty.
    pub fn restore(&self) -> Result<bool> {
        let mut state = self.state();
        state.ensure_idle()?;
        match state.history.pop() {
            Some(parked) => {
                state.live_track = parked;
                state.last_fix = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn history_len(&self) -> usize {
        self.state().history.len()
    }

    /// Set the route that live fixes mark progress against. Its progress is
    /// reset.
    pub fn follow(&self, route: Option<Track>) {
        let mut state = self.state();
        state.route = route.map(|mut r| {
            r.reset_progress();
            r
        });
    }

    /// Follow `route` keeping the progress already marked on it, such as a
    /// route walked by `simulate`.
    pub fn resume(&self, route: Track) {
        self.state().route = Some(route);
    }

    /// Copy of the followed route with its current progress.
    pub fn route(&self) -> Option<Track> {
        self.state().route.clone()
    }

    /// Copy of the live track.
    pub fn live_track(&self) -> Track {
        self.state().live_track.snapshot()
    }

    /// Register the callback fired after each accepted live fix once the
    /// live track holds at least two points.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&Track) + Send + Sync + 'static,
    {
        *lock(&self.on_update) = Some(Arc::new(callback));
    }

    // -- Queries -----------------------------------------------------------

    /// Last point of the live track.
    pub fn current_position(&self) -> Result<Coordinate> {
        self.state()
            .live_track
            .last()
            .cloned()
            .ok_or(GpsError::NoPositionFound)
    }

    /// Bearing between the last two live points.
    pub fn current_bearing(&self) -> Result<f64> {
        bearing_of(&self.state().live_track)
    }

    /// Speed of the last accepted fix, or the synthetic speed while simulating.
    pub fn speed(&self) -> Option<f64> {
        let state = self.state();
        if state.simulating {
            state.synthetic_speed
        } else {
            state.last_fix.as_ref().and_then(|f| f.speed)
        }
    }

    /// Meters covered in `seconds` at the current speed.
    pub fn distance_after(&self, seconds: f64) -> f64 {
        self.speed().unwrap_or(0.0) * seconds
    }

    pub fn satellites(&self) -> SatelliteCount {
        self.state().satellites
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state().connection
    }

    pub fn is_simulating(&self) -> bool {
        self.state().simulating
    }

    /// Map rotation that puts the direction of travel up, pivoting on the
    /// current position.
    pub fn rotation(&self, bbox: &BoundingBox) -> Result<Rotation> {
        let state = self.state();
        let bearing = bearing_of(&state.live_track)?;
        let position = state.live_track.last().ok_or(GpsError::NoPositionFound)?;
        Ok(Rotation::new(
            bearing,
            position.display_x(bbox),
            position.display_y(bbox),
        ))
    }

    // -- Live tracking -----------------------------------------------------

    /// Connect to gpsd and start the background reader.
    ///
    /// The current live track is parked on the history stack. Fails with
    /// `Busy` while simulating or already tracking, and with `Connection`
    /// when gpsd cannot be reached.
    pub fn start_tracking(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Err(GpsError::Busy("live tracking in progress"));
        }
        {
            let mut state = self.state();
            state.ensure_idle()?;
            state.connection = ConnectionState::Connecting;
        }

        info!(host = %self.config.host, port = self.config.port, "Connecting to gpsd");
        let stream = match worker::connect(&self.config.host, self.config.port) {
            Ok(stream) => stream,
            Err(e) => {
                self.state().connection = ConnectionState::Idle;
                return Err(e);
            }
        };

        {
            let mut state = self.state();
            state.push_history();
            state.last_fix = None;
            state.satellites = SatelliteCount::default();
        }

        let ctx = WorkerContext {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            on_update: Arc::clone(&self.on_update),
        };
        match Worker::spawn(ctx, stream) {
            Ok(w) => {
                *worker = Some(w);
                Ok(())
            }
            Err(e) => {
                self.state().connection = ConnectionState::Idle;
                Err(e)
            }
        }
    }

    /// Stop the background reader and disconnect.
    ///
    /// Once this returns, the reader makes no further changes to the live
    /// track. A no-op when not tracking.
    pub fn stop_tracking(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        worker.request_stop();
        // The reader applies fixes under the state lock and checks the stop
        // flag first, so once we hold the lock no later fix can land.
        drop(self.state());

        if worker.join(self.config.stop_timeout) {
            info!("gpsd tracking stopped");
        }
        self.state().connection = ConnectionState::Idle;
    }

    pub fn is_tracking(&self) -> bool {
        lock(&self.worker).is_some()
    }

    // -- Simulation --------------------------------------------------------

    /// Replay `source` as if it were a live feed.
    ///
    /// The live track is parked, the route is subdivided so no step exceeds
    /// `max_segment_m`, and the walk is seeded with the first point plus a
    /// lead point `lead_distance` meters along the initial bearing. Every
    /// further subdivided point is appended and reported through `on_frame`.
    /// The parked live track is restored afterwards. Returns the number of
    /// frames emitted.
    pub fn simulate<F>(&self, source: &Track, max_segment_m: f64, mut on_frame: F) -> Result<usize>
    where
        F: FnMut(SimulationFrame<'_>),
    {
        if source.len() < 2 {
            return Err(GpsError::NotEnoughPoints {
                needed: 2,
                actual: source.len(),
            });
        }
        if lock(&self.worker).is_some() {
            return Err(GpsError::Busy("live tracking in progress"));
        }

        let speed = self.config.simulation_speed;
        {
            let mut state = self.state();
            state.ensure_idle()?;
            state.push_history();
            state.simulating = true;
            state.synthetic_speed = Some(speed);
        }
        let _guard = SimulationGuard { state: &self.state };

        let mut route = source.snapshot();
        route.reset_progress();
        let points = route.subdivide(max_segment_m);
        let total = points.len() - 1;
        info!(
            track = source.name(),
            points = source.len(),
            frames = total,
            max_segment_m,
            "Simulation started"
        );

        let start = points[0].clone().with_speed(speed);
        let lead = start
            .endpoint(start.bearing_to(&points[1]), self.config.lead_distance)
            .with_speed(speed);
        let mut live = Track::new(LIVE_TRACK_NAME, Vec::with_capacity(points.len() + 1));
        route.mark_progress(&start, self.config.pass_threshold);
        for seed in [start, lead] {
            self.state().live_track.append(seed.clone(), None);
            live.append(seed, None);
        }

        for (i, point) in points.into_iter().skip(1).enumerate() {
            let point = point.with_speed(speed);
            route.mark_progress(&point, self.config.pass_threshold);
            self.state().live_track.append(point.clone(), None);
            live.append(point, None);

            let bearing = bearing_of(&live)?;
            let position = live.last().ok_or(GpsError::NoPositionFound)?;
            on_frame(SimulationFrame {
                index: i + 1,
                total,
                position,
                bearing,
                live: &live,
                route: &route,
            });
        }

        info!(
            track = source.name(),
            frames = total,
            passed = route.passed_count(),
            "Simulation finished"
        );
        Ok(total)
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        self.stop_tracking();
    }
}

fn bearing_of(track: &Track) -> Result<f64> {
    match track.points() {
        [.., a, b] => Ok(a.bearing_to(b)),
        points => Err(GpsError::NotEnoughPoints {
            needed: 2,
            actual: points.len(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
