//! inkgps-core: Track geometry, viewport math, and position tracking for
//! small e-ink GPS displays.
//!
//! The only I/O lives in `loader` (track files), `config` (the config file),
//! and `signal` (a gpsd reader thread). Rendering is left to the caller,
//! which receives plain `render::Frame` data.

pub mod config;
pub mod coordinate;
pub mod loader;
pub mod map;
pub mod render;
pub mod session;
pub mod signal;
pub mod track;
pub mod types;
pub mod viewbox;

// Re-export commonly used types at crate root
pub use config::Config;
pub use coordinate::Coordinate;
pub use loader::{LoadedFile, Loader, LoaderRegistry};
pub use map::{BoundingBox, Map, Waypoint};
pub use render::{Frame, Rotation, Style};
pub use session::Session;
pub use signal::{ConnectionState, Signal, SignalConfig, SimulationFrame};
pub use track::Track;
pub use types::*;
pub use viewbox::{IndicatorKind, OffScreenIndicator, ViewBox};
