//! Configuration file management for inkgps.
//!
//! Reads/writes `~/.inkgps/config.yaml` with the gpsd endpoint, display
//! size, tracking thresholds, line styles, distance unit, and track folder.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::render::{DashPattern, Style};
use crate::signal::{gpsd, SignalConfig};
use crate::types::{GpsError, Unit};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub gpsd: GpsdConfig,
    pub display: DisplayConfig,
    pub tracking: TrackingConfig,
    pub style: Style,
    pub units: Unit,
    pub track_folder: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpsdConfig {
    pub host: String,
    pub port: u16,
}

/// Panel size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingConfig {
    /// m/s; slower fixes are dropped as jitter.
    pub min_speed: f64,
    /// m; distance at which a route point counts as passed.
    pub pass_threshold: f64,
    /// m; longest step of a simulated walk.
    pub max_segment: f64,
    /// m/s
    pub simulation_speed: f64,
    /// m
    pub lead_distance: f64,
    pub read_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gpsd: GpsdConfig {
                host: "127.0.0.1".into(),
                port: gpsd::DEFAULT_PORT,
            },
            display: DisplayConfig {
                width: 264,
                height: 176,
            },
            tracking: TrackingConfig {
                min_speed: 0.5,
                pass_threshold: 10.0,
                max_segment: 15.0,
                simulation_speed: 5.0,
                lead_distance: 5.0,
                read_timeout_ms: 500,
                reconnect_delay_ms: 2000,
                stop_timeout_ms: 3000,
            },
            style: Style::default(),
            units: Unit::Meters,
            track_folder: "./tracks/".into(),
        }
    }
}

impl Config {
    /// Settings for a `Signal`.
    pub fn signal_config(&self) -> SignalConfig {
        SignalConfig {
            host: self.gpsd.host.clone(),
            port: self.gpsd.port,
            min_speed: self.tracking.min_speed,
            pass_threshold: self.tracking.pass_threshold,
            lead_distance: self.tracking.lead_distance,
            simulation_speed: self.tracking.simulation_speed,
            read_timeout: Duration::from_millis(self.tracking.read_timeout_ms),
            reconnect_delay: Duration::from_millis(self.tracking.reconnect_delay_ms),
            stop_timeout: Duration::from_millis(self.tracking.stop_timeout_ms),
        }
    }
}

/// Get the config directory path (`~/.inkgps/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".inkgps")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.inkgps/config.yaml`.
///
/// Returns default config if file doesn't exist.
pub fn load_config() -> Config {
    load_config_from(&config_file())
}

/// Load config from `path`, falling back to defaults when it is missing or
/// unreadable.
pub fn load_config_from(path: &Path) -> Config {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable config file, using defaults");
            Config::default()
        }
    }
}

/// Save config to `~/.inkgps/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, GpsError> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), GpsError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| GpsError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| GpsError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys are ignored and invalid
/// values keep their defaults.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            if val.is_empty() {
                current_section = Some(key.to_string());
                continue;
            }
            current_section = None;
            match key {
                "units" => match parse_string_value(val).map(|v| v.parse::<Unit>()) {
                    Some(Ok(unit)) => config.units = unit,
                    Some(Err(e)) => warn!(error = %e, "Ignoring config value"),
                    None => {}
                },
                "track_folder" => {
                    if let Some(v) = parse_string_value(val) {
                        config.track_folder = v;
                    }
                }
                _ => debug!(key, "Unknown config key"),
            }
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };
        match (section, key) {
            ("gpsd", "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.gpsd.host = v;
                }
            }
            ("gpsd", "port") => set_parsed(&mut config.gpsd.port, key, val),
            ("display", "width") => set_pixels(&mut config.display.width, key, val),
            ("display", "height") => set_pixels(&mut config.display.height, key, val),
            ("tracking", "min_speed") => set_float(&mut config.tracking.min_speed, key, val),
            ("tracking", "pass_threshold") => {
                set_float(&mut config.tracking.pass_threshold, key, val)
            }
            ("tracking", "max_segment") => {
                set_positive(&mut config.tracking.max_segment, key, val)
            }
            ("tracking", "simulation_speed") => {
                set_float(&mut config.tracking.simulation_speed, key, val)
            }
            ("tracking", "lead_distance") => {
                set_float(&mut config.tracking.lead_distance, key, val)
            }
            ("tracking", "read_timeout_ms") => {
                set_millis(&mut config.tracking.read_timeout_ms, key, val)
            }
            ("tracking", "reconnect_delay_ms") => {
                set_millis(&mut config.tracking.reconnect_delay_ms, key, val)
            }
            ("tracking", "stop_timeout_ms") => {
                set_millis(&mut config.tracking.stop_timeout_ms, key, val)
            }
            ("style", "active_track_dash") => set_dash(&mut config.style.active_track_dash, val),
            ("style", "direction_dash") => set_dash(&mut config.style.direction_dash, val),
            ("style", "signal_dash") => set_dash(&mut config.style.signal_dash, val),
            ("style", "position_dash") => set_dash(&mut config.style.position_dash, val),
            ("style", "indicator_degree_offset") => {
                set_float(&mut config.style.indicator_degree_offset, key, val)
            }
            ("style", "lead_seconds") => set_float(&mut config.style.lead_seconds, key, val),
            ("style", "marker_radius") => {
                set_positive(&mut config.style.marker_radius, key, val)
            }
            _ => debug!(section, key, "Unknown config key"),
        }
    }

    config
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

fn set_parsed<T: std::str::FromStr>(target: &mut T, key: &str, val: &str) {
    match val.parse() {
        Ok(v) => *target = v,
        Err(_) => warn!(key, value = val, "Ignoring invalid config value"),
    }
}

/// Non-negative finite floats only.
fn set_float(target: &mut f64, key: &str, val: &str) {
    match parse_float_value(val) {
        Some(v) if v.is_finite() && v >= 0.0 => *target = v,
        _ => warn!(key, value = val, "Ignoring invalid config value"),
    }
}

/// Strictly positive finite floats only.
fn set_positive(target: &mut f64, key: &str, val: &str) {
    match parse_float_value(val) {
        Some(v) if v.is_finite() && v > 0.0 => *target = v,
        _ => warn!(key, value = val, "Ignoring invalid config value"),
    }
}

fn set_pixels(target: &mut u32, key: &str, val: &str) {
    match val.parse::<u32>() {
        Ok(v) if v > 0 => *target = v,
        _ => warn!(key, value = val, "Ignoring invalid config value"),
    }
}

/// Durations must be at least one millisecond.
fn set_millis(target: &mut u64, key: &str, val: &str) {
    match val.parse::<u64>() {
        Ok(v) if v > 0 => *target = v,
        _ => warn!(key, value = val, "Ignoring invalid config value"),
    }
}

fn set_dash(target: &mut DashPattern, val: &str) {
    let text = parse_string_value(val).unwrap_or_default();
    match text.parse() {
        Ok(dash) => *target = dash,
        Err(e) => warn!(error = %e, "Ignoring config value"),
    }
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# inkgps configuration".to_string(), String::new()];

    lines.push("gpsd:".into());
    lines.push(format!("  host: \"{}\"", config.gpsd.host));
    lines.push(format!("  port: {}", config.gpsd.port));
    lines.push(String::new());

    lines.push("display:".into());
    lines.push(format!("  width: {}", config.display.width));
    lines.push(format!("  height: {}", config.display.height));
    lines.push(String::new());

    let t = &config.tracking;
    lines.push("tracking:".into());
    lines.push(format!("  min_speed: {}", t.min_speed));
    lines.push(format!("  pass_threshold: {}", t.pass_threshold));
    lines.push(format!("  max_segment: {}", t.max_segment));
    lines.push(format!("  simulation_speed: {}", t.simulation_speed));
    lines.push(format!("  lead_distance: {}", t.lead_distance));
    lines.push(format!("  read_timeout_ms: {}", t.read_timeout_ms));
    lines.push(format!("  reconnect_delay_ms: {}", t.reconnect_delay_ms));
    lines.push(format!("  stop_timeout_ms: {}", t.stop_timeout_ms));
    lines.push(String::new());

    let s = &config.style;
    lines.push("style:".into());
    lines.push(format!("  active_track_dash: \"{}\"", s.active_track_dash));
    lines.push(format!("  direction_dash: \"{}\"", s.direction_dash));
    lines.push(format!("  signal_dash: \"{}\"", s.signal_dash));
    lines.push(format!("  position_dash: \"{}\"", s.position_dash));
    lines.push(format!("  indicator_degree_offset: {}", s.indicator_degree_offset));
    lines.push(format!("  lead_seconds: {}", s.lead_seconds));
    lines.push(format!("  marker_radius: {}", s.marker_radius));
    lines.push(String::new());

    lines.push(format!("units: {}", config.units));
    lines.push(format!("track_folder: \"{}\"", config.track_folder));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
