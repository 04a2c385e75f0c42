//! inkgps: CLI for inspecting track files, replaying them, and live gpsd
//! tracking.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing::info;

use inkgps_core::config::{self, Config};
use inkgps_core::render::Frame;
use inkgps_core::session::Session;
use inkgps_core::track::Track;

mod logging;

#[derive(Parser)]
#[command(name = "inkgps", version, about = "E-ink GPS track viewer and tracker")]
struct Cli {
    /// Config file (default: ~/.inkgps/config.yaml)
    #[arg(long, global = true, env = "INKGPS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a track file or folder and list its tracks
    Info {
        /// File or folder (default: the configured track folder)
        path: Option<PathBuf>,
    },

    /// Replay a track as if it were a live GPS feed
    Simulate {
        /// File or folder containing the track
        path: PathBuf,

        /// Name of the track to replay
        #[arg(short, long)]
        track: String,

        /// Longest step between simulated positions, in meters
        #[arg(long)]
        max_segment: Option<f64>,

        /// Display width in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Display height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Print each frame as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Track live positions from gpsd
    Track {
        /// gpsd host
        #[arg(long)]
        host: Option<String>,

        /// gpsd port
        #[arg(long)]
        port: Option<u16>,

        /// File or folder with a route to follow
        #[arg(long, requires = "track")]
        route: Option<PathBuf>,

        /// Name of the route track
        #[arg(short, long, requires = "route")]
        track: Option<String>,

        /// Stop after this many seconds instead of waiting for Enter
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };

    match cli.command {
        Commands::Info { path } => cmd_info(config, path),
        Commands::Simulate {
            path,
            track,
            max_segment,
            width,
            height,
            json,
        } => {
            let mut config = config;
            if let Some(v) = max_segment {
                config.tracking.max_segment = v;
            }
            if let Some(v) = width {
                config.display.width = v;
            }
            if let Some(v) = height {
                config.display.height = v;
            }
            cmd_simulate(config, &path, &track, json)
        }
        Commands::Track {
            host,
            port,
            route,
            track,
            duration,
        } => {
            let mut config = config;
            if let Some(v) = host {
                config.gpsd.host = v;
            }
            if let Some(v) = port {
                config.gpsd.port = v;
            }
            let route = route.zip(track);
            cmd_track(config, route, duration)
        }
        Commands::Config { init } => cmd_config(config, cli.config, init),
    }
}

fn exit_with(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error {context}: {err}");
    std::process::exit(1);
}

fn load_session(config: Config, path: &Path) -> Session {
    let mut session = Session::new(config);
    if let Err(e) = session.load_path(path) {
        exit_with(&format!("loading {}", path.display()), e);
    }
    session
}

fn cmd_info(config: Config, path: Option<PathBuf>) {
    let path = path.unwrap_or_else(|| PathBuf::from(&config.track_folder));
    let session = load_session(config, &path);
    let map = session.map();
    let unit = map.unit();

    println!();
    println!("Source: {}", path.display());
    println!(
        "  {} tracks, {} waypoints",
        map.tracks().len(),
        map.points().len()
    );
    let live = session.signal().live_track();
    if !live.is_empty() {
        println!("  Signal: {} points", live.len());
    }
    println!();

    if map.tracks().is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Track".to_string(),
        "Points".to_string(),
        format!("Distance ({})", unit.label()),
        "Start".to_string(),
        "End".to_string(),
    ]);
    for track in map.tracks() {
        table.add_row(vec![
            Cell::new(track.name()),
            Cell::new(track.len()),
            Cell::new(format!("{:.2}", track.total_distance(unit))),
            Cell::new(endpoint_label(track.first())),
            Cell::new(endpoint_label(track.last())),
        ]);
    }
    println!("{table}");
}

fn endpoint_label(point: Option<&inkgps_core::Coordinate>) -> String {
    point
        .map(|p| format!("{:.5}, {:.5}", p.latitude(), p.longitude()))
        .unwrap_or("-".into())
}

fn cmd_simulate(config: Config, path: &Path, track: &str, json: bool) {
    let mut session = load_session(config, path);
    let unit = session.map().unit();

    let result = session.simulate(track, |frame| {
        if json {
            match serde_json::to_string(frame) {
                Ok(line) => println!("{line}"),
                Err(e) => exit_with("encoding frame", e),
            }
        } else {
            println!("{}", describe_frame(frame, unit.label()));
        }
    });

    match result {
        Ok(frames) => info!(frames, "Simulation complete"),
        Err(e) => exit_with(&format!("simulating '{track}'"), e),
    }
}

fn describe_frame(frame: &Frame, unit_label: &str) -> String {
    let pos = &frame.position;
    let mut line = format!(
        "viewBox=\"{}\" pos=({:.1}, {:.1}) bearing={}",
        frame.viewbox,
        pos.x,
        pos.y,
        pos.bearing
            .map(|b| format!("{b:.1}"))
            .unwrap_or("-".into()),
    );
    if let Some(route) = frame.tracks.iter().find(|t| t.active) {
        line.push_str(&format!(" passed={}/{}", route.passed, route.points.len()));
    }
    if let Some(ind) = &frame.indicator {
        line.push_str(&format!(
            " off-screen: heading={:.0} distance={:.1}{} ({:?})",
            ind.heading, ind.distance, unit_label, ind.kind
        ));
    }
    line
}

fn cmd_track(config: Config, route: Option<(PathBuf, String)>, duration: Option<u64>) {
    let mut session = match &route {
        Some((path, _)) => load_session(config, path),
        None => Session::new(config),
    };
    if let Some((_, name)) = &route {
        if let Err(e) = session.set_active_track(name) {
            exit_with("selecting route", e);
        }
    }

    session.signal().on_update(print_update);

    if let Err(e) = session.start_tracking() {
        exit_with("starting gpsd tracking", e);
    }

    match duration {
        Some(secs) => std::thread::sleep(Duration::from_secs(secs)),
        None => {
            eprintln!("Tracking, press Enter to stop");
            let mut line = String::new();
            if let Err(e) = io::stdin().lock().read_line(&mut line) {
                eprintln!("Error reading stdin: {e}");
            }
        }
    }
    session.stop_tracking();

    let live = session.signal().live_track();
    let unit = session.map().unit();
    println!();
    println!("Tracking stopped");
    println!(
        "  {} positions, {:.2} {}",
        live.len(),
        live.total_distance(unit),
        unit.label()
    );
    if let Some(route) = session.signal().route() {
        println!(
            "  Route '{}': {}/{} points passed",
            route.name(),
            route.passed_count(),
            route.len()
        );
    }
}

fn print_update(track: &Track) {
    let points = track.points();
    let (Some(prev), Some(last)) = (points.len().checked_sub(2).map(|i| &points[i]), track.last())
    else {
        return;
    };
    println!(
        "{:.6}, {:.6}  bearing {:.1}  speed {}",
        last.latitude(),
        last.longitude(),
        prev.bearing_to(last),
        last.speed
            .map(|s| format!("{s:.1} m/s"))
            .unwrap_or("-".into()),
    );
}

fn cmd_config(config: Config, path: Option<PathBuf>, init: bool) {
    if init {
        let path = path.unwrap_or_else(config::config_file);
        if path.exists() {
            eprintln!("Config file already exists: {}", path.display());
            std::process::exit(1);
        }
        if let Err(e) = config::save_config_to(&Config::default(), &path) {
            exit_with(&format!("writing {}", path.display()), e);
        }
        println!("Wrote {}", path.display());
        return;
    }

    print!("{}", config::serialize_config(&config));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "inkgps",
            "simulate",
            "tracks/",
            "--track",
            "loop",
            "--max-segment",
            "20",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate {
                path,
                track,
                max_segment,
                json,
                ..
            } => {
                assert_eq!(path, PathBuf::from("tracks/"));
                assert_eq!(track, "loop");
                assert_eq!(max_segment, Some(20.0));
                assert!(json);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_track_route_requires_name() {
        assert!(Cli::try_parse_from(["inkgps", "track", "--route", "r.gpx"]).is_err());
        assert!(
            Cli::try_parse_from(["inkgps", "track", "--route", "r.gpx", "--track", "r"]).is_ok()
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["inkgps", "config", "--verbose", "--config", "x.yaml"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
    }

    #[test]
    fn test_print_update_ignores_single_point() {
        let track = Track::new("gps", vec![inkgps_core::Coordinate::new(52.0, 5.0)]);
        print_update(&track);
    }
}
