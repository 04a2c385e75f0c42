//! GPX 1.0/1.1 loader.
//!
//! `<wpt>` elements become waypoints. Every `<trk>` becomes one track with
//! its segments concatenated, and every `<rte>` becomes a track as well.
//! Unnamed tracks are called "unknown".

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, Utc};

use super::{LoadedFile, Loader};
use crate::coordinate::Coordinate;
use crate::map::Waypoint;
use crate::track::Track;
use crate::types::{GpsError, Result};

const UNNAMED_TRACK: &str = "unknown";

#[derive(Debug, Clone, Copy, Default)]
pub struct GpxLoader;

impl GpxLoader {
    /// Parse a GPX document from any reader.
    pub fn parse<R: Read>(&self, reader: R) -> Result<LoadedFile> {
        let doc = ::gpx::read(reader).map_err(|e| GpsError::Gpx(e.to_string()))?;

        let waypoints = doc
            .waypoints
            .iter()
            .map(|wpt| {
                Ok(Waypoint {
                    coordinate: to_coordinate(wpt)?,
                    name: wpt.name.clone(),
                    symbol: wpt.symbol.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut tracks = Vec::with_capacity(doc.tracks.len() + doc.routes.len());
        for trk in &doc.tracks {
            let points = trk
                .segments
                .iter()
                .flat_map(|seg| seg.points.iter())
                .map(to_coordinate)
                .collect::<Result<Vec<_>>>()?;
            tracks.push(Track::new(track_name(&trk.name), points));
        }
        for rte in &doc.routes {
            let points = rte
                .points
                .iter()
                .map(to_coordinate)
                .collect::<Result<Vec<_>>>()?;
            tracks.push(Track::new(track_name(&rte.name), points));
        }

        Ok(LoadedFile {
            source: Default::default(),
            waypoints,
            tracks,
        })
    }
}

impl Loader for GpxLoader {
    fn load(&self, path: &Path) -> Result<LoadedFile> {
        let file = File::open(path)?;
        let mut loaded = self.parse(BufReader::new(file))?;
        loaded.source = path.to_path_buf();
        Ok(loaded)
    }
}

fn track_name(name: &Option<String>) -> String {
    match name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => UNNAMED_TRACK.to_string(),
    }
}

fn to_coordinate(wpt: &::gpx::Waypoint) -> Result<Coordinate> {
    let point = wpt.point();
    let mut coordinate = Coordinate::new(point.y(), point.x());
    coordinate.altitude = wpt.elevation;
    coordinate.speed = wpt.speed;
    if let Some(time) = &wpt.time {
        let iso = time.format().map_err(|e| GpsError::Gpx(e.to_string()))?;
        let utc = DateTime::parse_from_rfc3339(&iso)
            .map_err(|e| GpsError::Gpx(e.to_string()))?
            .with_timezone(&Utc);
        coordinate.timestamp = Some(utc);
    }
    Ok(coordinate)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
