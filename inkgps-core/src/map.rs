//! Track and point-of-interest collection with a lazily cached bounding box.
//!
//! The bounding box covers the active track (all tracks when none is active),
//! every point of interest, and the current position. It is cached per
//! position and dropped whenever tracks, points, or the active selection
//! change.

use std::sync::RwLock;

use serde::Serialize;

use crate::coordinate::{Coordinate, EARTH_MEAN_RADIUS_M, PROJECTION_RADIUS_M};
use crate::track::Track;
use crate::types::{GpsError, Result, Unit};

// ---------------------------------------------------------------------------
// Points of interest
// ---------------------------------------------------------------------------

/// A named point of interest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Waypoint {
    pub coordinate: Coordinate,
    pub name: Option<String>,
    /// Symbol/icon name as given by the source file.
    pub symbol: Option<String>,
}

impl Waypoint {
    pub fn new(coordinate: Coordinate, name: Option<String>) -> Self {
        Waypoint {
            coordinate,
            name,
            symbol: None,
        }
    }
}

impl From<Coordinate> for Waypoint {
    fn from(coordinate: Coordinate) -> Self {
        Waypoint::new(coordinate, None)
    }
}

// ---------------------------------------------------------------------------
// Bounding box
// ---------------------------------------------------------------------------

/// Geographic and projected extent of the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    /// East-west extent along the southern edge, in `unit`.
    pub real_width: f64,
    /// North-south extent along the western edge, in `unit`.
    pub real_height: f64,
    pub unit: Unit,
}

impl BoundingBox {
    /// Smallest box containing all `points`. `None` when empty.
    pub fn from_points<'a, I>(points: I, unit: Unit) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Coordinate>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut b = BoundingBox {
            min_lat: first.latitude(),
            max_lat: first.latitude(),
            min_lon: first.longitude(),
            max_lon: first.longitude(),
            min_x: first.x(),
            max_x: first.x(),
            min_y: first.y(),
            max_y: first.y(),
            real_width: 0.0,
            real_height: 0.0,
            unit,
        };
        for p in iter {
            b.min_lat = b.min_lat.min(p.latitude());
            b.max_lat = b.max_lat.max(p.latitude());
            b.min_lon = b.min_lon.min(p.longitude());
            b.max_lon = b.max_lon.max(p.longitude());
            b.min_x = b.min_x.min(p.x());
            b.max_x = b.max_x.max(p.x());
            b.min_y = b.min_y.min(p.y());
            b.max_y = b.max_y.max(p.y());
        }

        let south_west = Coordinate::new(b.min_lat, b.min_lon);
        let south_east = Coordinate::new(b.min_lat, b.max_lon);
        let north_west = Coordinate::new(b.max_lat, b.min_lon);
        b.real_width = south_west.distance_to(&south_east, unit);
        b.real_height = south_west.distance_to(&north_west, unit);
        Some(b)
    }

    /// Width in projected units (pixels at 1 px per projected meter).
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in projected units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Ground meters per projected unit along x.
    pub fn meters_per_unit_x(&self) -> f64 {
        if self.width() > 0.0 && self.real_width > 0.0 {
            self.unit.to_meters(self.real_width) / self.width()
        } else {
            self.mercator_scale()
        }
    }

    /// Ground meters per projected unit along y.
    pub fn meters_per_unit_y(&self) -> f64 {
        if self.height() > 0.0 && self.real_height > 0.0 {
            self.unit.to_meters(self.real_height) / self.height()
        } else {
            self.mercator_scale()
        }
    }

    /// Local Mercator scale for boxes with no extent on an axis.
    fn mercator_scale(&self) -> f64 {
        let lat = ((self.min_lat + self.max_lat) / 2.0).to_radians();
        lat.cos() * EARTH_MEAN_RADIUS_M / PROJECTION_RADIUS_M
    }

    /// True if `point` lies inside the geographic extent.
    pub fn contains(&self, point: &Coordinate) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.latitude())
            && (self.min_lon..=self.max_lon).contains(&point.longitude())
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CachedBox {
    position: Option<(f64, f64)>,
    bbox: BoundingBox,
}

/// All loaded tracks and points of interest.
#[derive(Debug, Default)]
pub struct Map {
    tracks: Vec<Track>,
    points: Vec<Waypoint>,
    unit: Unit,
    cached_bbox: RwLock<Option<CachedBox>>,
}

impl Map {
    pub fn new(unit: Unit) -> Self {
        Map {
            unit,
            ..Default::default()
        }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn set_unit(&mut self, unit: Unit) {
        self.unit = unit;
        self.invalidate_bbox();
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn points(&self) -> &[Waypoint] {
        &self.points
    }

    pub fn add_track(&mut self, track: Track) {
        self.tracks.push(track);
        self.invalidate_bbox();
    }

    pub fn add_point(&mut self, point: impl Into<Waypoint>) {
        self.points.push(point.into());
        self.invalidate_bbox();
    }

    /// Remove all tracks and points.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.points.clear();
        self.invalidate_bbox();
    }

    /// First track named `name`.
    pub fn track(&self, name: &str) -> Result<&Track> {
        self.tracks
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| GpsError::NoTrackFound(name.to_string()))
    }

    /// Mutable access to the first track named `name`.
    pub fn track_mut(&mut self, name: &str) -> Result<&mut Track> {
        self.invalidate_bbox();
        self.tracks
            .iter_mut()
            .find(|t| t.name() == name)
            .ok_or_else(|| GpsError::NoTrackFound(name.to_string()))
    }

    /// Make the first track named `name` the only active track.
    pub fn set_active_track(&mut self, name: &str) -> Result<()> {
        let index = self
            .tracks
            .iter()
            .position(|t| t.name() == name)
            .ok_or_else(|| GpsError::NoTrackFound(name.to_string()))?;
        for (i, track) in self.tracks.iter_mut().enumerate() {
            track.set_active(i == index);
        }
        self.invalidate_bbox();
        Ok(())
    }

    pub fn active_track(&self) -> Result<&Track> {
        self.tracks
            .iter()
            .find(|t| t.is_active())
            .ok_or(GpsError::NoActiveTrackFound)
    }

    pub fn active_track_mut(&mut self) -> Result<&mut Track> {
        self.invalidate_bbox();
        self.tracks
            .iter_mut()
            .find(|t| t.is_active())
            .ok_or(GpsError::NoActiveTrackFound)
    }

    /// Drop the cached bounding box.
    pub fn invalidate_bbox(&self) {
        let mut cache = self
            .cached_bbox
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cache = None;
    }

    /// Bounding box over the active track, points of interest, and
    /// `current_position`.
    ///
    /// Fails with `NoMapContext` when there is nothing to bound.
    pub fn bounding_box(&self, current_position: Option<&Coordinate>) -> Result<BoundingBox> {
        let key = current_position.map(|p| (p.latitude(), p.longitude()));
        {
            let cache = self
                .cached_bbox
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(cached) = cache.as_ref() {
                if cached.position == key {
                    return Ok(cached.bbox);
                }
            }
        }

        let bbox = self.compute_bbox(current_position)?;
        let mut cache = self
            .cached_bbox
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cache = Some(CachedBox {
            position: key,
            bbox,
        });
        Ok(bbox)
    }

    fn compute_bbox(&self, current_position: Option<&Coordinate>) -> Result<BoundingBox> {
        let track_points: Vec<&Coordinate> = match self.active_track() {
            Ok(active) => active.points().iter().collect(),
            Err(_) => self.tracks.iter().flat_map(|t| t.points()).collect(),
        };
        let all = track_points
            .into_iter()
            .chain(self.points.iter().map(|w| &w.coordinate))
            .chain(current_position);
        BoundingBox::from_points(all, self.unit).ok_or(GpsError::NoMapContext)
    }

    /// Pixel position of `point` on the map that also bounds `current_position`.
    pub fn display_position(
        &self,
        point: &Coordinate,
        current_position: Option<&Coordinate>,
    ) -> Result<(f64, f64)> {
        let bbox = self.bounding_box(current_position)?;
        Ok((point.display_x(&bbox), point.display_y(&bbox)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn track(name: &str, coords: &[(f64, f64)]) -> Track {
        Track::new(
            name,
            coords.iter().map(|&(lat, lon)| Coordinate::new(lat, lon)).collect(),
        )
    }

    fn sample_map() -> Map {
        let mut map = Map::new(Unit::Meters);
        map.add_track(track("track 1", &[(52.0, 4.0), (52.01, 4.02)]));
        map.add_track(track("track 2", &[(53.0, 5.0), (53.01, 5.01)]));
        map
    }

    #[test]
    fn test_no_active_track() {
        let map = sample_map();
        assert!(matches!(map.active_track(), Err(GpsError::NoActiveTrackFound)));
    }

    #[test]
    fn test_set_active_track() {
        let mut map = sample_map();
        map.set_active_track("track 2").unwrap();
        assert_eq!(map.active_track().unwrap().name(), "track 2");

        map.set_active_track("track 1").unwrap();
        assert_eq!(map.active_track().unwrap().name(), "track 1");
        assert_eq!(map.tracks().iter().filter(|t| t.is_active()).count(), 1);
    }

    #[test]
    fn test_set_active_track_unknown() {
        let mut map = sample_map();
        map.set_active_track("track 1").unwrap();
        let err = map.set_active_track("nope").unwrap_err();
        assert!(matches!(err, GpsError::NoTrackFound(ref n) if n == "nope"));
        // Previous selection kept
        assert_eq!(map.active_track().unwrap().name(), "track 1");
    }

    #[test]
    fn test_duplicate_names_first_match_wins() {
        let mut map = sample_map();
        map.add_track(track("track 1", &[(10.0, 10.0)]));
        map.set_active_track("track 1").unwrap();
        assert_eq!(map.active_track().unwrap().len(), 2);
        assert_eq!(map.tracks().iter().filter(|t| t.is_active()).count(), 1);
    }

    #[test]
    fn test_empty_map_has_no_bbox() {
        let map = Map::new(Unit::Meters);
        assert!(matches!(map.bounding_box(None), Err(GpsError::NoMapContext)));
    }

    #[test]
    fn test_bbox_uses_active_track() {
        let mut map = sample_map();
        let all = map.bounding_box(None).unwrap();
        assert_eq!(all.max_lat, 53.01);

        map.set_active_track("track 1").unwrap();
        let active = map.bounding_box(None).unwrap();
        assert_eq!(active.max_lat, 52.01);
        assert_eq!(active.min_lon, 4.0);
    }

    #[test]
    fn test_bbox_includes_points_and_position() {
        let mut map = sample_map();
        map.set_active_track("track 1").unwrap();
        map.add_point(Coordinate::new(51.9, 4.01));
        let pos = Coordinate::new(52.005, 4.5);

        let bbox = map.bounding_box(Some(&pos)).unwrap();
        assert_eq!(bbox.min_lat, 51.9);
        assert_eq!(bbox.max_lon, 4.5);
        assert!(bbox.contains(&pos));
        for p in map.active_track().unwrap().points() {
            assert!(bbox.contains(p));
        }
    }

    #[test]
    fn test_bbox_recomputed_on_position_change() {
        let mut map = sample_map();
        map.set_active_track("track 1").unwrap();
        let a = map.bounding_box(Some(&Coordinate::new(52.0, 4.0))).unwrap();
        let b = map.bounding_box(Some(&Coordinate::new(52.5, 4.0))).unwrap();
        assert_eq!(a.max_lat, 52.01);
        assert_eq!(b.max_lat, 52.5);
    }

    #[test]
    fn test_bbox_invalidated_on_add() {
        let mut map = sample_map();
        let before = map.bounding_box(None).unwrap();
        map.add_track(track("far", &[(60.0, 10.0)]));
        let after = map.bounding_box(None).unwrap();
        assert_eq!(before.max_lat, 53.01);
        assert_eq!(after.max_lat, 60.0);

        map.clear();
        assert!(map.bounding_box(None).is_err());
    }

    #[test]
    fn test_bbox_dimensions() {
        let map = sample_map();
        let bbox = map.bounding_box(None).unwrap();
        assert!(bbox.width() > 0.0);
        assert!(bbox.height() > 0.0);
        assert!(bbox.real_width > 0.0);
        assert!(bbox.real_height > 0.0);
        // Projected meters overstate ground distance away from the equator
        assert!(bbox.meters_per_unit_x() < 1.0);
    }

    #[test]
    fn test_degenerate_bbox_scale() {
        let mut map = Map::new(Unit::Meters);
        map.add_point(Coordinate::new(60.0, 10.0));
        let bbox = map.bounding_box(None).unwrap();
        assert_eq!(bbox.width(), 0.0);
        let expected = 0.5 * EARTH_MEAN_RADIUS_M / PROJECTION_RADIUS_M;
        assert!((bbox.meters_per_unit_x() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_display_position_flips_y() {
        let map = sample_map();
        let bbox = map.bounding_box(None).unwrap();
        let south_west = Coordinate::new(bbox.min_lat, bbox.min_lon);
        let (x, y) = map.display_position(&south_west, None).unwrap();
        assert!(x.abs() < 1e-6);
        assert!((y - bbox.height()).abs() < 1e-6);

        let north_east = Coordinate::new(bbox.max_lat, bbox.max_lon);
        let (x, y) = map.display_position(&north_east, None).unwrap();
        assert!((x - bbox.width()).abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_display_position_without_context() {
        let map = Map::new(Unit::Meters);
        let err = map
            .display_position(&Coordinate::new(1.0, 1.0), None)
            .unwrap_err();
        assert!(matches!(err, GpsError::NoMapContext));
    }
}
