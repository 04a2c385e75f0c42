//! Named, ordered tracks of coordinates with progress tracking.
//!
//! Insertion order is traversal order. Progress is kept per point through the
//! `passed` flag, advanced by `mark_progress` as a moving position reaches the
//! next unpassed point, and cleared only by `reset_progress`.

use serde::Serialize;

use crate::coordinate::Coordinate;
use crate::map::BoundingBox;
use crate::types::{GpsError, Result, Unit};

/// Recursion guard for subdivision of degenerate (e.g. antipodal) spans.
const MAX_SUBDIVIDE_DEPTH: u32 = 48;

/// An ordered, named polyline of coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    name: String,
    points: Vec<Coordinate>,
    active: bool,
}

impl Track {
    pub fn new(name: impl Into<String>, points: Vec<Coordinate>) -> Self {
        Track {
            name: name.into(),
            points,
            active: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn first(&self) -> Option<&Coordinate> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&Coordinate> {
        self.points.last()
    }

    /// Insert `point` at index `at`, or push it at the tail.
    ///
    /// An index past the end appends.
    pub fn append(&mut self, point: Coordinate, at: Option<usize>) {
        match at {
            Some(index) if index < self.points.len() => self.points.insert(index, point),
            _ => self.points.push(point),
        }
    }

    /// Remove all points, returning them.
    pub fn clear(&mut self) -> Vec<Coordinate> {
        std::mem::take(&mut self.points)
    }

    /// Replace all points.
    pub fn set_points(&mut self, points: Vec<Coordinate>) {
        self.points = points;
    }

    /// Sum of consecutive great-circle distances in `unit`.
    pub fn total_distance(&self, unit: Unit) -> f64 {
        unit.from_meters(self.total_distance_m())
    }

    pub fn total_distance_m(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| pair[0].distance_m(&pair[1]))
            .sum()
    }

    /// Total distance rounded to whole meters.
    pub fn distance_in_meters(&self) -> u64 {
        self.total_distance_m().round() as u64
    }

    /// Total distance in kilometers with two decimals.
    pub fn distance_in_kilometers(&self) -> f64 {
        (self.total_distance_m() / 10.0).round() / 100.0
    }

    /// The point closest to `point`. Ties go to the earliest point.
    pub fn nearest_point_to(&self, point: &Coordinate) -> Result<&Coordinate> {
        self.nearest_index_to(point).map(|i| &self.points[i])
    }

    pub fn nearest_index_to(&self, point: &Coordinate) -> Result<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, candidate) in self.points.iter().enumerate() {
            let d = candidate.distance_m(point);
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((i, d)),
            }
        }
        best.map(|(i, _)| i).ok_or(GpsError::EmptyTrack)
    }

    /// First point not yet passed.
    pub fn next_unpassed_point(&self) -> Option<&Coordinate> {
        self.points.iter().find(|p| !p.is_passed())
    }

    pub fn passed_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_passed()).count()
    }

    /// Mark the next unpassed point as passed when `position` is within
    /// `threshold_m` meters of it. Returns the index of the point marked.
    pub fn mark_progress(&mut self, position: &Coordinate, threshold_m: f64) -> Option<usize> {
        let index = self.points.iter().position(|p| !p.is_passed())?;
        if self.points[index].distance_m(position) <= threshold_m {
            self.points[index].mark_passed();
            Some(index)
        } else {
            None
        }
    }

    /// Clear every point's passed flag.
    pub fn reset_progress(&mut self) {
        for p in &mut self.points {
            p.reset_passed();
        }
    }

    /// Points with no consecutive pair farther apart than `max_segment_m`.
    pub fn subdivide(&self, max_segment_m: f64) -> Vec<Coordinate> {
        subdivide(&self.points, max_segment_m)
    }

    /// Deep copy of this track, used to save state around simulations.
    pub fn snapshot(&self) -> Track {
        self.clone()
    }

    /// Restore the name and points from a snapshot. The active flag is kept.
    pub fn restore(&mut self, snapshot: Track) {
        self.name = snapshot.name;
        self.points = snapshot.points;
    }

    /// Pixel positions of all points against `bbox`.
    pub fn display_points(&self, bbox: &BoundingBox) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (p.display_x(bbox), p.display_y(bbox)))
            .collect()
    }
}

/// Insert geodesic midpoints until no consecutive pair is farther apart than
/// `max_segment_m`. Original points are kept as-is and in order.
pub fn subdivide(points: &[Coordinate], max_segment_m: f64) -> Vec<Coordinate> {
    if points.len() < 2 || !(max_segment_m > 0.0) || !max_segment_m.is_finite() {
        return points.to_vec();
    }

    let mut out = Vec::with_capacity(points.len());
    out.push(points[0].clone());
    for pair in points.windows(2) {
        split_span(&pair[0], &pair[1], max_segment_m, 0, &mut out);
        out.push(pair[1].clone());
    }
    out
}

/// Push the midpoints strictly between `a` and `b` (exclusive) into `out`.
fn split_span(a: &Coordinate, b: &Coordinate, max_m: f64, depth: u32, out: &mut Vec<Coordinate>) {
    if depth >= MAX_SUBDIVIDE_DEPTH || a.distance_m(b) <= max_m {
        return;
    }
    let mid = a.midpoint_to(b);
    split_span(a, &mid, max_m, depth + 1, out);
    out.push(mid.clone());
    split_span(&mid, b, max_m, depth + 1, out);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
