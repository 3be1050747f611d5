//! Geographic primitives: coordinates, distances, path arithmetic.
//!
//! This module provides:
//!
//! - **Coordinate**: immutable lat/lng value type
//! - **Distance**: spherical law-of-cosines distance in meters
//! - **Path arithmetic**: segment-sum length and progress along a route
//! - **Bounds**: smallest enclosing rectangle for map display
//!
//! All functions are pure; the matching engine ranks candidates with
//! [`Coordinate::distance_m`], and pickup-ETA estimation walks routes with
//! [`path_progress`].

use serde::{Deserialize, Serialize};

pub mod polyline;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to `other` in meters, via the spherical law of
    /// cosines. Symmetric, and exactly zero for identical coordinates.
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        if self == other {
            return 0.0;
        }
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlng = (other.lng - self.lng).to_radians();
        let central =
            (lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * dlng.cos()).clamp(-1.0, 1.0);
        EARTH_RADIUS_M * central.acos()
    }
}

/// Length in meters of the path walked from vertex `start` to vertex `end`.
///
/// Additive over a split: `path_length_m(p, 0, k) + path_length_m(p, k, n)`
/// equals `path_length_m(p, 0, n)`. Indices are clamped to the path; empty
/// and single-point paths yield 0.
pub fn path_length_m(path: &[Coordinate], start: usize, end: usize) -> f64 {
    let end = end.min(path.len().saturating_sub(1));
    if end <= start {
        return 0.0;
    }
    (start..end)
        .map(|i| path[i].distance_m(&path[i + 1]))
        .sum()
}

/// Where a runner currently is along a path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathProgress {
    /// Total path length in meters.
    pub total_m: f64,
    /// Meters already covered up to the projected position.
    pub traveled_m: f64,
    /// Meters left to the end of the path.
    pub remaining_m: f64,
    /// Index of the path vertex closest to the query point.
    pub nearest_index: usize,
    /// Whether the point lies before the nearest vertex (in path order).
    pub is_before_nearest: bool,
    /// Index of the vertex after the nearest one, clamped to the last vertex.
    pub next_index: usize,
}

impl PathProgress {
    fn zero() -> Self {
        Self {
            total_m: 0.0,
            traveled_m: 0.0,
            remaining_m: 0.0,
            nearest_index: 0,
            is_before_nearest: false,
            next_index: 0,
        }
    }
}

/// Estimate how far along `path` the given `point` is.
///
/// Finds the vertex closest to `point`, decides whether the point lies
/// before or after it by comparing point→next against nearest→next, and
/// integrates length up to the projected position. An empty path yields
/// zero-valued results rather than an error.
pub fn path_progress(path: &[Coordinate], point: &Coordinate) -> PathProgress {
    if path.is_empty() {
        return PathProgress::zero();
    }

    let mut nearest_index = 0;
    let mut nearest_dist = f64::INFINITY;
    for (i, vertex) in path.iter().enumerate() {
        let d = point.distance_m(vertex);
        if d < nearest_dist {
            nearest_dist = d;
            nearest_index = i;
        }
    }

    let next_index = (nearest_index + 1).min(path.len() - 1);
    // If the point is farther from the next vertex than the nearest vertex
    // is, it has not passed the nearest vertex yet.
    let is_before_nearest = next_index != nearest_index
        && point.distance_m(&path[next_index]) > path[nearest_index].distance_m(&path[next_index]);

    let total_m = path_length_m(path, 0, path.len());
    let to_nearest = path_length_m(path, 0, nearest_index);
    let traveled_m = if is_before_nearest {
        (to_nearest - nearest_dist).max(0.0)
    } else {
        (to_nearest + nearest_dist).min(total_m)
    };

    PathProgress {
        total_m,
        traveled_m,
        remaining_m: (total_m - traveled_m).max(0.0),
        nearest_index,
        is_before_nearest,
        next_index,
    }
}

/// Smallest rectangle enclosing a set of coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Coordinate,
    pub max: Coordinate,
}

impl Bounds {
    fn of_point(point: &Coordinate) -> Self {
        Self {
            min: *point,
            max: *point,
        }
    }

    fn expand(&mut self, point: &Coordinate) {
        self.min.lat = self.min.lat.min(point.lat);
        self.min.lng = self.min.lng.min(point.lng);
        self.max.lat = self.max.lat.max(point.lat);
        self.max.lng = self.max.lng.max(point.lng);
    }
}

/// Smallest enclosing rectangle of `path`, or `None` for an empty path.
pub fn bounds_of(path: &[Coordinate]) -> Option<Bounds> {
    let (first, rest) = path.split_first()?;
    let mut bounds = Bounds::of_point(first);
    for point in rest {
        bounds.expand(point);
    }
    Some(bounds)
}

/// Enclosing rectangle of `path` with the runner's position folded in, so a
/// map view keeps both the route and the vehicle on screen.
pub fn running_bounds_of(path: &[Coordinate], runner: &Coordinate) -> Bounds {
    match bounds_of(path) {
        Some(mut bounds) => {
            bounds.expand(runner);
            bounds
        }
        None => Bounds::of_point(runner),
    }
}
