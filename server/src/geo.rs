//! Great-circle math shared by the hub and the capture agent.
//!
//! Thin wrappers over the `geo` crate's Haversine metric. All distances are
//! meters unless a function name says otherwise; bearings are degrees
//! clockwise from true north in [0, 360).

use geo::{Bearing, Distance, Haversine, Point};

const MIN_SPEED_KMH: f64 = 1.0;

/// Haversine distance between two coordinates, in meters.
pub fn distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let from = Point::new(lng1, lat1);
    let to = Point::new(lng2, lat2);
    Haversine::distance(from, to)
}

/// Haversine distance between two coordinates, in kilometers.
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    distance_meters(lat1, lng1, lat2, lng2) / 1000.0
}

/// Initial bearing from the first coordinate toward the second.
pub fn bearing_degrees(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let from = Point::new(lng1, lat1);
    let to = Point::new(lng2, lat2);
    Haversine::bearing(from, to).rem_euclid(360.0)
}

/// Estimated travel time in minutes at the given average speed.
///
/// Speeds below 1 km/h are clamped up so a stationary reading still yields
/// a finite estimate.
pub fn eta_minutes(distance_km: f64, speed_kmh: f64) -> f64 {
    let speed = speed_kmh.max(MIN_SPEED_KMH);
    distance_km / speed * 60.0
}
