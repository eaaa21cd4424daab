//! Spherical geometry primitives - coordinates and great-circle distance

use serde::{Deserialize, Serialize};

/// Mean earth radius in meters (spherical approximation)
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84-style latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check that both components are finite and within valid ranges.
    ///
    /// Validation happens at the data-ingestion boundary; the distance
    /// function itself is total and lets NaN propagate.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

/// Great-circle distance between two coordinates in meters (haversine).
///
/// Pure and symmetric. NaN inputs propagate NaN rather than panicking;
/// callers validate coordinate ranges upstream.
pub fn distance_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_same_point_is_zero() {
        let p = Coordinate::new(64.1466, -21.9426);
        assert_eq!(distance_m(p, p), 0.0);
    }

    #[test]
    fn test_distance_symmetry() {
        let a = Coordinate::new(37.0, -122.0);
        let b = Coordinate::new(37.5, -121.2);
        assert_eq!(distance_m(a, b), distance_m(b, a));
    }

    #[test]
    fn test_known_distance() {
        // LAX to JFK, roughly 3,974 km great-circle
        let lax = Coordinate::new(33.9425, -118.4081);
        let jfk = Coordinate::new(40.6413, -73.7781);
        let d = distance_m(lax, jfk);
        assert!((d - 3_974_000.0).abs() < 20_000.0, "got {d}");
    }

    #[test]
    fn test_short_distance() {
        // ~111m per 0.001 degree of latitude at the equator
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.001, 0.0);
        let d = distance_m(a, b);
        assert!((d - 111.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_nan_propagates() {
        let a = Coordinate::new(f64::NAN, 0.0);
        let b = Coordinate::new(0.0, 0.0);
        assert!(distance_m(a, b).is_nan());
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinate::new(37.0, -122.0).is_valid());
        assert!(Coordinate::new(-90.0, 180.0).is_valid());
        assert!(!Coordinate::new(90.1, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -180.5).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }
}
