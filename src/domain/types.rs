//! Shared types for subjects, samples, and geofences

use crate::domain::geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Newtype wrapper for subject (family member) ids to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SubjectId(pub String);

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for group (family) ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GroupId(pub String);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for geofence ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FenceId(pub String);

impl std::fmt::Display for FenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FenceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Generate a new UUIDv7 string (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// A tracked family member.
///
/// Subjects with no group, or with sharing disabled, are not evaluated.
/// `push_token` is the delivery address for the external push primitive and
/// may be absent (delivery is skipped, the durable record is still written).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub group_id: Option<GroupId>,
    pub sharing_enabled: bool,
    pub battery_alerts_enabled: bool,
    pub push_token: Option<String>,
}

impl Subject {
    /// Whether this subject's streams should be watched at all
    pub fn is_watchable(&self) -> bool {
        self.group_id.is_some() && self.sharing_enabled
    }
}

/// A single location fix from a subject's device.
///
/// Ephemeral - each new sample supersedes the previous one; only the latest
/// is authoritative for live evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub coord: Coordinate,
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(coord: Coordinate, captured_at: DateTime<Utc>) -> Self {
        Self { coord, captured_at }
    }
}

/// A device status reading (battery), independent stream from location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusSample {
    pub battery_pct: u8,
    pub captured_at: DateTime<Utc>,
}

impl StatusSample {
    pub fn new(battery_pct: u8, captured_at: DateTime<Utc>) -> Self {
        Self { battery_pct, captured_at }
    }
}

/// Validation failures for geofences, rejected at the ingestion boundary
#[derive(Debug, Error, PartialEq)]
pub enum FenceError {
    #[error("fence center out of coordinate range")]
    InvalidCenter,
    #[error("fence radius {radius_m}m outside allowed {min_m}..{max_m}m")]
    InvalidRadius { radius_m: f64, min_m: f64, max_m: f64 },
}

/// Named circular zone owned by a group, writable only by its admins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geofence {
    pub id: FenceId,
    pub group_id: GroupId,
    pub name: String,
    pub center: Coordinate,
    pub radius_m: f64,
}

impl Geofence {
    /// Inclusive containment check against the fence boundary.
    ///
    /// Assumes a validated fence; invalid fences are rejected upstream.
    pub fn contains(&self, point: Coordinate) -> bool {
        crate::domain::geo::distance_m(point, self.center) <= self.radius_m
    }

    /// Validate center and radius against the configured bounds
    pub fn validate(&self, min_radius_m: f64, max_radius_m: f64) -> Result<(), FenceError> {
        if !self.center.is_valid() {
            return Err(FenceError::InvalidCenter);
        }
        if !self.radius_m.is_finite()
            || self.radius_m < min_radius_m
            || self.radius_m > max_radius_m
        {
            return Err(FenceError::InvalidRadius {
                radius_m: self.radius_m,
                min_m: min_radius_m,
                max_m: max_radius_m,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence(radius_m: f64) -> Geofence {
        Geofence {
            id: FenceId::from("f1"),
            group_id: GroupId::from("g1"),
            name: "Home".to_string(),
            center: Coordinate::new(37.0, -122.0),
            radius_m,
        }
    }

    #[test]
    fn test_center_always_inside_positive_radius() {
        let f = fence(100.0);
        assert!(f.contains(f.center));
    }

    #[test]
    fn test_contains_inclusive_boundary() {
        let f = fence(111.0);
        // ~111m north of center at this latitude
        let near_edge = Coordinate::new(37.000999, -122.0);
        assert!(f.contains(near_edge));
        let outside = Coordinate::new(37.002, -122.0);
        assert!(!f.contains(outside));
    }

    #[test]
    fn test_validate_radius_bounds() {
        assert!(fence(50.0).validate(50.0, 5000.0).is_ok());
        assert!(fence(5000.0).validate(50.0, 5000.0).is_ok());
        assert!(matches!(
            fence(10.0).validate(50.0, 5000.0),
            Err(FenceError::InvalidRadius { .. })
        ));
        assert!(matches!(
            fence(f64::NAN).validate(50.0, 5000.0),
            Err(FenceError::InvalidRadius { .. })
        ));
    }

    #[test]
    fn test_validate_center() {
        let mut f = fence(100.0);
        f.center = Coordinate::new(95.0, 0.0);
        assert_eq!(f.validate(50.0, 5000.0), Err(FenceError::InvalidCenter));
    }

    #[test]
    fn test_watchable_subject() {
        let mut s = Subject {
            id: SubjectId::from("a"),
            name: "Alice".to_string(),
            group_id: Some(GroupId::from("g1")),
            sharing_enabled: true,
            battery_alerts_enabled: true,
            push_token: None,
        };
        assert!(s.is_watchable());
        s.sharing_enabled = false;
        assert!(!s.is_watchable());
        s.sharing_enabled = true;
        s.group_id = None;
        assert!(!s.is_watchable());
    }

    #[test]
    fn test_uuid_v7_generation() {
        let a = new_uuid_v7();
        let b = new_uuid_v7();
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);
    }
}
