//! Domain models - core business types for alert evaluation
//!
//! This module contains the canonical data types used throughout the system:
//! - `Coordinate` / `distance_m` - spherical geometry primitives
//! - `Geofence` - named circular zone with containment check
//! - `Subject` - tracked family member and sharing flags
//! - `LocationSample` / `StatusSample` - streaming device updates
//! - `AlertKind` / `AlertCandidate` / `NotificationEvent` - alert pipeline types

pub mod alert;
pub mod geo;
pub mod types;
