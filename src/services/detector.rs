//! Transition detection over streaming samples
//!
//! Everything here is pure: given a (previous, current) pair and the live
//! fence set, produce the edge-triggered transitions. Both runtime adapters
//! call these functions with identical semantics; neither re-fires on a
//! level, only on a change.

use crate::domain::alert::AlertKind;
use crate::domain::types::{FenceId, Geofence, LocationSample};
use smallvec::SmallVec;
use tracing::warn;

/// One detected fence transition for a single evaluation step
#[derive(Debug, Clone, PartialEq)]
pub struct FenceTransition {
    pub fence_id: FenceId,
    pub fence_name: String,
    pub kind: AlertKind,
}

/// Detect fence entry/exit transitions for one subject's sample pair.
///
/// With no previous sample (first observation, or the prior sample was lost
/// to a listener restart) presence is unknown and nothing is emitted; a gap
/// never fabricates a transition. Fences that fail validation are skipped
/// with a warning and never abort evaluation of the rest.
pub fn fence_transitions(
    prev: Option<&LocationSample>,
    cur: &LocationSample,
    fences: &[Geofence],
    min_radius_m: f64,
    max_radius_m: f64,
) -> SmallVec<[FenceTransition; 2]> {
    let mut out = SmallVec::new();

    if !cur.coord.is_valid() {
        warn!(coord = %cur.coord, "location_sample_invalid_skipped");
        return out;
    }
    let prev = prev.filter(|p| p.coord.is_valid());

    for fence in fences {
        if let Err(e) = fence.validate(min_radius_m, max_radius_m) {
            warn!(fence = %fence.id, error = %e, "fence_invalid_skipped");
            continue;
        }

        let was_inside = match prev {
            Some(p) => fence.contains(p.coord),
            // Unknown prior presence: no transition can be derived
            None => continue,
        };
        let is_inside = fence.contains(cur.coord);

        let kind = match (was_inside, is_inside) {
            (false, true) => AlertKind::GeofenceEntry,
            (true, false) => AlertKind::GeofenceExit,
            _ => continue,
        };
        out.push(FenceTransition {
            fence_id: fence.id.clone(),
            fence_name: fence.name.clone(),
            kind,
        });
    }

    out
}

/// Edge-triggered low-battery check.
///
/// Fires when the current reading is at or below the threshold and the
/// previous reading was above it (or absent). While the battery stays low
/// nothing re-fires; recovering above the threshold re-arms the check.
pub fn battery_crossed(prev: Option<u8>, cur: u8, threshold: u8) -> bool {
    cur <= threshold && prev.map_or(true, |p| p > threshold)
}
