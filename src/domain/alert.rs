//! Alert pipeline types - kinds, candidates, durable notification records
//!
//! `NotificationEvent` is both the user-visible notification and the dedup
//! ledger the cooldown gate queries. It is immutable once written except for
//! the `acknowledged` flag flipping false to true.

use crate::domain::geo::Coordinate;
use crate::domain::types::{new_uuid_v7, FenceId, GroupId, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of alert kinds.
///
/// Templating and icon resolution match exhaustively on this enum; adding a
/// kind is a compile-visible change everywhere it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Sos,
    LowBattery,
    GeofenceEntry,
    GeofenceExit,
    Info,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Sos => "sos",
            AlertKind::LowBattery => "low_battery",
            AlertKind::GeofenceEntry => "geofence_entry",
            AlertKind::GeofenceExit => "geofence_exit",
            AlertKind::Info => "info",
        }
    }
}

impl std::str::FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sos" => Ok(AlertKind::Sos),
            "low_battery" => Ok(AlertKind::LowBattery),
            "geofence_entry" => Ok(AlertKind::GeofenceEntry),
            "geofence_exit" => Ok(AlertKind::GeofenceExit),
            "info" => Ok(AlertKind::Info),
            other => Err(format!("unknown alert kind: {other}")),
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detector output that has not yet passed the cooldown gate
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub kind: AlertKind,
    pub subject_id: SubjectId,
    pub group_id: GroupId,
    pub fence_id: Option<FenceId>,
    pub location: Option<Coordinate>,
    pub battery_pct: Option<u8>,
    pub occurred_at: DateTime<Utc>,
}

impl AlertCandidate {
    /// Render the human-readable title and message for this candidate.
    ///
    /// Exact wording is a presentation concern; the payload fields carried
    /// alongside are the wire contract.
    pub fn render(&self, subject_name: &str, fence_name: Option<&str>) -> (String, String) {
        let fence = fence_name.unwrap_or("a zone");
        match self.kind {
            AlertKind::Sos => (
                "Emergency alert".to_string(),
                match self.location {
                    Some(loc) => format!("{subject_name} triggered an SOS alert at {loc}"),
                    None => format!("{subject_name} triggered an SOS alert"),
                },
            ),
            AlertKind::LowBattery => (
                "Low battery".to_string(),
                format!(
                    "{subject_name}'s phone battery is at {}%",
                    self.battery_pct.unwrap_or(0)
                ),
            ),
            AlertKind::GeofenceEntry => (
                format!("{subject_name} arrived"),
                format!("{subject_name} entered {fence}"),
            ),
            AlertKind::GeofenceExit => (
                format!("{subject_name} left"),
                format!("{subject_name} left {fence}"),
            ),
            AlertKind::Info => ("Family update".to_string(), format!("Update from {subject_name}")),
        }
    }
}

/// Durable notification record - one per recipient per allowed occurrence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: String,
    pub group_id: GroupId,
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    pub subject_id: SubjectId,
    pub recipient_id: SubjectId,
    pub fence_id: Option<FenceId>,
    pub location: Option<Coordinate>,
    pub occurred_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl NotificationEvent {
    /// Build the record for one recipient of an allowed candidate
    pub fn for_recipient(
        candidate: &AlertCandidate,
        recipient_id: SubjectId,
        title: String,
        message: String,
    ) -> Self {
        Self {
            id: new_uuid_v7(),
            group_id: candidate.group_id.clone(),
            kind: candidate.kind,
            title,
            message,
            subject_id: candidate.subject_id.clone(),
            recipient_id,
            fence_id: candidate.fence_id.clone(),
            location: candidate.location,
            occurred_at: candidate.occurred_at,
            acknowledged: false,
        }
    }

    /// Composite key bucketing (subject, kind, fence) into cooldown windows.
    ///
    /// A backend with unique-key semantics can enforce this to turn the
    /// cooldown gate's check-then-act into a true compare-and-swap. The
    /// default backends do not enforce it; the race window is accepted.
    pub fn dedup_key(&self, window_secs: i64) -> String {
        let bucket = if window_secs > 0 {
            self.occurred_at.timestamp() / window_secs
        } else {
            self.occurred_at.timestamp_millis()
        };
        match &self.fence_id {
            Some(fence) => format!("{}:{}:{}:{}", self.subject_id, self.kind, fence, bucket),
            None => format!("{}:{}:{}", self.subject_id, self.kind, bucket),
        }
    }
}

/// Wire contract consumed by the client notification list.
///
/// Field names are part of the contract; optionals are omitted when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub family_id: String,
    pub triggering_uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_geofence_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_location: Option<Coordinate>,
}

impl PushPayload {
    pub fn from_event(event: &NotificationEvent) -> Self {
        Self {
            kind: event.kind.as_str().to_string(),
            title: event.title.clone(),
            message: event.message.clone(),
            family_id: event.group_id.0.clone(),
            triggering_uid: event.subject_id.0.clone(),
            related_geofence_id: event.fence_id.as_ref().map(|f| f.0.clone()),
            related_location: event.location,
        }
    }
}
