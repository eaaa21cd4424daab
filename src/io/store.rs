//! External collaborator interfaces
//!
//! The engine never talks to a concrete backend; everything durable or
//! remote sits behind these traits. `io/memory.rs` provides the in-process
//! implementation used by the demo binary and the test suite.

use crate::domain::alert::{AlertKind, NotificationEvent, PushPayload};
use crate::domain::types::{
    FenceId, Geofence, GroupId, LocationSample, StatusSample, Subject, SubjectId,
};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Failure taxonomy for store operations.
///
/// The cooldown gate treats `NotFound` as "no prior record" and every other
/// variant as a genuine fault, which blocks dispatch (fail-closed).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid data: {0}")]
    Invalid(String),
}

/// A change observed on a subject's live status streams
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    Location(LocationSample),
    Battery(StatusSample),
    Sos,
}

/// Current live status for a subject, with the superseded values retained.
///
/// The server trigger owns no memory between invocations; the previous
/// sample it feeds to the detector comes from this before/after pair.
#[derive(Debug, Clone, Default)]
pub struct SubjectStatus {
    pub location: Option<LocationSample>,
    pub prev_location: Option<LocationSample>,
    pub battery: Option<StatusSample>,
    pub prev_battery: Option<StatusSample>,
    pub sos_active: bool,
}

/// Group/subject registry (read side plus the token self-healing write)
#[async_trait]
pub trait Directory: Send + Sync {
    async fn subject(&self, id: &SubjectId) -> Result<Subject, StoreError>;

    async fn group_members(&self, group: &GroupId) -> Result<Vec<Subject>, StoreError>;

    /// Remove a stale push token after the provider reports it invalid
    async fn clear_push_token(&self, id: &SubjectId) -> Result<(), StoreError>;
}

/// Geofence registry with a push-on-change capability
#[async_trait]
pub trait FenceStore: Send + Sync {
    async fn list_fences(&self, group: &GroupId) -> Result<Vec<Geofence>, StoreError>;

    /// Receiver that yields the group id whenever that group's fence set
    /// changes. Used to invalidate the engine's fence cache.
    fn subscribe_changes(&self) -> broadcast::Receiver<GroupId>;
}

/// Per-subject live status store (location, battery, sos trigger)
#[async_trait]
pub trait LiveStore: Send + Sync {
    /// Subscribe to a subject's status streams. Updates for one subject
    /// arrive in write order.
    fn subscribe(&self, subject: &SubjectId) -> broadcast::Receiver<StatusUpdate>;

    /// Read the current status with superseded values retained
    async fn snapshot(&self, subject: &SubjectId) -> Result<SubjectStatus, StoreError>;

    /// Re-arm the SOS trigger after consuming it
    async fn clear_sos(&self, subject: &SubjectId) -> Result<(), StoreError>;

    // Producer-side writes. Sample production is the device's concern, not
    // this core's; the demo harness and tests drive the pipeline through
    // these.
    async fn publish_location(
        &self,
        subject: &SubjectId,
        sample: LocationSample,
    ) -> Result<(), StoreError>;

    async fn publish_battery(
        &self,
        subject: &SubjectId,
        sample: StatusSample,
    ) -> Result<(), StoreError>;

    async fn raise_sos(&self, subject: &SubjectId) -> Result<(), StoreError>;
}

/// Durable notification log - the dedup ledger and the notification list
#[async_trait]
pub trait NotificationLog: Send + Sync {
    /// Most recent event for (subject, kind, fence?), or `NotFound`
    async fn latest(
        &self,
        subject: &SubjectId,
        kind: AlertKind,
        fence: Option<&FenceId>,
    ) -> Result<NotificationEvent, StoreError>;

    /// Append one event; returns its id
    async fn append(&self, event: NotificationEvent) -> Result<String, StoreError>;

    /// Flip `acknowledged` false to true
    async fn acknowledge(&self, id: &str) -> Result<(), StoreError>;

    /// Live stream of events appended for a recipient (notification list UI)
    fn subscribe_recipient(&self, recipient: &SubjectId) -> broadcast::Receiver<NotificationEvent>;
}

/// Outcome reported by the external push delivery primitive
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Delivered,
    /// Provider rejected the address; the caller clears the stale token
    InvalidToken,
    Failed(String),
}

/// Reliable "deliver-or-report-failure" push primitive
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, token: &str, payload: &PushPayload) -> PushOutcome;
}
