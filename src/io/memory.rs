//! In-memory backend implementing the store traits
//!
//! Single-process stand-in for the real registry/status/log services, used
//! by the demo binary and the test suite. Broadcast channels provide the
//! push-on-change capability; updates for one subject are delivered in write
//! order, which is all the pipeline relies on.

use crate::domain::alert::{AlertKind, NotificationEvent, PushPayload};
use crate::domain::types::{
    FenceId, Geofence, GroupId, LocationSample, StatusSample, Subject, SubjectId,
};
use crate::io::store::{
    Directory, FenceStore, LiveStore, NotificationLog, PushOutcome, PushSender, StatusUpdate,
    StoreError, SubjectStatus,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Buffer for broadcast status/event streams
const STREAM_BUFFER: usize = 256;

/// In-memory registry + live store + notification log
pub struct MemoryBackend {
    min_radius_m: f64,
    max_radius_m: f64,
    subjects: RwLock<FxHashMap<SubjectId, Subject>>,
    fences: RwLock<FxHashMap<GroupId, Vec<Geofence>>>,
    fence_changes: broadcast::Sender<GroupId>,
    status: RwLock<FxHashMap<SubjectId, SubjectStatus>>,
    status_streams: RwLock<FxHashMap<SubjectId, broadcast::Sender<StatusUpdate>>>,
    events: RwLock<Vec<NotificationEvent>>,
    event_streams: RwLock<FxHashMap<SubjectId, broadcast::Sender<NotificationEvent>>>,
}

impl MemoryBackend {
    pub fn new(min_radius_m: f64, max_radius_m: f64) -> Self {
        let (fence_changes, _) = broadcast::channel(STREAM_BUFFER);
        Self {
            min_radius_m,
            max_radius_m,
            subjects: RwLock::new(FxHashMap::default()),
            fences: RwLock::new(FxHashMap::default()),
            fence_changes,
            status: RwLock::new(FxHashMap::default()),
            status_streams: RwLock::new(FxHashMap::default()),
            events: RwLock::new(Vec::new()),
            event_streams: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn upsert_subject(&self, subject: Subject) {
        debug!(subject = %subject.id, "subject_upserted");
        self.subjects.write().insert(subject.id.clone(), subject);
    }

    /// Save a fence. Validation happens here, at the ingestion boundary;
    /// failures surface synchronously to the editing admin.
    pub fn put_fence(&self, fence: Geofence) -> Result<(), StoreError> {
        fence
            .validate(self.min_radius_m, self.max_radius_m)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let group = fence.group_id.clone();
        {
            let mut fences = self.fences.write();
            let group_fences = fences.entry(group.clone()).or_default();
            group_fences.retain(|f| f.id != fence.id);
            group_fences.push(fence);
        }
        let _ = self.fence_changes.send(group);
        Ok(())
    }

    pub fn remove_fence(&self, group: &GroupId, fence: &FenceId) {
        let removed = {
            let mut fences = self.fences.write();
            match fences.get_mut(group) {
                Some(group_fences) => {
                    let before = group_fences.len();
                    group_fences.retain(|f| f.id != *fence);
                    group_fences.len() != before
                }
                None => false,
            }
        };
        // Publish even when the group's list is now empty so caches refresh
        if removed {
            let _ = self.fence_changes.send(group.clone());
        }
    }

    fn status_stream(&self, subject: &SubjectId) -> broadcast::Sender<StatusUpdate> {
        let mut streams = self.status_streams.write();
        streams
            .entry(subject.clone())
            .or_insert_with(|| broadcast::channel(STREAM_BUFFER).0)
            .clone()
    }

    fn event_stream(&self, recipient: &SubjectId) -> broadcast::Sender<NotificationEvent> {
        let mut streams = self.event_streams.write();
        streams
            .entry(recipient.clone())
            .or_insert_with(|| broadcast::channel(STREAM_BUFFER).0)
            .clone()
    }

    /// All appended events, oldest first (test and demo inspection)
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.read().clone()
    }
}

#[async_trait]
impl Directory for MemoryBackend {
    async fn subject(&self, id: &SubjectId) -> Result<Subject, StoreError> {
        self.subjects.read().get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn group_members(&self, group: &GroupId) -> Result<Vec<Subject>, StoreError> {
        Ok(self
            .subjects
            .read()
            .values()
            .filter(|s| s.group_id.as_ref() == Some(group))
            .cloned()
            .collect())
    }

    async fn clear_push_token(&self, id: &SubjectId) -> Result<(), StoreError> {
        let mut subjects = self.subjects.write();
        let subject = subjects.get_mut(id).ok_or(StoreError::NotFound)?;
        subject.push_token = None;
        Ok(())
    }
}

#[async_trait]
impl FenceStore for MemoryBackend {
    async fn list_fences(&self, group: &GroupId) -> Result<Vec<Geofence>, StoreError> {
        Ok(self.fences.read().get(group).cloned().unwrap_or_default())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<GroupId> {
        self.fence_changes.subscribe()
    }
}

#[async_trait]
impl LiveStore for MemoryBackend {
    fn subscribe(&self, subject: &SubjectId) -> broadcast::Receiver<StatusUpdate> {
        self.status_stream(subject).subscribe()
    }

    async fn snapshot(&self, subject: &SubjectId) -> Result<SubjectStatus, StoreError> {
        Ok(self.status.read().get(subject).cloned().unwrap_or_default())
    }

    async fn clear_sos(&self, subject: &SubjectId) -> Result<(), StoreError> {
        if let Some(status) = self.status.write().get_mut(subject) {
            status.sos_active = false;
        }
        Ok(())
    }

    async fn publish_location(
        &self,
        subject: &SubjectId,
        sample: LocationSample,
    ) -> Result<(), StoreError> {
        {
            let mut status = self.status.write();
            let entry = status.entry(subject.clone()).or_default();
            entry.prev_location = entry.location.take();
            entry.location = Some(sample);
        }
        let _ = self.status_stream(subject).send(StatusUpdate::Location(sample));
        Ok(())
    }

    async fn publish_battery(
        &self,
        subject: &SubjectId,
        sample: StatusSample,
    ) -> Result<(), StoreError> {
        {
            let mut status = self.status.write();
            let entry = status.entry(subject.clone()).or_default();
            entry.prev_battery = entry.battery.take();
            entry.battery = Some(sample);
        }
        let _ = self.status_stream(subject).send(StatusUpdate::Battery(sample));
        Ok(())
    }

    async fn raise_sos(&self, subject: &SubjectId) -> Result<(), StoreError> {
        {
            let mut status = self.status.write();
            status.entry(subject.clone()).or_default().sos_active = true;
        }
        let _ = self.status_stream(subject).send(StatusUpdate::Sos);
        Ok(())
    }
}

#[async_trait]
impl NotificationLog for MemoryBackend {
    async fn latest(
        &self,
        subject: &SubjectId,
        kind: AlertKind,
        fence: Option<&FenceId>,
    ) -> Result<NotificationEvent, StoreError> {
        self.events
            .read()
            .iter()
            .filter(|e| {
                e.subject_id == *subject
                    && e.kind == kind
                    && match fence {
                        Some(f) => e.fence_id.as_ref() == Some(f),
                        None => true,
                    }
            })
            .max_by_key(|e| e.occurred_at)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn append(&self, event: NotificationEvent) -> Result<String, StoreError> {
        let id = event.id.clone();
        let recipient = event.recipient_id.clone();
        self.events.write().push(event.clone());
        let _ = self.event_stream(&recipient).send(event);
        Ok(id)
    }

    async fn acknowledge(&self, id: &str) -> Result<(), StoreError> {
        let mut events = self.events.write();
        let event = events.iter_mut().find(|e| e.id == id).ok_or(StoreError::NotFound)?;
        event.acknowledged = true;
        Ok(())
    }

    fn subscribe_recipient(&self, recipient: &SubjectId) -> broadcast::Receiver<NotificationEvent> {
        self.event_stream(recipient).subscribe()
    }
}

/// Push stand-in that logs every delivery and always succeeds
pub struct LoggingPush;

#[async_trait]
impl PushSender for LoggingPush {
    async fn send(&self, token: &str, payload: &PushPayload) -> PushOutcome {
        info!(
            token = %token,
            kind = %payload.kind,
            title = %payload.title,
            "push_delivered"
        );
        PushOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::AlertCandidate;
    use crate::domain::geo::Coordinate;
    use chrono::Utc;

    fn backend() -> MemoryBackend {
        MemoryBackend::new(50.0, 5000.0)
    }

    fn subject(id: &str, group: Option<&str>) -> Subject {
        Subject {
            id: SubjectId::from(id),
            name: id.to_uppercase(),
            group_id: group.map(GroupId::from),
            sharing_enabled: true,
            battery_alerts_enabled: true,
            push_token: Some(format!("token-{id}")),
        }
    }

    fn fence(id: &str, group: &str, radius_m: f64) -> Geofence {
        Geofence {
            id: FenceId::from(id),
            group_id: GroupId::from(group),
            name: id.to_string(),
            center: Coordinate::new(37.0, -122.0),
            radius_m,
        }
    }

    fn event(subject: &str, kind: AlertKind, fence: Option<&str>) -> NotificationEvent {
        let candidate = AlertCandidate {
            kind,
            subject_id: SubjectId::from(subject),
            group_id: GroupId::from("g1"),
            fence_id: fence.map(FenceId::from),
            location: None,
            battery_pct: None,
            occurred_at: Utc::now(),
        };
        NotificationEvent::for_recipient(
            &candidate,
            SubjectId::from("b"),
            "t".to_string(),
            "m".to_string(),
        )
    }

    #[tokio::test]
    async fn test_group_members_filters_by_group() {
        let backend = backend();
        backend.upsert_subject(subject("a", Some("g1")));
        backend.upsert_subject(subject("b", Some("g1")));
        backend.upsert_subject(subject("c", Some("g2")));
        backend.upsert_subject(subject("d", None));

        let members = backend.group_members(&GroupId::from("g1")).await.unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn test_put_fence_rejects_invalid_radius() {
        let backend = backend();
        let result = backend.put_fence(fence("f1", "g1", 10.0));
        assert!(matches!(result, Err(StoreError::Invalid(_))));
        assert!(backend.list_fences(&GroupId::from("g1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_fence_publishes_change() {
        let backend = backend();
        let mut changes = backend.subscribe_changes();
        backend.put_fence(fence("f1", "g1", 100.0)).unwrap();
        assert_eq!(changes.recv().await.unwrap(), GroupId::from("g1"));
    }

    #[tokio::test]
    async fn test_remove_last_fence_still_publishes() {
        let backend = backend();
        backend.put_fence(fence("f1", "g1", 100.0)).unwrap();
        let mut changes = backend.subscribe_changes();
        backend.remove_fence(&GroupId::from("g1"), &FenceId::from("f1"));
        assert_eq!(changes.recv().await.unwrap(), GroupId::from("g1"));
        assert!(backend.list_fences(&GroupId::from("g1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_retains_superseded_location() {
        let backend = backend();
        let id = SubjectId::from("a");
        let s1 = LocationSample::new(Coordinate::new(37.0, -122.0), Utc::now());
        let s2 = LocationSample::new(Coordinate::new(37.1, -122.0), Utc::now());

        backend.publish_location(&id, s1).await.unwrap();
        backend.publish_location(&id, s2).await.unwrap();

        let snapshot = backend.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.location, Some(s2));
        assert_eq!(snapshot.prev_location, Some(s1));
    }

    #[tokio::test]
    async fn test_subscribe_receives_updates_in_order() {
        let backend = backend();
        let id = SubjectId::from("a");
        let mut rx = backend.subscribe(&id);

        let s1 = LocationSample::new(Coordinate::new(37.0, -122.0), Utc::now());
        backend.publish_location(&id, s1).await.unwrap();
        backend.publish_battery(&id, StatusSample::new(80, Utc::now())).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), StatusUpdate::Location(_)));
        assert!(matches!(rx.recv().await.unwrap(), StatusUpdate::Battery(_)));
    }

    #[tokio::test]
    async fn test_sos_raise_and_clear() {
        let backend = backend();
        let id = SubjectId::from("a");
        backend.raise_sos(&id).await.unwrap();
        assert!(backend.snapshot(&id).await.unwrap().sos_active);
        backend.clear_sos(&id).await.unwrap();
        assert!(!backend.snapshot(&id).await.unwrap().sos_active);
    }

    #[tokio::test]
    async fn test_latest_matches_kind_and_fence() {
        let backend = backend();
        let subject_id = SubjectId::from("a");
        backend.append(event("a", AlertKind::GeofenceEntry, Some("home"))).await.unwrap();
        backend.append(event("a", AlertKind::GeofenceEntry, Some("school"))).await.unwrap();
        backend.append(event("a", AlertKind::LowBattery, None)).await.unwrap();

        let home = backend
            .latest(&subject_id, AlertKind::GeofenceEntry, Some(&FenceId::from("home")))
            .await
            .unwrap();
        assert_eq!(home.fence_id, Some(FenceId::from("home")));

        let missing = backend
            .latest(&subject_id, AlertKind::GeofenceExit, Some(&FenceId::from("home")))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound)));

        let battery = backend.latest(&subject_id, AlertKind::LowBattery, None).await.unwrap();
        assert_eq!(battery.kind, AlertKind::LowBattery);
    }

    #[tokio::test]
    async fn test_acknowledge_flips_flag() {
        let backend = backend();
        let id = backend.append(event("a", AlertKind::Info, None)).await.unwrap();
        backend.acknowledge(&id).await.unwrap();
        assert!(backend.events()[0].acknowledged);
        assert!(matches!(
            backend.acknowledge("missing").await,
            Err(StoreError::NotFound)
        ));
    }
}
