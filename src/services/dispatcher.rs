//! Notification fan-out to the other group members
//!
//! Durable-first semantics: the NotificationEvent append is the guarantee,
//! push delivery is best-effort. A recipient with no push token still gets
//! the durable record; a provider-reported invalid token is cleared from the
//! recipient's profile so the next dispatch stops trying it.

use crate::domain::alert::{AlertCandidate, NotificationEvent, PushPayload};
use crate::domain::types::Subject;
use crate::infra::metrics::Metrics;
use crate::io::store::{Directory, NotificationLog, PushOutcome, PushSender, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to resolve recipients: {0}")]
    Directory(StoreError),
    #[error("failed to append {failed} of {total} notification events")]
    Append { failed: usize, total: usize },
}

/// Fans one allowed candidate out to every other member of the group
pub struct Dispatcher {
    directory: Arc<dyn Directory>,
    log: Arc<dyn NotificationLog>,
    push: Arc<dyn PushSender>,
    metrics: Arc<Metrics>,
    delivery_timeout: Duration,
    append_retry_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<dyn Directory>,
        log: Arc<dyn NotificationLog>,
        push: Arc<dyn PushSender>,
        metrics: Arc<Metrics>,
        delivery_timeout: Duration,
        append_retry_delay: Duration,
    ) -> Self {
        Self { directory, log, push, metrics, delivery_timeout, append_retry_delay }
    }

    /// Dispatch an allowed candidate.
    ///
    /// Returns the number of recipients on success. Push failures are logged
    /// and swallowed; the result is an error only when a durable append
    /// ultimately failed after its retry.
    pub async fn dispatch(
        &self,
        candidate: &AlertCandidate,
        subject: &Subject,
        fence_name: Option<&str>,
    ) -> Result<usize, DispatchError> {
        let members = self
            .directory
            .group_members(&candidate.group_id)
            .await
            .map_err(DispatchError::Directory)?;

        // Never notify the triggering subject
        let recipients: Vec<&Subject> =
            members.iter().filter(|m| m.id != subject.id).collect();

        let (title, message) = candidate.render(&subject.name, fence_name);

        let mut append_failures = 0usize;
        for recipient in &recipients {
            let event = NotificationEvent::for_recipient(
                candidate,
                recipient.id.clone(),
                title.clone(),
                message.clone(),
            );

            if let Some(token) = recipient.push_token.as_deref() {
                self.deliver(token, &event, recipient).await;
            } else {
                // No delivery address: skip the push, keep the record
                info!(
                    recipient = %recipient.id,
                    kind = %event.kind,
                    "push_skipped_no_token"
                );
            }

            if !self.append_with_retry(event).await {
                append_failures += 1;
            }
        }

        if append_failures > 0 {
            return Err(DispatchError::Append {
                failed: append_failures,
                total: recipients.len(),
            });
        }

        info!(
            subject = %subject.id,
            kind = %candidate.kind,
            fence = ?candidate.fence_id,
            recipients = %recipients.len(),
            "alert_dispatched"
        );
        Ok(recipients.len())
    }

    /// Best-effort push with a hard delivery deadline. Failures never
    /// propagate; an invalid token triggers profile self-healing.
    async fn deliver(&self, token: &str, event: &NotificationEvent, recipient: &Subject) {
        let payload = PushPayload::from_event(event);
        let outcome = match timeout(self.delivery_timeout, self.push.send(token, &payload)).await
        {
            Ok(outcome) => outcome,
            Err(_) => PushOutcome::Failed("delivery timed out".to_string()),
        };

        match outcome {
            PushOutcome::Delivered => {
                self.metrics.record_push_delivered();
            }
            PushOutcome::InvalidToken => {
                self.metrics.record_push_failed();
                warn!(recipient = %recipient.id, "push_token_invalid_clearing");
                match self.directory.clear_push_token(&recipient.id).await {
                    Ok(()) => self.metrics.record_token_cleared(),
                    Err(e) => {
                        warn!(recipient = %recipient.id, error = %e, "token_clear_failed")
                    }
                }
            }
            PushOutcome::Failed(reason) => {
                self.metrics.record_push_failed();
                warn!(
                    recipient = %recipient.id,
                    kind = %event.kind,
                    reason = %reason,
                    "push_delivery_failed"
                );
            }
        }
    }

    /// Append the durable record, retrying once with backoff. This write
    /// must not be silently dropped; the second failure is reported.
    async fn append_with_retry(&self, event: NotificationEvent) -> bool {
        match self.log.append(event.clone()).await {
            Ok(_) => {
                self.metrics.record_event_appended();
                true
            }
            Err(first) => {
                self.metrics.record_append_retry();
                warn!(
                    recipient = %event.recipient_id,
                    kind = %event.kind,
                    error = %first,
                    "event_append_failed_retrying"
                );
                tokio::time::sleep(self.append_retry_delay).await;
                match self.log.append(event.clone()).await {
                    Ok(_) => {
                        self.metrics.record_event_appended();
                        true
                    }
                    Err(second) => {
                        tracing::error!(
                            recipient = %event.recipient_id,
                            kind = %event.kind,
                            error = %second,
                            "event_append_failed_permanently"
                        );
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::AlertKind;
    use crate::domain::geo::Coordinate;
    use crate::domain::types::{FenceId, GroupId, SubjectId};
    use crate::io::memory::MemoryBackend;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    /// Push stand-in that records sends and returns a scripted outcome
    struct ScriptedPush {
        outcome: PushOutcome,
        sent: Mutex<Vec<String>>,
    }

    impl ScriptedPush {
        fn new(outcome: PushOutcome) -> Self {
            Self { outcome, sent: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl PushSender for ScriptedPush {
        async fn send(&self, token: &str, _payload: &PushPayload) -> PushOutcome {
            self.sent.lock().push(token.to_string());
            self.outcome.clone()
        }
    }

    fn subject(id: &str, token: Option<&str>) -> Subject {
        Subject {
            id: SubjectId::from(id),
            name: id.to_uppercase(),
            group_id: Some(GroupId::from("g1")),
            sharing_enabled: true,
            battery_alerts_enabled: true,
            push_token: token.map(String::from),
        }
    }

    fn candidate(subject: &str) -> AlertCandidate {
        AlertCandidate {
            kind: AlertKind::GeofenceEntry,
            subject_id: SubjectId::from(subject),
            group_id: GroupId::from("g1"),
            fence_id: Some(FenceId::from("home")),
            location: Some(Coordinate::new(37.0, -122.0)),
            battery_pct: None,
            occurred_at: Utc::now(),
        }
    }

    fn dispatcher(
        backend: Arc<MemoryBackend>,
        push: Arc<dyn PushSender>,
    ) -> Dispatcher {
        Dispatcher::new(
            backend.clone(),
            backend,
            push,
            Arc::new(Metrics::new()),
            Duration::from_secs(10),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn test_never_notifies_triggering_subject() {
        let backend = Arc::new(MemoryBackend::new(50.0, 5000.0));
        backend.upsert_subject(subject("a", Some("tok-a")));
        backend.upsert_subject(subject("b", Some("tok-b")));
        backend.upsert_subject(subject("c", Some("tok-c")));

        let push = Arc::new(ScriptedPush::new(PushOutcome::Delivered));
        let d = dispatcher(backend.clone(), push.clone());

        let sender = subject("a", Some("tok-a"));
        let count = d.dispatch(&candidate("a"), &sender, Some("Home")).await.unwrap();

        assert_eq!(count, 2);
        let events = backend.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.recipient_id != SubjectId::from("a")));
        assert!(events.iter().all(|e| e.subject_id == SubjectId::from("a")));
        assert!(!push.sent.lock().contains(&"tok-a".to_string()));
    }

    #[tokio::test]
    async fn test_missing_token_still_records_event() {
        let backend = Arc::new(MemoryBackend::new(50.0, 5000.0));
        backend.upsert_subject(subject("a", Some("tok-a")));
        backend.upsert_subject(subject("b", None));

        let push = Arc::new(ScriptedPush::new(PushOutcome::Delivered));
        let d = dispatcher(backend.clone(), push.clone());

        d.dispatch(&candidate("a"), &subject("a", Some("tok-a")), Some("Home"))
            .await
            .unwrap();

        assert!(push.sent.lock().is_empty());
        assert_eq!(backend.events().len(), 1);
        assert_eq!(backend.events()[0].recipient_id, SubjectId::from("b"));
    }

    #[tokio::test]
    async fn test_invalid_token_cleared_from_profile() {
        let backend = Arc::new(MemoryBackend::new(50.0, 5000.0));
        backend.upsert_subject(subject("a", Some("tok-a")));
        backend.upsert_subject(subject("b", Some("tok-stale")));

        let push = Arc::new(ScriptedPush::new(PushOutcome::InvalidToken));
        let d = dispatcher(backend.clone(), push);

        d.dispatch(&candidate("a"), &subject("a", Some("tok-a")), Some("Home"))
            .await
            .unwrap();

        // Token self-healed, event still recorded
        let b = backend.subject(&SubjectId::from("b")).await.unwrap();
        assert_eq!(b.push_token, None);
        assert_eq!(backend.events().len(), 1);
    }

    #[tokio::test]
    async fn test_push_failure_swallowed() {
        let backend = Arc::new(MemoryBackend::new(50.0, 5000.0));
        backend.upsert_subject(subject("a", Some("tok-a")));
        backend.upsert_subject(subject("b", Some("tok-b")));

        let push = Arc::new(ScriptedPush::new(PushOutcome::Failed("unreachable".to_string())));
        let d = dispatcher(backend.clone(), push);

        let result = d
            .dispatch(&candidate("a"), &subject("a", Some("tok-a")), Some("Home"))
            .await;

        assert!(result.is_ok());
        assert_eq!(backend.events().len(), 1);
    }

    /// Log that fails the next `failures_left` appends, then succeeds
    struct FlakyLog {
        inner: Arc<MemoryBackend>,
        failures_left: Mutex<usize>,
    }

    #[async_trait]
    impl NotificationLog for FlakyLog {
        async fn latest(
            &self,
            subject: &SubjectId,
            kind: AlertKind,
            fence: Option<&FenceId>,
        ) -> Result<NotificationEvent, StoreError> {
            self.inner.latest(subject, kind, fence).await
        }

        async fn append(&self, event: NotificationEvent) -> Result<String, StoreError> {
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(StoreError::Unavailable("write failed".to_string()));
                }
            }
            self.inner.append(event).await
        }

        async fn acknowledge(&self, id: &str) -> Result<(), StoreError> {
            self.inner.acknowledge(id).await
        }

        fn subscribe_recipient(
            &self,
            recipient: &SubjectId,
        ) -> tokio::sync::broadcast::Receiver<NotificationEvent> {
            self.inner.subscribe_recipient(recipient)
        }
    }

    #[tokio::test]
    async fn test_append_retried_once_then_succeeds() {
        let backend = Arc::new(MemoryBackend::new(50.0, 5000.0));
        backend.upsert_subject(subject("a", None));
        backend.upsert_subject(subject("b", None));

        let log = Arc::new(FlakyLog { inner: backend.clone(), failures_left: Mutex::new(1) });
        let d = Dispatcher::new(
            backend.clone(),
            log,
            Arc::new(ScriptedPush::new(PushOutcome::Delivered)),
            Arc::new(Metrics::new()),
            Duration::from_secs(10),
            Duration::from_millis(1),
        );

        let result = d.dispatch(&candidate("a"), &subject("a", None), Some("Home")).await;
        assert!(result.is_ok());
        assert_eq!(backend.events().len(), 1);
    }

    #[tokio::test]
    async fn test_append_failure_after_retry_is_reported() {
        let backend = Arc::new(MemoryBackend::new(50.0, 5000.0));
        backend.upsert_subject(subject("a", None));
        backend.upsert_subject(subject("b", None));

        let log = Arc::new(FlakyLog { inner: backend.clone(), failures_left: Mutex::new(2) });
        let d = Dispatcher::new(
            backend.clone(),
            log,
            Arc::new(ScriptedPush::new(PushOutcome::Delivered)),
            Arc::new(Metrics::new()),
            Duration::from_secs(10),
            Duration::from_millis(1),
        );

        let result = d.dispatch(&candidate("a"), &subject("a", None), Some("Home")).await;
        assert!(matches!(result, Err(DispatchError::Append { failed: 1, total: 1 })));
    }
}
