//! Alert engine - the shared evaluation core
//!
//! One implementation of detect -> cooldown -> dispatch, invoked identically
//! by the per-subject watcher loop (client runtime) and by the `evaluate`
//! reentry point (server trigger runtime). Neither runtime is authoritative:
//! cooldown state lives in the durable log, and each runtime supplies its own
//! `previous` sample (the watcher from its cache, the trigger from the live
//! store's before/after snapshot).

use crate::domain::alert::{AlertCandidate, AlertKind};
use crate::domain::types::{Geofence, GroupId, LocationSample, StatusSample, Subject, SubjectId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::cooldown::{BlockReason, CooldownGate, GateDecision};
use crate::services::detector;
use crate::services::dispatcher::{DispatchError, Dispatcher};
use crate::io::store::{
    Directory, FenceStore, LiveStore, NotificationLog, PushSender, StoreError,
};
use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("subject lookup failed: {0}")]
    Subject(StoreError),
    #[error("fence lookup failed: {0}")]
    Fences(StoreError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Shared evaluation core for both runtime adapters
pub struct AlertEngine {
    directory: Arc<dyn Directory>,
    fence_store: Arc<dyn FenceStore>,
    live: Arc<dyn LiveStore>,
    log: Arc<dyn NotificationLog>,
    gate: CooldownGate,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    battery_threshold_pct: u8,
    min_radius_m: f64,
    max_radius_m: f64,
    /// Per-group fence cache, invalidated by the store's change stream
    fence_cache: RwLock<FxHashMap<GroupId, Arc<Vec<Geofence>>>>,
}

impl AlertEngine {
    pub fn new(
        config: &Config,
        directory: Arc<dyn Directory>,
        fence_store: Arc<dyn FenceStore>,
        live: Arc<dyn LiveStore>,
        log: Arc<dyn NotificationLog>,
        push: Arc<dyn PushSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let gate = CooldownGate::new(config.fence_cooldown(), config.low_battery_cooldown());
        let dispatcher = Dispatcher::new(
            directory.clone(),
            log.clone(),
            push,
            metrics.clone(),
            config.delivery_timeout(),
            config.append_retry_delay(),
        );
        Self {
            directory,
            fence_store,
            live,
            log,
            gate,
            dispatcher,
            metrics,
            battery_threshold_pct: config.battery_threshold_pct(),
            min_radius_m: config.min_radius_m(),
            max_radius_m: config.max_radius_m(),
            fence_cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Drop a group's cached fence set; the next evaluation re-lists it
    pub fn invalidate_fences(&self, group: &GroupId) {
        if self.fence_cache.write().remove(group).is_some() {
            debug!(group = %group, "fence_cache_invalidated");
        }
    }

    async fn fences_for(&self, group: &GroupId) -> Result<Arc<Vec<Geofence>>, StoreError> {
        if let Some(cached) = self.fence_cache.read().get(group) {
            return Ok(cached.clone());
        }
        let fences = Arc::new(self.fence_store.list_fences(group).await?);
        self.fence_cache.write().insert(group.clone(), fences.clone());
        Ok(fences)
    }

    /// Evaluate one location sample pair for a subject.
    ///
    /// Returns the number of candidates that passed the gate and were
    /// dispatched. With `prev` absent nothing can be emitted (first-sample
    /// rule); the caller still advances its cache.
    pub async fn evaluate_location(
        &self,
        subject_id: &SubjectId,
        prev: Option<LocationSample>,
        cur: LocationSample,
    ) -> Result<usize, EngineError> {
        self.metrics.record_sample();

        let subject = self
            .directory
            .subject(subject_id)
            .await
            .map_err(EngineError::Subject)?;
        let Some(group_id) = subject.group_id.clone().filter(|_| subject.sharing_enabled) else {
            return Ok(0);
        };

        let fences = self.fences_for(&group_id).await.map_err(EngineError::Fences)?;
        let transitions = detector::fence_transitions(
            prev.as_ref(),
            &cur,
            &fences,
            self.min_radius_m,
            self.max_radius_m,
        );

        let mut dispatched = 0;
        for transition in transitions {
            self.metrics.record_transition();
            let candidate = AlertCandidate {
                kind: transition.kind,
                subject_id: subject.id.clone(),
                group_id: group_id.clone(),
                fence_id: Some(transition.fence_id.clone()),
                location: Some(cur.coord),
                battery_pct: None,
                occurred_at: cur.captured_at,
            };
            if self
                .gate_and_dispatch(&candidate, &subject, Some(&transition.fence_name))
                .await?
            {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Evaluate one battery sample pair for a subject
    pub async fn evaluate_battery(
        &self,
        subject_id: &SubjectId,
        prev: Option<u8>,
        cur: StatusSample,
    ) -> Result<usize, EngineError> {
        self.metrics.record_sample();

        let subject = self
            .directory
            .subject(subject_id)
            .await
            .map_err(EngineError::Subject)?;
        let Some(group_id) = subject
            .group_id
            .clone()
            .filter(|_| subject.battery_alerts_enabled)
        else {
            return Ok(0);
        };

        if !detector::battery_crossed(prev, cur.battery_pct, self.battery_threshold_pct) {
            return Ok(0);
        }
        self.metrics.record_transition();

        let candidate = AlertCandidate {
            kind: AlertKind::LowBattery,
            subject_id: subject.id.clone(),
            group_id,
            fence_id: None,
            location: None,
            battery_pct: Some(cur.battery_pct),
            occurred_at: cur.captured_at,
        };
        Ok(self.gate_and_dispatch(&candidate, &subject, None).await? as usize)
    }

    /// Consume an SOS trigger: dispatch immediately, then re-arm.
    ///
    /// The reset write is retried once; the trigger is only considered
    /// consumed once the reset (or its retry) succeeded.
    pub async fn evaluate_sos(&self, subject_id: &SubjectId) -> Result<usize, EngineError> {
        let subject = self
            .directory
            .subject(subject_id)
            .await
            .map_err(EngineError::Subject)?;
        let Some(group_id) = subject.group_id.clone() else {
            return Ok(0);
        };

        let location = self
            .live
            .snapshot(subject_id)
            .await
            .ok()
            .and_then(|s| s.location)
            .map(|s| s.coord);

        let candidate = AlertCandidate {
            kind: AlertKind::Sos,
            subject_id: subject.id.clone(),
            group_id,
            fence_id: None,
            location,
            battery_pct: None,
            occurred_at: Utc::now(),
        };
        info!(subject = %subject.id, "sos_triggered");
        let dispatched = self.gate_and_dispatch(&candidate, &subject, None).await? as usize;

        // Re-arm for the next press
        if let Err(first) = self.live.clear_sos(subject_id).await {
            self.metrics.record_sos_reset_retry();
            warn!(subject = %subject_id, error = %first, "sos_reset_failed_retrying");
            if let Err(second) = self.live.clear_sos(subject_id).await {
                warn!(subject = %subject_id, error = %second, "sos_reset_failed_permanently");
            }
        }
        Ok(dispatched)
    }

    /// Server-trigger reentry point, keyed on "location or battery changed".
    ///
    /// A free-standing function of durable reads: the previous sample comes
    /// from the live store's retained before/after pair, never from memory
    /// shared with the client runtime.
    pub async fn evaluate(&self, subject_id: &SubjectId) -> Result<usize, EngineError> {
        let snapshot = match self.live.snapshot(subject_id).await {
            Ok(s) => s,
            Err(StoreError::NotFound) => return Ok(0),
            Err(e) => return Err(EngineError::Subject(e)),
        };

        let mut dispatched = 0;
        if snapshot.sos_active {
            dispatched += self.evaluate_sos(subject_id).await?;
        }
        if let Some(cur) = snapshot.location {
            dispatched += self
                .evaluate_location(subject_id, snapshot.prev_location, cur)
                .await?;
        }
        if let Some(cur) = snapshot.battery {
            dispatched += self
                .evaluate_battery(
                    subject_id,
                    snapshot.prev_battery.map(|b| b.battery_pct),
                    cur,
                )
                .await?;
        }
        Ok(dispatched)
    }

    /// Run one candidate through the gate and, if allowed, the dispatcher
    async fn gate_and_dispatch(
        &self,
        candidate: &AlertCandidate,
        subject: &Subject,
        fence_name: Option<&str>,
    ) -> Result<bool, EngineError> {
        let decision = self
            .gate
            .check(
                self.log.as_ref(),
                &candidate.subject_id,
                candidate.kind,
                candidate.fence_id.as_ref(),
                Utc::now(),
            )
            .await;

        match decision {
            GateDecision::Allow => {
                self.dispatcher.dispatch(candidate, subject, fence_name).await?;
                Ok(true)
            }
            GateDecision::Blocked(BlockReason::Cooldown { remaining_secs }) => {
                self.metrics.record_blocked_cooldown();
                debug!(
                    subject = %candidate.subject_id,
                    kind = %candidate.kind,
                    remaining_secs = %remaining_secs,
                    "candidate_suppressed_cooldown"
                );
                Ok(false)
            }
            GateDecision::Blocked(BlockReason::StoreFault) => {
                self.metrics.record_blocked_fault();
                Ok(false)
            }
        }
    }
}
