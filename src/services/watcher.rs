//! Per-subject stream watchers and their supervising coordinator
//!
//! Each watched subject gets one task that owns its live-store subscription
//! and its last-sample cache. Per-subject ordering falls out of the single
//! task draining its own stream; different subjects proceed in parallel with
//! no shared mutable state. The coordinator diffs the member set on every
//! membership change, starting and stopping watchers - no ambient global
//! listener maps.

use crate::domain::types::{GroupId, LocationSample, Subject, SubjectId};
use crate::services::engine::{AlertEngine, EngineError};
use crate::io::store::{LiveStore, StatusUpdate};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a running subject watcher
struct WatcherHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Event loop for one subject.
///
/// The last-sample cache is owned here and nowhere else; tearing the task
/// down discards it, so a re-added subject necessarily starts from the
/// "previous absent" state.
async fn run_watcher(
    subject_id: SubjectId,
    engine: Arc<AlertEngine>,
    mut updates: broadcast::Receiver<StatusUpdate>,
    mut stop: watch::Receiver<bool>,
) {
    let mut last_location: Option<LocationSample> = None;
    let mut last_battery: Option<u8> = None;

    debug!(subject = %subject_id, "watcher_started");
    loop {
        tokio::select! {
            changed = stop.changed() => {
                // A dropped stop handle means the coordinator is gone
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            update = updates.recv() => {
                match update {
                    Ok(StatusUpdate::Location(cur)) => {
                        match engine.evaluate_location(&subject_id, last_location, cur).await {
                            Ok(_) => last_location = Some(cur),
                            Err(EngineError::Dispatch(e)) => {
                                // Detection succeeded; the cache must advance
                                // or the next sample would re-derive the same
                                // transition against a stale previous
                                warn!(subject = %subject_id, error = %e, "dispatch_failed");
                                last_location = Some(cur);
                            }
                            Err(e) => {
                                warn!(subject = %subject_id, error = %e, "evaluation_failed");
                            }
                        }
                    }
                    Ok(StatusUpdate::Battery(cur)) => {
                        match engine
                            .evaluate_battery(&subject_id, last_battery, cur)
                            .await
                        {
                            Ok(_) => last_battery = Some(cur.battery_pct),
                            Err(EngineError::Dispatch(e)) => {
                                warn!(subject = %subject_id, error = %e, "dispatch_failed");
                                last_battery = Some(cur.battery_pct);
                            }
                            Err(e) => {
                                warn!(subject = %subject_id, error = %e, "evaluation_failed");
                            }
                        }
                    }
                    Ok(StatusUpdate::Sos) => {
                        if let Err(e) = engine.evaluate_sos(&subject_id).await {
                            warn!(subject = %subject_id, error = %e, "sos_evaluation_failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Samples were dropped; prior presence is unknown
                        // again and must not fabricate a transition
                        warn!(
                            subject = %subject_id,
                            skipped = %skipped,
                            "watcher_lagged_cache_reset"
                        );
                        last_location = None;
                        last_battery = None;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    debug!(subject = %subject_id, "watcher_stopped");
}

/// Supervises one watcher per watchable subject
pub struct Coordinator {
    engine: Arc<AlertEngine>,
    live: Arc<dyn LiveStore>,
    watchers: FxHashMap<SubjectId, WatcherHandle>,
}

impl Coordinator {
    pub fn new(engine: Arc<AlertEngine>, live: Arc<dyn LiveStore>) -> Self {
        Self { engine, live, watchers: FxHashMap::default() }
    }

    /// Reconcile running watchers against the current member set.
    ///
    /// Members that stopped being watchable (left the group, disabled
    /// sharing) are torn down and their caches dropped; new watchable
    /// members get a fresh watcher.
    pub fn sync_members(&mut self, members: &[Subject]) {
        let wanted: FxHashMap<&SubjectId, &Subject> =
            members.iter().filter(|s| s.is_watchable()).map(|s| (&s.id, s)).collect();

        let stale: Vec<SubjectId> = self
            .watchers
            .keys()
            .filter(|id| !wanted.contains_key(id))
            .cloned()
            .collect();
        for id in stale {
            self.unwatch(&id);
        }

        for subject in wanted.values() {
            if !self.watchers.contains_key(&subject.id) {
                self.watch(subject);
            }
        }
    }

    fn watch(&mut self, subject: &Subject) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let updates = self.live.subscribe(&subject.id);
        let task = tokio::spawn(run_watcher(
            subject.id.clone(),
            self.engine.clone(),
            updates,
            stop_rx,
        ));
        info!(subject = %subject.id, "subject_watch_started");
        self.watchers.insert(subject.id.clone(), WatcherHandle { stop: stop_tx, task });
    }

    fn unwatch(&mut self, id: &SubjectId) {
        if let Some(handle) = self.watchers.remove(id) {
            info!(subject = %id, "subject_watch_stopped");
            let _ = handle.stop.send(true);
            // The watcher exits at its next loop turn; aborting here would
            // risk cutting a dispatch mid-append
            drop(handle.task);
        }
    }

    pub fn active_count(&self) -> usize {
        self.watchers.len()
    }

    /// Run until shutdown: reconcile on membership changes and keep the
    /// engine's fence cache fresh from the store's change stream.
    pub async fn run(
        mut self,
        mut membership: watch::Receiver<Vec<Subject>>,
        mut fence_changes: broadcast::Receiver<GroupId>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.sync_members(&membership.borrow().clone());

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                changed = membership.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let members = membership.borrow().clone();
                    self.sync_members(&members);
                }
                change = fence_changes.recv() => {
                    match change {
                        Ok(group) => self.engine.invalidate_fences(&group),
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Missed invalidations: flush nothing specific,
                            // the next one will; evaluations tolerate a
                            // briefly stale fence set
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        let ids: Vec<SubjectId> = self.watchers.keys().cloned().collect();
        for id in ids {
            self.unwatch(&id);
        }
        info!("coordinator_stopped");
    }
}
