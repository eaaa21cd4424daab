//! Cooldown / deduplication gate over the durable notification log
//!
//! Cooldown state is anchored in the log, not in local memory, so the client
//! loop and the server trigger cannot double-fire past each other beyond the
//! documented check-then-act window. The gate itself holds no mutable state.

use crate::domain::alert::AlertKind;
use crate::domain::types::{FenceId, SubjectId};
use crate::io::store::{NotificationLog, StoreError};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tracing::{debug, error};

/// Why a candidate was not allowed through
#[derive(Debug, Clone, PartialEq)]
pub enum BlockReason {
    /// A matching event exists inside the cooldown window
    Cooldown { remaining_secs: i64 },
    /// The dedup ledger could not be read; fail closed rather than storm
    StoreFault,
}

/// Gate decision for one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow,
    Blocked(BlockReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Stateless cooldown checker with per-kind windows
#[derive(Debug, Clone)]
pub struct CooldownGate {
    fence_window: Duration,
    battery_window: Duration,
}

impl CooldownGate {
    pub fn new(fence_window: Duration, battery_window: Duration) -> Self {
        Self { fence_window, battery_window }
    }

    /// Cooldown window for an alert kind. SOS always fires; info events have
    /// no detector source and carry no window either.
    pub fn window_for(&self, kind: AlertKind) -> Duration {
        match kind {
            AlertKind::Sos | AlertKind::Info => Duration::ZERO,
            AlertKind::LowBattery => self.battery_window,
            AlertKind::GeofenceEntry | AlertKind::GeofenceExit => self.fence_window,
        }
    }

    /// Decide whether a candidate may proceed to dispatch.
    ///
    /// Queries the most recent matching log entry; entry/exit are keyed
    /// independently per fence. `NotFound` means no prior record; any other
    /// read fault blocks dispatch.
    pub async fn check(
        &self,
        log: &dyn NotificationLog,
        subject: &SubjectId,
        kind: AlertKind,
        fence: Option<&FenceId>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let window = self.window_for(kind);
        if window.is_zero() {
            return GateDecision::Allow;
        }

        let prior = match log.latest(subject, kind, fence).await {
            Ok(event) => event,
            Err(StoreError::NotFound) => return GateDecision::Allow,
            Err(e) => {
                error!(
                    subject = %subject,
                    kind = %kind,
                    error = %e,
                    "cooldown_read_failed_blocking"
                );
                return GateDecision::Blocked(BlockReason::StoreFault);
            }
        };

        let elapsed = now.signed_duration_since(prior.occurred_at);
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        if elapsed < window {
            let remaining_secs = (window - elapsed).num_seconds();
            debug!(
                subject = %subject,
                kind = %kind,
                fence = ?fence,
                remaining_secs = %remaining_secs,
                "cooldown_blocked"
            );
            return GateDecision::Blocked(BlockReason::Cooldown { remaining_secs });
        }

        GateDecision::Allow
    }
}
