//! Lock-free metrics collection and periodic reporting
//!
//! Counters are plain Relaxed atomics - statistics only, never used for
//! coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Alert pipeline counters
pub struct Metrics {
    started_at: Instant,
    samples_seen: AtomicU64,
    transitions_emitted: AtomicU64,
    blocked_cooldown: AtomicU64,
    blocked_fault: AtomicU64,
    events_appended: AtomicU64,
    append_retries: AtomicU64,
    pushes_delivered: AtomicU64,
    pushes_failed: AtomicU64,
    tokens_cleared: AtomicU64,
    sos_reset_retries: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            samples_seen: AtomicU64::new(0),
            transitions_emitted: AtomicU64::new(0),
            blocked_cooldown: AtomicU64::new(0),
            blocked_fault: AtomicU64::new(0),
            events_appended: AtomicU64::new(0),
            append_retries: AtomicU64::new(0),
            pushes_delivered: AtomicU64::new(0),
            pushes_failed: AtomicU64::new(0),
            tokens_cleared: AtomicU64::new(0),
            sos_reset_retries: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_sample(&self) {
        self.samples_seen.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition(&self) {
        self.transitions_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_blocked_cooldown(&self) {
        self.blocked_cooldown.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_blocked_fault(&self) {
        self.blocked_fault.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_appended(&self) {
        self.events_appended.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_append_retry(&self) {
        self.append_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_push_delivered(&self) {
        self.pushes_delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_push_failed(&self) {
        self.pushes_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_token_cleared(&self) {
        self.tokens_cleared.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sos_reset_retry(&self) {
        self.sos_reset_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current totals
    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            uptime_secs: self.started_at.elapsed().as_secs(),
            samples_seen: self.samples_seen.load(Ordering::Relaxed),
            transitions_emitted: self.transitions_emitted.load(Ordering::Relaxed),
            blocked_cooldown: self.blocked_cooldown.load(Ordering::Relaxed),
            blocked_fault: self.blocked_fault.load(Ordering::Relaxed),
            events_appended: self.events_appended.load(Ordering::Relaxed),
            append_retries: self.append_retries.load(Ordering::Relaxed),
            pushes_delivered: self.pushes_delivered.load(Ordering::Relaxed),
            pushes_failed: self.pushes_failed.load(Ordering::Relaxed),
            tokens_cleared: self.tokens_cleared.load(Ordering::Relaxed),
            sos_reset_retries: self.sos_reset_retries.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time totals for logging
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub samples_seen: u64,
    pub transitions_emitted: u64,
    pub blocked_cooldown: u64,
    pub blocked_fault: u64,
    pub events_appended: u64,
    pub append_retries: u64,
    pub pushes_delivered: u64,
    pub pushes_failed: u64,
    pub tokens_cleared: u64,
    pub sos_reset_retries: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            samples = %self.samples_seen,
            transitions = %self.transitions_emitted,
            blocked_cooldown = %self.blocked_cooldown,
            blocked_fault = %self.blocked_fault,
            events = %self.events_appended,
            append_retries = %self.append_retries,
            push_ok = %self.pushes_delivered,
            push_failed = %self.pushes_failed,
            tokens_cleared = %self.tokens_cleared,
            sos_reset_retries = %self.sos_reset_retries,
            "metrics_summary"
        );
    }
}
