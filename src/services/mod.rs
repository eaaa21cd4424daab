//! Services - business logic and state management
//!
//! This module contains the core alert pipeline:
//! - `detector` - Pure transition detection (fence entry/exit, battery edge)
//! - `cooldown` - Deduplication gate over the durable notification log
//! - `dispatcher` - Fan-out to group members with durable-first semantics
//! - `engine` - Shared detect/gate/dispatch core for both runtime adapters
//! - `watcher` - Per-subject stream watchers and the supervising coordinator

pub mod cooldown;
pub mod detector;
pub mod dispatcher;
pub mod engine;
pub mod watcher;

// Re-export commonly used types
pub use cooldown::{CooldownGate, GateDecision};
pub use dispatcher::Dispatcher;
pub use engine::AlertEngine;
pub use watcher::Coordinator;
