//! IO modules - external system interfaces
//!
//! This module contains the boundary to everything the core does not own:
//! - `store` - traits for the registry, fence store, live status store,
//!   durable notification log, and push delivery primitive
//! - `memory` - in-process implementation of the store traits, used by the
//!   demo binary and the test suite

pub mod memory;
pub mod store;

// Re-export commonly used types
pub use memory::{LoggingPush, MemoryBackend};
pub use store::{
    Directory, FenceStore, LiveStore, NotificationLog, PushOutcome, PushSender, StatusUpdate,
    StoreError, SubjectStatus,
};
