//! Fenceline library
//!
//! Shared alert-evaluation core for the family locator. Both runtime
//! adapters (the foreground watcher loop and the server-side trigger)
//! run the same detection, cooldown, and dispatch modules; only the
//! wiring differs.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
