//! Shared coordination state
//!
//! One [`SharedCoordinationState`] is created per process and handed to each
//! lane agent behind an `Arc`. It is the only object in the system that needs
//! mutual exclusion.

mod shared;
mod types;

pub use shared::{CoordinationState, SharedCoordinationState};
pub use types::{CountdownSync, CycleFlags, DataSendStatus, Handoff, HandoffReason, HandoffStats, StartupState};
