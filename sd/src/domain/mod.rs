//! Domain types for signald
//!
//! Lane identity, cycle timing and the vehicle snapshots that travel
//! between lanes at handoff.

mod cycle;
mod lane;
mod snapshot;

pub use cycle::{CYCLE_OVERHEAD, CyclePhase, GREEN_TO_RED, LaneState, RED_TO_GREEN, whole_secs};
pub use lane::{LaneId, LaneIdError};
pub use snapshot::{VehicleClass, VehicleSnapshot};
