//! Lane activity events
//!
//! Agents emit [`LaneEvent`]s on a broadcast [`EventBus`]. Consumers (the CLI
//! summary, tests) subscribe; nothing in the control path depends on them.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use types::LaneEvent;
