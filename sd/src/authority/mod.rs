//! Signal authority simulation
//!
//! The lanes coordinate with an external controller that owns the physical
//! signals. [`AuthoritySimulator`] plays that controller on the loopback
//! bus so a full intersection can run in one process.

mod fuzzy;
mod simulator;

pub use fuzzy::{green_duration, is_rush_hour};
pub use simulator::AuthoritySimulator;
