//! signald - Four-Lane Traffic Signal Coordination
//!
//! signald runs one agent per approach lane of a four-way intersection. The
//! agents share a single coordination state, hand the green phase around the
//! ring 1 → 2 → 3 → 4 → 1, and keep their countdowns aligned with an external
//! signal controller that talks to them over an unreliable pub/sub channel.
//!
//! # Core Concepts
//!
//! - **Exactly One Green**: at most one lane is active at any instant
//! - **Authority First**: controller durations, reds and countdowns override local timing
//! - **Local Liveness**: a timeout guard forces the rotation when the controller goes quiet
//! - **Data Before Handoff**: the successor's counts are published before a normal switch
//!
//! # Modules
//!
//! - [`domain`] - Lane ids, cycle phases, vehicle snapshots
//! - [`state`] - Shared coordination state behind one lock
//! - [`agent`] - Lane agent, cycle driver, protocol handler, timeout guard, data sequencer
//! - [`protocol`] - Topic names and wire messages
//! - [`transport`] - Transport trait and the in-process loopback bus
//! - [`authority`] - Fuzzy green-duration rule and controller simulator
//! - [`detect`] - Frame sources, detectors, count sinks
//! - [`runtime`] - Wires the bus, agents and simulator into one intersection
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod agent;
pub mod authority;
pub mod cli;
pub mod clock;
pub mod config;
pub mod detect;
pub mod domain;
pub mod events;
pub mod protocol;
pub mod runtime;
pub mod state;
pub mod transport;

// Re-export commonly used types
pub use agent::{AgentHandle, Collaborators, CounterSnapshot, LaneAgent, LaneContext};
pub use authority::{AuthoritySimulator, green_duration, is_rush_hour};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{AuthorityConfig, Config, TimingConfig, TransportConfig};
pub use domain::{CyclePhase, LaneId, LaneState, VehicleSnapshot};
pub use events::{EventBus, LaneEvent};
pub use protocol::{Inbound, Outbound, ProtocolError, decode};
pub use runtime::{Intersection, IntersectionReport};
pub use state::{CoordinationState, DataSendStatus, Handoff, HandoffReason, HandoffStats, SharedCoordinationState};
pub use transport::{BusHandle, Inbox, LoopbackBus, Transport, TransportError};
