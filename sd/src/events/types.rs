//! Event types for lane activity streaming

use serde::Serialize;

use crate::domain::{CyclePhase, LaneId};
use crate::state::HandoffReason;

/// Observable lane activity
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum LaneEvent {
    /// The startup window ended and the first lane went active
    SystemStarted { lane: LaneId },

    /// The active lane crossed a phase boundary
    PhaseChanged {
        lane: LaneId,
        phase: CyclePhase,
        remaining_secs: u32,
    },

    /// Active status moved between lanes
    HandoffCompleted {
        from: LaneId,
        to: LaneId,
        reason: HandoffReason,
    },

    /// A handoff payload publication finished
    HandoffPublished {
        from: LaneId,
        target: LaneId,
        delivered: bool,
    },

    /// An authority countdown report was applied
    CountdownAccepted {
        lane: LaneId,
        remaining_secs: u32,
        /// Correction applied, in milliseconds
        offset_ms: u64,
    },

    /// A delivery could not be decoded
    MessageRejected { lane: LaneId, topic: String, reason: String },
}

impl LaneEvent {
    /// Get the event type name for logging/filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SystemStarted { .. } => "SystemStarted",
            Self::PhaseChanged { .. } => "PhaseChanged",
            Self::HandoffCompleted { .. } => "HandoffCompleted",
            Self::HandoffPublished { .. } => "HandoffPublished",
            Self::CountdownAccepted { .. } => "CountdownAccepted",
            Self::MessageRejected { .. } => "MessageRejected",
        }
    }
}
