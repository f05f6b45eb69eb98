//! Value types held inside the shared coordination state

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::domain::{CyclePhase, LaneId};

/// Progress of the handoff publication addressed to one lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataSendStatus {
    pub sending: bool,
    pub completed: bool,
}

impl DataSendStatus {
    /// Nothing outstanding and nothing owed
    pub const IDLE: DataSendStatus = DataSendStatus {
        sending: false,
        completed: true,
    };

    /// A fresh cycle owes a publication to this lane
    pub const PENDING: DataSendStatus = DataSendStatus {
        sending: false,
        completed: false,
    };

    pub const IN_FLIGHT: DataSendStatus = DataSendStatus {
        sending: true,
        completed: false,
    };
}

impl Default for DataSendStatus {
    fn default() -> Self {
        Self::IDLE
    }
}

/// Reconciliation of the local countdown with the authority's countdown
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountdownSync {
    pub active: bool,
    pub established: bool,
    pub remaining: Duration,
    pub start_time: Option<Instant>,
    pub publisher: Option<LaneId>,
    pub last_publish: Option<Instant>,
}

/// Why active status moved from one lane to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffReason {
    /// The startup window ended
    Startup,
    /// The cycle ran out and the handoff payload was delivered
    CycleComplete,
    /// The active lane overran its budget plus grace
    Timeout,
    /// The authority switched the lane to red
    AuthorityRed,
    /// The authority pre-announced the next lane
    NextLaneReady,
    /// An operator forced a lane active
    Command,
}

impl HandoffReason {
    /// `source` field used on green-permission messages
    pub fn permission_source(self) -> &'static str {
        match self {
            Self::Startup => "local_startup",
            Self::CycleComplete => "local_cycle_complete",
            Self::Timeout => "local_timeout_protection",
            Self::AuthorityRed => "local_authority_red_trigger",
            Self::NextLaneReady => "local_next_lane_ready",
            Self::Command => "local_command",
        }
    }
}

impl fmt::Display for HandoffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Startup => "startup",
            Self::CycleComplete => "cycle-complete",
            Self::Timeout => "timeout",
            Self::AuthorityRed => "authority-red",
            Self::NextLaneReady => "next-lane-ready",
            Self::Command => "command",
        };
        f.write_str(s)
    }
}

/// A completed change of active lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub from: Option<LaneId>,
    pub to: LaneId,
    pub reason: HandoffReason,
    pub at: Instant,
}

/// Per-lane bookkeeping for the current cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleFlags {
    /// Handoff publication already triggered this cycle
    pub handoff_triggered: bool,
    /// A send was forced at expiry this cycle
    pub forced_send: bool,
    /// Realign at the next phase boundary
    pub force_sync: bool,
    /// Last phase the processing worker observed
    pub last_phase: Option<CyclePhase>,
}

/// Startup window bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupState {
    pub began_at: Instant,
    pub started: bool,
    pub own_data_sent: bool,
}

/// Counters kept alongside the state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandoffStats {
    pub cycle_complete: u64,
    pub timeout: u64,
    pub authority_red: u64,
    pub next_lane_ready: u64,
    pub command: u64,
}

impl HandoffStats {
    pub fn record(&mut self, reason: HandoffReason) {
        match reason {
            HandoffReason::Startup => {}
            HandoffReason::CycleComplete => self.cycle_complete += 1,
            HandoffReason::Timeout => self.timeout += 1,
            HandoffReason::AuthorityRed => self.authority_red += 1,
            HandoffReason::NextLaneReady => self.next_lane_ready += 1,
            HandoffReason::Command => self.command += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.cycle_complete + self.timeout + self.authority_red + self.next_lane_ready + self.command
    }
}
