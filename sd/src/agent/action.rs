//! Side effects computed under the shared lock and performed after it is released

use crate::domain::LaneId;
use crate::protocol::Outbound;

/// A publication of cached counts addressed to `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffRequest {
    pub from: LaneId,
    pub target: LaneId,
    /// Lane 1 publishing its own data before the system starts
    pub startup: bool,
}

impl HandoffRequest {
    /// The regular handoff from a lane to its successor
    pub fn next(from: LaneId) -> Self {
        Self {
            from,
            target: from.successor(),
            startup: false,
        }
    }

    pub fn startup(lane: LaneId) -> Self {
        Self {
            from: lane,
            target: lane,
            startup: true,
        }
    }
}

/// Work for the executor
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Publish(Outbound),
    SendHandoff(HandoffRequest),
}
