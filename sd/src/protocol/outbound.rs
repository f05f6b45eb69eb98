//! Outbound messages and their wire payloads

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::topics;
use crate::clock::Clock;
use crate::domain::{CyclePhase, LaneId, VehicleClass, VehicleSnapshot};
use crate::state::HandoffReason;

/// Format used for human-readable timestamps on the wire
pub const WALL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Vehicle counts addressed to a lane
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleCount {
    pub road_section_id: LaneId,
    pub total_vehicles: u32,
    pub vehicle_counts: BTreeMap<VehicleClass, u32>,
    pub timestamp: String,
    pub duration: f64,
    pub lane_id: LaneId,
}

impl VehicleCount {
    /// Describe `snapshot` as the data for `target`
    pub fn for_target(target: LaneId, snapshot: &VehicleSnapshot, green: Duration) -> Self {
        Self {
            road_section_id: target,
            total_vehicles: snapshot.total(),
            vehicle_counts: snapshot.counts.clone(),
            timestamp: snapshot.timestamp.format(WALL_FORMAT).to_string(),
            duration: green.as_secs_f64(),
            lane_id: target,
        }
    }
}

/// Local countdown report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountdownSync {
    pub lane_id: LaneId,
    pub remaining_seconds: u32,
    pub phase: CyclePhase,
    pub timestamp: f64,
    pub source: &'static str,
}

impl CountdownSync {
    pub fn local(lane: LaneId, remaining_seconds: u32, phase: CyclePhase, clock: &dyn Clock) -> Self {
        Self {
            lane_id: lane,
            remaining_seconds,
            phase,
            timestamp: clock.epoch_secs(),
            source: "local",
        }
    }
}

/// Permission for the next lane to go green
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GreenPermission {
    pub section: LaneId,
    pub permission: &'static str,
    pub timestamp: f64,
    pub source: &'static str,
}

impl GreenPermission {
    pub fn granted(section: LaneId, reason: HandoffReason, clock: &dyn Clock) -> Self {
        Self {
            section,
            permission: "granted",
            timestamp: clock.epoch_secs(),
            source: reason.permission_source(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneActivity {
    Active,
    Standby,
}

/// Retained per-lane status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneStatus {
    pub status: LaneActivity,
    pub lane_id: LaneId,
    pub timestamp: String,
}

/// Acknowledgment of an administrative command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandAck {
    pub received: String,
    pub timestamp: String,
}

/// Everything a lane agent publishes
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    VehicleCount(VehicleCount),
    CountdownSync(CountdownSync),
    GreenPermission(GreenPermission),
    LaneStatus(LaneStatus),
    CommandAck { lane: LaneId, ack: CommandAck },
    Presence { lane: LaneId, online: bool },
}

impl Outbound {
    pub fn lane_status(lane: LaneId, active: bool, clock: &dyn Clock) -> Self {
        Self::LaneStatus(LaneStatus {
            status: if active { LaneActivity::Active } else { LaneActivity::Standby },
            lane_id: lane,
            timestamp: clock.wall().format(WALL_FORMAT).to_string(),
        })
    }

    pub fn command_ack(lane: LaneId, received: &str, clock: &dyn Clock) -> Self {
        Self::CommandAck {
            lane,
            ack: CommandAck {
                received: received.to_string(),
                timestamp: clock.wall().format(WALL_FORMAT).to_string(),
            },
        }
    }

    pub fn topic(&self) -> String {
        match self {
            Self::VehicleCount(_) => topics::VEHICLE_COUNT.to_string(),
            Self::CountdownSync(_) => topics::COUNTDOWN_SYNC.to_string(),
            Self::GreenPermission(_) => topics::GREEN_PERMISSION.to_string(),
            Self::LaneStatus(s) => topics::lane_status(s.lane_id),
            Self::CommandAck { lane, .. } => topics::command_ack(*lane),
            Self::Presence { lane, .. } => topics::presence(*lane),
        }
    }

    /// Whether the channel should keep this as the topic's last value
    pub fn retain(&self) -> bool {
        matches!(self, Self::VehicleCount(_) | Self::LaneStatus(_) | Self::Presence { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::VehicleCount(_) => "vehicle_count",
            Self::CountdownSync(_) => "countdown_sync",
            Self::GreenPermission(_) => "green_permission",
            Self::LaneStatus(_) => "lane_status",
            Self::CommandAck { .. } => "command_ack",
            Self::Presence { .. } => "presence",
        }
    }

    /// Serialize the payload; presence is a bare word, the rest JSON
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::VehicleCount(m) => serde_json::to_string(m),
            Self::CountdownSync(m) => serde_json::to_string(m),
            Self::GreenPermission(m) => serde_json::to_string(m),
            Self::LaneStatus(m) => serde_json::to_string(m),
            Self::CommandAck { ack, .. } => serde_json::to_string(ack),
            Self::Presence { online, .. } => Ok(if *online { "online" } else { "offline" }.to_string()),
        }
    }
}
