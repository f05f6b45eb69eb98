//! Inbound coordination messages
//!
//! Raw `(topic, payload)` pairs are decoded exactly once, here, into
//! [`Inbound`]. Anything that does not fit a known shape becomes
//! [`ProtocolError::Malformed`] and never reaches the shared state.

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::error::ProtocolError;
use super::topics;
use crate::domain::LaneId;

/// Signal state reported by the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Green,
    Red,
}

/// Administrative commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    SetActive,
    SendUpdate,
    ForceSync,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetActive => "set_active",
            Self::SendUpdate => "send_update",
            Self::ForceSync => "force_sync",
        }
    }
}

/// Who a command was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTarget {
    Lane(LaneId),
    All,
}

/// A decoded coordination message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    DurationUpdate {
        lane: LaneId,
        green: Duration,
    },
    AuthorityPhase {
        lane: LaneId,
        signal: Signal,
    },
    CountdownReport {
        lane: LaneId,
        remaining_secs: u32,
        phase: String,
        timestamp: f64,
    },
    NextLaneReady {
        next: LaneId,
        from: LaneId,
    },
    Command {
        command: CommandKind,
        target: CommandTarget,
    },
}

impl Inbound {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DurationUpdate { .. } => "duration_update",
            Self::AuthorityPhase { .. } => "authority_phase",
            Self::CountdownReport { .. } => "countdown_report",
            Self::NextLaneReady { .. } => "next_lane_ready",
            Self::Command { .. } => "command",
        }
    }
}

#[derive(Deserialize)]
struct DurationWire {
    lane_id: Option<i64>,
    duration: Option<f64>,
    road_section_id: Option<i64>,
}

#[derive(Deserialize)]
struct GreenStatusWire {
    section: i64,
    status: Signal,
}

#[derive(Deserialize)]
struct CountdownWire {
    lane_id: i64,
    remaining_seconds: i64,
    #[serde(default)]
    phase: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    timestamp: f64,
}

#[derive(Deserialize)]
struct NextLaneWire {
    next_expected_section: i64,
    from_lane: i64,
}

#[derive(Deserialize)]
struct CommandWire {
    command: CommandKind,
}

/// Source tag the authority puts on its countdown reports
pub const AUTHORITY_SOURCE: &str = "authority";

/// Decode one delivery
///
/// `Ok(None)` means the message is well-formed but not for us: our own
/// countdown and vehicle-count publications echo back on shared topics.
pub fn decode(topic: &str, payload: &str) -> Result<Option<Inbound>, ProtocolError> {
    debug!(%topic, "decode: called");
    let payload = normalize_quotes(payload);
    let malformed = |reason: String| ProtocolError::Malformed {
        topic: topic.to_string(),
        reason,
    };
    let lane = |raw: i64| LaneId::try_from(raw).map_err(|e| malformed(e.to_string()));

    match topic {
        topics::DURATION | topics::VEHICLE_COUNT => {
            let wire: DurationWire = parse(&payload).map_err(malformed)?;
            if topic == topics::VEHICLE_COUNT && wire.road_section_id.is_some() {
                debug!("decode: vehicle_count publication, not a duration update");
                return Ok(None);
            }
            // firmware reports its own section instead of a lane id
            let raw_lane = wire
                .lane_id
                .or(wire.road_section_id)
                .ok_or_else(|| malformed("missing lane_id".to_string()))?;
            let secs = wire.duration.ok_or_else(|| malformed("missing duration".to_string()))?;
            let green = Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|d| !d.is_zero())
                .ok_or_else(|| malformed(format!("invalid duration {}", secs)))?;
            Ok(Some(Inbound::DurationUpdate {
                lane: lane(raw_lane)?,
                green,
            }))
        }
        topics::GREEN_STATUS => {
            let wire: GreenStatusWire = parse(&payload).map_err(malformed)?;
            Ok(Some(Inbound::AuthorityPhase {
                lane: lane(wire.section)?,
                signal: wire.status,
            }))
        }
        topics::COUNTDOWN_SYNC => {
            let wire: CountdownWire = parse(&payload).map_err(malformed)?;
            if wire.source != AUTHORITY_SOURCE {
                debug!(source = %wire.source, "decode: countdown not from authority, ignoring");
                return Ok(None);
            }
            let remaining_secs = u32::try_from(wire.remaining_seconds)
                .map_err(|_| malformed(format!("invalid remaining_seconds {}", wire.remaining_seconds)))?;
            Ok(Some(Inbound::CountdownReport {
                lane: lane(wire.lane_id)?,
                remaining_secs,
                phase: wire.phase,
                timestamp: wire.timestamp,
            }))
        }
        topics::NEXT_LANE_READY => {
            let wire: NextLaneWire = parse(&payload).map_err(malformed)?;
            Ok(Some(Inbound::NextLaneReady {
                next: lane(wire.next_expected_section)?,
                from: lane(wire.from_lane)?,
            }))
        }
        _ => match topics::command_target(topic) {
            Some(suffix) => {
                let target = if suffix == "all" {
                    CommandTarget::All
                } else {
                    let raw: i64 = suffix
                        .parse()
                        .map_err(|_| malformed(format!("bad command target {}", suffix)))?;
                    CommandTarget::Lane(lane(raw)?)
                };
                let wire: CommandWire = parse(&payload).map_err(malformed)?;
                Ok(Some(Inbound::Command {
                    command: wire.command,
                    target,
                }))
            }
            None => Err(malformed("unknown topic".to_string())),
        },
    }
}

fn parse<T: for<'de> Deserialize<'de>>(payload: &str) -> Result<T, String> {
    serde_json::from_str(payload).map_err(|e| e.to_string())
}

/// Constrained firmware sometimes emits single-quoted pseudo-JSON
fn normalize_quotes(payload: &str) -> String {
    if payload.contains('"') {
        payload.to_string()
    } else {
        payload.replace('\'', "\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane(id: u8) -> LaneId {
        LaneId::new(id).unwrap()
    }

    #[test]
    fn test_decode_duration_update() {
        let msg = decode(topics::DURATION, r#"{"lane_id": 2, "duration": 15.0}"#).unwrap();
        assert_eq!(
            msg,
            Some(Inbound::DurationUpdate {
                lane: lane(2),
                green: Duration::from_secs(15)
            })
        );
    }

    #[test]
    fn test_decode_duration_from_firmware_section() {
        let payload = r#"{"road_section_id": 3, "total_vehicles": 7, "duration": 22.5, "timestamp": "x"}"#;
        match decode(topics::DURATION, payload).unwrap() {
            Some(Inbound::DurationUpdate { lane: l, green }) => {
                assert_eq!(l, lane(3));
                assert_eq!(green, Duration::from_millis(22_500));
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_own_vehicle_count_is_ignored() {
        let payload = r#"{"road_section_id": 2, "total_vehicles": 1, "vehicle_counts": {}, "timestamp": "t", "duration": 20.0, "lane_id": 2}"#;
        assert_eq!(decode(topics::VEHICLE_COUNT, payload).unwrap(), None);
    }

    #[test]
    fn test_single_quotes_accepted() {
        let msg = decode(topics::GREEN_STATUS, "{'section': 1, 'status': 'red'}").unwrap();
        assert_eq!(
            msg,
            Some(Inbound::AuthorityPhase {
                lane: lane(1),
                signal: Signal::Red
            })
        );
    }

    #[test]
    fn test_countdown_from_local_lane_ignored() {
        let payload = r#"{"lane_id": 1, "remaining_seconds": 10, "phase": "green", "timestamp": 1.0, "source": "local"}"#;
        assert_eq!(decode(topics::COUNTDOWN_SYNC, payload).unwrap(), None);

        let payload = r#"{"lane_id": 1, "remaining_seconds": 10, "phase": "green", "timestamp": 1.0, "source": "authority"}"#;
        match decode(topics::COUNTDOWN_SYNC, payload).unwrap() {
            Some(Inbound::CountdownReport { remaining_secs, .. }) => assert_eq!(remaining_secs, 10),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_decode_command_targets() {
        let msg = decode("traffic/command/3", r#"{"command": "set_active"}"#).unwrap();
        assert_eq!(
            msg,
            Some(Inbound::Command {
                command: CommandKind::SetActive,
                target: CommandTarget::Lane(lane(3))
            })
        );
        let msg = decode(topics::COMMAND_ALL, r#"{"command": "force_sync"}"#).unwrap();
        assert_eq!(
            msg,
            Some(Inbound::Command {
                command: CommandKind::ForceSync,
                target: CommandTarget::All
            })
        );
    }

    #[test]
    fn test_malformed_inputs() {
        let cases = [
            (topics::DURATION, "not json"),
            (topics::DURATION, r#"{"lane_id": 9, "duration": 10}"#),
            (topics::DURATION, r#"{"lane_id": 1}"#),
            (topics::DURATION, r#"{"lane_id": 1, "duration": -4}"#),
            (topics::GREEN_STATUS, r#"{"section": 1, "status": "blue"}"#),
            (topics::COUNTDOWN_SYNC, r#"{"lane_id": 1, "remaining_seconds": -1, "source": "authority"}"#),
            (topics::NEXT_LANE_READY, r#"{"next_expected_section": 2}"#),
            ("traffic/command/x", r#"{"command": "set_active"}"#),
            ("traffic/command/1", r#"{"command": "reboot"}"#),
            ("traffic/unknown", "{}"),
        ];
        for (topic, payload) in cases {
            let result = decode(topic, payload);
            assert!(
                matches!(result, Err(ProtocolError::Malformed { .. })),
                "expected malformed for {} {}: {:?}",
                topic,
                payload,
                result
            );
        }
    }
}
