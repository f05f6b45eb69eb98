//! Topic names on the coordination channel

use crate::domain::LaneId;

pub const DURATION: &str = "traffic/duration";
pub const VEHICLE_COUNT: &str = "traffic/vehicle_count";
pub const GREEN_STATUS: &str = "traffic/green_status";
pub const COUNTDOWN_SYNC: &str = "traffic/countdown_sync";
pub const NEXT_LANE_READY: &str = "traffic/next_lane_ready";
pub const GREEN_PERMISSION: &str = "traffic/green_permission";
pub const COMMAND_ALL: &str = "traffic/command/all";

const COMMAND_PREFIX: &str = "traffic/command/";

pub fn command(lane: LaneId) -> String {
    format!("{}{}", COMMAND_PREFIX, lane)
}

pub fn command_ack(lane: LaneId) -> String {
    format!("traffic/command_ack/{}", lane)
}

pub fn lane_status(lane: LaneId) -> String {
    format!("traffic/lane_status/{}", lane)
}

/// Presence topic carrying `online`/`offline`
pub fn presence(lane: LaneId) -> String {
    format!("traffic/status/{}", lane)
}

/// Parse the routing suffix of a command topic
///
/// Returns None for topics that are not command topics.
pub fn command_target(topic: &str) -> Option<&str> {
    topic.strip_prefix(COMMAND_PREFIX).filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

/// Everything a lane agent listens to
pub fn subscriptions(lane: LaneId) -> Vec<String> {
    vec![
        DURATION.to_string(),
        VEHICLE_COUNT.to_string(),
        GREEN_STATUS.to_string(),
        COUNTDOWN_SYNC.to_string(),
        NEXT_LANE_READY.to_string(),
        command(lane),
        COMMAND_ALL.to_string(),
    ]
}

/// Match a topic against an MQTT-style filter (`+` one level, `#` the rest)
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut f = filter.split('/');
    let mut t = topic.split('/');
    loop {
        match (f.next(), t.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(a), Some(b)) if a == b => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_topics() {
        let lane = LaneId::new(3).unwrap();
        assert_eq!(command(lane), "traffic/command/3");
        assert_eq!(command_ack(lane), "traffic/command_ack/3");
        assert_eq!(lane_status(lane), "traffic/lane_status/3");
        assert_eq!(presence(lane), "traffic/status/3");
    }

    #[test]
    fn test_command_target() {
        assert_eq!(command_target("traffic/command/2"), Some("2"));
        assert_eq!(command_target("traffic/command/all"), Some("all"));
        assert_eq!(command_target("traffic/command/"), None);
        assert_eq!(command_target("traffic/command_ack/2"), None);
    }

    #[test]
    fn test_filter_matching() {
        assert!(matches("traffic/duration", "traffic/duration"));
        assert!(!matches("traffic/duration", "traffic/durations"));
        assert!(matches("traffic/+/1", "traffic/lane_status/1"));
        assert!(!matches("traffic/+/1", "traffic/lane_status/2"));
        assert!(matches("traffic/#", "traffic/command/all"));
        assert!(matches("#", "anything/at/all"));
        assert!(!matches("traffic/command", "traffic/command/1"));
    }
}
