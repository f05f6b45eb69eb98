//! Integration tests for signald
//!
//! These tests drive the public API: cycle drivers and protocol handlers on a
//! hand-moved clock, full lane agents on paused tokio time, and the `sd` binary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_cmd::Command;
use async_trait::async_trait;
use predicates::prelude::*;
use tempfile::TempDir;
use tokio::sync::broadcast::error::RecvError;

use signald::agent::{Action, CycleDriver, DataHandoffSequencer, HandoffRequest, SyncProtocolHandler, TimeoutGuard};
use signald::clock::{Clock, ManualClock, TokioClock};
use signald::config::{Config, SinkConfig, TimingConfig};
use signald::detect::LogSink;
use signald::domain::{CyclePhase, LaneId, VehicleClass, VehicleSnapshot};
use signald::events::{EventBus, LaneEvent};
use signald::protocol::{CommandKind, CommandTarget, Inbound, Outbound, Signal};
use signald::runtime::Intersection;
use signald::state::{HandoffReason, SharedCoordinationState};
use signald::transport::{LoopbackBus, Publisher, Transport, TransportError};
use signald::{Collaborators, LaneAgent, LaneContext};

fn lane(id: u8) -> LaneId {
    LaneId::new(id).unwrap()
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Shared state plus a clock that only moves when told to
struct Fixture {
    clock: Arc<ManualClock>,
    shared: Arc<SharedCoordinationState>,
    events: EventBus,
    timing: TimingConfig,
}

impl Fixture {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        let timing = TimingConfig::default();
        let shared = Arc::new(SharedCoordinationState::new(timing.default_green(), clock.now()));
        Self {
            clock,
            shared,
            events: EventBus::default(),
            timing,
        }
    }

    /// Lane 1 active with its cycle starting now
    fn started() -> Self {
        let f = Self::new();
        let now = f.clock.now();
        f.shared.with(|s| s.start_system(now));
        f
    }

    fn ctx(&self, lane: LaneId) -> LaneContext {
        LaneContext::new(
            lane,
            self.shared.clone(),
            self.clock.clone(),
            self.timing.clone(),
            self.events.clone(),
        )
    }
}

/// Records every publish, or rejects all of them
#[derive(Default)]
struct MemoryTransport {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl MemoryTransport {
    fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: &str, _retain: bool) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Disconnected("link down".to_string()));
        }
        self.sent.lock().unwrap().push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Disconnected("link down".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Startup Tests
// =============================================================================

#[test]
fn test_startup_publishes_at_18s_and_activates_at_20s() {
    let f = Fixture::new();
    let drivers: Vec<CycleDriver> = LaneId::all().map(|l| CycleDriver::new(f.ctx(l))).collect();
    let tick_all = || drivers.iter().flat_map(|d| d.tick()).collect::<Vec<_>>();

    f.clock.set_elapsed(secs(10));
    assert!(tick_all().is_empty());

    f.clock.set_elapsed(secs(18));
    let actions = tick_all();
    assert!(actions.contains(&Action::SendHandoff(HandoffRequest::startup(lane(1)))));
    assert_eq!(f.shared.active_lane(), None);

    f.clock.set_elapsed(secs(20));
    tick_all();
    assert_eq!(f.shared.active_lane(), Some(lane(1)));
    assert_eq!(f.shared.with(|s| s.active_count()), 1);
}

// =============================================================================
// Authority Message Tests
// =============================================================================

#[test]
fn test_duration_update_sets_total_cycle() {
    let f = Fixture::started();
    let handler = SyncProtocolHandler::new(f.ctx(lane(2)));

    handler.handle(Inbound::DurationUpdate {
        lane: lane(2),
        green: secs(15),
    });

    f.shared.with(|s| {
        assert_eq!(s.lane(lane(2)).green_duration(), secs(15));
        assert_eq!(s.lane(lane(2)).total_duration(), secs(21));
        assert_eq!(s.last_authority_green, secs(15));
    });
    assert_eq!(f.shared.active_lane(), Some(lane(1)));
}

#[test]
fn test_set_active_command_moves_green() {
    let f = Fixture::started();
    let handler = SyncProtocolHandler::new(f.ctx(lane(3)));
    f.clock.advance(secs(5));

    let actions = handler.handle(Inbound::Command {
        command: CommandKind::SetActive,
        target: CommandTarget::Lane(lane(3)),
    });

    assert_eq!(f.shared.active_lane(), Some(lane(3)));
    assert_eq!(f.shared.with(|s| s.active_count()), 1);
    assert!(
        actions
            .iter()
            .any(|a| matches!(a, Action::Publish(Outbound::CommandAck { lane: l, .. }) if *l == lane(3)))
    );
    assert!(
        actions
            .iter()
            .any(|a| matches!(a, Action::Publish(Outbound::GreenPermission(p)) if p.section == lane(3)))
    );
}

#[test]
fn test_countdown_report_aligns_green() {
    let f = Fixture::started();
    let handler = SyncProtocolHandler::new(f.ctx(lane(1)));
    f.clock.advance(secs(4));

    handler.handle(Inbound::CountdownReport {
        lane: lane(1),
        remaining_secs: 12,
        phase: "green".to_string(),
        timestamp: 0.0,
    });

    let now = f.clock.now();
    f.shared.with(|s| {
        let state = s.lane(lane(1));
        assert_eq!(state.remaining(now), secs(15));
        assert_eq!(state.phase(now), CyclePhase::Green);
        assert!(s.countdown.established);
    });
}

#[test]
fn test_red_and_next_lane_ready_switch_exactly_once() {
    let f = Fixture::started();
    let lane_one = SyncProtocolHandler::new(f.ctx(lane(1)));
    let lane_two = SyncProtocolHandler::new(f.ctx(lane(2)));
    f.clock.advance(secs(12));

    let red = Inbound::AuthorityPhase {
        lane: lane(1),
        signal: Signal::Red,
    };
    let ready = Inbound::NextLaneReady {
        next: lane(2),
        from: lane(1),
    };
    lane_one.handle(red.clone());
    lane_two.handle(ready.clone());
    lane_one.handle(red);
    lane_two.handle(ready);

    assert_eq!(f.shared.active_lane(), Some(lane(2)));
    f.shared.with(|s| {
        assert_eq!(s.stats.authority_red, 1);
        assert_eq!(s.stats.total(), 1);
    });
}

#[test]
fn test_timeout_guard_fires_once_across_lanes() {
    let f = Fixture::started();
    let guards: Vec<TimeoutGuard> = LaneId::all().map(|l| TimeoutGuard::new(f.ctx(l))).collect();

    // cycle 26s, grace 5s
    f.clock.advance(secs(30));
    assert!(guards.iter().all(|g| g.check().is_empty()));

    f.clock.advance(secs(1));
    let fired: Vec<_> = guards.iter().map(|g| g.check()).filter(|a| !a.is_empty()).collect();
    assert_eq!(fired.len(), 1);
    assert_eq!(f.shared.active_lane(), Some(lane(2)));
    assert_eq!(f.shared.with(|s| s.stats.timeout), 1);
}

// =============================================================================
// Data Handoff Tests
// =============================================================================

#[tokio::test]
async fn test_handoff_payload_targets_successor_section() {
    let f = Fixture::started();
    f.shared.with(|s| {
        s.store_snapshot(VehicleSnapshot::tally(
            lane(4),
            [VehicleClass::Mobil, VehicleClass::Motor],
            f.clock.wall(),
        ));
        s.begin_send(lane(4));
    });
    let transport = Arc::new(MemoryTransport::default());
    let sequencer = DataHandoffSequencer::new(
        f.ctx(lane(3)),
        Publisher::new(transport.clone(), Duration::from_millis(10)),
        Arc::new(LogSink),
        SinkConfig::default(),
    );

    assert!(sequencer.send(HandoffRequest::next(lane(3))).await);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "traffic/vehicle_count");
    let v: serde_json::Value = serde_json::from_str(&sent[0].1).unwrap();
    assert_eq!(v["road_section_id"], 4);
    assert_eq!(v["total_vehicles"], 2);
    assert!(f.shared.with(|s| s.data_send(lane(4)).completed));
}

// =============================================================================
// Agent Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_rotation_survives_a_dead_transport() {
    let config = Config::default();
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let shared = Arc::new(SharedCoordinationState::new(config.timing.default_green(), clock.now()));
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let transport = Arc::new(MemoryTransport::failing());

    // The bus only hands out inboxes here; nothing is ever delivered
    let bus = LoopbackBus::new(config.transport.clone());
    let mut handles = Vec::new();
    let mut tasks = Vec::new();
    for l in LaneId::all() {
        let (_handle, inbox) = bus.connect(&format!("lane-{}", l)).await.unwrap();
        let ctx = LaneContext::new(l, shared.clone(), clock.clone(), config.timing.clone(), events.clone());
        let agent = LaneAgent::new(ctx, &config, transport.clone(), inbox, Collaborators::synthetic(l, &config));
        handles.push(agent.handle());
        tasks.push(tokio::spawn(agent.run()));
    }

    // startup 20s, cycle 26s, grace 5s
    tokio::time::sleep(secs(55)).await;

    assert_eq!(shared.active_lane(), Some(lane(2)));
    assert_eq!(shared.with(|s| s.stats.timeout), 1);

    let mut reasons = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let LaneEvent::HandoffCompleted { reason, .. } = event {
            reasons.push(reason);
        }
    }
    assert_eq!(reasons, vec![HandoffReason::Timeout]);

    for handle in &handles {
        handle.stop();
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert!(transport.sent().is_empty());
}

// =============================================================================
// Intersection Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_intersection_with_authority_rotates() {
    let mut config = Config::default();
    config.authority.rush_hour = Some(false);
    let intersection = Intersection::new(config);
    let shared = intersection.shared();

    let report = intersection
        .run(tokio::time::sleep(Duration::from_secs(180)))
        .await
        .unwrap();

    assert!(report.handoffs.total() >= 2, "handoffs: {:?}", report.handoffs);
    assert!(report.bus.published > 0);
    assert_eq!(report.lanes.len(), 4);
    assert!(report.lanes.iter().all(|(_, c)| c.frames_captured > 0));
    assert_eq!(shared.with(|s| s.active_count()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lossy_bus_keeps_one_active_lane() {
    let mut config = Config::default();
    config.authority.rush_hour = Some(false);
    config.transport.drop_rate = 0.1;
    config.transport.duplicate_rate = 1.0;
    config.transport.reorder_jitter_ms = 300;
    let intersection = Intersection::new(config);
    let shared = intersection.shared();
    let mut rx = intersection.events().subscribe();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let violations = Arc::new(Mutex::new(Vec::new()));
    let checker = {
        let shared = shared.clone();
        let seen = seen.clone();
        let violations = violations.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(LaneEvent::HandoffCompleted { from, to, reason }) => {
                        let active = shared.with(|s| s.active_count());
                        if active != 1 {
                            violations.lock().unwrap().push(format!("{} active after {}->{}", active, from, to));
                        }
                        if reason != HandoffReason::Command && to != from.successor() {
                            violations.lock().unwrap().push(format!("{}->{} skipped the ring ({})", from, to, reason));
                        }
                        seen.lock().unwrap().push((from, to, reason));
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let report = intersection
        .run(tokio::time::sleep(Duration::from_secs(240)))
        .await
        .unwrap();
    checker.abort();

    assert!(violations.lock().unwrap().is_empty(), "{:?}", violations.lock().unwrap());
    assert!(seen.lock().unwrap().len() >= 4, "handoffs: {:?}", seen.lock().unwrap());
    assert!(report.bus.duplicated > 0);
    assert_eq!(shared.with(|s| s.active_count()), 1);
}

// =============================================================================
// CLI Tests
// =============================================================================

fn sd() -> Command {
    Command::cargo_bin("sd").unwrap()
}

#[test]
fn test_cli_help() {
    sd().arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check-config"));
}

#[test]
fn test_cli_prints_default_config() {
    let temp = TempDir::new().unwrap();
    sd().current_dir(temp.path())
        .env("HOME", temp.path())
        .args(["config", "--log-stderr"])
        .assert()
        .success()
        .stdout(predicate::str::contains("startup-delay-secs"));
}

#[test]
fn test_cli_check_config_rejects_bad_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("signald.yml");
    std::fs::write(&path, "timing:\n  startup-delay-secs: 5\n  startup-publish-lead-secs: 8\n").unwrap();

    sd().current_dir(temp.path())
        .env("HOME", temp.path())
        .args(["check-config", "--log-stderr", "-c"])
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid"));
}

#[test]
fn test_cli_check_config_accepts_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("signald.yml");
    std::fs::write(&path, "authority:\n  rush-hour: false\n").unwrap();

    sd().current_dir(temp.path())
        .env("HOME", temp.path())
        .args(["check-config", "--log-stderr", "-c"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}
