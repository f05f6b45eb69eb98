//! CycleDriver - one lane's cycle state machine
//!
//! Called on every processing tick. Reads the clock once, evaluates the
//! startup window, the phase of the active cycle, the handoff trigger and
//! expiry, all under one acquisition of the shared lock, and returns the
//! publications to perform once the lock is gone.

use tracing::{debug, info, warn};

use super::action::{Action, HandoffRequest};
use super::context::LaneContext;
use crate::domain::{CyclePhase, GREEN_TO_RED, LaneId, whole_secs};
use crate::events::LaneEvent;
use crate::protocol::{CountdownSync, Outbound};
use crate::state::HandoffReason;

pub struct CycleDriver {
    ctx: LaneContext,
}

impl CycleDriver {
    pub fn new(ctx: LaneContext) -> Self {
        Self { ctx }
    }

    /// Advance the state machine to the current time
    pub fn tick(&self) -> Vec<Action> {
        let ctx = &self.ctx;
        let lane = ctx.lane;
        let succ = ctx.successor();
        let timing = &ctx.timing;
        let now = ctx.clock.now();

        let mut actions = Vec::new();
        let mut events = Vec::new();

        ctx.shared.with(|s| {
            if !s.startup.started {
                let since = now.saturating_duration_since(s.startup.began_at);
                if lane == LaneId::FIRST && !s.startup.own_data_sent && since >= timing.startup_publish_at() {
                    s.startup.own_data_sent = true;
                    if s.begin_send(lane) {
                        info!(%lane, "Publishing own data ahead of startup");
                        actions.push(Action::SendHandoff(HandoffRequest::startup(lane)));
                    }
                }
                if since < timing.startup_delay() {
                    return;
                }
                if let Some(first) = s.start_system(now) {
                    events.push(LaneEvent::SystemStarted { lane: first.to });
                }
            }

            if !s.is_active(lane) {
                return;
            }

            let state = s.lane(lane).clone();
            let remaining = state.remaining(now);
            let phase = state.phase(now);

            let previous = s.flags(lane).last_phase;
            if previous != Some(phase) {
                s.flags_mut(lane).last_phase = Some(phase);
                info!(%lane, %phase, remaining_secs = whole_secs(remaining), "Phase changed");
                events.push(LaneEvent::PhaseChanged {
                    lane,
                    phase,
                    remaining_secs: whole_secs(remaining),
                });

                if previous.is_some() && s.flags(lane).force_sync {
                    s.flags_mut(lane).force_sync = false;
                    info!(%lane, %phase, "Applying forced sync at phase boundary");
                    if phase != CyclePhase::RedToGreen {
                        s.countdown.publisher = Some(lane);
                        s.countdown.last_publish = Some(now);
                        actions.push(countdown_report(ctx, remaining, phase));
                    }
                }
            }

            // countdown cadence; never during red-to-green
            if phase != CyclePhase::RedToGreen && s.countdown.active && !remaining.is_zero() {
                let due = s.countdown.publisher != Some(lane)
                    || s
                        .countdown
                        .last_publish
                        .is_none_or(|last| now.saturating_duration_since(last) >= timing.countdown_interval());
                if due && s.claim_countdown(lane, now, timing.countdown_cooldown()) {
                    s.countdown.remaining = authority_frame(remaining, phase);
                    actions.push(countdown_report(ctx, remaining, phase));
                }
            }

            if remaining <= timing.handoff_lead() && !s.flags(lane).handoff_triggered {
                s.flags_mut(lane).handoff_triggered = true;
                if !s.data_send(succ).completed && s.begin_send(succ) {
                    debug!(%lane, target = %succ, "Handoff lead reached, publishing successor data");
                    actions.push(Action::SendHandoff(HandoffRequest::next(lane)));
                }
            }

            if remaining.is_zero() {
                let status = s.data_send(succ);
                if status.completed {
                    if let Some(handoff) = s.try_handoff(lane, now, HandoffReason::CycleComplete) {
                        info!(from = %lane, to = %handoff.to, "Cycle complete, handing off");
                        ctx.announce(&handoff, &mut actions, &mut events);
                    }
                } else if !status.sending && !s.flags(lane).forced_send {
                    s.flags_mut(lane).forced_send = true;
                    if s.begin_send(succ) {
                        warn!(%lane, target = %succ, "Cycle expired before handoff data was delivered, forcing send");
                        actions.push(Action::SendHandoff(HandoffRequest::next(lane)));
                    }
                } else {
                    debug!(%lane, ?status, "Cycle expired, waiting on handoff delivery");
                }
            }
        });

        for event in events {
            ctx.events.emit(event);
        }
        actions
    }
}

/// Remaining time as the authority counts it: green-remaining while green
pub(super) fn authority_frame(remaining: std::time::Duration, phase: CyclePhase) -> std::time::Duration {
    match phase {
        CyclePhase::Green => remaining.saturating_sub(GREEN_TO_RED),
        _ => remaining,
    }
}

pub(super) fn countdown_report(ctx: &LaneContext, remaining: std::time::Duration, phase: CyclePhase) -> Action {
    Action::Publish(Outbound::CountdownSync(CountdownSync::local(
        ctx.lane,
        whole_secs(authority_frame(remaining, phase)),
        phase,
        ctx.clock.as_ref(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::Harness;
    use crate::domain::LaneId;
    use crate::state::DataSendStatus;
    use std::time::Duration;

    fn lane(id: u8) -> LaneId {
        LaneId::new(id).unwrap()
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn sends(actions: &[Action]) -> Vec<HandoffRequest> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::SendHandoff(req) => Some(*req),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_startup_window() {
        let h = Harness::new();
        let drivers: Vec<CycleDriver> = LaneId::all().map(|l| CycleDriver::new(h.ctx(l))).collect();
        let tick_all = || drivers.iter().flat_map(|d| d.tick()).collect::<Vec<_>>();

        h.clock.set_elapsed(secs(17));
        assert!(tick_all().is_empty());
        assert_eq!(h.shared.active_lane(), None);

        h.clock.set_elapsed(secs(18));
        let actions = tick_all();
        assert_eq!(sends(&actions), vec![HandoffRequest::startup(lane(1))]);
        assert_eq!(h.shared.active_lane(), None);
        assert!(tick_all().is_empty(), "startup publish happens once");

        h.clock.set_elapsed(secs(20));
        tick_all();
        assert_eq!(h.shared.active_lane(), Some(lane(1)));
        let phase = h.shared.with(|s| s.lane(lane(1)).phase(h.clock_now()));
        assert_eq!(phase, CyclePhase::RedToGreen);
    }

    #[test]
    fn test_handoff_triggered_once_at_lead() {
        let h = Harness::started();
        let driver = CycleDriver::new(h.ctx(lane(1)));

        h.clock.advance(secs(21));
        assert!(sends(&driver.tick()).is_empty());

        h.clock.advance(secs(1)); // remaining 4
        assert_eq!(sends(&driver.tick()), vec![HandoffRequest::next(lane(1))]);
        assert!(sends(&driver.tick()).is_empty());
        assert_eq!(h.shared.with(|s| s.data_send(lane(2))), DataSendStatus::IN_FLIGHT);
    }

    #[test]
    fn test_expiry_waits_for_delivery_then_hands_off() {
        let h = Harness::started();
        let driver = CycleDriver::new(h.ctx(lane(1)));

        h.clock.advance(secs(22));
        driver.tick();
        h.clock.advance(secs(4)); // remaining 0, send still in flight
        driver.tick();
        assert_eq!(h.shared.active_lane(), Some(lane(1)));

        h.shared.with(|s| s.finish_send(lane(2), true));
        let actions = driver.tick();
        assert_eq!(h.shared.active_lane(), Some(lane(2)));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Publish(Outbound::GreenPermission(p)) if p.section == lane(2)
        )));
        let start = h.shared.with(|s| s.lane(lane(2)).cycle_start);
        assert_eq!(start, h.clock_now());
    }

    #[test]
    fn test_failed_delivery_forces_one_send_at_expiry() {
        let h = Harness::started();
        let driver = CycleDriver::new(h.ctx(lane(1)));

        h.clock.advance(secs(22));
        driver.tick();
        h.shared.with(|s| s.finish_send(lane(2), false));

        h.clock.advance(secs(4));
        assert_eq!(sends(&driver.tick()), vec![HandoffRequest::next(lane(1))]);
        h.shared.with(|s| s.finish_send(lane(2), false));
        assert!(sends(&driver.tick()).is_empty());
        assert_eq!(h.shared.active_lane(), Some(lane(1)), "blocked until guard fires");
    }

    #[test]
    fn test_no_countdown_publish_during_red_to_green() {
        let h = Harness::started();
        h.shared.with(|s| s.countdown.active = true);
        let driver = CycleDriver::new(h.ctx(lane(1)));

        h.clock.advance(secs(1));
        let actions = driver.tick();
        assert!(!actions.iter().any(|a| matches!(a, Action::Publish(Outbound::CountdownSync(_)))));

        h.clock.advance(secs(3)); // green
        let actions = driver.tick();
        let report = actions.iter().find_map(|a| match a {
            Action::Publish(Outbound::CountdownSync(c)) => Some(c.clone()),
            _ => None,
        });
        let report = report.expect("countdown published in green");
        assert_eq!(report.phase, CyclePhase::Green);
        assert_eq!(report.remaining_seconds, 19);

        h.clock.advance(secs(1));
        assert!(driver.tick().is_empty(), "cadence holds the next report back");
        h.clock.advance(secs(1));
        assert_eq!(driver.tick().len(), 1);
    }

    #[test]
    fn test_inactive_lane_does_nothing() {
        let h = Harness::started();
        let driver = CycleDriver::new(h.ctx(lane(3)));
        h.clock.advance(secs(40));
        assert!(driver.tick().is_empty());
        assert_eq!(h.shared.active_lane(), Some(lane(1)));
    }
}
