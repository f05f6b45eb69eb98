//! SyncProtocolHandler - applies decoded coordination messages
//!
//! Every message is applied under the shared lock and yields the
//! publications to perform afterwards. Handoff triggers all go through
//! `try_handoff`/`activate`, so the first one to observe the lock wins and
//! duplicates fall through as no-ops.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::action::{Action, HandoffRequest};
use super::context::LaneContext;
use super::cycle::countdown_report;
use crate::domain::{CyclePhase, GREEN_TO_RED, LaneId};
use crate::events::LaneEvent;
use crate::protocol::{CommandKind, CommandTarget, Inbound, Outbound, Signal};
use crate::state::{CoordinationState, Handoff, HandoffReason};

pub struct SyncProtocolHandler {
    ctx: LaneContext,
}

impl SyncProtocolHandler {
    pub fn new(ctx: LaneContext) -> Self {
        Self { ctx }
    }

    pub fn handle(&self, msg: Inbound) -> Vec<Action> {
        debug!(lane = %self.ctx.lane, kind = msg.kind(), "SyncProtocolHandler::handle: called");
        let mut actions = Vec::new();
        let mut events = Vec::new();

        match msg {
            Inbound::DurationUpdate { lane, green } => self.on_duration(lane, green),
            Inbound::AuthorityPhase {
                lane,
                signal: Signal::Red,
            } => self.on_red(lane, &mut actions, &mut events),
            Inbound::AuthorityPhase {
                lane,
                signal: Signal::Green,
            } => self.on_green(lane, &mut actions),
            Inbound::CountdownReport { lane, remaining_secs, .. } => {
                self.on_countdown(lane, remaining_secs, &mut events)
            }
            Inbound::NextLaneReady { next, from } => self.on_next_lane_ready(next, from, &mut actions, &mut events),
            Inbound::Command { command, target } => self.on_command(command, target, &mut actions, &mut events),
        }

        for event in events {
            self.ctx.events.emit(event);
        }
        actions
    }

    fn on_duration(&self, lane: LaneId, green: Duration) {
        let me = self.ctx.lane;
        let now = self.ctx.clock.now();
        let restarted = self.ctx.shared.with(|s| {
            s.lane_mut(lane).set_green_duration(green);
            s.last_authority_green = green;
            if lane != me || !s.is_active(me) {
                return false;
            }
            s.lane_mut(me).cycle_start = now;
            let flags = s.flags_mut(me);
            flags.handoff_triggered = false;
            flags.forced_send = false;
            flags.last_phase = None;
            start_countdown(s, now, green);
            true
        });
        info!(%lane, green_secs = green.as_secs_f64(), restarted, "Green duration updated");
    }

    fn on_red(&self, lane: LaneId, actions: &mut Vec<Action>, events: &mut Vec<LaneEvent>) {
        let me = self.ctx.lane;
        if lane != me {
            return;
        }
        let now = self.ctx.clock.now();
        self.ctx.shared.with(|s| {
            let Some(handoff) = s.try_handoff(me, now, HandoffReason::AuthorityRed) else {
                return;
            };
            s.reset_countdown();
            info!(from = %me, to = %handoff.to, "Authority switched lane to red, handing off");
            self.ctx.announce(&handoff, actions, events);
            owe_successor_data(s, me, &handoff, actions);
        });
    }

    fn on_green(&self, lane: LaneId, actions: &mut Vec<Action>) {
        let me = self.ctx.lane;
        if lane != me {
            return;
        }
        let now = self.ctx.clock.now();
        self.ctx.shared.with(|s| {
            if !s.is_active(me) {
                debug!(lane = %me, "Authority green for inactive lane, ignoring");
                return;
            }
            let green = s.lane(me).green_duration();
            s.lane_mut(me).align_remaining(now, green + GREEN_TO_RED);
            start_countdown(s, now, green);
            s.countdown.publisher = Some(me);
            s.countdown.last_publish = Some(now);
            info!(lane = %me, green_secs = green.as_secs_f64(), "Authority green, countdown started");
            actions.push(countdown_report(&self.ctx, green + GREEN_TO_RED, CyclePhase::Green));
        });
    }

    fn on_countdown(&self, lane: LaneId, remaining_secs: u32, events: &mut Vec<LaneEvent>) {
        let me = self.ctx.lane;
        if lane != me {
            return;
        }
        let now = self.ctx.clock.now();
        self.ctx.shared.with(|s| {
            let phase = s.lane(me).phase(now);
            if !s.is_active(me) || phase != CyclePhase::Green {
                debug!(lane = %me, %phase, "Countdown report outside own green, ignoring");
                return;
            }
            let before = s.lane(me).remaining(now);
            let reported = Duration::from_secs(u64::from(remaining_secs));
            s.lane_mut(me).align_remaining(now, reported + GREEN_TO_RED);
            let after = s.lane(me).remaining(now);
            let offset = before.abs_diff(after);

            s.sync_offset = offset;
            s.countdown.active = true;
            s.countdown.established = true;
            s.countdown.remaining = reported;
            debug!(lane = %me, remaining_secs, offset_ms = offset.as_millis() as u64, "Countdown realigned");
            events.push(LaneEvent::CountdownAccepted {
                lane: me,
                remaining_secs,
                offset_ms: offset.as_millis() as u64,
            });
        });
    }

    fn on_next_lane_ready(
        &self,
        next: LaneId,
        from: LaneId,
        actions: &mut Vec<Action>,
        events: &mut Vec<LaneEvent>,
    ) {
        let me = self.ctx.lane;
        if next != me {
            return;
        }
        let now = self.ctx.clock.now();
        self.ctx.shared.with(|s| {
            if s.is_active(me) {
                debug!(lane = %me, "Already active, next_lane_ready is a no-op");
                return;
            }
            if s.active_lane() != Some(from) {
                debug!(lane = %me, %from, active = ?s.active_lane(), "Stale next_lane_ready, ignoring");
                return;
            }
            let handoff = s.activate(me, now, HandoffReason::NextLaneReady);
            info!(%from, to = %me, "Next lane ready, promoting self");
            self.ctx.announce(&handoff, actions, events);
            owe_successor_data(s, from, &handoff, actions);
        });
    }

    fn on_command(
        &self,
        command: CommandKind,
        target: CommandTarget,
        actions: &mut Vec<Action>,
        events: &mut Vec<LaneEvent>,
    ) {
        let me = self.ctx.lane;
        if let CommandTarget::Lane(lane) = target
            && lane != me
        {
            return;
        }
        actions.push(Action::Publish(Outbound::command_ack(
            me,
            command.as_str(),
            self.ctx.clock.as_ref(),
        )));

        let now = self.ctx.clock.now();
        match command {
            CommandKind::SetActive if target == CommandTarget::All => {
                warn!(lane = %me, "set_active broadcast to all lanes, ignoring");
            }
            CommandKind::SetActive => self.ctx.shared.with(|s| {
                let handoff = s.activate(me, now, HandoffReason::Command);
                info!(lane = %me, previous = ?handoff.from, "Forced active by command");
                self.ctx.announce(&handoff, actions, events);
            }),
            CommandKind::SendUpdate => self.ctx.shared.with(|s| {
                let target = me.successor();
                if !s.is_active(me) {
                    debug!(lane = %me, active = ?s.active_lane(), "send_update on inactive lane, nothing to publish");
                } else if s.begin_send(target) {
                    info!(lane = %me, %target, "Publishing handoff data on command");
                    actions.push(Action::SendHandoff(HandoffRequest::next(me)));
                } else {
                    debug!(lane = %me, %target, "Handoff publication already in flight");
                }
            }),
            CommandKind::ForceSync => self.ctx.shared.with(|s| {
                s.flags_mut(me).force_sync = true;
                info!(lane = %me, "Sync forced at next phase boundary");
            }),
        }
    }
}

fn start_countdown(s: &mut CoordinationState, now: Instant, green: Duration) {
    s.countdown.active = true;
    s.countdown.established = true;
    s.countdown.remaining = green;
    s.countdown.start_time = Some(now);
}

/// After an authority-driven switch the new lane still needs its data if the
/// outgoing cycle never got to publish it
pub(super) fn owe_successor_data(
    s: &mut CoordinationState,
    from: LaneId,
    handoff: &Handoff,
    actions: &mut Vec<Action>,
) {
    if !s.data_send(handoff.to).completed && s.begin_send(handoff.to) {
        debug!(%from, target = %handoff.to, "Publishing handoff data after switch");
        actions.push(Action::SendHandoff(HandoffRequest::next(from)));
    }
}
