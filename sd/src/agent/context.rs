//! Per-lane context shared by the agent's components

use std::sync::Arc;

use super::action::Action;
use crate::clock::Clock;
use crate::config::TimingConfig;
use crate::domain::LaneId;
use crate::events::{EventBus, LaneEvent};
use crate::protocol::{GreenPermission, Outbound};
use crate::state::{Handoff, SharedCoordinationState};

/// What every component of one lane agent needs to see
#[derive(Clone)]
pub struct LaneContext {
    pub lane: LaneId,
    pub shared: Arc<SharedCoordinationState>,
    pub clock: Arc<dyn Clock>,
    pub timing: TimingConfig,
    pub events: EventBus,
}

impl LaneContext {
    pub fn new(
        lane: LaneId,
        shared: Arc<SharedCoordinationState>,
        clock: Arc<dyn Clock>,
        timing: TimingConfig,
        events: EventBus,
    ) -> Self {
        Self {
            lane,
            shared,
            clock,
            timing,
            events,
        }
    }

    pub fn successor(&self) -> LaneId {
        self.lane.successor()
    }

    /// Broadcast that `handoff.to` may go green, and record it
    pub(crate) fn announce(&self, handoff: &Handoff, actions: &mut Vec<Action>, events: &mut Vec<LaneEvent>) {
        actions.push(Action::Publish(Outbound::GreenPermission(GreenPermission::granted(
            handoff.to,
            handoff.reason,
            self.clock.as_ref(),
        ))));
        if let Some(from) = handoff.from {
            events.push(LaneEvent::HandoffCompleted {
                from,
                to: handoff.to,
                reason: handoff.reason,
            });
        }
    }
}
