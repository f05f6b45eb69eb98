//! TimeoutGuard - keeps the rotation moving when the authority goes quiet

use tracing::{debug, warn};

use super::action::Action;
use super::context::LaneContext;
use super::handler::owe_successor_data;
use crate::state::HandoffReason;

/// Forces a handoff once the active lane overruns its cycle plus grace
///
/// Every agent runs one and checks whichever lane is active; the first
/// check to see the overrun does the switch and the rest find it done.
pub struct TimeoutGuard {
    ctx: LaneContext,
}

impl TimeoutGuard {
    pub fn new(ctx: LaneContext) -> Self {
        Self { ctx }
    }

    pub fn check(&self) -> Vec<Action> {
        let now = self.ctx.clock.now();
        let grace = self.ctx.timing.timeout_grace();
        let mut actions = Vec::new();
        let mut events = Vec::new();

        self.ctx.shared.with(|s| {
            let Some(active) = s.active_lane() else {
                return;
            };
            let state = s.lane(active);
            let elapsed = state.elapsed(now);
            let limit = state.total_duration() + grace;
            if elapsed < limit {
                return;
            }
            warn!(
                lane = %active,
                checked_by = %self.ctx.lane,
                elapsed_secs = elapsed.as_secs_f64(),
                limit_secs = limit.as_secs_f64(),
                "Active lane overran its cycle, forcing handoff"
            );
            if let Some(handoff) = s.try_handoff(active, now, HandoffReason::Timeout) {
                self.ctx.announce(&handoff, &mut actions, &mut events);
                owe_successor_data(s, active, &handoff, &mut actions);
            }
        });

        if !actions.is_empty() {
            debug!(lane = %self.ctx.lane, "TimeoutGuard::check: forced handoff");
        }
        for event in events {
            self.ctx.events.emit(event);
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::Harness;
    use crate::domain::LaneId;
    use std::time::Duration;

    fn lane(id: u8) -> LaneId {
        LaneId::new(id).unwrap()
    }

    #[test]
    fn test_no_action_within_grace() {
        let h = Harness::started();
        let guard = TimeoutGuard::new(h.ctx(lane(3)));
        h.clock.advance(Duration::from_secs(30));
        assert!(guard.check().is_empty());
        assert_eq!(h.shared.active_lane(), Some(lane(1)));
    }

    #[test]
    fn test_forces_handoff_at_total_plus_grace() {
        let h = Harness::started();
        let guards: Vec<TimeoutGuard> = LaneId::all().map(|l| TimeoutGuard::new(h.ctx(l))).collect();
        h.clock.advance(Duration::from_secs(31));

        let fired: Vec<_> = guards.iter().map(|g| g.check()).filter(|a| !a.is_empty()).collect();
        assert_eq!(fired.len(), 1, "only the first guard switches");
        assert_eq!(h.shared.active_lane(), Some(lane(2)));
        h.shared.with(|s| {
            assert_eq!(s.stats.timeout, 1);
            assert_eq!(s.lane(lane(2)).cycle_start, h.clock_now());
        });
    }

    #[test]
    fn test_idle_before_startup() {
        let h = Harness::new();
        let guard = TimeoutGuard::new(h.ctx(lane(1)));
        h.clock.advance(Duration::from_secs(120));
        assert!(guard.check().is_empty());
    }
}
