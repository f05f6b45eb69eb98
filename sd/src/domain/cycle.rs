//! Cycle timing: phases and per-lane cycle timers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Fixed length of the red-to-green transition
pub const RED_TO_GREEN: Duration = Duration::from_secs(3);

/// Fixed length of the green-to-red transition
pub const GREEN_TO_RED: Duration = Duration::from_secs(3);

/// Time a cycle adds on top of its green duration
pub const CYCLE_OVERHEAD: Duration = Duration::from_secs(6);

/// Phase of an active lane's cycle, in traversal order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    RedToGreen,
    Green,
    GreenToRed,
}

impl CyclePhase {
    /// Derive the phase from the time left in the cycle
    pub fn from_remaining(remaining: Duration, green: Duration) -> Self {
        if remaining > green + GREEN_TO_RED {
            Self::RedToGreen
        } else if remaining > GREEN_TO_RED {
            Self::Green
        } else {
            Self::GreenToRed
        }
    }

    /// Wire name used in countdown payloads
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RedToGreen => "red_to_green",
            Self::Green => "green",
            Self::GreenToRed => "green_to_red",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cycle timer for one lane
///
/// `total_duration` is private so that it can only move together with
/// `green_duration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneState {
    pub active: bool,
    pub cycle_start: Instant,
    green_duration: Duration,
    total_duration: Duration,
}

impl LaneState {
    pub fn new(green: Duration, now: Instant) -> Self {
        Self {
            active: false,
            cycle_start: now,
            green_duration: green,
            total_duration: green + CYCLE_OVERHEAD,
        }
    }

    pub fn green_duration(&self) -> Duration {
        self.green_duration
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    /// Change the green duration; the total follows
    pub fn set_green_duration(&mut self, green: Duration) {
        self.green_duration = green;
        self.total_duration = green + CYCLE_OVERHEAD;
    }

    /// Time since the cycle started, zero if the start lies in the future
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.cycle_start)
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.total_duration.saturating_sub(self.elapsed(now))
    }

    pub fn phase(&self, now: Instant) -> CyclePhase {
        CyclePhase::from_remaining(self.remaining(now), self.green_duration)
    }

    /// Move `cycle_start` so that `remaining(now)` equals `remaining`
    ///
    /// Targets past the total are clamped to the total.
    pub fn align_remaining(&mut self, now: Instant, remaining: Duration) {
        let remaining = remaining.min(self.total_duration);
        let elapsed = self.total_duration - remaining;
        self.cycle_start = now.checked_sub(elapsed).unwrap_or(now);
    }
}

/// Whole seconds left, rounded up so that a running countdown never reads 0 early
pub fn whole_secs(d: Duration) -> u32 {
    let secs = d.as_secs_f64().ceil();
    if secs >= f64::from(u32::MAX) { u32::MAX } else { secs as u32 }
}
