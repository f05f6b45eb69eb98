//! Clock abstraction
//!
//! All cycle arithmetic reads time through [`Clock`] so tests can move time
//! by hand instead of sleeping.

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic time used for every cycle computation
    fn now(&self) -> Instant;

    /// Wall-clock time used only for outbound timestamps
    fn wall(&self) -> DateTime<Local>;

    /// Wall-clock time as fractional seconds since the Unix epoch
    fn epoch_secs(&self) -> f64 {
        self.wall().timestamp_millis() as f64 / 1000.0
    }
}

/// Clock backed by tokio's time driver
///
/// Follows `tokio::time::pause`/`advance`, so paused-time tests move it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn wall(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Local>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Local::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    /// Jump to an absolute offset from creation; never moves backwards
    pub fn set_elapsed(&self, elapsed: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset = (*offset).max(elapsed);
    }

    /// Time since the clock was created
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall(&self) -> DateTime<Local> {
        let offset = chrono::Duration::from_std(self.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - t0, Duration::from_secs(5));

        clock.set_elapsed(Duration::from_secs(2));
        assert_eq!(clock.elapsed(), Duration::from_secs(5));

        clock.set_elapsed(Duration::from_secs(18));
        assert_eq!(clock.now() - t0, Duration::from_secs(18));
    }

    #[test]
    fn test_manual_wall_clock_tracks_offset() {
        let clock = ManualClock::new();
        let w0 = clock.wall();
        clock.advance(Duration::from_secs(90));
        assert_eq!((clock.wall() - w0).num_seconds(), 90);
        assert!(clock.epoch_secs() > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock;
        let t0 = clock.now();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(clock.now() - t0 >= Duration::from_secs(3));
    }
}
