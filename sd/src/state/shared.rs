//! SharedCoordinationState - the single lock every lane agent coordinates through
//!
//! Every critical section is a plain closure over [`CoordinationState`]. No
//! I/O happens while the lock is held; callers collect what they need and
//! publish after the guard is dropped.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::types::{CountdownSync, CycleFlags, DataSendStatus, Handoff, HandoffReason, HandoffStats, StartupState};
use crate::domain::{LaneId, LaneState, VehicleSnapshot};

/// Process-wide coordination state, shared by all lane agents
#[derive(Debug)]
pub struct SharedCoordinationState {
    inner: Mutex<CoordinationState>,
}

impl SharedCoordinationState {
    /// Create the state at process start; lane 1 is pre-selected to go first
    pub fn new(default_green: Duration, now: Instant) -> Self {
        debug!(?default_green, "SharedCoordinationState::new: called");
        Self {
            inner: Mutex::new(CoordinationState::new(default_green, now)),
        }
    }

    /// Lock the state
    ///
    /// A panic in another holder does not leave the state half-written (every
    /// mutation is a plain field store), so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, CoordinationState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a critical section
    pub fn with<R>(&self, f: impl FnOnce(&mut CoordinationState) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    pub fn active_lane(&self) -> Option<LaneId> {
        self.lock().active_lane()
    }
}

/// The state behind the lock
#[derive(Debug, Clone)]
pub struct CoordinationState {
    active_lane: Option<LaneId>,
    next_active: LaneId,
    lanes: [LaneState; LaneId::COUNT],
    data_send: [DataSendStatus; LaneId::COUNT],
    flags: [CycleFlags; LaneId::COUNT],
    lane_data: [Option<VehicleSnapshot>; LaneId::COUNT],
    pub startup: StartupState,
    pub countdown: CountdownSync,
    pub last_switch: Option<Instant>,
    /// Last green duration the authority reported for any lane
    pub last_authority_green: Duration,
    /// Size of the last countdown correction
    pub sync_offset: Duration,
    pub stats: HandoffStats,
}

impl CoordinationState {
    fn new(default_green: Duration, now: Instant) -> Self {
        Self {
            active_lane: None,
            next_active: LaneId::FIRST,
            lanes: std::array::from_fn(|_| LaneState::new(default_green, now)),
            data_send: [DataSendStatus::IDLE; LaneId::COUNT],
            flags: std::array::from_fn(|_| CycleFlags::default()),
            lane_data: std::array::from_fn(|_| None),
            startup: StartupState {
                began_at: now,
                started: false,
                own_data_sent: false,
            },
            countdown: CountdownSync::default(),
            last_switch: None,
            last_authority_green: default_green,
            sync_offset: Duration::ZERO,
            stats: HandoffStats::default(),
        }
    }

    /// The active lane, or None during the startup window
    pub fn active_lane(&self) -> Option<LaneId> {
        self.active_lane
    }

    pub fn is_active(&self, lane: LaneId) -> bool {
        self.active_lane == Some(lane)
    }

    /// The lane that will be activated when the system starts
    pub fn next_active(&self) -> LaneId {
        self.next_active
    }

    pub fn lane(&self, lane: LaneId) -> &LaneState {
        &self.lanes[lane.index()]
    }

    pub fn lane_mut(&mut self, lane: LaneId) -> &mut LaneState {
        &mut self.lanes[lane.index()]
    }

    pub fn lanes(&self) -> impl Iterator<Item = (LaneId, &LaneState)> {
        LaneId::all().map(move |id| (id, &self.lanes[id.index()]))
    }

    pub fn data_send(&self, lane: LaneId) -> DataSendStatus {
        self.data_send[lane.index()]
    }

    pub fn flags(&self, lane: LaneId) -> &CycleFlags {
        &self.flags[lane.index()]
    }

    pub fn flags_mut(&mut self, lane: LaneId) -> &mut CycleFlags {
        &mut self.flags[lane.index()]
    }

    pub fn lane_data(&self, lane: LaneId) -> Option<&VehicleSnapshot> {
        self.lane_data[lane.index()].as_ref()
    }

    /// Cache a snapshot; last write wins per lane
    pub fn store_snapshot(&mut self, snapshot: VehicleSnapshot) {
        let idx = snapshot.lane.index();
        self.lane_data[idx] = Some(snapshot);
    }

    /// Number of lanes flagged active (0 before startup, 1 after)
    pub fn active_count(&self) -> usize {
        self.lanes.iter().filter(|l| l.active).count()
    }

    /// Leave the startup window and activate the pre-selected lane
    ///
    /// Returns the handoff when this call is the one that started the system.
    pub fn start_system(&mut self, now: Instant) -> Option<Handoff> {
        if self.startup.started {
            return None;
        }
        self.startup.started = true;
        let first = self.next_active;
        info!(lane = %first, "System started");
        Some(self.activate(first, now, HandoffReason::Startup))
    }

    /// Make `lane` the only active lane and start its cycle
    ///
    /// Single entry point for every activation, so all active flags move together.
    pub fn activate(&mut self, lane: LaneId, now: Instant, reason: HandoffReason) -> Handoff {
        let from = self.active_lane.filter(|prev| *prev != lane);
        for (i, state) in self.lanes.iter_mut().enumerate() {
            state.active = i == lane.index();
        }
        self.active_lane = Some(lane);
        self.next_active = lane.successor();
        self.lanes[lane.index()].cycle_start = now;

        // the new cycle owes a publication to the next lane in line; an
        // in-flight one settles through finish_send
        let owed = &mut self.data_send[lane.successor().index()];
        if !owed.sending {
            *owed = DataSendStatus::PENDING;
        }
        let force_sync = self.flags[lane.index()].force_sync;
        self.flags[lane.index()] = CycleFlags {
            force_sync,
            ..CycleFlags::default()
        };

        self.countdown.active = false;
        self.countdown.established = false;
        self.last_switch = Some(now);
        if from.is_some() {
            self.stats.record(reason);
        }

        Handoff {
            from,
            to: lane,
            reason,
            at: now,
        }
    }

    /// Hand the active status from `from` to its successor
    ///
    /// Only acts when `from` is still the active lane, so of two racing
    /// triggers the first wins and the second returns None.
    pub fn try_handoff(&mut self, from: LaneId, now: Instant, reason: HandoffReason) -> Option<Handoff> {
        if !self.is_active(from) {
            debug!(lane = %from, %reason, active = ?self.active_lane, "try_handoff: lane no longer active, no-op");
            return None;
        }
        Some(self.activate(from.successor(), now, reason))
    }

    /// Mark the publication addressed to `target` as in flight
    ///
    /// Returns false when one is already in flight.
    pub fn begin_send(&mut self, target: LaneId) -> bool {
        let status = &mut self.data_send[target.index()];
        if status.sending {
            return false;
        }
        *status = DataSendStatus::IN_FLIGHT;
        true
    }

    pub fn finish_send(&mut self, target: LaneId, delivered: bool) {
        self.data_send[target.index()] = DataSendStatus {
            sending: false,
            completed: delivered,
        };
    }

    /// Take the countdown publisher slot if the cooldown allows it
    pub fn claim_countdown(&mut self, lane: LaneId, now: Instant, cooldown: Duration) -> bool {
        let cd = &mut self.countdown;
        if let (Some(publisher), Some(last)) = (cd.publisher, cd.last_publish)
            && publisher != lane
            && now.saturating_duration_since(last) < cooldown
        {
            return false;
        }
        cd.publisher = Some(lane);
        cd.last_publish = Some(now);
        true
    }

    /// Drop all countdown state including the publisher slot
    pub fn reset_countdown(&mut self) {
        self.countdown = CountdownSync::default();
    }
}
