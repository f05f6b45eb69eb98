//! Lane agents
//!
//! One [`LaneAgent`] per lane. Each runs five workers on the tokio runtime:
//!
//! - **acquisition** reads frames from the lane's stream into a drop-oldest queue
//! - **processing** owns the cycle state machine and runs detection
//! - **rendering** consumes results and logs a periodic overlay summary
//! - **messages** decodes coordination deliveries and applies them
//! - **status** runs the timeout guard and publishes the retained lane status
//!
//! Workers share nothing but the [`SharedCoordinationState`](crate::state::SharedCoordinationState)
//! and the agent's counters. Stopping clears a running flag that every
//! worker polls once per iteration.

mod action;
mod context;
mod cycle;
mod executor;
mod guard;
mod handler;
mod sequencer;

pub use action::{Action, HandoffRequest};
pub use context::LaneContext;
pub use cycle::CycleDriver;
pub use executor::ActionExecutor;
pub use guard::TimeoutGuard;
pub use handler::SyncProtocolHandler;
pub use sequencer::DataHandoffSequencer;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, PipelineConfig};
use crate::detect::{
    CountSink, Detector, DropOldestQueue, Frame, FrameSource, LogSink, PipelineError, SyntheticDetector,
    SyntheticSource, tally,
};
use crate::domain::{LaneId, VehicleSnapshot, whole_secs};
use crate::events::LaneEvent;
use crate::protocol::{Outbound, decode};
use crate::transport::{Inbox, Publisher, Transport};

/// Overlay summaries are logged once per this many status intervals
const OVERLAY_EVERY: u32 = 5;

/// The external collaborators one lane needs
pub struct Collaborators {
    pub source: Arc<dyn FrameSource>,
    pub detector: Arc<dyn Detector>,
    pub sink: Arc<dyn CountSink>,
}

impl Collaborators {
    /// Synthetic stream and detector, counts to the log
    pub fn synthetic(lane: LaneId, config: &Config) -> Self {
        let url = config.streams.url_for(lane).unwrap_or_default();
        Self {
            source: Arc::new(SyntheticSource::new(lane, url, config.pipeline.frame_interval())),
            detector: Arc::new(SyntheticDetector::for_lane(lane)),
            sink: Arc::new(LogSink),
        }
    }
}

/// Per-agent counters, readable while the agent runs
#[derive(Debug, Default)]
pub struct AgentCounters {
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    frames_processed: AtomicU64,
    inference_failures: AtomicU64,
    results_dropped: AtomicU64,
    frames_rendered: AtomicU64,
    messages_handled: AtomicU64,
    messages_rejected: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl AgentCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            frames_captured: read(&self.frames_captured),
            frames_dropped: read(&self.frames_dropped),
            frames_processed: read(&self.frames_processed),
            inference_failures: read(&self.inference_failures),
            results_dropped: read(&self.results_dropped),
            frames_rendered: read(&self.frames_rendered),
            messages_handled: read(&self.messages_handled),
            messages_rejected: read(&self.messages_rejected),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub inference_failures: u64,
    pub results_dropped: u64,
    pub frames_rendered: u64,
    pub messages_handled: u64,
    pub messages_rejected: u64,
}

/// Control handle for a running agent
#[derive(Clone)]
pub struct AgentHandle {
    lane: LaneId,
    running: Arc<AtomicBool>,
    counters: Arc<AgentCounters>,
}

impl AgentHandle {
    pub fn lane(&self) -> LaneId {
        self.lane
    }

    /// Ask every worker to exit after its current iteration
    pub fn stop(&self) {
        debug!(lane = %self.lane, "AgentHandle::stop: called");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }
}

/// What processing hands to rendering
#[derive(Debug, Clone)]
struct FrameResult {
    frame: Frame,
    snapshot: VehicleSnapshot,
}

/// State every worker of one agent carries
#[derive(Clone)]
struct Worker {
    ctx: LaneContext,
    pipeline: PipelineConfig,
    running: Arc<AtomicBool>,
    counters: Arc<AgentCounters>,
}

impl Worker {
    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// One lane's agent
pub struct LaneAgent {
    worker: Worker,
    publisher: Publisher,
    executor: ActionExecutor,
    inbox: Inbox,
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn Detector>,
}

impl LaneAgent {
    pub fn new(
        ctx: LaneContext,
        config: &Config,
        transport: Arc<dyn Transport>,
        inbox: Inbox,
        collaborators: Collaborators,
    ) -> Self {
        debug!(lane = %ctx.lane, "LaneAgent::new: called");
        let publisher = Publisher::new(transport, config.transport.retry_delay());
        let sequencer = Arc::new(DataHandoffSequencer::new(
            ctx.clone(),
            publisher.clone(),
            collaborators.sink,
            config.sink.clone(),
        ));
        Self {
            worker: Worker {
                ctx,
                pipeline: config.pipeline.clone(),
                running: Arc::new(AtomicBool::new(true)),
                counters: Arc::new(AgentCounters::default()),
            },
            executor: ActionExecutor::new(publisher.clone(), sequencer),
            publisher,
            inbox,
            source: collaborators.source,
            detector: collaborators.detector,
        }
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            lane: self.worker.ctx.lane,
            running: self.worker.running.clone(),
            counters: self.worker.counters.clone(),
        }
    }

    /// Run until stopped
    ///
    /// This consumes the agent. Presence goes `online` first and `offline`
    /// once every worker has exited.
    pub async fn run(self) {
        let Self {
            worker,
            publisher,
            executor,
            inbox,
            source,
            detector,
        } = self;
        let lane = worker.ctx.lane;
        info!(%lane, "LaneAgent started");

        if let Err(e) = publisher.publish(&Outbound::Presence { lane, online: true }).await {
            warn!(%lane, error = %e, "Failed to publish presence");
        }

        let frames = Arc::new(DropOldestQueue::new(worker.pipeline.frame_queue));
        let results = Arc::new(DropOldestQueue::new(worker.pipeline.result_queue));

        let tasks = vec![
            tokio::spawn(acquisition(worker.clone(), source, frames.clone())),
            tokio::spawn(processing(
                worker.clone(),
                detector,
                frames,
                results.clone(),
                executor.clone(),
            )),
            tokio::spawn(rendering(worker.clone(), results)),
            tokio::spawn(status(worker.clone(), executor.clone())),
        ];
        messages(worker.clone(), inbox, executor).await;

        for task in futures::future::join_all(tasks).await {
            if let Err(e) = task {
                error!(%lane, error = %e, "Lane worker panicked");
            }
        }

        if let Err(e) = publisher.publish(&Outbound::Presence { lane, online: false }).await {
            warn!(%lane, error = %e, "Failed to publish presence");
        }
        info!(%lane, counters = ?worker.counters.snapshot(), "LaneAgent stopped");
    }
}

async fn connect_source(w: &Worker, source: &dyn FrameSource) -> bool {
    let lane = w.ctx.lane;
    for attempt in 1..=w.pipeline.connect_attempts.max(1) {
        if !w.running() {
            return false;
        }
        match source.connect().await {
            Ok(()) => {
                info!(%lane, attempt, "Stream connected");
                return true;
            }
            Err(e) => {
                warn!(%lane, attempt, error = %e, "Stream connect failed");
                tokio::time::sleep(w.pipeline.reconnect_backoff()).await;
            }
        }
    }
    false
}

async fn acquisition(w: Worker, source: Arc<dyn FrameSource>, frames: Arc<DropOldestQueue<Frame>>) {
    let lane = w.ctx.lane;
    debug!(%lane, "acquisition: started");
    while w.running() {
        if !connect_source(&w, source.as_ref()).await {
            if w.running() {
                error!(%lane, "Stream unavailable, continuing with stale counts");
            }
            continue;
        }
        while w.running() {
            match source.next_frame().await {
                Ok(frame) => {
                    bump(&w.counters.frames_captured);
                    if frames.push(frame) {
                        bump(&w.counters.frames_dropped);
                    }
                }
                Err(e) => {
                    warn!(%lane, error = %e, "Stream read failed, reconnecting");
                    break;
                }
            }
        }
    }
    debug!(%lane, "acquisition: stopped");
}

async fn processing(
    w: Worker,
    detector: Arc<dyn Detector>,
    frames: Arc<DropOldestQueue<Frame>>,
    results: Arc<DropOldestQueue<FrameResult>>,
    executor: ActionExecutor,
) {
    let lane = w.ctx.lane;
    let driver = CycleDriver::new(w.ctx.clone());
    let mut was_active = false;
    debug!(%lane, "processing: started");

    while w.running() {
        executor.spawn(driver.tick());

        let (active, started) = w.ctx.shared.with(|s| (s.is_active(lane), s.startup.started));
        if active && !was_active {
            let stale = frames.clear() + results.clear();
            info!(%lane, stale, "Lane became active, queues cleared");
        }
        was_active = active;

        let Some(frame) = frames.pop(w.ctx.timing.tick_interval()).await else {
            continue;
        };
        // detection stays frozen through the startup window
        if !started {
            continue;
        }
        let limit = w.pipeline.inference_timeout();
        let detected = tokio::time::timeout(limit, detector.detect(&frame))
            .await
            .unwrap_or(Err(PipelineError::InferenceTimeout(limit)));
        match detected {
            Ok(detections) => {
                let snapshot = tally(lane, &detections, w.pipeline.min_confidence, w.ctx.clock.wall());
                w.ctx.shared.with(|s| s.store_snapshot(snapshot.clone()));
                bump(&w.counters.frames_processed);
                if results.push(FrameResult { frame, snapshot }) {
                    bump(&w.counters.results_dropped);
                }
            }
            Err(e) => {
                bump(&w.counters.inference_failures);
                warn!(%lane, seq = frame.seq, error = %e, "Inference failed, keeping previous counts");
            }
        }
    }
    debug!(%lane, "processing: stopped");
}

async fn rendering(w: Worker, results: Arc<DropOldestQueue<FrameResult>>) {
    let lane = w.ctx.lane;
    let every = w.ctx.timing.status_interval() * OVERLAY_EVERY;
    let mut window_start = tokio::time::Instant::now();
    let mut rendered = 0u32;
    let mut latest: Option<FrameResult> = None;

    while w.running() {
        if let Some(result) = results.pop(w.pipeline.poll_timeout()).await {
            bump(&w.counters.frames_rendered);
            rendered += 1;
            latest = Some(result);
        }

        let window = window_start.elapsed();
        if window < every {
            continue;
        }
        let now = w.ctx.clock.now();
        let (phase, remaining) = w.ctx.shared.with(|s| {
            let state = s.lane(lane);
            if state.active {
                (Some(state.phase(now)), state.remaining(now))
            } else {
                (None, Duration::ZERO)
            }
        });
        let fps = f64::from(rendered) / window.as_secs_f64();
        let phase = phase.map_or("red", |p| p.as_str());
        match &latest {
            Some(result) => debug!(
                %lane,
                phase,
                remaining_secs = whole_secs(remaining),
                total = result.snapshot.total(),
                counts = ?result.snapshot.counts,
                frame = result.frame.seq,
                fps,
                "Overlay"
            ),
            None => debug!(%lane, phase, remaining_secs = whole_secs(remaining), fps, "Overlay, no results yet"),
        }
        window_start = tokio::time::Instant::now();
        rendered = 0;
    }
    debug!(%lane, "rendering: stopped");
}

async fn status(w: Worker, executor: ActionExecutor) {
    let lane = w.ctx.lane;
    let guard = TimeoutGuard::new(w.ctx.clone());
    let mut interval = tokio::time::interval(w.ctx.timing.status_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(%lane, "status: started");

    while w.running() {
        interval.tick().await;
        let mut actions = guard.check();
        let active = w.ctx.shared.with(|s| s.is_active(lane));
        actions.push(Action::Publish(Outbound::lane_status(lane, active, w.ctx.clock.as_ref())));
        executor.spawn(actions);
    }
    debug!(%lane, "status: stopped");
}

async fn messages(w: Worker, mut inbox: Inbox, executor: ActionExecutor) {
    let lane = w.ctx.lane;
    let handler = SyncProtocolHandler::new(w.ctx.clone());
    debug!(%lane, "messages: started");

    while w.running() {
        let delivery = match tokio::time::timeout(w.pipeline.poll_timeout(), inbox.recv()).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                warn!(%lane, "Inbox closed, message handling stopped");
                break;
            }
            Err(_) => continue,
        };
        match decode(&delivery.topic, &delivery.payload) {
            Ok(Some(msg)) => {
                bump(&w.counters.messages_handled);
                executor.spawn(handler.handle(msg));
            }
            Ok(None) => trace!(%lane, topic = %delivery.topic, "Delivery not addressed to agents"),
            Err(e) => {
                bump(&w.counters.messages_rejected);
                warn!(%lane, error = %e, "Dropping malformed message");
                w.ctx.events.emit(LaneEvent::MessageRejected {
                    lane,
                    topic: e.topic().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    debug!(%lane, "messages: stopped");
}
