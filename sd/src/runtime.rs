//! Intersection runtime - assembles the bus, the four lanes and the authority

use std::future::Future;
use std::sync::Arc;

use eyre::{Context, Result, eyre};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentHandle, Collaborators, CounterSnapshot, LaneAgent, LaneContext};
use crate::authority::AuthoritySimulator;
use crate::clock::{Clock, TokioClock};
use crate::config::Config;
use crate::domain::LaneId;
use crate::events::EventBus;
use crate::protocol::topics;
use crate::state::{HandoffStats, SharedCoordinationState};
use crate::transport::{BusMetrics, BusRequest, LoopbackBus};

/// Client id the runtime uses to read bus metrics
const OBSERVER_CLIENT: &str = "observer";

const AUTHORITY_CLIENT: &str = "authority";

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct IntersectionReport {
    pub active_lane: Option<LaneId>,
    pub handoffs: HandoffStats,
    pub sync_offset_ms: u64,
    pub bus: BusMetrics,
    pub lanes: Vec<(LaneId, CounterSnapshot)>,
}

/// A four-lane intersection on one loopback bus
pub struct Intersection {
    config: Config,
    clock: Arc<dyn Clock>,
    shared: Arc<SharedCoordinationState>,
    events: EventBus,
}

impl Intersection {
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        debug!("Intersection::new: called");
        let shared = Arc::new(SharedCoordinationState::new(config.timing.default_green(), clock.now()));
        Self {
            config,
            clock,
            shared,
            events: EventBus::default(),
        }
    }

    pub fn shared(&self) -> Arc<SharedCoordinationState> {
        self.shared.clone()
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Run with synthetic collaborators until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<IntersectionReport> {
        self.run_with(shutdown, Collaborators::synthetic).await
    }

    /// Run with collaborators built by `factory`, one call per lane
    pub async fn run_with<F>(self, shutdown: impl Future<Output = ()>, factory: F) -> Result<IntersectionReport>
    where
        F: Fn(LaneId, &Config) -> Collaborators,
    {
        let Self {
            config,
            clock,
            shared,
            events,
        } = self;
        config.validate()?;

        let bus = LoopbackBus::new(config.transport.clone());
        let bus_tx = bus.sender();

        let mut agents = Vec::with_capacity(LaneId::COUNT);
        for lane in LaneId::all() {
            let client_id = format!("{}-{}", config.transport.client_prefix, lane);
            let (handle, inbox) = bus
                .connect(&client_id)
                .await
                .with_context(|| format!("Failed to connect {}", client_id))?;
            for filter in topics::subscriptions(lane) {
                handle.subscribe(&filter).await?;
            }
            let ctx = LaneContext::new(lane, shared.clone(), clock.clone(), config.timing.clone(), events.clone());
            agents.push(LaneAgent::new(ctx, &config, Arc::new(handle), inbox, factory(lane, &config)));
        }

        let (observer, _observer_inbox) = bus.connect(OBSERVER_CLIENT).await?;
        let simulator = if config.authority.enabled {
            let (handle, inbox) = bus.connect(AUTHORITY_CLIENT).await?;
            Some(AuthoritySimulator::new(
                handle,
                inbox,
                config.authority.clone(),
                &config.timing,
                clock.clone(),
            ))
        } else {
            None
        };

        let bus_task = tokio::spawn(bus.run());
        let sim_task: Option<JoinHandle<Result<()>>> = simulator.map(|sim| tokio::spawn(sim.run()));
        let handles: Vec<AgentHandle> = agents.iter().map(LaneAgent::handle).collect();
        let agent_tasks: Vec<JoinHandle<()>> = agents.into_iter().map(|a| tokio::spawn(a.run())).collect();
        info!(
            lanes = handles.len(),
            authority = sim_task.is_some(),
            lossy = config.transport.is_lossy(),
            "Intersection running"
        );

        shutdown.await;
        info!("Intersection shutting down");

        for handle in &handles {
            handle.stop();
        }
        for task in agent_tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Lane agent task failed");
            }
        }
        if let Some(task) = sim_task {
            task.abort();
            match task.await {
                Ok(Err(e)) => warn!(error = %e, "Authority simulator failed"),
                Err(e) if !e.is_cancelled() => error!(error = %e, "Authority simulator task failed"),
                _ => {}
            }
        }

        let bus_metrics = observer.metrics().await.unwrap_or_else(|e| {
            warn!(error = %e, "Bus metrics unavailable");
            BusMetrics::default()
        });
        bus_tx
            .send(BusRequest::Shutdown)
            .await
            .map_err(|_| eyre!("Bus channel closed before shutdown"))?;
        bus_task.await.context("Bus task failed")?;

        let report = shared.with(|s| IntersectionReport {
            active_lane: s.active_lane(),
            handoffs: s.stats.clone(),
            sync_offset_ms: s.sync_offset.as_millis() as u64,
            bus: bus_metrics,
            lanes: handles.iter().map(|h| (h.lane(), h.counters())).collect(),
        });
        info!(handoffs = report.handoffs.total(), "Intersection stopped");
        Ok(report)
    }
}
