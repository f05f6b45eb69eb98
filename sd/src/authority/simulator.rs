//! AuthoritySimulator - stands in for the hardware signal controller

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use eyre::Result;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::fuzzy::{green_duration, is_rush_hour};
use crate::clock::Clock;
use crate::config::{AuthorityConfig, TimingConfig};
use crate::domain::{GREEN_TO_RED, LaneId, RED_TO_GREEN, whole_secs};
use crate::protocol::{AUTHORITY_SOURCE, topics};
use crate::transport::{BusHandle, Delivery, Inbox, Transport};

/// The part of a `vehicle_count` payload the controller reads
#[derive(Deserialize)]
struct CountReport {
    road_section_id: i64,
    #[serde(default)]
    total_vehicles: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Request {
    section: LaneId,
    vehicles: u32,
}

/// Drives one green phase per `vehicle_count` it receives
///
/// Sections are served strictly one after another: duration, the red-to-green
/// wait, green, countdown reports through the green, the green-to-red wait,
/// then red and the next-lane announcement.
pub struct AuthoritySimulator {
    bus: BusHandle,
    inbox: Inbox,
    config: AuthorityConfig,
    startup_lead: Duration,
    clock: Arc<dyn Clock>,
    pending: VecDeque<Request>,
    last_served: Option<LaneId>,
    served: u64,
}

impl AuthoritySimulator {
    pub fn new(
        bus: BusHandle,
        inbox: Inbox,
        config: AuthorityConfig,
        timing: &TimingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug!(client_id = bus.client_id(), "AuthoritySimulator::new: called");
        Self {
            bus,
            inbox,
            config,
            startup_lead: timing.startup_delay().saturating_sub(timing.startup_publish_at()),
            clock,
            pending: VecDeque::new(),
            last_served: None,
            served: 0,
        }
    }

    /// Serve requests until the inbox closes or the task is aborted
    pub async fn run(mut self) -> Result<()> {
        self.bus.subscribe(topics::VEHICLE_COUNT).await?;
        info!(rush_hour = ?self.config.rush_hour, "AuthoritySimulator started");

        while let Some(req) = self.next_request().await {
            self.serve(req).await;
        }

        info!(served = self.served, "AuthoritySimulator stopped");
        Ok(())
    }

    async fn next_request(&mut self) -> Option<Request> {
        loop {
            if let Some(req) = self.pending.pop_front() {
                return Some(req);
            }
            let delivery = self.inbox.recv().await?;
            self.accept(&delivery);
        }
    }

    /// Queue a section, skipping repeats of what is queued or being served
    fn accept(&mut self, delivery: &Delivery) {
        if delivery.topic != topics::VEHICLE_COUNT {
            return;
        }
        let report: CountReport = match serde_json::from_str(&delivery.payload) {
            Ok(report) => report,
            Err(e) => {
                debug!(error = %e, "Ignoring unreadable vehicle_count");
                return;
            }
        };
        let Ok(section) = LaneId::try_from(report.road_section_id) else {
            debug!(section = report.road_section_id, "Ignoring vehicle_count for unknown section");
            return;
        };
        if self.last_served == Some(section) || self.pending.iter().any(|r| r.section == section) {
            debug!(%section, "Duplicate request, skipping");
            return;
        }
        self.pending.push_back(Request {
            section,
            vehicles: report.total_vehicles,
        });
    }

    /// Wait `d` while still taking in requests
    async fn idle(&mut self, d: Duration) {
        let deadline = tokio::time::Instant::now() + d;
        loop {
            match tokio::time::timeout_at(deadline, self.inbox.recv()).await {
                Ok(Some(delivery)) => self.accept(&delivery),
                Ok(None) => {
                    tokio::time::sleep_until(deadline).await;
                    return;
                }
                Err(_) => return,
            }
        }
    }

    async fn serve(&mut self, req: Request) {
        let section = req.section;
        let rush = self
            .config
            .rush_hour
            .unwrap_or_else(|| is_rush_hour(self.clock.wall().hour()));
        let green = green_duration(f64::from(req.vehicles), rush);
        let lead = if self.served == 0 { self.startup_lead } else { Duration::ZERO };
        self.last_served = Some(section);
        self.served += 1;
        info!(%section, vehicles = req.vehicles, green_secs = green.as_secs_f64(), rush, "Serving section");

        self.send(topics::DURATION, json!({ "lane_id": section, "duration": green.as_secs_f64() }))
            .await;
        self.idle(RED_TO_GREEN + lead).await;

        self.send(topics::GREEN_STATUS, json!({ "section": section, "status": "green" }))
            .await;
        let mut left = green;
        while !left.is_zero() {
            let report = json!({
                "lane_id": section,
                "remaining_seconds": whole_secs(left),
                "phase": "green",
                "source": AUTHORITY_SOURCE,
                "timestamp": self.clock.epoch_secs(),
            });
            self.send(topics::COUNTDOWN_SYNC, report).await;
            let step = left.min(self.config.report_interval());
            self.idle(step).await;
            left -= step;
        }
        self.idle(GREEN_TO_RED).await;

        self.send(topics::GREEN_STATUS, json!({ "section": section, "status": "red" }))
            .await;
        let announce = json!({ "next_expected_section": section.successor(), "from_lane": section });
        self.send(topics::NEXT_LANE_READY, announce).await;
    }

    async fn send(&self, topic: &str, payload: Value) {
        if let Err(e) = self.bus.publish(topic, &payload.to_string(), false).await {
            warn!(%topic, error = %e, "Authority publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::config::TransportConfig;
    use crate::transport::{BusRequest, LoopbackBus};

    async fn next_on(inbox: &mut Inbox, topic: &str) -> Value {
        loop {
            let d = inbox.recv().await.unwrap();
            if d.topic == topic {
                return serde_json::from_str(&d.payload).unwrap();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_serves_one_section() {
        let bus = LoopbackBus::new(TransportConfig::default());
        let sender = bus.sender();
        let (sim_handle, sim_inbox) = bus.connect("authority").await.unwrap();
        let (lane, mut inbox) = bus.connect("lane-2").await.unwrap();
        let bus_task = tokio::spawn(bus.run());

        lane.subscribe("traffic/#").await.unwrap();
        let config = AuthorityConfig {
            rush_hour: Some(false),
            ..AuthorityConfig::default()
        };
        let sim = AuthoritySimulator::new(
            sim_handle,
            sim_inbox,
            config,
            &TimingConfig::default(),
            Arc::new(TokioClock),
        );
        let sim_task = tokio::spawn(sim.run());
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        lane.publish(
            topics::VEHICLE_COUNT,
            r#"{"road_section_id": 2, "lane_id": 2, "total_vehicles": 5, "duration": 20.0}"#,
            true,
        )
        .await
        .unwrap();

        let duration = next_on(&mut inbox, topics::DURATION).await;
        assert_eq!(duration["lane_id"], 2);
        assert_eq!(duration["duration"], 20.0);

        let green = next_on(&mut inbox, topics::GREEN_STATUS).await;
        assert_eq!(green["status"], "green");
        // first served section also waits out the startup lead
        assert_eq!(started.elapsed(), Duration::from_secs(5));

        let report = next_on(&mut inbox, topics::COUNTDOWN_SYNC).await;
        assert_eq!(report["source"], "authority");
        assert_eq!(report["remaining_seconds"], 20);

        let red = next_on(&mut inbox, topics::GREEN_STATUS).await;
        assert_eq!(red["status"], "red");
        assert_eq!(started.elapsed(), Duration::from_secs(28));
        let next = next_on(&mut inbox, topics::NEXT_LANE_READY).await;
        assert_eq!(next["next_expected_section"], 3);
        assert_eq!(next["from_lane"], 2);

        sim_task.abort();
        sender.send(BusRequest::Shutdown).await.unwrap();
        bus_task.await.unwrap();
    }
}
