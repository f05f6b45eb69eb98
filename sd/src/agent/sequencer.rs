//! DataHandoffSequencer - publishes the successor's counts at handoff

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::action::HandoffRequest;
use super::context::LaneContext;
use crate::config::SinkConfig;
use crate::detect::{CountSink, record_with_retry};
use crate::domain::VehicleSnapshot;
use crate::events::LaneEvent;
use crate::protocol::{Outbound, VehicleCount};
use crate::transport::Publisher;

/// Builds and publishes `vehicle_count` for a handoff target
///
/// The caller has already marked the target's send status in flight under
/// the lock; the sequencer settles it once the publish resolves.
pub struct DataHandoffSequencer {
    ctx: LaneContext,
    publisher: Publisher,
    sink: Arc<dyn CountSink>,
    sink_config: SinkConfig,
}

impl DataHandoffSequencer {
    pub fn new(ctx: LaneContext, publisher: Publisher, sink: Arc<dyn CountSink>, sink_config: SinkConfig) -> Self {
        Self {
            ctx,
            publisher,
            sink,
            sink_config,
        }
    }

    /// Pick the snapshot to publish for `req.target`
    ///
    /// The target's own cached counts when there are any, else the sender's
    /// counts retagged with the target's id, else zeros.
    fn payload_for(&self, req: HandoffRequest) -> VehicleCount {
        let (snapshot, green) = self.ctx.shared.with(|s| {
            let cached = s.lane_data(req.target).cloned();
            let snapshot = if req.startup {
                cached
            } else {
                cached.or_else(|| s.lane_data(req.from).map(|d| d.retagged(req.target)))
            };
            (snapshot, s.last_authority_green)
        });
        let snapshot = snapshot.unwrap_or_else(|| VehicleSnapshot::empty(req.target, self.ctx.clock.wall()));
        VehicleCount::for_target(req.target, &snapshot, green)
    }

    pub async fn send(&self, req: HandoffRequest) -> bool {
        debug!(from = %req.from, target = %req.target, startup = req.startup, "DataHandoffSequencer::send: called");
        let payload = self.payload_for(req);
        let total = payload.total_vehicles;
        let msg = Outbound::VehicleCount(payload);

        let delivered = match self.publisher.publish(&msg).await {
            Ok(()) => true,
            Err(e) => {
                warn!(from = %req.from, target = %req.target, error = %e, "Handoff publication failed");
                false
            }
        };
        self.ctx.shared.with(|s| s.finish_send(req.target, delivered));
        self.ctx.events.emit(LaneEvent::HandoffPublished {
            from: req.from,
            target: req.target,
            delivered,
        });

        if delivered {
            info!(from = %req.from, target = %req.target, total, "Handoff data published");
            if let Outbound::VehicleCount(payload) = msg {
                self.store(req, payload);
            }
        }
        delivered
    }

    fn store(&self, req: HandoffRequest, payload: VehicleCount) {
        let snapshot = VehicleSnapshot {
            lane: req.target,
            counts: payload.vehicle_counts,
            timestamp: self.ctx.clock.wall(),
        };
        let sink = self.sink.clone();
        let config = self.sink_config.clone();
        tokio::spawn(async move {
            record_with_retry(sink.as_ref(), &snapshot, &config).await;
        });
    }
}
