//! Count sinks - where published snapshots are recorded

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::error::PipelineError;
use crate::config::SinkConfig;
use crate::domain::VehicleSnapshot;

/// Storage collaborator for vehicle counts
#[async_trait]
pub trait CountSink: Send + Sync {
    async fn record(&self, snapshot: &VehicleSnapshot) -> Result<(), PipelineError>;
}

/// Writes counts to the log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl CountSink for LogSink {
    async fn record(&self, snapshot: &VehicleSnapshot) -> Result<(), PipelineError> {
        info!(
            lane = %snapshot.lane,
            total = snapshot.total(),
            counts = ?snapshot.counts,
            "Vehicle counts recorded"
        );
        Ok(())
    }
}

/// Record with linear backoff, giving up after `max-attempts`
///
/// Returns whether the snapshot was stored. Callers run this off the
/// control path.
pub async fn record_with_retry(sink: &dyn CountSink, snapshot: &VehicleSnapshot, config: &SinkConfig) -> bool {
    debug!(lane = %snapshot.lane, "record_with_retry: called");
    let attempts = config.max_attempts.max(1);
    for attempt in 1..=attempts {
        match sink.record(snapshot).await {
            Ok(()) => return true,
            Err(e) if attempt < attempts => {
                warn!(lane = %snapshot.lane, attempt, error = %e, "Count sink failed, retrying");
                tokio::time::sleep(config.backoff(attempt)).await;
            }
            Err(e) => {
                error!(lane = %snapshot.lane, attempts, error = %e, "Count sink failed, giving up");
            }
        }
    }
    false
}
