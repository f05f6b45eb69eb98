//! Publisher - typed publication with the single reconnect+resend policy

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::{Transport, TransportError};
use crate::protocol::Outbound;

/// Publishes [`Outbound`] messages over a [`Transport`]
///
/// A failed publish is retried once after a reconnect; a second failure is
/// logged and returned, never retried further.
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    retry_delay: Duration,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>, retry_delay: Duration) -> Self {
        Self { transport, retry_delay }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn publish(&self, msg: &Outbound) -> Result<(), TransportError> {
        let topic = msg.topic();
        debug!(%topic, kind = msg.kind(), "Publisher::publish: called");
        let payload = msg.payload().map_err(|e| {
            error!(%topic, error = %e, "Failed to encode outbound message");
            TransportError::from(e)
        })?;
        let retain = msg.retain();

        let first = match self.transport.publish(&topic, &payload, retain).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !first.is_retryable() {
            error!(%topic, error = %first, "Publish failed, not retryable");
            return Err(first);
        }

        warn!(%topic, error = %first, "Publish failed, reconnecting for one resend");
        tokio::time::sleep(self.retry_delay).await;
        if let Err(e) = self.transport.reconnect().await {
            warn!(%topic, error = %e, "Reconnect failed");
        }

        self.transport.publish(&topic, &payload, retain).await.map_err(|e| {
            error!(%topic, error = %e, "Publish failed after resend, dropping message");
            e
        })
    }
}
