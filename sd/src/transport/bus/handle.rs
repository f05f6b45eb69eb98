//! BusHandle - client interface to the loopback bus

use async_trait::async_trait;
use eyre::{Result, eyre};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::messages::{BusMetrics, BusRequest, Delivery};
use crate::transport::{Transport, TransportError};

/// Outbound handle for one bus client
///
/// Cloneable; every clone publishes as the same client.
#[derive(Clone)]
pub struct BusHandle {
    /// Sender to the bus task
    tx: mpsc::Sender<BusRequest>,

    /// Kept so `reconnect` can re-attach the same inbox
    inbox_tx: mpsc::Sender<Delivery>,

    client_id: String,
}

impl BusHandle {
    pub(crate) fn new(tx: mpsc::Sender<BusRequest>, inbox_tx: mpsc::Sender<Delivery>, client_id: String) -> Self {
        debug!(%client_id, "BusHandle::new: called");
        Self {
            tx,
            inbox_tx,
            client_id,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Subscribe this client to a topic filter
    pub async fn subscribe(&self, filter: &str) -> Result<()> {
        debug!(client_id = %self.client_id, %filter, "BusHandle::subscribe: called");
        self.tx
            .send(BusRequest::Subscribe {
                client_id: self.client_id.clone(),
                filter: filter.to_string(),
            })
            .await
            .map_err(|_| eyre!("Bus channel closed"))?;
        Ok(())
    }

    /// Detach this client
    pub async fn disconnect(&self) -> Result<()> {
        debug!(client_id = %self.client_id, "BusHandle::disconnect: called");
        self.tx
            .send(BusRequest::Disconnect {
                client_id: self.client_id.clone(),
            })
            .await
            .map_err(|_| eyre!("Bus channel closed"))?;
        Ok(())
    }

    /// Get bus metrics
    pub async fn metrics(&self) -> Result<BusMetrics> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusRequest::GetMetrics { reply_tx })
            .await
            .map_err(|_| eyre!("Bus channel closed"))?;
        reply_rx.await.map_err(|_| eyre!("Bus shut down before replying"))
    }
}

#[async_trait]
impl Transport for BusHandle {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusRequest::Publish {
                from: self.client_id.clone(),
                topic: topic.to_string(),
                payload: payload.to_string(),
                retain,
                reply_tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        reply_rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        debug!(client_id = %self.client_id, "BusHandle::reconnect: called");
        self.tx
            .send(BusRequest::Connect {
                client_id: self.client_id.clone(),
                tx: self.inbox_tx.clone(),
            })
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Inbound deliveries for one client
pub struct Inbox {
    rx: mpsc::Receiver<Delivery>,
}

impl Inbox {
    pub(crate) fn new(rx: mpsc::Receiver<Delivery>) -> Self {
        Self { rx }
    }

    /// Wait for the next delivery; None once the bus has gone away
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Take a delivery if one is already waiting
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}
