//! Message types for the loopback bus

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::transport::TransportError;

/// One message handed to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Same id on every copy of one publication, including duplicates
    pub id: Uuid,
    pub topic: String,
    pub payload: String,
    /// True when replayed from the retained store on subscribe
    pub retained: bool,
}

/// Internal requests to the bus task
#[derive(Debug)]
pub enum BusRequest {
    /// Attach a client, replacing any previous inbox under the same id
    Connect {
        client_id: String,
        tx: mpsc::Sender<Delivery>,
    },

    /// Detach a client and drop its subscriptions
    Disconnect { client_id: String },

    /// Subscribe a client to a topic filter
    Subscribe { client_id: String, filter: String },

    /// Publish a message
    Publish {
        from: String,
        topic: String,
        payload: String,
        retain: bool,
        reply_tx: oneshot::Sender<Result<(), TransportError>>,
    },

    /// Get current metrics
    GetMetrics { reply_tx: oneshot::Sender<BusMetrics> },

    /// Shutdown the bus
    Shutdown,
}

/// Bus metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusMetrics {
    pub published: u64,
    pub delivered: u64,
    /// Deliveries lost to injected drops or full inboxes
    pub dropped: u64,
    pub duplicated: u64,
    pub connected_clients: usize,
    pub total_subscriptions: usize,
    pub retained_topics: usize,
}
