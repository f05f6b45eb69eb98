//! Publish/subscribe transport
//!
//! The channel is modeled as at-least-once and unordered. [`Transport`] is the
//! outbound seam; inbound deliveries arrive on an [`Inbox`]. [`LoopbackBus`]
//! is an in-process implementation used by `sd run` and by tests.

use async_trait::async_trait;

mod bus;
mod error;
mod publisher;

pub use bus::{BusHandle, BusMetrics, BusRequest, Delivery, Inbox, LoopbackBus};
pub use error::TransportError;
pub use publisher::Publisher;

/// Outbound side of the coordination channel
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload; `retain` keeps it as the topic's last value
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError>;

    /// Re-establish the connection after a failure
    async fn reconnect(&self) -> Result<(), TransportError>;
}
