//! Loopback bus
//!
//! An actor task owning the topic table. Clients talk to it through
//! [`BusHandle`] (outbound) and [`Inbox`] (inbound).

mod core;
mod handle;
mod messages;

pub use self::core::LoopbackBus;
pub use handle::{BusHandle, Inbox};
pub use messages::{BusMetrics, BusRequest, Delivery};
