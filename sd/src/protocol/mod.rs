//! Coordination protocol
//!
//! Topic names, inbound decoding and outbound payloads. The transport only
//! ever sees `(topic, payload, retain)` triples; everything typed lives here.

mod error;
mod inbound;
mod outbound;
pub mod topics;

pub use error::ProtocolError;
pub use inbound::{AUTHORITY_SOURCE, CommandKind, CommandTarget, Inbound, Signal, decode};
pub use outbound::{
    CommandAck, CountdownSync, GreenPermission, LaneActivity, LaneStatus, Outbound, VehicleCount, WALL_FORMAT,
};
