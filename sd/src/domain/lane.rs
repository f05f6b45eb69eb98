//! LaneId - identity of one of the four traffic approaches

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced when converting a raw integer into a lane id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaneIdError {
    #[error("lane id {0} out of range (expected 1..=4)")]
    OutOfRange(i64),
}

/// One of the four lanes, numbered 1..=4
///
/// Lanes rotate in numeric order: the successor of 4 is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct LaneId(u8);

impl LaneId {
    /// Number of lanes at the intersection
    pub const COUNT: usize = 4;

    /// The lane that is pre-selected to go first after startup
    pub const FIRST: LaneId = LaneId(1);

    /// Create a lane id, returning None when out of range
    pub fn new(id: u8) -> Option<Self> {
        if (1..=Self::COUNT as u8).contains(&id) {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Raw numeric id (1..=4)
    pub fn get(self) -> u8 {
        self.0
    }

    /// The lane that goes after this one
    pub fn successor(self) -> Self {
        Self(self.0 % Self::COUNT as u8 + 1)
    }

    /// Zero-based index for per-lane arrays
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    /// All lanes in rotation order
    pub fn all() -> impl Iterator<Item = LaneId> {
        (1..=Self::COUNT as u8).map(LaneId)
    }
}

impl TryFrom<i64> for LaneId {
    type Error = LaneIdError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(LaneId::new)
            .ok_or(LaneIdError::OutOfRange(value))
    }
}

impl From<LaneId> for u8 {
    fn from(lane: LaneId) -> Self {
        lane.0
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
