//! VehicleSnapshot - per-lane vehicle counts cached for cross-lane handoff

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::lane::LaneId;

/// Vehicle classes reported by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Mobil,
    Motor,
    Truck,
    Bus,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 4] = [Self::Mobil, Self::Motor, Self::Truck, Self::Bus];

    /// Map a detector label onto a class; unknown labels are not vehicles we count
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "mobil" | "car" => Some(Self::Mobil),
            "motor" | "motorcycle" => Some(Self::Motor),
            "truck" => Some(Self::Truck),
            "bus" => Some(Self::Bus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mobil => "mobil",
            Self::Motor => "motor",
            Self::Truck => "truck",
            Self::Bus => "bus",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts observed on one lane at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub lane: LaneId,
    pub counts: BTreeMap<VehicleClass, u32>,
    pub timestamp: DateTime<Local>,
}

impl VehicleSnapshot {
    /// A snapshot with every class present and zeroed
    pub fn empty(lane: LaneId, timestamp: DateTime<Local>) -> Self {
        Self {
            lane,
            counts: VehicleClass::ALL.iter().map(|c| (*c, 0)).collect(),
            timestamp,
        }
    }

    /// Build a snapshot from a list of detected classes
    pub fn tally(lane: LaneId, classes: impl IntoIterator<Item = VehicleClass>, timestamp: DateTime<Local>) -> Self {
        let mut snapshot = Self::empty(lane, timestamp);
        for class in classes {
            *snapshot.counts.entry(class).or_default() += 1;
        }
        snapshot
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Same counts, attributed to another lane
    pub fn retagged(&self, lane: LaneId) -> Self {
        Self {
            lane,
            ..self.clone()
        }
    }
}
