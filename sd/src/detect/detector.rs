//! Object detection and counting

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::error::PipelineError;
use super::source::Frame;
use crate::domain::{LaneId, VehicleClass, VehicleSnapshot};

/// One object found in a frame
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

/// Inference collaborator
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, PipelineError>;
}

/// Count the detections that are confident enough and name a vehicle class
pub fn tally(
    lane: LaneId,
    detections: &[Detection],
    min_confidence: f32,
    timestamp: DateTime<Local>,
) -> VehicleSnapshot {
    let classes = detections
        .iter()
        .filter(|d| d.confidence >= min_confidence)
        .filter_map(|d| VehicleClass::from_label(&d.label));
    VehicleSnapshot::tally(lane, classes, timestamp)
}

const SYNTHETIC_LABELS: [&str; 6] = ["car", "car", "motorcycle", "truck", "bus", "person"];

/// Random detections, seeded per lane so runs are repeatable
#[derive(Debug)]
pub struct SyntheticDetector {
    rng: Mutex<StdRng>,
    max_objects: usize,
}

impl SyntheticDetector {
    pub fn new(seed: u64, max_objects: usize) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            max_objects,
        }
    }

    pub fn for_lane(lane: LaneId) -> Self {
        Self::new(u64::from(lane.get()), 8)
    }
}

#[async_trait]
impl Detector for SyntheticDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, PipelineError> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let n = rng.random_range(0..=self.max_objects);
        Ok((0..n)
            .map(|_| Detection {
                label: SYNTHETIC_LABELS[rng.random_range(0..SYNTHETIC_LABELS.len())].to_string(),
                confidence: rng.random_range(0.3..1.0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn det(label: &str, confidence: f32) -> Detection {
        Detection {
            label: label.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_tally_filters_confidence_and_unknown_labels() {
        let detections = vec![
            det("car", 0.9),
            det("car", 0.5),
            det("motorcycle", 0.7),
            det("person", 0.99),
            det("bus", 0.6),
        ];
        let snap = tally(LaneId::FIRST, &detections, 0.6, Local::now());
        assert_eq!(snap.total(), 3);
        assert_eq!(snap.counts[&VehicleClass::Mobil], 1);
        assert_eq!(snap.counts[&VehicleClass::Motor], 1);
        assert_eq!(snap.counts[&VehicleClass::Bus], 1);
    }

    #[tokio::test]
    async fn test_synthetic_detector_is_seeded() {
        let frame = Frame {
            lane: LaneId::FIRST,
            seq: 0,
            captured_at: Instant::now(),
        };
        let a = SyntheticDetector::new(7, 8);
        let b = SyntheticDetector::new(7, 8);
        for _ in 0..5 {
            let da = a.detect(&frame).await.unwrap();
            assert!(da.len() <= 8);
            assert_eq!(da, b.detect(&frame).await.unwrap());
        }
    }
}
