//! Frame sources

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use super::error::PipelineError;
use crate::domain::LaneId;

/// One captured video frame
///
/// Pixel data stays with the detector collaborator; the pipeline only needs
/// to know which frame it is and when it was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub lane: LaneId,
    pub seq: u64,
    pub captured_at: Instant,
}

/// A lane's video stream
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Open (or reopen) the stream
    async fn connect(&self) -> Result<(), PipelineError>;

    /// Block until the next frame is available
    async fn next_frame(&self) -> Result<Frame, PipelineError>;
}

/// Generates frames at a fixed rate without any camera behind it
#[derive(Debug)]
pub struct SyntheticSource {
    lane: LaneId,
    url: String,
    interval: Duration,
    seq: AtomicU64,
    connected: AtomicBool,
}

impl SyntheticSource {
    pub fn new(lane: LaneId, url: impl Into<String>, interval: Duration) -> Self {
        Self {
            lane,
            url: url.into(),
            interval,
            seq: AtomicU64::new(0),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn connect(&self) -> Result<(), PipelineError> {
        debug!(lane = %self.lane, url = %self.url, "SyntheticSource::connect: called");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn next_frame(&self) -> Result<Frame, PipelineError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PipelineError::SourceUnavailable(format!("{} not connected", self.url)));
        }
        tokio::time::sleep(self.interval).await;
        Ok(Frame {
            lane: self.lane,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            captured_at: tokio::time::Instant::now().into_std(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_frames_require_connect() {
        let source = SyntheticSource::new(LaneId::FIRST, "rtsp://test/1", Duration::from_millis(40));
        assert!(matches!(
            source.next_frame().await,
            Err(PipelineError::SourceUnavailable(_))
        ));

        source.connect().await.unwrap();
        let a = source.next_frame().await.unwrap();
        let b = source.next_frame().await.unwrap();
        assert_eq!(a.seq + 1, b.seq);
        assert_eq!(b.captured_at - a.captured_at, Duration::from_millis(40));
    }
}
