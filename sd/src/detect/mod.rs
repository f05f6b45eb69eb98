//! Detection pipeline collaborators
//!
//! Video acquisition, inference and count storage sit behind traits so the
//! agent's workers can be driven by real devices or by the synthetic
//! implementations used for `sd run` and tests.

mod detector;
mod error;
mod queue;
mod sink;
mod source;

pub use detector::{Detection, Detector, SyntheticDetector, tally};
pub use error::PipelineError;
pub use queue::DropOldestQueue;
pub use sink::{CountSink, LogSink, record_with_retry};
pub use source::{Frame, FrameSource, SyntheticSource};
