//! Frame ingestion sources.
//!
//! This module provides different sources for raw frames:
//! - Synthetic scenes (demos and tests)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Every source is opened by camera index and produces `RawFrame` instances
//! through a blocking `read_frame`. A source is owned by exactly one pipeline
//! thread and is released when that pipeline drops it.
//!
//! The ingestion layer MUST NOT:
//! - Buffer more than the frame being handed off
//! - Share a device between pipelines

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::{SyntheticConfig, SyntheticSource, MARKER_RGB};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

use crate::config::{CaptureBackend, CaptureSettings};
use crate::error::SourceError;
use crate::frame::RawFrame;

/// Blocking frame producer owned by one pipeline.
pub trait FrameSource: Send {
    /// Capture the next frame. Blocks on device I/O.
    ///
    /// Any error is terminal for the source.
    fn read_frame(&mut self) -> Result<RawFrame, SourceError>;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub description: String,
}

/// Opens a source by camera index.
pub trait SourceOpener: Send + Sync {
    fn open(&self, index: usize) -> Result<Box<dyn FrameSource>, SourceError>;
}

impl<F> SourceOpener for F
where
    F: Fn(usize) -> Result<Box<dyn FrameSource>, SourceError> + Send + Sync,
{
    fn open(&self, index: usize) -> Result<Box<dyn FrameSource>, SourceError> {
        self(index)
    }
}

/// Opener driven by the `[capture]` configuration section.
#[derive(Clone, Debug)]
pub struct ConfiguredOpener {
    settings: CaptureSettings,
}

impl ConfiguredOpener {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }
}

impl SourceOpener for ConfiguredOpener {
    fn open(&self, index: usize) -> Result<Box<dyn FrameSource>, SourceError> {
        match self.settings.backend {
            CaptureBackend::Synthetic => {
                let config = SyntheticConfig {
                    width: self.settings.width,
                    height: self.settings.height,
                    target_fps: self.settings.target_fps,
                    subjects: self.settings.synthetic_subjects,
                    fail_after: self.settings.synthetic_fail_after,
                };
                Ok(Box::new(SyntheticSource::open(index, config)?))
            }
            CaptureBackend::V4l2 => {
                #[cfg(feature = "ingest-v4l2")]
                {
                    let config = V4l2Config {
                        device: device_path(&self.settings.device_template, index),
                        target_fps: self.settings.target_fps,
                        width: self.settings.width,
                        height: self.settings.height,
                    };
                    Ok(Box::new(V4l2Source::open(index, config)?))
                }
                #[cfg(not(feature = "ingest-v4l2"))]
                {
                    Err(SourceError::unavailable(
                        index,
                        "v4l2 capture requires the ingest-v4l2 feature",
                    ))
                }
            }
        }
    }
}

/// Expand `{index}` in a device path template.
pub fn device_path(template: &str, index: usize) -> String {
    template.replace("{index}", &index.to_string())
}
