//! Failure taxonomy shared by the capture, detection and control paths.
//!
//! Each variant maps onto one recovery policy:
//! - `SourceError`: terminal for the owning pipeline only.
//! - `DetectError::Frame` / `EncodeError`: recoverable, the loop keeps going.
//! - `DetectError::Unusable`: terminal for the owning pipeline only.
//! - `ControlError`: surfaced to the caller, no state change.

use thiserror::Error;

/// Failures raised by a `FrameSource`.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be opened.
    #[error("source {index} unavailable: {reason}")]
    Unavailable { index: usize, reason: String },
    /// The source stopped producing frames mid-stream.
    #[error("source {index} exhausted: {reason}")]
    Exhausted { index: usize, reason: String },
}

impl SourceError {
    pub fn unavailable(index: usize, reason: impl ToString) -> Self {
        Self::Unavailable {
            index,
            reason: reason.to_string(),
        }
    }

    pub fn exhausted(index: usize, reason: impl ToString) -> Self {
        Self::Exhausted {
            index,
            reason: reason.to_string(),
        }
    }
}

/// Failures raised by a detector backend.
#[derive(Debug, Error)]
pub enum DetectError {
    /// This frame could not be analysed; the next one may succeed.
    #[error("detection failed for frame: {0}")]
    Frame(String),
    /// The capability itself is broken (model unloadable, poisoned state).
    #[error("detector unusable: {0}")]
    Unusable(String),
}

impl DetectError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unusable(_))
    }
}

#[derive(Debug, Error)]
#[error("encode failed: {0}")]
pub struct EncodeError(pub String);

/// Rejections from the control surface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("unknown camera index {0}")]
    UnknownIndex(usize),
    #[error("invalid action '{0}'; expected start or stop")]
    InvalidAction(String),
}

/// Returned by a subscription once its pipeline has closed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("pipeline {index} closed")]
pub struct PipelineClosed {
    pub index: usize,
}
