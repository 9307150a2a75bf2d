use crate::error::DetectError;
use crate::frame::RawFrame;

use super::result::Detection;

/// Detector backend trait.
///
/// Backends are opaque: they receive a frame and return every object they
/// found in their native corner-form boxes, with class labels. Filtering to
/// the target class and conversion to `BoundingBox` happen in
/// `DetectionStage`, not here.
///
/// Each pipeline owns its backend instance, so `detect` may keep per-stream
/// state. Return `DetectError::Frame` for failures limited to one frame and
/// `DetectError::Unusable` when no further frame can succeed.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<Detection>, DetectError>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<(), DetectError> {
        Ok(())
    }
}
