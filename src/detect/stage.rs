use crate::config::DetectionSettings;
use crate::error::DetectError;
use crate::frame::RawFrame;

use super::backend::DetectorBackend;
use super::result::{BoundingBox, Detection, DetectionResult};

/// Rules applied to raw detector output.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionFilter {
    pub target_class: String,
    pub min_confidence: f32,
    pub min_width: u32,
    pub min_height: u32,
}

impl DetectionFilter {
    pub fn from_settings(settings: &DetectionSettings) -> Self {
        Self {
            target_class: settings.target_class.clone(),
            min_confidence: settings.min_confidence,
            min_width: settings.min_width,
            min_height: settings.min_height,
        }
    }

    /// Keep target-class detections above the thresholds, converted into
    /// frame-clamped boxes. Order follows the detector.
    pub fn apply(
        &self,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
    ) -> DetectionResult {
        let boxes = detections
            .iter()
            .filter(|d| d.label == self.target_class)
            .filter(|d| d.confidence >= self.min_confidence)
            .filter_map(|d| {
                BoundingBox::from_corners(d.x1, d.y1, d.x2, d.y2, frame_width, frame_height)
            })
            .filter(|b| b.width >= self.min_width && b.height >= self.min_height)
            .collect();
        DetectionResult { boxes }
    }
}

/// Detector backend plus the filter that turns its output into boxes.
pub struct DetectionStage {
    backend: Box<dyn DetectorBackend>,
    filter: DetectionFilter,
}

impl DetectionStage {
    pub fn new(backend: Box<dyn DetectorBackend>, filter: DetectionFilter) -> Self {
        Self { backend, filter }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<(), DetectError> {
        self.backend.warm_up()
    }

    /// Run the backend and filter its output.
    pub fn detect(&mut self, frame: &RawFrame) -> Result<DetectionResult, DetectError> {
        let raw = self.backend.detect(frame)?;
        Ok(self.filter.apply(&raw, frame.width, frame.height))
    }
}
