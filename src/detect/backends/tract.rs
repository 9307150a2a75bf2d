#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::DetectError;
use crate::frame::RawFrame;

/// Tract-based backend for ONNX object detectors.
///
/// The model takes a `1x3xHxW` float tensor in `0..1` and emits rows of
/// `[x1, y1, x2, y2, score, class_id]` in input pixel coordinates, shaped
/// either `Nx6` or `1xNx6`. Class ids index into `labels`.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        labels: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            labels,
        })
    }

    fn build_input(&self, frame: &RawFrame) -> Result<Tensor, DetectError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(DetectError::Frame(format!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let pixels = frame.pixels();
        let width = frame.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, frame.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn label_for(&self, class_id: f32) -> String {
        let id = class_id.round().max(0.0) as usize;
        self.labels
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", id))
    }

    fn extract_detections(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>, DetectError> {
        let output = outputs
            .first()
            .ok_or_else(|| DetectError::Unusable("model produced no outputs".into()))?;
        let rows = output
            .to_array_view::<f32>()
            .map_err(|err| DetectError::Unusable(format!("model output was not f32: {}", err)))?;
        let values: Vec<f32> = rows.iter().copied().collect();
        if values.len() % 6 != 0 {
            return Err(DetectError::Unusable(format!(
                "model output length {} is not a multiple of 6",
                values.len()
            )));
        }

        Ok(values
            .chunks_exact(6)
            .filter(|row| row[4].is_finite())
            .map(|row| {
                Detection::new(
                    self.label_for(row[5]),
                    row[4],
                    [row[0], row[1], row[2], row[3]],
                )
            })
            .collect())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<Detection>, DetectError> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|err| DetectError::Frame(format!("ONNX inference failed: {}", err)))?;
        self.extract_detections(outputs)
    }
}
