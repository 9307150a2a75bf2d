use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::DetectError;
use crate::frame::RawFrame;

/// Stub backend for testing. Replays scripted responses, then a fixed answer.
#[derive(Debug, Default)]
pub struct StubBackend {
    script: VecDeque<Result<Vec<Detection>, DetectError>>,
    fallback: Vec<Detection>,
    calls: u64,
}

impl StubBackend {
    /// Backend that never finds anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that returns `detections` for every frame.
    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self {
            fallback: detections,
            ..Self::default()
        }
    }

    /// Queue a one-shot response served before the fallback.
    pub fn push_response(&mut self, response: Result<Vec<Detection>, DetectError>) {
        self.script.push_back(response);
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &RawFrame) -> Result<Vec<Detection>, DetectError> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(response) => response,
            None => Ok(self.fallback.clone()),
        }
    }
}
