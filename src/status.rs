use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::pipeline::CameraPipeline;

/// Point-in-time view of one pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CameraStatus {
    pub index: usize,
    pub latest_count: usize,
    pub state: &'static str,
    pub running: bool,
    pub frames_produced: u64,
    pub subscribers: usize,
    pub dropped_frames: u64,
    pub detect_failures: u64,
    pub encode_failures: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub cameras: Vec<CameraStatus>,
}

impl StatusSnapshot {
    /// `index -> latest count`.
    pub fn counts(&self) -> BTreeMap<usize, usize> {
        self.cameras
            .iter()
            .map(|cam| (cam.index, cam.latest_count))
            .collect()
    }

    /// Flat body served on `/status`: `{"status":"Running","<label>_detected_<i>":n}`.
    pub fn to_status_json(&self, label: &str) -> Value {
        let mut body = Map::new();
        body.insert("status".to_string(), json!("Running"));
        for cam in &self.cameras {
            body.insert(
                format!("{}_detected_{}", label, cam.index),
                json!(cam.latest_count),
            );
        }
        Value::Object(body)
    }
}

/// Reads per-pipeline counters without pausing any loop.
#[derive(Clone)]
pub struct StatusAggregator {
    pipelines: Arc<BTreeMap<usize, Arc<CameraPipeline>>>,
}

impl StatusAggregator {
    pub fn new(pipelines: Arc<BTreeMap<usize, Arc<CameraPipeline>>>) -> Self {
        Self { pipelines }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let cameras = self
            .pipelines
            .values()
            .map(|pipeline| CameraStatus {
                index: pipeline.index(),
                latest_count: pipeline.latest_count(),
                state: pipeline.state().as_str(),
                running: pipeline.is_running(),
                frames_produced: pipeline.frames_produced(),
                subscribers: pipeline.subscriber_count(),
                dropped_frames: pipeline.dropped_frames(),
                detect_failures: pipeline.detect_failures(),
                encode_failures: pipeline.encode_failures(),
            })
            .collect();
        StatusSnapshot { cameras }
    }
}
