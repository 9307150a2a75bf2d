#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use multicam_relay::config::{CaptureSettings, DetectionSettings, RelayConfig, StreamSettings};
use multicam_relay::ingest::{SyntheticConfig, SyntheticSource};
use multicam_relay::{FrameSource, RawFrame, SourceError, SourceOpener, SourceStats};

/// Source fed frame by frame from the test. Dropping the feeder ends it with
/// `SourceError::Exhausted`.
pub struct ScriptedSource {
    index: usize,
    frames: Receiver<RawFrame>,
    captured: u64,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<RawFrame, SourceError> {
        match self.frames.recv() {
            Ok(frame) => {
                self.captured += 1;
                Ok(frame)
            }
            Err(_) => Err(SourceError::exhausted(self.index, "feeder dropped")),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.captured,
            description: format!("scripted:{}", self.index),
        }
    }
}

/// Opener that serves scripted sources for some indices and synthetic ones
/// for the rest.
pub struct TestOpener {
    scripted: Mutex<HashMap<usize, Receiver<RawFrame>>>,
    synthetic: HashMap<usize, SyntheticConfig>,
}

impl TestOpener {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            synthetic: HashMap::new(),
        }
    }

    /// Register a scripted camera and return its feeder.
    pub fn scripted(&mut self, index: usize) -> Sender<RawFrame> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.scripted.lock().unwrap().insert(index, rx);
        tx
    }

    pub fn synthetic(&mut self, index: usize, config: SyntheticConfig) {
        self.synthetic.insert(index, config);
    }
}

impl SourceOpener for TestOpener {
    fn open(&self, index: usize) -> Result<Box<dyn FrameSource>, SourceError> {
        if let Some(frames) = self.scripted.lock().unwrap().remove(&index) {
            return Ok(Box::new(ScriptedSource {
                index,
                frames,
                captured: 0,
            }));
        }
        match self.synthetic.get(&index) {
            Some(config) => Ok(Box::new(SyntheticSource::open(index, config.clone())?)),
            None => Err(SourceError::unavailable(index, "no such test camera")),
        }
    }
}

pub fn into_opener(opener: TestOpener) -> Arc<dyn SourceOpener> {
    Arc::new(opener)
}

pub fn gray_frame() -> RawFrame {
    RawFrame::filled(32, 24, [50, 50, 50]).unwrap()
}

/// Small paced synthetic scene with `subjects` marker squares.
pub fn synthetic(subjects: usize) -> SyntheticConfig {
    SyntheticConfig {
        width: 160,
        height: 90,
        target_fps: 50,
        subjects,
        fail_after: None,
    }
}

pub fn test_config(indices: &[usize], detector: &str) -> RelayConfig {
    RelayConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        capture: CaptureSettings {
            indices: indices.to_vec(),
            ..CaptureSettings::default()
        },
        detection: DetectionSettings {
            backend: detector.to_string(),
            min_width: 1,
            min_height: 1,
            ..DetectionSettings::default()
        },
        stream: StreamSettings {
            subscriber_buffer: 16,
            ..StreamSettings::default()
        },
        ..RelayConfig::default()
    }
}

pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
