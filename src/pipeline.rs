//! Per-camera capture loop.
//!
//! A `CameraPipeline` owns one OS thread that runs
//! read → detect → annotate → encode → publish for a single source. The
//! running flag lives behind a mutex and condvar so a paused pipeline blocks
//! instead of polling; the latest detection count and lifecycle state are
//! atomics readable from any thread without stalling the loop.
//!
//! State machine:
//!
//! ```text
//! Starting ──open ok──▶ Streaming ⇄ Paused
//!    │                     │          │
//!    └──open failed──▶ Closed(Failed) ◀┘ (source or detector failure)
//!                          Closed(Shutdown) on orderly stop
//! ```

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::annotate::{Annotator, FrameEncoder};
use crate::detect::DetectionStage;
use crate::ingest::{FrameSource, SourceOpener};
use crate::stream::{StreamMultiplexer, Subscription};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Why a pipeline stopped for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Source or detector failure.
    Failed,
    /// Orderly process shutdown.
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Streaming,
    Paused,
    Closed(CloseReason),
}

impl PipelineState {
    fn to_u8(self) -> u8 {
        match self {
            PipelineState::Starting => 0,
            PipelineState::Streaming => 1,
            PipelineState::Paused => 2,
            PipelineState::Closed(CloseReason::Failed) => 3,
            PipelineState::Closed(CloseReason::Shutdown) => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Starting,
            1 => PipelineState::Streaming,
            2 => PipelineState::Paused,
            3 => PipelineState::Closed(CloseReason::Failed),
            _ => PipelineState::Closed(CloseReason::Shutdown),
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, PipelineState::Closed(_))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Starting => "starting",
            PipelineState::Streaming => "streaming",
            PipelineState::Paused => "paused",
            PipelineState::Closed(CloseReason::Failed) => "failed",
            PipelineState::Closed(CloseReason::Shutdown) => "shutdown",
        }
    }
}

struct RunFlags {
    running: bool,
    shutdown: bool,
}

struct PipelineShared {
    index: usize,
    flags: Mutex<RunFlags>,
    wake: Condvar,
    state: AtomicU8,
    latest_count: AtomicUsize,
    frames_produced: AtomicU64,
    encode_failures: AtomicU64,
    detect_failures: AtomicU64,
    mux: Arc<StreamMultiplexer>,
}

impl PipelineShared {
    fn flags(&self) -> MutexGuard<'_, RunFlags> {
        self.flags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PipelineState) {
        // Closed is terminal.
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if PipelineState::from_u8(current).is_closed() {
                    None
                } else {
                    Some(state.to_u8())
                }
            });
    }

    /// Checkpoint before every read. Blocks while paused.
    ///
    /// Returns `false` once shutdown has been requested.
    fn wait_until_running(&self) -> bool {
        let mut flags = self.flags();
        if !flags.running && !flags.shutdown {
            self.set_state(PipelineState::Paused);
            log::info!("camera {}: paused", self.index);
            while !flags.running && !flags.shutdown {
                flags = self
                    .wake
                    .wait(flags)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if !flags.shutdown {
                log::info!("camera {}: resumed", self.index);
            }
        }
        if flags.shutdown {
            return false;
        }
        self.set_state(PipelineState::Streaming);
        true
    }

    fn close(&self, reason: CloseReason) {
        self.set_state(PipelineState::Closed(reason));
        self.mux.close();
        log::info!(
            "camera {}: closed ({:?}) after {} frames, latest count {}",
            self.index,
            reason,
            self.frames_produced.load(Ordering::Relaxed),
            self.latest_count.load(Ordering::Relaxed)
        );
    }
}

/// Handle to one running camera pipeline.
pub struct CameraPipeline {
    shared: Arc<PipelineShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CameraPipeline {
    /// Start the capture thread for `index`. The source is opened on that thread.
    pub fn spawn(
        index: usize,
        opener: Arc<dyn SourceOpener>,
        stage: DetectionStage,
        annotator: Annotator,
        encoder: FrameEncoder,
        subscriber_buffer: usize,
    ) -> Result<Self> {
        let shared = Arc::new(PipelineShared {
            index,
            flags: Mutex::new(RunFlags {
                running: true,
                shutdown: false,
            }),
            wake: Condvar::new(),
            state: AtomicU8::new(PipelineState::Starting.to_u8()),
            latest_count: AtomicUsize::new(0),
            frames_produced: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            detect_failures: AtomicU64::new(0),
            mux: StreamMultiplexer::new(index, subscriber_buffer),
        });

        let worker = CaptureLoop {
            shared: Arc::clone(&shared),
            stage,
            annotator,
            encoder,
        };
        let thread = std::thread::Builder::new()
            .name(format!("camera-{}", index))
            .spawn(move || worker.run(opener.as_ref()))
            .map_err(|e| anyhow!("failed to spawn pipeline thread for camera {}: {}", index, e))?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// Request running or paused. Idempotent; the loop observes it before its next read.
    pub fn set_running(&self, desired: bool) {
        let mut flags = self.shared.flags();
        if flags.running != desired {
            flags.running = desired;
            log::debug!("camera {}: running flag set to {}", self.shared.index, desired);
        }
        self.shared.wake.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.shared.flags().running
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// Box count of the most recent successfully analysed frame.
    pub fn latest_count(&self) -> usize {
        self.shared.latest_count.load(Ordering::Acquire)
    }

    pub fn frames_produced(&self) -> u64 {
        self.shared.frames_produced.load(Ordering::Relaxed)
    }

    pub fn encode_failures(&self) -> u64 {
        self.shared.encode_failures.load(Ordering::Relaxed)
    }

    pub fn detect_failures(&self) -> u64 {
        self.shared.detect_failures.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.mux.subscriber_count()
    }

    /// Frames skipped by slow subscribers.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.mux.dropped_frames()
    }

    /// Attach a viewer. Frames start with the next one published.
    pub fn subscribe(&self) -> Subscription {
        self.shared.mux.subscribe()
    }

    /// Stop the loop, wait for its thread, and end every subscription.
    pub fn shutdown(&self) {
        {
            let mut flags = self.shared.flags();
            flags.shutdown = true;
            self.shared.wake.notify_all();
        }
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("camera {}: pipeline thread panicked", self.shared.index);
                self.shared.close(CloseReason::Failed);
            }
        }
    }
}

impl Drop for CameraPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State moved onto the pipeline thread.
struct CaptureLoop {
    shared: Arc<PipelineShared>,
    stage: DetectionStage,
    annotator: Annotator,
    encoder: FrameEncoder,
}

impl CaptureLoop {
    fn run(mut self, opener: &dyn SourceOpener) {
        let index = self.shared.index;
        let source = match opener.open(index) {
            Ok(source) => source,
            Err(e) => {
                log::error!("camera {}: {}", index, e);
                self.shared.close(CloseReason::Failed);
                return;
            }
        };
        log::info!(
            "camera {}: source {} open, detector {}",
            index,
            source.stats().description,
            self.stage.backend_name()
        );
        if let Err(e) = self.stage.warm_up() {
            if e.is_fatal() {
                log::error!("camera {}: {}", index, e);
                drop(source);
                self.shared.close(CloseReason::Failed);
                return;
            }
            log::warn!("camera {}: detector warm-up failed: {}", index, e);
        }

        let reason = self.stream(source);
        self.shared.close(reason);
    }

    /// Runs until the source fails or shutdown is requested. The source is
    /// dropped before returning so the device is released ahead of `close`.
    fn stream(&mut self, mut source: Box<dyn FrameSource>) -> CloseReason {
        let shared = Arc::clone(&self.shared);
        let index = shared.index;
        let mut sequence = 0u64;
        let mut last_health_log = Instant::now();

        loop {
            if !shared.wait_until_running() {
                return CloseReason::Shutdown;
            }

            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::error!("camera {}: {}", index, e);
                    return CloseReason::Failed;
                }
            };
            sequence += 1;

            let outgoing = match self.stage.detect(&frame) {
                Ok(result) => {
                    shared.latest_count.store(result.count(), Ordering::Release);
                    self.annotator.annotate(&frame, &result.boxes)
                }
                Err(e) if e.is_fatal() => {
                    log::error!("camera {}: {}", index, e);
                    return CloseReason::Failed;
                }
                Err(e) => {
                    shared.detect_failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!("camera {}: frame {}: {}", index, sequence, e);
                    frame
                }
            };

            match self.encoder.encode(&outgoing, index, sequence) {
                Ok(encoded) => {
                    shared.mux.publish(encoded);
                    shared.frames_produced.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    shared.encode_failures.fetch_add(1, Ordering::Relaxed);
                    log::debug!("camera {}: frame {} dropped: {}", index, sequence, e);
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = source.stats();
                log::info!(
                    "camera {}: frames={} published={} count={} subscribers={} dropped={} detect_failures={} encode_failures={}",
                    index,
                    stats.frames_captured,
                    shared.frames_produced.load(Ordering::Relaxed),
                    shared.latest_count.load(Ordering::Relaxed),
                    shared.mux.subscriber_count(),
                    shared.mux.dropped_frames(),
                    shared.detect_failures.load(Ordering::Relaxed),
                    shared.encode_failures.load(Ordering::Relaxed)
                );
                last_health_log = Instant::now();
            }
        }
    }
}
