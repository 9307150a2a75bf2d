//! Multi-camera detection relay
//!
//! Ingests frames from several independent cameras, runs each frame through a
//! detector, draws the detections, and republishes the annotated frames as
//! live `multipart/x-mixed-replace` streams to any number of viewers.
//!
//! # Architecture
//!
//! Every configured camera index gets exactly one `CameraPipeline`, a
//! dedicated thread that owns its source exclusively:
//!
//! ```text
//! FrameSource ─▶ DetectionStage ─▶ Annotator ─▶ FrameEncoder ─▶ StreamMultiplexer ─▶ viewers
//! ```
//!
//! The pipeline exposes a running flag (mutex + condvar, so a paused camera
//! blocks rather than spins) and an atomic latest detection count.
//! `ControlSurface` and `StatusAggregator` act on that shared state without
//! ever stopping a loop. A failing camera closes its own pipeline and its
//! viewers' streams; every other camera keeps running.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (synthetic, V4L2)
//! - `detect`: detector backends, registry, class/threshold filtering
//! - `annotate`: box overlay and JPEG/PNG encoding
//! - `pipeline`: per-camera capture loop and state machine
//! - `stream`: per-subscriber fan-out and multipart framing
//! - `control`, `status`: start/stop commands and count snapshots
//! - `relay`: assembly of all pipelines from `config::RelayConfig`
//! - `api`: HTTP surface

pub mod annotate;
pub mod api;
pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod relay;
pub mod status;
pub mod stream;

pub use annotate::{Annotator, EncodeFormat, FrameEncoder};
pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use config::{
    CaptureBackend, CaptureSettings, DetectionSettings, EncodeSettings, RelayConfig,
    StreamSettings,
};
pub use control::{Action, ControlAck, ControlSurface};
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectionFilter, DetectionResult, DetectionStage,
    DetectorBackend,
};
pub use error::{ControlError, DetectError, EncodeError, PipelineClosed, SourceError};
pub use frame::{EncodedFrame, RawFrame};
pub use ingest::{ConfiguredOpener, FrameSource, SourceOpener, SourceStats};
pub use pipeline::{CameraPipeline, CloseReason, PipelineState};
pub use relay::Relay;
pub use status::{CameraStatus, StatusAggregator, StatusSnapshot};
pub use stream::{StreamMultiplexer, Subscription};
