mod backend;
mod backends;
mod registry;
mod result;
mod stage;

pub use backend::DetectorBackend;
pub use backends::{MarkerBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{BackendFactory, BackendRegistry};
pub use result::{BoundingBox, Detection, DetectionResult};
pub use stage::{DetectionFilter, DetectionStage};
