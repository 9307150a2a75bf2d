pub mod marker;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use marker::MarkerBackend;
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
