use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::config::DetectionSettings;

use super::backend::DetectorBackend;
use super::backends::{MarkerBackend, StubBackend};

/// Builds one backend instance from detection settings.
pub type BackendFactory =
    Box<dyn Fn(&DetectionSettings) -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Registry of detector backends by name.
///
/// Backends are stored as factories because every pipeline owns its own
/// instance; `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("marker", |settings: &DetectionSettings| {
            Ok(Box::new(MarkerBackend::new(settings.target_class.clone())) as Box<dyn DetectorBackend>)
        });
        registry.register("stub", |_: &DetectionSettings| {
            Ok(Box::new(StubBackend::new()) as Box<dyn DetectorBackend>)
        });
        #[cfg(feature = "backend-tract")]
        registry.register("tract", |settings: &DetectionSettings| {
            let path = settings
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("tract backend requires detection.model_path"))?;
            let backend = super::backends::TractBackend::new(
                path,
                settings.model_width,
                settings.model_height,
                settings.class_labels.clone(),
            )?;
            Ok(Box::new(backend) as Box<dyn DetectorBackend>)
        });
        registry
    }

    /// Register a backend factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&DetectionSettings) -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a fresh instance of the named backend.
    pub fn build(&self, name: &str, settings: &DetectionSettings) -> Result<Box<dyn DetectorBackend>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "detector backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        factory(settings)
    }

    /// Build the backend named in `settings.backend`, or the default when empty.
    pub fn build_configured(&self, settings: &DetectionSettings) -> Result<Box<dyn DetectorBackend>> {
        let name = if settings.backend.trim().is_empty() {
            self.default_name
                .as_deref()
                .ok_or_else(|| anyhow!("no detector backends registered"))?
        } else {
            settings.backend.as_str()
        };
        self.build(name, settings)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
