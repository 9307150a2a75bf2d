//! Process-level assembly: one pipeline per configured camera index plus the
//! control and status views over them.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::annotate::{Annotator, FrameEncoder};
use crate::config::{RelayConfig, StreamSettings};
use crate::control::ControlSurface;
use crate::detect::{BackendRegistry, DetectionFilter, DetectionStage};
use crate::ingest::{ConfiguredOpener, SourceOpener};
use crate::pipeline::CameraPipeline;
use crate::status::StatusAggregator;
use crate::stream::Subscription;

pub struct Relay {
    pipelines: Arc<BTreeMap<usize, Arc<CameraPipeline>>>,
    control: ControlSurface,
    status: StatusAggregator,
    stream: StreamSettings,
}

impl Relay {
    /// Start with the configured capture backend and the built-in detectors.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let opener: Arc<dyn SourceOpener> = Arc::new(ConfiguredOpener::new(config.capture.clone()));
        Self::start(config, opener, &BackendRegistry::with_builtin())
    }

    /// Spawn one pipeline per index in `config.capture.indices`.
    ///
    /// A camera whose source cannot be opened still gets a pipeline; it closes
    /// as failed without affecting the others.
    pub fn start(
        config: &RelayConfig,
        opener: Arc<dyn SourceOpener>,
        registry: &BackendRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let filter = DetectionFilter::from_settings(&config.detection);
        let encoder = FrameEncoder::new(config.encode.format, config.encode.quality);

        let mut pipelines = BTreeMap::new();
        for &index in &config.capture.indices {
            if pipelines.contains_key(&index) {
                return Err(anyhow!("camera index {} is configured twice", index));
            }
            let backend = registry
                .build_configured(&config.detection)
                .with_context(|| format!("failed to build detector for camera {}", index))?;
            let stage = DetectionStage::new(backend, filter.clone());
            let pipeline = CameraPipeline::spawn(
                index,
                Arc::clone(&opener),
                stage,
                Annotator::default(),
                encoder,
                config.stream.subscriber_buffer,
            )?;
            pipelines.insert(index, Arc::new(pipeline));
        }
        log::info!(
            "relay started {} pipelines (detector={}, target={})",
            pipelines.len(),
            config.detection.backend,
            config.detection.target_class
        );

        let pipelines = Arc::new(pipelines);
        Ok(Self {
            control: ControlSurface::new(Arc::clone(&pipelines)),
            status: StatusAggregator::new(Arc::clone(&pipelines)),
            pipelines,
            stream: config.stream.clone(),
        })
    }

    pub fn control(&self) -> &ControlSurface {
        &self.control
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    pub fn stream_settings(&self) -> &StreamSettings {
        &self.stream
    }

    /// Configured indices, ascending.
    pub fn indices(&self) -> Vec<usize> {
        self.pipelines.keys().copied().collect()
    }

    pub fn pipeline(&self, index: usize) -> Option<&Arc<CameraPipeline>> {
        self.pipelines.get(&index)
    }

    /// New viewer on `index`, or `None` for an unknown index.
    pub fn subscribe(&self, index: usize) -> Option<Subscription> {
        self.pipelines.get(&index).map(|pipeline| pipeline.subscribe())
    }

    /// Stop every pipeline and wait for its thread.
    pub fn shutdown(&self) {
        for pipeline in self.pipelines.values() {
            pipeline.shutdown();
        }
        log::info!("relay stopped");
    }
}
