//! Start/stop commands addressed to pipelines by camera index.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::error::ControlError;
use crate::pipeline::CameraPipeline;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    pub fn desired_running(self) -> bool {
        matches!(self, Action::Start)
    }
}

impl FromStr for Action {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            _ => Err(ControlError::InvalidAction(value.to_string())),
        }
    }
}

/// Acknowledgement returned to the caller of a control command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ControlAck {
    pub cam: usize,
    pub running: bool,
    /// Pipeline state when the command was accepted; the loop applies the
    /// flag at its next checkpoint.
    pub state: &'static str,
}

/// Routes control commands to the pipeline owning each index.
#[derive(Clone)]
pub struct ControlSurface {
    pipelines: Arc<BTreeMap<usize, Arc<CameraPipeline>>>,
}

impl ControlSurface {
    pub fn new(pipelines: Arc<BTreeMap<usize, Arc<CameraPipeline>>>) -> Self {
        Self { pipelines }
    }

    pub fn set_running(&self, index: usize, desired: bool) -> Result<ControlAck, ControlError> {
        let pipeline = self
            .pipelines
            .get(&index)
            .ok_or(ControlError::UnknownIndex(index))?;
        pipeline.set_running(desired);
        log::info!(
            "control: camera {} -> {}",
            index,
            if desired { "start" } else { "stop" }
        );
        Ok(ControlAck {
            cam: index,
            running: desired,
            state: pipeline.state().as_str(),
        })
    }

    /// Parse `action` and apply it to `index`.
    pub fn apply(&self, index: usize, action: &str) -> Result<ControlAck, ControlError> {
        let action: Action = action.parse()?;
        self.set_running(index, action.desired_running())
    }
}
