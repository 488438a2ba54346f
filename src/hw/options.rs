use crate::hw::config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long detaching a render source waits for an in-flight IOProc call to
/// drain before returning.
pub const DEFAULT_DETACH_QUIESCENCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    pub detach_quiescence: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            detach_quiescence: DEFAULT_DETACH_QUIESCENCE,
        }
    }
}

impl ControllerOptions {
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(quiescence) = config::env_millis(config::DETACH_QUIESCENCE_ENV) {
            options.detach_quiescence = quiescence;
        }
        options
    }
}

/// Device-level settings an orchestrator asks for when it takes over an
/// output device. Unset fields leave the device as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub sample_rate: Option<f64>,
    pub buffer_frames: Option<u32>,
    pub exclusive: Option<bool>,
    pub mixing: Option<bool>,
}
