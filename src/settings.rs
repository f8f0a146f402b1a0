use promptwave_session::{ControllerSettings, GenerationConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Where rendered audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    /// The system audio output
    #[default]
    Device,
    /// Discard audio on a wall clock; for headless runs
    Null,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub backend: OutputBackend,
    /// Substring of the output device name; default device when unset
    pub device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    /// Length of each streamed chunk in milliseconds
    pub chunk_millis: u32,
    /// Start over when the source runs out
    pub looping: bool,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            chunk_millis: 250,
            looping: false,
        }
    }
}

/// Everything `promptwave` can be configured with
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub generation: GenerationConfig,
    pub controller: ControllerSettings,
    pub replay: ReplaySettings,
    pub output: OutputSettings,
}

impl Settings {
    /// Read a JSON settings file; missing sections take their defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.generation
            .validate()
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;

        let volume = self.controller.initial_volume;
        if !(0.0..=1.0).contains(&volume) {
            return Err(SettingsError::Invalid(format!(
                "Volume must be between 0 and 1, got {}",
                volume
            )));
        }

        if self.controller.max_queued_blocks == Some(0) {
            return Err(SettingsError::Invalid(
                "Queue ceiling must be at least 1 block".to_string(),
            ));
        }

        if !(10..=10_000).contains(&self.replay.chunk_millis) {
            return Err(SettingsError::Invalid(format!(
                "Chunk length must be between 10 and 10000 ms, got {}",
                self.replay.chunk_millis
            )));
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
