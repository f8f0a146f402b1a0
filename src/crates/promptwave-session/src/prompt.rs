//! Generation parameters forwarded to the music service
//!
//! The controller validates these once at start and then hands them to the
//! service untouched.

use crate::ControllerError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Temperatures the generator accepts
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=3.0;

/// Tempos the generator accepts, in beats per minute
pub const BPM_RANGE: RangeInclusive<u16> = 60..=200;

/// A text prompt with its relative weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPrompt {
    pub text: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

impl GenerationPrompt {
    /// A prompt with weight 1.0
    pub fn new(text: impl Into<String>) -> Self {
        GenerationPrompt {
            text: text.into(),
            weight: default_weight(),
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Reject blank text and non-positive weights
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.text.trim().is_empty() {
            return Err(ControllerError::Config("Please enter a music prompt".to_string()));
        }
        if !(self.weight.is_finite() && self.weight > 0.0) {
            return Err(ControllerError::Config(format!(
                "Prompt weight must be positive, got {}",
                self.weight
            )));
        }
        Ok(())
    }
}

/// Sampling temperature and tempo for the generator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub bpm: u16,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            bpm: 120,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), ControllerError> {
        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(ControllerError::Config(format!(
                "Temperature must be between {} and {}, got {}",
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end(),
                self.temperature
            )));
        }
        if !BPM_RANGE.contains(&self.bpm) {
            return Err(ControllerError::Config(format!(
                "BPM must be between {} and {}, got {}",
                BPM_RANGE.start(),
                BPM_RANGE.end(),
                self.bpm
            )));
        }
        Ok(())
    }
}
