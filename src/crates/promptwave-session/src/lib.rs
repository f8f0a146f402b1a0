//! Session control for prompt-driven music playback
//!
//! [`SessionController`] owns one generation session and one audio output at
//! a time. It opens both on `start`, streams incoming chunks into the
//! playback engine while generating, and tears everything down on `stop` or
//! when the session fails. Progress is reported as [`StatusEvent`]s.

pub mod controller;
pub mod events;
mod pump;
pub mod prompt;
pub mod service;
pub mod settings;
pub mod state;

pub use controller::{PlaybackSnapshot, SessionController};
pub use events::{StatusEvent, StatusLevel};
pub use prompt::{GenerationConfig, GenerationPrompt, BPM_RANGE, TEMPERATURE_RANGE};
pub use service::{MusicService, MusicSession, SessionEvent, SessionEvents};
pub use settings::ControllerSettings;
pub use state::{Action, PlaybackState};

use promptwave_audio::AudioError;

/// Failure reported by a music service
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct SessionError(pub String);

impl SessionError {
    pub fn new(message: impl Into<String>) -> Self {
        SessionError(message.into())
    }
}

/// Errors surfaced by the controller
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("{0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("{0}")]
    Device(#[from] AudioError),

    #[error("Cannot {action} while {from}")]
    InvalidTransition { from: PlaybackState, action: Action },
}

pub type Result<T> = std::result::Result<T, ControllerError>;
