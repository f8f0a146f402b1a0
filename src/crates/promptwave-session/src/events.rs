//! Status events published to whoever drives the controller

use crate::PlaybackState;
use serde::Serialize;
use tokio::sync::broadcast;

/// Severity of a [`StatusEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

impl StatusLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusLevel::Info => "info",
            StatusLevel::Warning => "warning",
            StatusLevel::Error => "error",
        }
    }
}

/// Something the user should be told about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusEvent {
    /// A session is being opened
    Connecting { device: String },
    StateChanged { from: PlaybackState, to: PlaybackState },
    VolumeChanged { level: f32 },
    /// Recoverable problem, e.g. a dropped chunk
    Warning { message: String },
    /// An operation failed or the session was torn down
    Error { message: String },
}

impl StatusEvent {
    pub fn level(&self) -> StatusLevel {
        match self {
            StatusEvent::Warning { .. } => StatusLevel::Warning,
            StatusEvent::Error { .. } => StatusLevel::Error,
            _ => StatusLevel::Info,
        }
    }

    /// One-line text suitable for a status bar
    pub fn message(&self) -> String {
        match self {
            StatusEvent::Connecting { device } => format!("Connecting... (output: {})", device),
            StatusEvent::StateChanged { to, .. } => match to {
                PlaybackState::Idle => "Ready".to_string(),
                PlaybackState::Generating => "Generating music...".to_string(),
                PlaybackState::Paused => "Paused".to_string(),
                PlaybackState::Stopped => "Stopped".to_string(),
            },
            StatusEvent::VolumeChanged { level } => format!("Volume {}%", (level * 100.0).round()),
            StatusEvent::Warning { message } => format!("Warning: {}", message),
            StatusEvent::Error { message } => format!("Error: {}", message),
        }
    }
}

/// Fan-out of status events; sending never blocks and never fails
pub(crate) struct EventHub {
    tx: broadcast::Sender<StatusEvent>,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn emit(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}
