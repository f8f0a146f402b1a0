//! Playback states and the user actions that move between them

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a playback session is in its lifecycle
///
/// `Idle -> Generating <-> Paused -> Stopped`; `Stopped` only returns to
/// `Idle` through a full reset when the next session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Generating,
    Paused,
    Stopped,
}

impl PlaybackState {
    /// Whether `action` is accepted in this state
    pub fn permits(self, action: Action) -> bool {
        use PlaybackState::*;
        match action {
            Action::Start => matches!(self, Idle | Stopped),
            Action::Pause => self == Generating,
            Action::Resume => self == Paused,
            Action::Stop => true,
            Action::SetVolume => self != Stopped,
        }
    }

    /// Whether a session and an output are open
    pub fn is_live(self) -> bool {
        matches!(self, PlaybackState::Generating | PlaybackState::Paused)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Generating => "generating",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// User intents handled by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Pause,
    Resume,
    Stop,
    SetVolume,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Start => "start",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Stop => "stop",
            Action::SetVolume => "set volume",
        };
        f.write_str(name)
    }
}
