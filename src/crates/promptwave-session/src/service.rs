//! Interface to the remote music generator
//!
//! The controller never talks to the network itself. A [`MusicService`]
//! opens sessions; each session streams [`SessionEvent`]s back over the
//! channel it was given at connect time, in the order the chunks are meant
//! to be played.

use crate::{GenerationConfig, GenerationPrompt, SessionError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// What a session reports back while it is open
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One base64 chunk of 16-bit stereo 44.1 kHz PCM
    Chunk(String),
    /// The service hit an error; the session is unusable
    Error(String),
    /// The service closed the session
    Closed,
}

/// Sending half handed to the service. Unbounded: the generator is never
/// throttled by playback state.
pub type SessionEvents = mpsc::UnboundedSender<SessionEvent>;

/// Opens generation sessions
#[async_trait]
pub trait MusicService: Send + Sync {
    /// Open a session that reports chunks and lifecycle changes to `events`
    async fn connect(&self, events: SessionEvents) -> Result<Box<dyn MusicSession>, SessionError>;
}

/// One open generation session
///
/// The controller never has two of these calls in flight at once.
#[async_trait]
pub trait MusicSession: Send {
    /// Send the prompts and config, then begin streaming
    async fn start(
        &mut self,
        prompts: &[GenerationPrompt],
        config: &GenerationConfig,
    ) -> Result<(), SessionError>;

    async fn pause(&mut self) -> Result<(), SessionError>;

    async fn resume(&mut self) -> Result<(), SessionError>;

    async fn stop(&mut self) -> Result<(), SessionError>;

    /// Release the connection; called once, after `stop`
    async fn close(&mut self) -> Result<(), SessionError>;
}
