//! Per-session task feeding service events into playback

use crate::controller::Inner;
use crate::{ControllerError, SessionError, SessionEvent};
use log::debug;
use std::sync::Weak;
use tokio::sync::mpsc;

/// Consume `events` for session `generation` until it ends or fails
///
/// Failures are handed to a separate task because teardown aborts this one.
pub(crate) async fn run(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(controller) = inner.upgrade() else {
            return;
        };
        let failure = match event {
            SessionEvent::Chunk(data) => match controller.accept_chunk(generation, &data) {
                Ok(()) => continue,
                Err(err) => ControllerError::Device(err),
            },
            SessionEvent::Error(message) => SessionError(message).into(),
            SessionEvent::Closed => {
                SessionError::new("The music service closed the session").into()
            }
        };
        tokio::spawn(controller.fail_session(generation, failure));
        return;
    }

    // The service dropped its sender without saying goodbye
    if let Some(controller) = inner.upgrade() {
        if controller.is_current(generation) {
            let failure = SessionError::new("Lost connection to the music service").into();
            tokio::spawn(controller.fail_session(generation, failure));
        }
    }
    debug!("Chunk pump for session {} finished", generation);
}
