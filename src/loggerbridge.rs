use promptwave_session::StatusEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

#[derive(Clone, Debug, serde::Serialize)]
pub struct LoggerPayload {
    pub message: String,
    pub message_type: String,
    pub timestamp: String,
}

/// Prints status lines for the user
#[derive(Clone)]
pub struct Logger {
    /// Print JSON payloads instead of plain lines
    pub json: bool,
}

impl Logger {
    pub fn payload(message: String, message_type: String) -> LoggerPayload {
        LoggerPayload {
            message,
            message_type,
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }

    pub fn log(&self, message: String, message_type: String) {
        log::debug!(target: "status", "[{}] {}", message_type, message);
        let payload = Self::payload(message, message_type);
        if self.json {
            if let Ok(line) = serde_json::to_string(&payload) {
                println!("{}", line);
            }
        } else {
            println!("[{}] {}", payload.timestamp, payload.message);
        }
    }

    pub fn status(&self, event: &StatusEvent) {
        self.log(event.message(), event.level().as_str().to_string());
    }

    /// Print every status event until the controller goes away
    pub fn forward(self, mut events: broadcast::Receiver<StatusEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.status(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        let message = format!("{} status updates skipped", skipped);
                        self.log(message, "warning".to_string());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
