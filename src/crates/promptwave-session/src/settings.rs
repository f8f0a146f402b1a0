//! Controller configuration

use promptwave_audio::{OverflowPolicy, PlaybackQueue};
use serde::{Deserialize, Serialize};

/// Tunables for [`SessionController`](crate::SessionController)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Gain applied when an output opens, in [0.0, 1.0]
    pub initial_volume: f32,
    /// Ceiling on queued blocks; `None` queues without limit
    pub max_queued_blocks: Option<usize>,
    /// What happens to a chunk arriving at a full queue
    pub overflow: OverflowPolicy,
    /// Suspend the output on pause so already-scheduled audio is held
    /// rather than played out
    pub suspend_output_on_pause: bool,
    /// Buffered status events per subscriber before old ones are skipped
    pub event_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            initial_volume: 1.0,
            max_queued_blocks: None,
            overflow: OverflowPolicy::DropOldest,
            suspend_output_on_pause: false,
            event_capacity: 64,
        }
    }
}

impl ControllerSettings {
    pub(crate) fn new_queue(&self) -> PlaybackQueue {
        match self.max_queued_blocks {
            Some(max) => PlaybackQueue::bounded(max, self.overflow),
            None => PlaybackQueue::new(),
        }
    }
}
