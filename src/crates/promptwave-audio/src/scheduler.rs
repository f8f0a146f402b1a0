//! Scheduler for laying queued blocks back-to-back on the device clock

use crate::queue::{PlaybackQueue, PushOutcome};
use crate::sink::OutputSink;
use crate::{Result, SampleBlock};
use log::debug;

/// Drains the playback queue into an output sink without gaps or overlap
///
/// The cursor is the device-clock instant at which the next block starts.
/// While draining it only ever moves forward by the duration of each
/// rendered block. When it has fallen behind the device clock (an idle
/// stretch with no blocks, or a pause), it jumps to "now" instead of
/// scheduling into the past.
#[derive(Debug)]
pub struct Scheduler {
    queue: PlaybackQueue,
    cursor: f64,
    active: bool,
}

impl Scheduler {
    /// Create an inactive scheduler draining `queue`, cursor at zero
    pub fn new(queue: PlaybackQueue) -> Self {
        Scheduler {
            queue,
            cursor: 0.0,
            active: false,
        }
    }

    /// Append a decoded block to the queue
    pub fn enqueue(&mut self, block: SampleBlock) -> PushOutcome {
        self.queue.push(block)
    }

    /// Gate draining on or off; the queue and cursor are left alone
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Device-clock instant where the next block will start
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    /// Render every queued block, in order, onto `sink`
    ///
    /// A no-op that touches neither queue nor cursor when inactive or when
    /// nothing is queued. Returns the number of blocks rendered. If the sink
    /// rejects a block, that block is lost and the error is returned; blocks
    /// behind it stay queued.
    pub fn schedule(&mut self, sink: &mut dyn OutputSink) -> Result<usize> {
        if !self.active || self.queue.is_empty() {
            return Ok(0);
        }

        let now = sink.now();
        if self.cursor < now {
            debug!(
                "schedule cursor {:.4}s behind device clock {:.4}s, resyncing",
                self.cursor, now
            );
            self.cursor = now;
        }

        let mut rendered = 0;
        while let Some(block) = self.queue.pop_front() {
            let duration = block.duration();
            sink.render(block, self.cursor)?;
            debug!("scheduled {:.4}s block at {:.4}s", duration, self.cursor);
            self.cursor += duration;
            rendered += 1;
        }

        Ok(rendered)
    }

    /// Stop draining, discard the backlog and move the cursor to `now`
    ///
    /// Returns the number of discarded blocks.
    pub fn reset(&mut self, now: f64) -> usize {
        self.active = false;
        self.cursor = now;
        self.queue.clear()
    }
}
