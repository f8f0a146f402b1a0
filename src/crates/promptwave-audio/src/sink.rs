//! Output sink abstraction
//!
//! A sink exposes a monotonic device clock (in seconds) and accepts blocks
//! to be played at a given instant on that clock. Rendering is
//! fire-and-forget: the call only hands the block to the device timeline.

use crate::{Result, SampleBlock};

/// An opened output with its own clock and a single gain control
pub trait OutputSink: Send {
    /// Current device clock in seconds; stands still while suspended
    fn now(&self) -> f64;

    /// Schedule `block` to start at `start_time` on the device clock
    ///
    /// Must not block the caller.
    fn render(&mut self, block: SampleBlock, start_time: f64) -> Result<()>;

    /// Set the linear gain applied to everything this sink plays,
    /// including blocks that are already scheduled
    fn set_gain(&mut self, level: f32);

    fn gain(&self) -> f32;

    /// Pause the device clock and any in-flight audio
    fn suspend(&mut self) -> Result<()>;

    /// Restart the device clock
    fn resume(&mut self) -> Result<()>;

    /// Release the device; calling it again is a no-op
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Something that can open [`OutputSink`]s, one per playback session
pub trait OutputDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn OutputSink>>;

    /// Human-readable device name for status output
    fn name(&self) -> String;
}

/// Clamp a requested gain into [0.0, 1.0], mapping NaN to silence
pub fn clamp_gain(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}
