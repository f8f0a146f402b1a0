//! In-memory output backend
//!
//! Plays nothing; records every call it receives. The clock is either
//! driven by hand ([`MemoryDevice::manual`]) or follows wall time
//! ([`MemoryDevice::wall_clock`]), which makes it usable as a headless
//! output as well as a test double.

use crate::sink::{clamp_gain, OutputDevice, OutputSink};
use crate::{AudioError, Result, SampleBlock};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// One accepted render call
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRecord {
    /// Which opened sink received it (1-based open count)
    pub sink_id: usize,
    pub start_time: f64,
    pub duration: f64,
    pub frames: usize,
    /// First stereo frame of the block, handy for identifying it
    pub first_frame: (f32, f32),
}

/// Everything the device has been asked to do
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    pub renders: Vec<RenderRecord>,
    pub gains: Vec<f32>,
    pub opened: usize,
    pub closed: usize,
    pub suspends: usize,
    pub resumes: usize,
}

enum TimeSource {
    Manual(f64),
    Wall(Instant),
}

impl TimeSource {
    fn now(&self) -> f64 {
        match self {
            TimeSource::Manual(t) => *t,
            TimeSource::Wall(origin) => origin.elapsed().as_secs_f64(),
        }
    }
}

struct Shared {
    time: Mutex<TimeSource>,
    log: Mutex<MemoryLog>,
    fail_open: Mutex<bool>,
    fail_render: Mutex<bool>,
}

/// Device handle; clones share the same clock and log
#[derive(Clone)]
pub struct MemoryDevice {
    shared: Arc<Shared>,
}

impl MemoryDevice {
    /// A device whose clock only moves through [`MemoryDevice::advance`]
    pub fn manual() -> Self {
        Self::with_time(TimeSource::Manual(0.0))
    }

    /// A device whose clock follows wall time
    pub fn wall_clock() -> Self {
        Self::with_time(TimeSource::Wall(Instant::now()))
    }

    fn with_time(time: TimeSource) -> Self {
        MemoryDevice {
            shared: Arc::new(Shared {
                time: Mutex::new(time),
                log: Mutex::new(MemoryLog::default()),
                fail_open: Mutex::new(false),
                fail_render: Mutex::new(false),
            }),
        }
    }

    /// Move a manual clock forward; ignored for wall clocks
    pub fn advance(&self, seconds: f64) {
        if let TimeSource::Manual(t) = &mut *self.shared.time.lock() {
            *t += seconds.max(0.0);
        }
    }

    /// Snapshot of the recorded calls
    pub fn log(&self) -> MemoryLog {
        self.shared.log.lock().clone()
    }

    /// Make subsequent `open` calls fail
    pub fn fail_open(&self, fail: bool) {
        *self.shared.fail_open.lock() = fail;
    }

    /// Make subsequent `render` calls fail
    pub fn fail_render(&self, fail: bool) {
        *self.shared.fail_render.lock() = fail;
    }

    fn device_time(&self) -> f64 {
        self.shared.time.lock().now()
    }
}

impl OutputDevice for MemoryDevice {
    fn open(&self) -> Result<Box<dyn OutputSink>> {
        if *self.shared.fail_open.lock() {
            return Err(AudioError::Device("memory device refused to open".to_string()));
        }
        let sink_id = {
            let mut log = self.shared.log.lock();
            log.opened += 1;
            log.opened
        };
        Ok(Box::new(MemorySink {
            device: self.clone(),
            sink_id,
            opened_at: self.device_time(),
            paused_total: 0.0,
            suspended_at: None,
            gain: 1.0,
            closed: false,
        }))
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}

/// Sink opened from a [`MemoryDevice`]; its clock starts at zero
pub struct MemorySink {
    device: MemoryDevice,
    sink_id: usize,
    opened_at: f64,
    paused_total: f64,
    suspended_at: Option<f64>,
    gain: f32,
    closed: bool,
}

impl OutputSink for MemorySink {
    fn now(&self) -> f64 {
        let device_now = self.suspended_at.unwrap_or_else(|| self.device.device_time());
        (device_now - self.opened_at - self.paused_total).max(0.0)
    }

    fn render(&mut self, block: SampleBlock, start_time: f64) -> Result<()> {
        if self.closed {
            return Err(AudioError::Render("sink is closed".to_string()));
        }
        if *self.device.shared.fail_render.lock() {
            return Err(AudioError::Render("memory device rejected the block".to_string()));
        }
        self.device.shared.log.lock().renders.push(RenderRecord {
            sink_id: self.sink_id,
            start_time,
            duration: block.duration(),
            frames: block.frames(),
            first_frame: block.frame(0).unwrap_or_default(),
        });
        Ok(())
    }

    fn set_gain(&mut self, level: f32) {
        self.gain = clamp_gain(level);
        self.device.shared.log.lock().gains.push(self.gain);
    }

    fn gain(&self) -> f32 {
        self.gain
    }

    fn suspend(&mut self) -> Result<()> {
        if self.suspended_at.is_none() {
            self.suspended_at = Some(self.device.device_time());
            self.device.shared.log.lock().suspends += 1;
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if let Some(at) = self.suspended_at.take() {
            self.paused_total += self.device.device_time() - at;
            self.device.shared.log.lock().resumes += 1;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.device.shared.log.lock().closed += 1;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(frames: usize) -> SampleBlock {
        SampleBlock::from_channels(vec![0.25; frames], vec![-0.25; frames], 44_100).unwrap()
    }

    #[test]
    fn test_manual_clock_starts_at_open() {
        let device = MemoryDevice::manual();
        device.advance(5.0);
        let sink = device.open().unwrap();
        assert_eq!(sink.now(), 0.0);
        device.advance(1.5);
        assert!((sink.now() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_suspend_freezes_clock() {
        let device = MemoryDevice::manual();
        let mut sink = device.open().unwrap();
        device.advance(1.0);
        sink.suspend().unwrap();
        device.advance(10.0);
        assert!((sink.now() - 1.0).abs() < 1e-12);

        sink.resume().unwrap();
        device.advance(0.5);
        assert!((sink.now() - 1.5).abs() < 1e-12);

        let log = device.log();
        assert_eq!((log.suspends, log.resumes), (1, 1));
    }

    #[test]
    fn test_records_renders_and_rejects_after_close() {
        let device = MemoryDevice::manual();
        let mut sink = device.open().unwrap();
        sink.render(block(441), 0.0).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.render(block(441), 0.01).is_err());

        let log = device.log();
        assert_eq!(log.renders.len(), 1);
        assert_eq!(log.renders[0].frames, 441);
        assert_eq!(log.renders[0].first_frame, (0.25, -0.25));
        assert_eq!(log.closed, 1);
    }

    #[test]
    fn test_failure_injection() {
        let device = MemoryDevice::manual();
        device.fail_open(true);
        assert!(device.open().is_err());
        device.fail_open(false);

        let mut sink = device.open().unwrap();
        device.fail_render(true);
        assert!(sink.render(block(10), 0.0).is_err());
    }
}
