//! Audio output engine using cpal
//!
//! Each opened sink owns one output stream. The stream lives on its own
//! thread because cpal streams cannot move between threads; the sink talks
//! to that thread over a channel and shares the voice timeline with the
//! stream callback through a mutex.

use crate::sink::{clamp_gain, OutputDevice, OutputSink};
use crate::voice::Voice;
use crate::{AudioError, Result, SampleBlock};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, Stream, StreamConfig};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Time for a full-scale gain change, long enough to avoid zipper noise
const GAIN_RAMP_SECONDS: f32 = 0.01;

/// Output device backed by the system audio host
#[derive(Debug, Clone, Default)]
pub struct CpalDevice {
    /// Substring of the device name to use; `None` for the host default
    name_filter: Option<String>,
}

impl CpalDevice {
    /// The host's default output device
    pub fn default_output() -> Self {
        Self::default()
    }

    /// The first output device whose name contains `filter`
    pub fn matching(filter: impl Into<String>) -> Self {
        CpalDevice {
            name_filter: Some(filter.into()),
        }
    }

    /// Names of the output devices the default host exposes
    pub fn list_output_names() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| AudioError::Device(format!("Failed to enumerate devices: {}", e)))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn select(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match &self.name_filter {
            None => host
                .default_output_device()
                .ok_or_else(|| AudioError::Device("No output device available".to_string())),
            Some(filter) => host
                .output_devices()
                .map_err(|e| AudioError::Device(format!("Failed to enumerate devices: {}", e)))?
                .find(|d| d.name().map(|n| n.contains(filter.as_str())).unwrap_or(false))
                .ok_or_else(|| {
                    AudioError::Device(format!("No output device matching '{}'", filter))
                }),
        }
    }
}

impl OutputDevice for CpalDevice {
    fn open(&self) -> Result<Box<dyn OutputSink>> {
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let device = self.clone();

        let thread = thread::Builder::new()
            .name("promptwave-output".to_string())
            .spawn(move || run_stream_thread(device, command_rx, ready_tx))
            .map_err(|e| AudioError::Device(format!("Failed to spawn output thread: {}", e)))?;

        let opened = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("Output thread exited during setup".to_string()))??;

        info!(
            "opened output '{}' at {} Hz, {} channels",
            opened.name, opened.sample_rate, opened.channels
        );

        Ok(Box::new(CpalSink {
            timeline: opened.timeline,
            commands: command_tx,
            thread: Some(thread),
            sample_rate: opened.sample_rate,
            gain: 1.0,
            closed: false,
        }))
    }

    fn name(&self) -> String {
        match &self.name_filter {
            Some(filter) => format!("cpal ({})", filter),
            None => "cpal (default)".to_string(),
        }
    }
}

/// Linear gain smoother applied per output frame
#[derive(Debug)]
struct GainRamp {
    current: f32,
    step: f32,
}

impl GainRamp {
    fn new(initial: f32, device_rate: u32) -> Self {
        GainRamp {
            current: initial,
            step: 1.0 / (GAIN_RAMP_SECONDS * device_rate.max(1) as f32),
        }
    }

    /// Advance one frame towards `target` and return the gain to apply
    fn next(&mut self, target: f32) -> f32 {
        let delta = target - self.current;
        if delta.abs() <= self.step {
            self.current = target;
        } else {
            self.current += self.step * delta.signum();
        }
        self.current
    }
}

struct TimelineState {
    voices: Vec<Voice>,
    ramp: GainRamp,
    target_gain: f32,
}

/// Voices and clock shared between a sink and its stream callback
struct Timeline {
    state: Mutex<TimelineState>,
    frames_played: AtomicU64,
    faulted: AtomicBool,
    sample_rate: u32,
}

impl Timeline {
    fn new(sample_rate: u32) -> Self {
        Timeline {
            state: Mutex::new(TimelineState {
                voices: Vec::new(),
                ramp: GainRamp::new(1.0, sample_rate),
                target_gain: 1.0,
            }),
            frames_played: AtomicU64::new(0),
            faulted: AtomicBool::new(false),
            sample_rate,
        }
    }

    fn now(&self) -> f64 {
        self.frames_played.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(&self, block: SampleBlock, start_time: f64) {
        let voice = Voice::new(block, start_time, self.sample_rate);
        self.state.lock().voices.push(voice);
    }

    fn set_gain(&self, level: f32) {
        self.state.lock().target_gain = level;
    }

    /// Fill an interleaved buffer with every voice sounding in it
    fn fill(&self, buffer: &mut [f32], channels: usize) {
        buffer.fill(0.0);
        if channels == 0 {
            return;
        }

        let first_frame = self.frames_played.load(Ordering::Acquire);
        let mut state = self.state.lock();
        state.voices.retain_mut(|voice| {
            voice.mix_into(buffer, channels, first_frame);
            voice.is_active()
        });

        let target = state.target_gain;
        for frame in buffer.chunks_mut(channels) {
            let gain = state.ramp.next(target);
            for sample in frame {
                *sample = (*sample * gain).clamp(-1.0, 1.0);
            }
        }

        let frames = (buffer.len() / channels) as u64;
        self.frames_played.store(first_frame + frames, Ordering::Release);
    }
}

enum StreamCommand {
    Suspend(mpsc::Sender<Result<()>>),
    Resume(mpsc::Sender<Result<()>>),
    Close,
}

struct OpenedStream {
    name: String,
    sample_rate: u32,
    channels: u16,
    timeline: Arc<Timeline>,
}

/// Owns the cpal stream for the lifetime of one sink
fn run_stream_thread(
    device: CpalDevice,
    commands: mpsc::Receiver<StreamCommand>,
    ready: mpsc::Sender<Result<OpenedStream>>,
) {
    let stream = match open_stream(&device) {
        Ok((stream, opened)) => {
            let _ = ready.send(Ok(opened));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Suspend(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| AudioError::Device(format!("Failed to suspend stream: {}", e)));
                let _ = reply.send(result);
            }
            StreamCommand::Resume(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| AudioError::Device(format!("Failed to resume stream: {}", e)));
                let _ = reply.send(result);
            }
            StreamCommand::Close => break,
        }
    }

    debug!("output stream thread exiting");
}

fn open_stream(device: &CpalDevice) -> Result<(Stream, OpenedStream)> {
    let output = device.select()?;
    let name = output.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = output
        .default_output_config()
        .map_err(|e| AudioError::Device(format!("Failed to get default output config: {}", e)))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let timeline = Arc::new(Timeline::new(config.sample_rate.0));

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&output, &config, Arc::clone(&timeline))?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&output, &config, Arc::clone(&timeline))?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&output, &config, Arc::clone(&timeline))?,
        format => {
            return Err(AudioError::Device(format!("Unsupported sample format: {:?}", format)));
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::Device(format!("Failed to start stream: {}", e)))?;

    Ok((
        stream,
        OpenedStream {
            name,
            sample_rate: config.sample_rate.0,
            channels: config.channels,
            timeline,
        },
    ))
}

fn build_stream<T: SizedSample + FromSample<f32>>(
    device: &cpal::Device,
    config: &StreamConfig,
    timeline: Arc<Timeline>,
) -> Result<Stream> {
    let channels = config.channels as usize;
    let error_timeline = Arc::clone(&timeline);
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                timeline.fill(&mut scratch, channels);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_timeline.faulted.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| AudioError::Device(format!("Failed to build output stream: {}", e)))
}

/// Sink playing through a cpal output stream
pub struct CpalSink {
    timeline: Arc<Timeline>,
    commands: mpsc::Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    gain: f32,
    closed: bool,
}

impl CpalSink {
    /// Get the device sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn request(&self, make: impl FnOnce(mpsc::Sender<Result<()>>) -> StreamCommand) -> Result<()> {
        if self.closed {
            return Err(AudioError::Device("output is closed".to_string()));
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(make(reply_tx))
            .map_err(|_| AudioError::Device("output thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| AudioError::Device("output thread is gone".to_string()))?
    }
}

impl OutputSink for CpalSink {
    fn now(&self) -> f64 {
        self.timeline.now()
    }

    fn render(&mut self, block: SampleBlock, start_time: f64) -> Result<()> {
        if self.closed {
            return Err(AudioError::Render("output is closed".to_string()));
        }
        if self.timeline.faulted.load(Ordering::Acquire) {
            return Err(AudioError::Render("output stream reported an error".to_string()));
        }
        self.timeline.schedule(block, start_time);
        Ok(())
    }

    fn set_gain(&mut self, level: f32) {
        self.gain = clamp_gain(level);
        self.timeline.set_gain(self.gain);
    }

    fn gain(&self) -> f32 {
        self.gain
    }

    fn suspend(&mut self) -> Result<()> {
        self.request(StreamCommand::Suspend)
    }

    fn resume(&mut self) -> Result<()> {
        self.request(StreamCommand::Resume)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.commands.send(StreamCommand::Close);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| AudioError::Device("output thread panicked".to_string()))?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("failed to close output: {}", e);
        }
    }
}
