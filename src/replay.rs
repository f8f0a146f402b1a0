//! Music service that replays a WAV file as if it were being generated
//!
//! Chunks go out at real-time pace, with a short lead whenever playback
//! (re)starts, in the same base64 PCM format a remote generator delivers.

use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use log::{debug, info};
use promptwave_audio::{encode_chunk, CHANNELS, SAMPLE_RATE};
use promptwave_session::{
    GenerationConfig, GenerationPrompt, MusicService, MusicSession, SessionError, SessionEvent,
    SessionEvents,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Chunks sent immediately whenever playback (re)starts
const LEAD_CHUNKS: usize = 2;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Hound error: {0}")]
    Hound(#[from] hound::Error),

    #[error("Unsupported WAV format: {0}")]
    Format(String),

    #[error("Source contains no audio")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Waiting,
    Playing,
    Paused,
    Stopped,
}

/// A loaded source, ready to open sessions on
#[derive(Clone)]
pub struct WavReplay {
    /// Interleaved stereo samples
    samples: Arc<[i16]>,
    chunk_frames: usize,
    looping: bool,
}

impl WavReplay {
    /// Load a 16-bit 44.1 kHz mono or stereo WAV file
    pub fn open(path: &Path, chunk_millis: u32, looping: bool) -> Result<Self, ReplayError> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(ReplayError::Format(format!(
                "expected 16-bit integer samples, got {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }
        if spec.sample_rate != SAMPLE_RATE {
            return Err(ReplayError::Format(format!(
                "expected {} Hz, got {} Hz",
                SAMPLE_RATE, spec.sample_rate
            )));
        }

        let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
        let interleaved = match spec.channels {
            1 => samples.iter().flat_map(|&s| [s, s]).collect(),
            2 => samples,
            n => {
                return Err(ReplayError::Format(format!(
                    "expected mono or stereo, got {} channels",
                    n
                )))
            }
        };
        Self::from_samples(interleaved, chunk_millis, looping)
    }

    /// Replay interleaved stereo samples already in memory
    pub fn from_samples(
        interleaved: Vec<i16>,
        chunk_millis: u32,
        looping: bool,
    ) -> Result<Self, ReplayError> {
        let frames = interleaved.len() / CHANNELS;
        if frames == 0 {
            return Err(ReplayError::Empty);
        }
        let mut samples = interleaved;
        samples.truncate(frames * CHANNELS);
        let chunk_frames = (SAMPLE_RATE as usize * chunk_millis as usize / 1000).max(1);
        Ok(WavReplay {
            samples: samples.into(),
            chunk_frames,
            looping,
        })
    }

    /// Length of the source in seconds
    pub fn duration(&self) -> f64 {
        (self.samples.len() / CHANNELS) as f64 / SAMPLE_RATE as f64
    }

    pub fn chunk_count(&self) -> usize {
        let frames = self.samples.len() / CHANNELS;
        (frames + self.chunk_frames - 1) / self.chunk_frames
    }

    fn pace(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_frames as f64 / SAMPLE_RATE as f64)
    }
}

#[async_trait]
impl MusicService for WavReplay {
    async fn connect(&self, events: SessionEvents) -> Result<Box<dyn MusicSession>, SessionError> {
        let (control, transport) = watch::channel(Transport::Waiting);
        let task = tokio::spawn(stream(self.clone(), events, transport));
        Ok(Box::new(ReplaySession {
            control,
            task: Some(task),
        }))
    }
}

pub struct ReplaySession {
    control: watch::Sender<Transport>,
    task: Option<JoinHandle<()>>,
}

impl ReplaySession {
    fn set(&self, transport: Transport) -> Result<(), SessionError> {
        if self.task.is_none() {
            return Err(SessionError::new("Replay session is closed"));
        }
        self.control
            .send(transport)
            .map_err(|_| SessionError::new("Replay stream is no longer running"))
    }
}

#[async_trait]
impl MusicSession for ReplaySession {
    async fn start(
        &mut self,
        prompts: &[GenerationPrompt],
        config: &GenerationConfig,
    ) -> Result<(), SessionError> {
        for prompt in prompts {
            info!("Prompt '{}' (weight {})", prompt.text, prompt.weight);
        }
        info!(
            "Replaying source at temperature {}, {} bpm",
            config.temperature, config.bpm
        );
        self.set(Transport::Playing)
    }

    async fn pause(&mut self) -> Result<(), SessionError> {
        self.set(Transport::Paused)
    }

    async fn resume(&mut self) -> Result<(), SessionError> {
        self.set(Transport::Playing)
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        self.set(Transport::Stopped)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let _ = self.control.send(Transport::Stopped);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        Ok(())
    }
}

async fn stream(
    source: WavReplay,
    events: SessionEvents,
    mut transport: watch::Receiver<Transport>,
) {
    let pace = source.pace();
    let chunk_len = source.chunk_frames * CHANNELS;
    let mut ticker = tokio::time::interval_at(Instant::now() + pace, pace);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut position = 0;
    let mut lead = 0;
    let mut tail = LEAD_CHUNKS;
    let mut was_playing = false;

    loop {
        let state = *transport.borrow_and_update();
        match state {
            Transport::Stopped => break,
            Transport::Playing => {}
            Transport::Waiting | Transport::Paused => {
                was_playing = false;
                if transport.changed().await.is_err() {
                    break;
                }
                continue;
            }
        }

        if !was_playing {
            was_playing = true;
            lead = LEAD_CHUNKS;
            ticker.reset();
        }

        if position >= source.samples.len() {
            if !source.looping {
                // Hang up once the chunks sent ahead have had time to play
                tail = tail.saturating_sub(lead);
                lead = 0;
                if tail == 0 {
                    info!("Replay source finished");
                    let _ = events.send(SessionEvent::Closed);
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => tail -= 1,
                    changed = transport.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }
            debug!("Replay source looping");
            position = 0;
        }

        if lead > 0 {
            lead -= 1;
        } else {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = transport.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        let end = (position + chunk_len).min(source.samples.len());
        let data = encode_chunk(&source.samples[position..end]);
        position = end;
        if events.send(SessionEvent::Chunk(data)).is_err() {
            break;
        }
    }
    debug!("Replay stream ended");
}
