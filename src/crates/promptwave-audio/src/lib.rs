//! Gapless playback engine for streamed PCM audio
//!
//! This crate turns bursty, arbitrarily sized chunks of 16-bit stereo PCM
//! into continuous output:
//! - Decode base64 PCM chunks into normalized stereo blocks
//! - Queue blocks in arrival order
//! - Schedule them back-to-back against an output device clock
//! - Play them through cpal, or record them in memory for headless use

pub mod decoder;
pub mod engine;
pub mod memory;
pub mod queue;
pub mod scheduler;
pub mod sink;
pub mod voice;

pub use decoder::{
    decode_chunk, decode_pcm, encode_chunk, DecodeError, SampleBlock, CHANNELS, SAMPLE_RATE,
};
pub use engine::{CpalDevice, CpalSink};
pub use memory::{MemoryDevice, MemoryLog, MemorySink, RenderRecord};
pub use queue::{OverflowPolicy, PlaybackQueue, PushOutcome};
pub use scheduler::Scheduler;
pub use sink::{clamp_gain, OutputDevice, OutputSink};
pub use voice::Voice;

/// Audio playback errors
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Failed to render block: {0}")]
    Render(String),

    #[error("Failed to decode chunk: {0}")]
    Decode(#[from] DecodeError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;
