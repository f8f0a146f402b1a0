//! Decoding of network chunks into normalized stereo sample blocks
//!
//! Chunks are little-endian signed 16-bit PCM, stereo-interleaved
//! (`L0 R0 L1 R1 ...`) at 44.1 kHz, usually wrapped in base64 by the
//! transport. Decoding either yields a whole [`SampleBlock`] or fails;
//! a chunk is never partially emitted.

use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;

/// Sample rate of every chunk delivered by the generator
pub const SAMPLE_RATE: u32 = 44_100;

/// Interleaved channel count of a chunk
pub const CHANNELS: usize = 2;

/// Bytes per interleaved stereo frame (2 channels x 16 bits)
pub const BYTES_PER_FRAME: usize = CHANNELS * 2;

/// Divisor mapping the i16 range onto [-1.0, 1.0)
const I16_SCALE: f32 = 32768.0;

/// A chunk that could not be turned into a [`SampleBlock`]
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("chunk is empty")]
    Empty,

    #[error("chunk length {len} is not a whole number of 4-byte stereo frames")]
    PartialFrame { len: usize },

    #[error("chunk is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// An immutable block of de-interleaved stereo samples
///
/// Cloning is cheap; the channel data is shared.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    left: Arc<[f32]>,
    right: Arc<[f32]>,
    sample_rate: u32,
}

impl SampleBlock {
    /// Build a block from separate channel buffers
    ///
    /// Returns `None` if the channels differ in length, are empty, or the
    /// sample rate is zero.
    pub fn from_channels(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Option<Self> {
        if left.len() != right.len() || left.is_empty() || sample_rate == 0 {
            return None;
        }
        Some(SampleBlock {
            left: left.into(),
            right: right.into(),
            sample_rate,
        })
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Playback length in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }

    /// Stereo frame at `index`, if in range
    pub fn frame(&self, index: usize) -> Option<(f32, f32)> {
        Some((*self.left.get(index)?, *self.right.get(index)?))
    }
}

/// Decode a base64 chunk as delivered by the generator
pub fn decode_chunk(encoded: &str) -> Result<SampleBlock, DecodeError> {
    let bytes = general_purpose::STANDARD.decode(encoded.trim())?;
    decode_pcm(&bytes)
}

/// Decode raw interleaved little-endian i16 stereo PCM
pub fn decode_pcm(bytes: &[u8]) -> Result<SampleBlock, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % BYTES_PER_FRAME != 0 {
        return Err(DecodeError::PartialFrame { len: bytes.len() });
    }

    let frames = bytes.len() / BYTES_PER_FRAME;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);

    for frame in bytes.chunks_exact(BYTES_PER_FRAME) {
        left.push(normalize(i16::from_le_bytes([frame[0], frame[1]])));
        right.push(normalize(i16::from_le_bytes([frame[2], frame[3]])));
    }

    Ok(SampleBlock {
        left: left.into(),
        right: right.into(),
        sample_rate: SAMPLE_RATE,
    })
}

/// Encode interleaved i16 samples as a base64 PCM chunk
///
/// The inverse of [`decode_chunk`], used by collaborators that produce
/// chunks locally.
pub fn encode_chunk(interleaved: &[i16]) -> String {
    let bytes: Vec<u8> = interleaved.iter().flat_map(|s| s.to_le_bytes()).collect();
    general_purpose::STANDARD.encode(bytes)
}

#[inline]
fn normalize(sample: i16) -> f32 {
    sample as f32 / I16_SCALE
}
