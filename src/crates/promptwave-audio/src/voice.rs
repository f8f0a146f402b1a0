//! Voice represents one scheduled block on the device timeline

use crate::SampleBlock;

/// A block pinned to a span of frames on the output device's timeline
#[derive(Debug)]
pub struct Voice {
    /// The block being played
    block: SampleBlock,
    /// First device frame at which the block sounds
    start_frame: u64,
    /// Device frame just past the block's last one
    end_frame: u64,
    /// Unrounded start, in device frames
    origin: f64,
    /// Block frames advanced per device frame
    rate_ratio: f64,
    /// Whether this voice still has frames left
    active: bool,
}

impl Voice {
    /// Pin `block` to `start_time` seconds on a device running at `device_rate`
    ///
    /// Both ends are rounded from the block's exact start and end instants, so
    /// a block starting where the previous one ended picks up on the very
    /// next device frame.
    pub fn new(block: SampleBlock, start_time: f64, device_rate: u32) -> Self {
        let start_time = start_time.max(0.0);
        let rate = device_rate as f64;
        let origin = start_time * rate;
        let start_frame = origin.round() as u64;
        let end_frame = ((start_time + block.duration()) * rate).round() as u64;
        let rate_ratio = block.sample_rate() as f64 / rate;
        Voice {
            block,
            start_frame,
            end_frame,
            origin,
            rate_ratio,
            active: true,
        }
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn end_frame(&self) -> u64 {
        self.end_frame
    }

    /// Check if this voice is still active
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stereo frame sounding at absolute device frame `frame`
    ///
    /// Returns `None` before the start. Past the end the voice deactivates.
    pub fn frame_at(&mut self, frame: u64) -> Option<(f32, f32)> {
        if !self.active || frame < self.start_frame {
            return None;
        }
        if frame >= self.end_frame {
            self.active = false;
            return None;
        }

        let last = self.block.frames().saturating_sub(1) as f64;
        let position = ((frame as f64 - self.origin) * self.rate_ratio).clamp(0.0, last);

        Some((
            self.interpolate_sample_at_position(position, Channel::Left),
            self.interpolate_sample_at_position(position, Channel::Right),
        ))
    }

    /// Interpolate a channel at a fractional block position
    ///
    /// Exact at whole frames; linear in between. Past the last frame there is
    /// nothing to interpolate towards, so the last frame is held.
    fn interpolate_sample_at_position(&self, frame_position: f64, channel: Channel) -> f32 {
        let data = match channel {
            Channel::Left => self.block.left(),
            Channel::Right => self.block.right(),
        };

        let index = frame_position.floor() as usize;
        let Some(&current) = data.get(index) else {
            return 0.0;
        };

        let fraction = (frame_position - frame_position.floor()) as f32;
        match data.get(index + 1) {
            Some(&next) if fraction > 0.0 => current + (next - current) * fraction,
            _ => current,
        }
    }

    /// Add this voice into an interleaved device buffer
    ///
    /// `first_frame` is the absolute device frame of `buffer[0]`. Stereo goes
    /// to the first two channels; a mono device gets the downmix.
    pub fn mix_into(&mut self, buffer: &mut [f32], channels: usize, first_frame: u64) {
        if channels == 0 {
            return;
        }
        for (i, out) in buffer.chunks_mut(channels).enumerate() {
            let Some((left, right)) = self.frame_at(first_frame + i as u64) else {
                if self.active {
                    continue;
                }
                break;
            };
            match out {
                [mono] => *mono += (left + right) * 0.5,
                [l, r, ..] => {
                    *l += left;
                    *r += right;
                }
                [] => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Left,
    Right,
}
