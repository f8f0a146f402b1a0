//! FIFO of decoded blocks waiting to be scheduled

use crate::SampleBlock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What to do when a bounded queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued block to make room
    #[default]
    DropOldest,
    /// Refuse the incoming block
    Reject,
}

/// Result of [`PlaybackQueue::push`]
#[derive(Debug)]
pub enum PushOutcome {
    Queued,
    /// The block was queued after evicting this one from the head
    DroppedOldest(SampleBlock),
    /// The queue was full and the block was not queued
    Rejected(SampleBlock),
}

/// Ordered sequence of blocks in arrival order
///
/// Never reordered or deduplicated. Unbounded unless constructed with
/// [`PlaybackQueue::bounded`]. Not synchronized on its own: it lives inside
/// the [`Scheduler`](crate::Scheduler), and whoever shares the scheduler
/// provides the lock.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    blocks: VecDeque<SampleBlock>,
    capacity: Option<usize>,
    policy: OverflowPolicy,
}

impl PlaybackQueue {
    /// Create an unbounded queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue holding at most `capacity` blocks (minimum 1)
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        PlaybackQueue {
            blocks: VecDeque::with_capacity(capacity.clamp(1, 1024)),
            capacity: Some(capacity.max(1)),
            policy,
        }
    }

    /// Append a block to the tail
    pub fn push(&mut self, block: SampleBlock) -> PushOutcome {
        match self.capacity {
            Some(cap) if self.blocks.len() >= cap => match self.policy {
                OverflowPolicy::Reject => PushOutcome::Rejected(block),
                OverflowPolicy::DropOldest => {
                    let evicted = self.blocks.pop_front();
                    self.blocks.push_back(block);
                    match evicted {
                        Some(old) => PushOutcome::DroppedOldest(old),
                        None => PushOutcome::Queued,
                    }
                }
            },
            _ => {
                self.blocks.push_back(block);
                PushOutcome::Queued
            }
        }
    }

    /// Remove and return the oldest block
    pub fn pop_front(&mut self) -> Option<SampleBlock> {
        self.blocks.pop_front()
    }

    /// Drop everything, returning how many blocks were discarded
    pub fn clear(&mut self) -> usize {
        let n = self.blocks.len();
        self.blocks.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Total playback length of the queued blocks in seconds
    pub fn queued_duration(&self) -> f64 {
        self.blocks.iter().map(SampleBlock::duration).sum()
    }
}
