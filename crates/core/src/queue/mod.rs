use std::collections::VecDeque;

use crate::{BeatMatchError, Result, TimedBeatId};

/// FIFO of timed beats that drops entries once they are older than a window.
///
/// Callers add beats in non-decreasing time order; the queue never re-sorts.
#[derive(Debug, Clone)]
pub struct TimeWindowedQueue {
    keep_window: f32,
    beats: VecDeque<TimedBeatId>,
}

impl TimeWindowedQueue {
    pub fn new(keep_window: f32) -> Self {
        Self {
            keep_window,
            beats: VecDeque::new(),
        }
    }

    pub fn keep_window(&self) -> f32 {
        self.keep_window
    }

    pub fn add(&mut self, beat: TimedBeatId) {
        self.beats.push_back(beat);
    }

    /// Pops every beat strictly older than `now - keep_window`, oldest first.
    /// A beat exactly on the boundary stays.
    pub fn tick<F>(&mut self, now: f32, mut on_discard: F)
    where
        F: FnMut(TimedBeatId),
    {
        let limit = now - self.keep_window;
        while let Some(head) = self.beats.front() {
            if head.time >= limit {
                break;
            }
            if let Some(expired) = self.beats.pop_front() {
                on_discard(expired);
            }
        }
    }

    /// Oldest beat still queued.
    pub fn peek(&self) -> Result<TimedBeatId> {
        self.beats.front().copied().ok_or(BeatMatchError::EmptyQueue)
    }

    pub fn remove_next(&mut self) -> Result<TimedBeatId> {
        self.beats.pop_front().ok_or(BeatMatchError::EmptyQueue)
    }

    pub fn clear(&mut self) {
        self.beats.clear();
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    /// Times of the queued beats, oldest first.
    pub fn times(&self) -> impl Iterator<Item = f32> + '_ {
        self.beats.iter().map(|beat| beat.time)
    }
}
