use std::collections::BTreeMap;

use crate::{InstrumentId, Pattern, TimeWindowedQueue, TimedBeatId};

/// Replays one pass of pattern beats as an endless, time-shifted sequence.
#[derive(Debug, Clone)]
pub struct PatternLooper {
    one_pass: Vec<TimedBeatId>,
    repeat_length: f32,
    next_index: usize,
    loops: u32,
}

impl PatternLooper {
    /// `one_pass` must be ordered by time and lie within `[0, repeat_length)`.
    pub fn new(one_pass: Vec<TimedBeatId>, repeat_length: f32) -> Self {
        Self {
            one_pass,
            repeat_length,
            next_index: 0,
            loops: 0,
        }
    }

    /// One looper per instrument that has beats in `pattern`.
    pub fn from_pattern(pattern: &Pattern) -> BTreeMap<InstrumentId, PatternLooper> {
        let repeat_length = pattern.length_in_beats();
        pattern
            .beats_by_instrument()
            .into_iter()
            .map(|(instrument, beats)| (instrument, PatternLooper::new(beats, repeat_length)))
            .collect()
    }

    /// Emits into `queue` every pending beat due at or before `time`.
    ///
    /// Once `time` passes the end of the current pass, the rest of that pass
    /// is flushed first and the looper moves on to the next pass, so no beat
    /// is skipped when calls are sparse.
    pub fn fill_beats_until(&mut self, time: f32, queue: &mut TimeWindowedQueue) {
        if time > self.repeat_length * (self.loops + 1) as f32 {
            self.fill_to_end(queue);
        }

        let offset = self.offset();
        let local_time = time - offset;
        while let Some(beat) = self.one_pass.get(self.next_index) {
            if beat.time > local_time {
                break;
            }
            queue.add(beat.offset(offset));
            self.next_index += 1;
        }
    }

    /// Time added to pattern-local beat times for the current pass.
    pub fn offset(&self) -> f32 {
        self.loops as f32 * self.repeat_length
    }

    pub fn loops(&self) -> u32 {
        self.loops
    }

    pub fn reset(&mut self) {
        self.next_index = 0;
        self.loops = 0;
    }

    fn fill_to_end(&mut self, queue: &mut TimeWindowedQueue) {
        let offset = self.offset();
        for beat in &self.one_pass[self.next_index..] {
            queue.add(beat.offset(offset));
        }
        self.next_index = 0;
        self.loops += 1;
    }
}

/// Keeps a queue of expected pattern beats topped up from a looper.
#[derive(Debug, Clone)]
pub struct PatternFeed {
    beats: TimeWindowedQueue,
    looper: PatternLooper,
}

impl PatternFeed {
    pub fn new(beats: TimeWindowedQueue, looper: PatternLooper) -> Self {
        Self { beats, looper }
    }

    /// Evicts stale beats, then pulls in everything due within one window
    /// ahead of `now` so early hits can already find their beat.
    pub fn tick<F>(&mut self, now: f32, on_discard: F)
    where
        F: FnMut(TimedBeatId),
    {
        self.beats.tick(now, on_discard);
        let horizon = now + self.beats.keep_window();
        self.looper.fill_beats_until(horizon, &mut self.beats);
    }

    pub fn beats(&self) -> &TimeWindowedQueue {
        &self.beats
    }

    pub fn beats_mut(&mut self) -> &mut TimeWindowedQueue {
        &mut self.beats
    }

    pub fn offset(&self) -> f32 {
        self.looper.offset()
    }

    pub fn reset(&mut self) {
        self.beats.clear();
        self.looper.reset();
    }
}
