use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::{
    BeatMatchError, InstrumentId, Pattern, PatternFeed, PatternLooper, Result, TimeWindowedQueue,
    TimedBeatId, Velocity,
};

/// Matching tolerance shared by every instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    /// Symmetric half-width, in beats, within which a played beat and a
    /// pattern beat count as the same hit.
    pub max_matching_time: f32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            max_matching_time: 0.5,
        }
    }
}

impl MatchSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.max_matching_time.is_finite() || self.max_matching_time <= 0.0 {
            return Err(BeatMatchError::InvalidSettings(
                "max_matching_time must be a positive number of beats",
            ));
        }
        Ok(())
    }

    /// Signed timing error as a fraction of the window, strictly inside (-1, 1).
    pub fn accuracy(&self, diff: f32) -> f32 {
        diff / (1.01 * self.max_matching_time)
    }
}

/// A pattern beat paired with the played beat that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatsMatch {
    pub instrument: InstrumentId,
    pub pattern_beat: TimedBeatId,
    pub played_beat: TimedBeatId,
    /// Negative when played early, positive when late.
    pub accuracy: f32,
}

/// A beat that aged out of its queue without a partner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MissedBeat {
    pub instrument: InstrumentId,
    pub beat: TimedBeatId,
}

/// Receives matching outcomes as they are decided.
///
/// Calls happen synchronously from `tick` and `add_beat`, on whichever
/// thread drives the dispatcher, and never while a matcher lock is held.
pub trait MatchResults {
    fn on_match(&self, found: BeatsMatch);
    fn on_missed(&self, missed: MissedBeat);
}

impl<T: MatchResults + ?Sized> MatchResults for Arc<T> {
    fn on_match(&self, found: BeatsMatch) {
        (**self).on_match(found)
    }

    fn on_missed(&self, missed: MissedBeat) {
        (**self).on_missed(missed)
    }
}

#[derive(Debug)]
enum MatchOutcome {
    Matched(BeatsMatch),
    Missed(MissedBeat),
}

impl MatchOutcome {
    fn report<R: MatchResults + ?Sized>(self, results: &R) {
        match self {
            MatchOutcome::Matched(found) => {
                debug!(
                    pattern = found.pattern_beat.id.value(),
                    played = found.played_beat.id.value(),
                    accuracy = found.accuracy,
                    "beats matched"
                );
                results.on_match(found);
            }
            MatchOutcome::Missed(missed) => {
                debug!(
                    beat = missed.beat.id.value(),
                    time = missed.beat.time,
                    "beat missed"
                );
                results.on_missed(missed);
            }
        }
    }
}

#[derive(Debug)]
struct MatcherState {
    pattern: PatternFeed,
    played: TimeWindowedQueue,
}

/// Reconciles expected and played beats for a single instrument.
///
/// Both queues are strict FIFOs: the oldest pending pattern beat is only
/// ever compared with the oldest pending played beat.
#[derive(Debug)]
pub struct InstrumentMatcher {
    instrument: InstrumentId,
    settings: MatchSettings,
    state: Mutex<MatcherState>,
}

impl InstrumentMatcher {
    pub fn new(instrument: InstrumentId, looper: PatternLooper, settings: MatchSettings) -> Self {
        let window = settings.max_matching_time;
        Self {
            instrument,
            settings,
            state: Mutex::new(MatcherState {
                pattern: PatternFeed::new(TimeWindowedQueue::new(window), looper),
                played: TimeWindowedQueue::new(window),
            }),
        }
    }

    pub fn instrument(&self) -> InstrumentId {
        self.instrument
    }

    /// Matches `beat` straight away when the oldest pending pattern beat is
    /// within tolerance; otherwise queues it for the next tick.
    pub fn add_played<R: MatchResults + ?Sized>(&self, beat: TimedBeatId, results: &R) -> Result<()> {
        if beat.id.is_pattern() {
            return Err(BeatMatchError::InvalidInput(
                "played beats must carry a positive id",
            ));
        }

        let outcome = {
            let mut state = self.lock_state()?;
            match state.pattern.beats().peek() {
                Ok(expected) if (beat.time - expected.time).abs() <= self.settings.max_matching_time => {
                    let expected = state.pattern.beats_mut().remove_next()?;
                    Some(self.matched(expected, beat))
                }
                _ => {
                    state.played.add(beat);
                    None
                }
            }
        };

        if let Some(outcome) = outcome {
            outcome.report(results);
        }
        Ok(())
    }

    /// Expires stale beats on both sides as misses, tops up the expected
    /// beats, then pairs queue heads while they stay within tolerance.
    pub fn tick<R: MatchResults + ?Sized>(&self, now: f32, results: &R) -> Result<()> {
        let outcomes = {
            let mut state = self.lock_state()?;
            let mut outcomes = Vec::new();
            let instrument = self.instrument;
            let mut missed = |beat| outcomes.push(MatchOutcome::Missed(MissedBeat { instrument, beat }));

            state.pattern.tick(now, &mut missed);
            state.played.tick(now, &mut missed);
            self.look_for_matches(&mut state, &mut outcomes)?;

            trace!(
                instrument = ?self.instrument,
                now,
                expected = state.pattern.beats().len(),
                played = state.played.len(),
                "matcher ticked"
            );
            outcomes
        };

        for outcome in outcomes {
            outcome.report(results);
        }
        Ok(())
    }

    /// Clears both queues and rewinds the looper. Safe to call repeatedly.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        state.played.clear();
        state.pattern.reset();
        Ok(())
    }

    /// Number of played beats still waiting for a partner.
    pub fn pending_played(&self) -> Result<usize> {
        Ok(self.lock_state()?.played.len())
    }

    /// Number of expected pattern beats currently visible to the matcher.
    pub fn pending_expected(&self) -> Result<usize> {
        Ok(self.lock_state()?.pattern.beats().len())
    }

    /// Loop offset of the expected-beat feed.
    pub fn pattern_offset(&self) -> Result<f32> {
        Ok(self.lock_state()?.pattern.offset())
    }

    fn look_for_matches(&self, state: &mut MatcherState, outcomes: &mut Vec<MatchOutcome>) -> Result<()> {
        while let (Ok(expected), Ok(played)) = (state.pattern.beats().peek(), state.played.peek()) {
            if (played.time - expected.time).abs() > self.settings.max_matching_time {
                break;
            }
            let expected = state.pattern.beats_mut().remove_next()?;
            let played = state.played.remove_next()?;
            outcomes.push(self.matched(expected, played));
        }
        Ok(())
    }

    fn matched(&self, expected: TimedBeatId, played: TimedBeatId) -> MatchOutcome {
        MatchOutcome::Matched(BeatsMatch {
            instrument: self.instrument,
            pattern_beat: expected,
            played_beat: played,
            accuracy: self.settings.accuracy(played.time - expected.time),
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, MatcherState>> {
        self.state
            .lock()
            .map_err(|_| BeatMatchError::Poisoned("instrument matcher"))
    }
}

/// Routes played beats and ticks to one [`InstrumentMatcher`] per instrument
/// and forwards every outcome to the results sink.
#[derive(Debug)]
pub struct MatchDispatcher<R> {
    settings: MatchSettings,
    matchers: BTreeMap<InstrumentId, InstrumentMatcher>,
    results: R,
}

impl<R: MatchResults> MatchDispatcher<R> {
    pub fn create(pattern: &Pattern, settings: MatchSettings, results: R) -> Result<Self> {
        settings.validate()?;

        let matchers: BTreeMap<_, _> = PatternLooper::from_pattern(pattern)
            .into_iter()
            .map(|(instrument, looper)| {
                (instrument, InstrumentMatcher::new(instrument, looper, settings))
            })
            .collect();

        info!(
            instruments = matchers.len(),
            beats = pattern.len(),
            length = pattern.length_in_beats(),
            window = settings.max_matching_time,
            "match dispatcher created"
        );

        Ok(Self {
            settings,
            matchers,
            results,
        })
    }

    pub fn tick(&self, now: f32) -> Result<()> {
        for matcher in self.matchers.values() {
            matcher.tick(now, &self.results)?;
        }
        Ok(())
    }

    /// Hands a played beat to the matcher of `instrument`.
    ///
    /// Velocity does not influence matching.
    pub fn add_beat(&self, instrument: InstrumentId, beat: TimedBeatId, velocity: Velocity) -> Result<()> {
        let matcher = self.matcher(instrument)?;
        trace!(?instrument, time = beat.time, velocity = velocity.value(), "played beat");
        matcher.add_played(beat, &self.results)
    }

    pub fn reset(&self) -> Result<()> {
        for matcher in self.matchers.values() {
            matcher.reset()?;
        }
        Ok(())
    }

    pub fn matcher(&self, instrument: InstrumentId) -> Result<&InstrumentMatcher> {
        self.matchers
            .get(&instrument)
            .ok_or_else(|| BeatMatchError::UnknownInstrument(format!("{instrument:?}")))
    }

    pub fn contains(&self, instrument: InstrumentId) -> bool {
        self.matchers.contains_key(&instrument)
    }

    pub fn instruments(&self) -> impl Iterator<Item = InstrumentId> + '_ {
        self.matchers.keys().copied()
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn results(&self) -> &R {
        &self.results
    }
}
