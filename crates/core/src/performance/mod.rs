use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{BeatId, BeatMatchError, BeatsMatch, MatchResults, MissedBeat, Pattern, Result};

/// Accuracy magnitude above which a hit counts as early or late.
const TIMING_TOLERANCE: f32 = 0.1;

/// Running arithmetic mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanEstimation {
    total: f64,
    count: u32,
}

impl MeanEstimation {
    pub fn add(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }
}

/// Per pattern beat accumulator of hits and misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccuracySummary {
    misses: u32,
    early: u32,
    late: u32,
    cumulated_accuracy: f64,
    hit_quality: MeanEstimation,
}

impl AccuracySummary {
    pub fn add_miss(&mut self) {
        self.misses += 1;
        self.hit_quality.add(0.0);
    }

    pub fn add(&mut self, accuracy: f32) {
        self.cumulated_accuracy += accuracy as f64;
        if accuracy < -TIMING_TOLERANCE {
            self.early += 1;
        } else if accuracy > TIMING_TOLERANCE {
            self.late += 1;
        }
        self.hit_quality.add(1.0 - accuracy.abs() as f64);
    }

    /// Matches plus misses.
    pub fn attempts(&self) -> u32 {
        self.hit_quality.count()
    }

    pub fn hits(&self) -> u32 {
        self.attempts() - self.misses
    }

    pub fn miss(&self) -> Option<f64> {
        self.fraction(self.misses)
    }

    pub fn early(&self) -> Option<f64> {
        self.fraction(self.early)
    }

    pub fn late(&self) -> Option<f64> {
        self.fraction(self.late)
    }

    /// Mean signed accuracy over matched hits only.
    pub fn average(&self) -> Option<f64> {
        let hits = self.hits();
        (hits > 0).then(|| self.cumulated_accuracy / hits as f64)
    }

    /// Mean of `1 - |accuracy|`, misses counting as 0.
    pub fn value(&self) -> Option<f64> {
        self.hit_quality.value()
    }

    pub fn report(&self, id: BeatId) -> BeatReport {
        BeatReport {
            id,
            attempts: self.attempts(),
            miss: self.miss(),
            early: self.early(),
            late: self.late(),
            average: self.average(),
            value: self.value(),
        }
    }

    fn fraction(&self, occurrences: u32) -> Option<f64> {
        let attempts = self.attempts();
        (attempts > 0).then(|| occurrences as f64 / attempts as f64)
    }
}

/// Snapshot of the statistics gathered for one pattern beat.
///
/// Ratios are `None` until the beat has been attempted at least once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatReport {
    pub id: BeatId,
    pub attempts: u32,
    pub miss: Option<f64>,
    pub early: Option<f64>,
    pub late: Option<f64>,
    pub average: Option<f64>,
    pub value: Option<f64>,
}

/// Results sink that accumulates accuracy statistics per pattern beat.
///
/// Played beats that expire unmatched are extra hits; they have no pattern
/// beat to charge and are ignored here.
#[derive(Debug)]
pub struct PerformanceSummary {
    summaries: Mutex<Vec<AccuracySummary>>,
}

impl PerformanceSummary {
    pub fn new(pattern: &Pattern) -> Self {
        Self {
            summaries: Mutex::new(vec![AccuracySummary::default(); pattern.len()]),
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn beat_summary(&self, id: BeatId) -> Result<BeatReport> {
        let summaries = self.lock()?;
        id.pattern_index()
            .and_then(|index| summaries.get(index))
            .map(|summary| summary.report(id))
            .ok_or(BeatMatchError::InvalidPatternBeat(id))
    }

    pub fn reports(&self) -> Result<Vec<BeatReport>> {
        let summaries = self.lock()?;
        Ok(summaries
            .iter()
            .enumerate()
            .map(|(index, summary)| summary.report(BeatId::pattern(index)))
            .collect())
    }

    /// Mean hit quality over the beats attempted so far.
    pub fn overall(&self) -> Result<Option<f64>> {
        let summaries = self.lock()?;
        let mut mean = MeanEstimation::default();
        for value in summaries.iter().filter_map(AccuracySummary::value) {
            mean.add(value);
        }
        Ok(mean.value())
    }

    fn record<F>(&self, id: BeatId, update: F)
    where
        F: FnOnce(&mut AccuracySummary),
    {
        let Ok(mut summaries) = self.lock() else {
            warn!(beat = id.value(), "performance summary poisoned, dropping result");
            return;
        };
        match id.pattern_index().and_then(|index| summaries.get_mut(index)) {
            Some(summary) => update(summary),
            None => warn!(beat = id.value(), "result for beat outside the pattern"),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<AccuracySummary>>> {
        self.summaries
            .lock()
            .map_err(|_| BeatMatchError::Poisoned("performance summary"))
    }
}

impl MatchResults for PerformanceSummary {
    fn on_match(&self, found: BeatsMatch) {
        self.record(found.pattern_beat.id, |summary| summary.add(found.accuracy));
    }

    fn on_missed(&self, missed: MissedBeat) {
        if missed.beat.id.is_pattern() {
            self.record(missed.beat.id, AccuracySummary::add_miss);
        }
    }
}
