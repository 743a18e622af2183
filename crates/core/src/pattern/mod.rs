use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    BeatId, BeatMatchError, InstrumentId, InstrumentTable, Result, SoundId, TimeInUnits,
    TimedBeatId, Velocity,
};

/// Immutable description of the pattern grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PatternInfoDocument")]
pub struct PatternInfo {
    bars_count: u32,
    beats_per_bar: u32,
    units_per_beat: TimeInUnits,
    suggested_bpm: u32,
}

impl PatternInfo {
    pub fn builder() -> PatternInfoBuilder {
        PatternInfoBuilder::default()
    }

    pub fn bars_count(&self) -> u32 {
        self.bars_count
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn units_per_beat(&self) -> TimeInUnits {
        self.units_per_beat
    }

    pub fn suggested_bpm(&self) -> u32 {
        self.suggested_bpm
    }

    /// First grid position past the end of one pass.
    pub fn last_time(&self) -> TimeInUnits {
        TimeInUnits(self.units_per_beat.0 * self.bars_count * self.beats_per_bar)
    }

    /// Length of one pass, in beats.
    pub fn length_in_beats(&self) -> f32 {
        (self.bars_count * self.beats_per_bar) as f32
    }

    pub fn time_in_beats(&self, time: TimeInUnits) -> f32 {
        time.0 as f32 / self.units_per_beat.0 as f32
    }
}

/// Builder for [`PatternInfo`]. Every field is required.
#[derive(Debug, Default, Clone)]
pub struct PatternInfoBuilder {
    bars_count: Option<u32>,
    beats_per_bar: Option<u32>,
    units_per_beat: Option<TimeInUnits>,
    suggested_bpm: Option<u32>,
}

impl PatternInfoBuilder {
    pub fn bars_count(mut self, value: u32) -> Self {
        self.bars_count = Some(value);
        self
    }

    pub fn beats_per_bar(mut self, value: u32) -> Self {
        self.beats_per_bar = Some(value);
        self
    }

    pub fn units_per_beat(mut self, value: TimeInUnits) -> Self {
        self.units_per_beat = Some(value);
        self
    }

    pub fn suggested_bpm(mut self, value: u32) -> Self {
        self.suggested_bpm = Some(value);
        self
    }

    pub fn build(self) -> Result<PatternInfo> {
        let info = PatternInfo {
            bars_count: required(self.bars_count, "PatternInfo.bars_count")?,
            beats_per_bar: required(self.beats_per_bar, "PatternInfo.beats_per_bar")?,
            units_per_beat: required(self.units_per_beat, "PatternInfo.units_per_beat")?,
            suggested_bpm: required(self.suggested_bpm, "PatternInfo.suggested_bpm")?,
        };

        if info.bars_count == 0 || info.beats_per_bar == 0 {
            return Err(BeatMatchError::InvalidInput("pattern must span at least one beat"));
        }
        if info.units_per_beat.0 == 0 {
            return Err(BeatMatchError::InvalidInput("units per beat must be positive"));
        }
        if info.suggested_bpm == 0 {
            return Err(BeatMatchError::InvalidInput("suggested bpm must be positive"));
        }
        info.bars_count
            .checked_mul(info.beats_per_bar)
            .and_then(|beats| beats.checked_mul(info.units_per_beat.0))
            .ok_or(BeatMatchError::InvalidInput("pattern grid is too large"))?;

        Ok(info)
    }
}

fn required<T>(value: Option<T>, name: &'static str) -> Result<T> {
    value.ok_or(BeatMatchError::MissingField(name))
}

/// One scheduled hit within a single pass of the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternBeat {
    pub time: TimeInUnits,
    pub sound: SoundId,
    pub velocity: Velocity,
}

/// Immutable reference rhythm.
///
/// Beats are kept ordered by time; beats sharing a time keep their insertion
/// order. The beat at index `i` is addressed by `BeatId::pattern(i)`.
#[derive(Debug, Clone)]
pub struct Pattern {
    info: PatternInfo,
    beats: Vec<PatternBeat>,
    sounds: Vec<SoundId>,
}

impl Pattern {
    pub fn builder() -> PatternBuilder {
        PatternBuilder::default()
    }

    pub fn info(&self) -> &PatternInfo {
        &self.info
    }

    pub fn beats(&self) -> &[PatternBeat] {
        &self.beats
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    /// Sounds in the order they were first used.
    pub fn sounds(&self) -> &[SoundId] {
        &self.sounds
    }

    /// Distinct instruments, in the order of their first sound.
    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut seen = HashSet::new();
        self.sounds
            .iter()
            .map(SoundId::instrument)
            .filter(|instrument| seen.insert(*instrument))
            .collect()
    }

    pub fn beat(&self, id: BeatId) -> Result<&PatternBeat> {
        id.pattern_index()
            .and_then(|index| self.beats.get(index))
            .ok_or(BeatMatchError::InvalidPatternBeat(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = BeatId> + '_ {
        (0..self.beats.len()).map(BeatId::pattern)
    }

    pub fn length_in_beats(&self) -> f32 {
        self.info.length_in_beats()
    }

    /// Beats of one pass grouped by instrument, timed in beats.
    pub fn beats_by_instrument(&self) -> BTreeMap<InstrumentId, Vec<TimedBeatId>> {
        let mut grouped: BTreeMap<InstrumentId, Vec<TimedBeatId>> = BTreeMap::new();
        for (index, beat) in self.beats.iter().enumerate() {
            grouped
                .entry(beat.sound.instrument())
                .or_default()
                .push(TimedBeatId::new(
                    self.info.time_in_beats(beat.time),
                    BeatId::pattern(index),
                ));
        }
        grouped
    }
}

/// Collects beats for a [`Pattern`], rejecting duplicates per (time, sound).
#[derive(Debug, Default, Clone)]
pub struct PatternBuilder {
    info: Option<PatternInfo>,
    beats: BTreeMap<TimeInUnits, Vec<PatternBeat>>,
    sounds: Vec<SoundId>,
}

impl PatternBuilder {
    pub fn info(mut self, info: PatternInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Seeds the preferred sound order, e.g. to keep empty rows displayed.
    pub fn sounds(mut self, sounds: &[SoundId]) -> Self {
        for sound in sounds {
            if !self.sounds.contains(sound) {
                self.sounds.push(*sound);
            }
        }
        self
    }

    pub fn add(&mut self, time: TimeInUnits, sound: SoundId, velocity: Velocity) -> Result<()> {
        let at_time = self.beats.entry(time).or_default();
        if at_time.iter().any(|beat| beat.sound == sound) {
            return Err(BeatMatchError::DuplicateBeat {
                sound: format!("{sound:?}"),
                time,
            });
        }

        at_time.push(PatternBeat {
            time,
            sound,
            velocity,
        });
        if !self.sounds.contains(&sound) {
            self.sounds.push(sound);
        }
        Ok(())
    }

    pub fn build(self) -> Result<Pattern> {
        let info = self.info.ok_or(BeatMatchError::MissingField("PatternInfo"))?;
        let last = info.last_time();
        if let Some((&time, _)) = self.beats.range(last..).next() {
            return Err(BeatMatchError::BeatOutOfRange { time, last });
        }

        Ok(Pattern {
            info,
            beats: self.beats.into_values().flatten().collect(),
            sounds: self.sounds,
        })
    }
}

/// Serialisable form of a pattern, with instruments referenced by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDocument {
    pub info: PatternInfoDocument,
    #[serde(default)]
    pub beats: Vec<PatternBeatDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternInfoDocument {
    pub bars_count: Option<u32>,
    pub beats_per_bar: Option<u32>,
    pub units_per_beat: Option<u32>,
    pub suggested_bpm: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternBeatDocument {
    pub time: u32,
    pub instrument: String,
    #[serde(default = "default_technique")]
    pub technique: String,
    #[serde(default)]
    pub velocity: Velocity,
}

fn default_technique() -> String {
    "hit".to_string()
}

impl TryFrom<PatternInfoDocument> for PatternInfo {
    type Error = BeatMatchError;

    fn try_from(document: PatternInfoDocument) -> Result<Self> {
        let mut info = PatternInfo::builder();
        if let Some(value) = document.bars_count {
            info = info.bars_count(value);
        }
        if let Some(value) = document.beats_per_bar {
            info = info.beats_per_bar(value);
        }
        if let Some(value) = document.units_per_beat {
            info = info.units_per_beat(TimeInUnits(value));
        }
        if let Some(value) = document.suggested_bpm {
            info = info.suggested_bpm(value);
        }
        info.build()
    }
}

impl PatternDocument {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolves instrument names through `table` and validates the result.
    pub fn into_pattern(self, table: &mut InstrumentTable) -> Result<Pattern> {
        let info = PatternInfo::try_from(self.info)?;
        let mut builder = Pattern::builder().info(info);
        for beat in self.beats {
            let sound = table.sound(&beat.instrument, &beat.technique)?;
            builder.add(TimeInUnits(beat.time), sound, beat.velocity)?;
        }
        builder.build()
    }
}
