use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{BeatMatchError, Result};

/// Identifies one beat occurrence.
///
/// Pattern beats carry negative ids starting at `-1`, following their
/// position in the pattern. Played beats carry positive ids starting at `1`,
/// following their arrival order. Zero is never used, so the sign alone
/// tells the two kinds apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct BeatId(i32);

impl BeatId {
    /// Id of the pattern beat at the zero-based `index`.
    pub fn pattern(index: usize) -> Self {
        Self(-(index as i32) - 1)
    }

    /// Id of the `ordinal`-th played beat, counting from 1.
    pub fn played(ordinal: u32) -> Result<Self> {
        if ordinal == 0 {
            return Err(BeatMatchError::InvalidInput("played beat ids start at 1"));
        }
        i32::try_from(ordinal)
            .map(Self)
            .map_err(|_| BeatMatchError::InvalidInput("played beat id overflows"))
    }

    pub fn value(self) -> i32 {
        self.0
    }

    pub fn is_pattern(self) -> bool {
        self.0 < 0
    }

    /// Zero-based position of a pattern beat, `None` for played beats.
    pub fn pattern_index(self) -> Option<usize> {
        if self.is_pattern() {
            Some((-(self.0 + 1)) as usize)
        } else {
            None
        }
    }
}

impl TryFrom<i32> for BeatId {
    type Error = BeatMatchError;

    fn try_from(value: i32) -> Result<Self> {
        if value == 0 {
            return Err(BeatMatchError::InvalidInput("beat id 0 is never assigned"));
        }
        Ok(Self(value))
    }
}

impl From<BeatId> for i32 {
    fn from(value: BeatId) -> Self {
        value.0
    }
}

impl fmt::Display for BeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A beat id stamped with its time, in beats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedBeatId {
    pub time: f32,
    pub id: BeatId,
}

impl TimedBeatId {
    pub fn new(time: f32, id: BeatId) -> Self {
        Self { time, id }
    }

    /// Returns a copy shifted by `delta` beats.
    pub fn offset(self, delta: f32) -> Self {
        Self {
            time: self.time + delta,
            id: self.id,
        }
    }
}

/// Loudness of a hit, in (0, 1]. Values are rounded to three decimals.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Velocity(f32);

impl Velocity {
    pub const SOFTEST: Velocity = Velocity(0.1);
    pub const SOFT: Velocity = Velocity(0.25);
    pub const MEDIUM: Velocity = Velocity(0.5);
    pub const LOUD: Velocity = Velocity(0.75);
    pub const LOUDEST: Velocity = Velocity(1.0);

    pub fn new(value: f32) -> Result<Self> {
        let rounded = (value * 1000.0).round() / 1000.0;
        if !(rounded > 0.0 && rounded <= 1.0) {
            return Err(BeatMatchError::InvalidVelocity(value));
        }
        Ok(Self(rounded))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for Velocity {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl TryFrom<f32> for Velocity {
    type Error = BeatMatchError;

    fn try_from(value: f32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Velocity> for f32 {
    fn from(value: Velocity) -> Self {
        value.0
    }
}

/// Position on the pattern grid, counted in grid units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TimeInUnits(pub u32);

impl fmt::Display for TimeInUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
