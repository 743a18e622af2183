//! Core library for the Beat Matcher practice engine.
//!
//! A reference drum pattern loops forever while the player hits along. Each
//! instrument gets its own matcher that pairs expected and played beats
//! inside a symmetric tolerance window; everything that ages out unmatched
//! is reported as a miss. Outcomes flow into a [`MatchResults`] sink such as
//! [`PerformanceSummary`], which keeps per-beat accuracy statistics.
//!
//! Time is always expressed in beats and supplied by the caller, except in
//! [`PlayAnalysisSession`], which derives it from a monotonic clock and the
//! pattern's suggested tempo.

pub mod beats;
pub mod config;
pub mod error;
pub mod instruments;
pub mod looper;
pub mod matcher;
pub mod pattern;
pub mod performance;
pub mod queue;
pub mod session;

pub use beats::{BeatId, TimeInUnits, TimedBeatId, Velocity};
pub use config::{AppConfig, SessionSettings};
pub use error::{BeatMatchError, Result};
pub use instruments::{InstrumentId, InstrumentTable, SoundId};
pub use looper::{PatternFeed, PatternLooper};
pub use matcher::{
    BeatsMatch, InstrumentMatcher, MatchDispatcher, MatchResults, MatchSettings, MissedBeat,
};
pub use pattern::{
    Pattern, PatternBeat, PatternBeatDocument, PatternBuilder, PatternDocument, PatternInfo,
    PatternInfoBuilder, PatternInfoDocument,
};
pub use performance::{AccuracySummary, BeatReport, MeanEstimation, PerformanceSummary};
pub use queue::TimeWindowedQueue;
pub use session::{
    BeatStatus, PlayAnalysisSession, PlayInput, SessionClock, SessionEvent,
};
