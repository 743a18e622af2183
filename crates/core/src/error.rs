use crate::{BeatId, TimeInUnits};

/// Result alias that carries the custom [`BeatMatchError`] type.
pub type Result<T> = std::result::Result<T, BeatMatchError>;

/// Common error type for the core crate.
///
/// Every variant except the I/O related ones describes a broken caller
/// contract. They are reported immediately to the caller and never retried.
#[derive(Debug, thiserror::Error)]
pub enum BeatMatchError {
    /// Peeked or popped a queue that holds no beats.
    #[error("beat queue is empty")]
    EmptyQueue,
    /// A played beat was routed to an instrument that has no matcher.
    #[error("instrument `{0}` is not part of the pattern")]
    UnknownInstrument(String),
    /// Velocities live in (0, 1]; zero means "no note".
    #[error("velocity {0} is outside (0, 1]")]
    InvalidVelocity(f32),
    /// A builder was finalised without one of its required fields.
    #[error("{0} not set")]
    MissingField(&'static str),
    #[error("duplicate beat on `{sound}` at t={time}")]
    DuplicateBeat { sound: String, time: TimeInUnits },
    #[error("beat at t={time} lies beyond the pattern end ({last})")]
    BeatOutOfRange { time: TimeInUnits, last: TimeInUnits },
    /// The id does not name a beat of the pattern.
    #[error("invalid pattern beat id: {0}")]
    InvalidPatternBeat(BeatId),
    #[error("invalid settings: {0}")]
    InvalidSettings(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("session is already running")]
    AlreadyRunning,
    /// A lock guarding matcher or session state was poisoned by a panic.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl BeatMatchError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}
