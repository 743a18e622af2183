use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BeatMatchError, MatchSettings, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub matching: MatchSettings,
    pub session: SessionSettings,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.matching.validate()?;
        self.session.validate()
    }
}

/// Configuration of the real-time play analysis session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Period of the matching loop.
    pub refresh_interval_ms: u64,
    /// Number of undelivered session events kept before new ones are dropped.
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 20,
            event_capacity: 1024,
        }
    }
}

impl SessionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_ms == 0 {
            return Err(BeatMatchError::InvalidSettings(
                "refresh_interval_ms must be positive",
            ));
        }
        if self.event_capacity == 0 {
            return Err(BeatMatchError::InvalidSettings(
                "event_capacity must be positive",
            ));
        }
        Ok(())
    }
}
