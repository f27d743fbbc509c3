//! Timing configuration of a philosopher.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::{path::Path, time::Duration};

/// How long philosophers think and eat, and how often they poll their neighbors.
///
/// Loaded from JSON at runtime; every field falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Inclusive range of a think period, in milliseconds.
    pub think_ms: (u64, u64),

    /// Inclusive range of a meal, in milliseconds.
    pub eat_ms: (u64, u64),

    /// Cadence at which a thinking philosopher answers requests.
    pub poll_interval_ms: u64,

    /// Pause between two passes of the acquiring loop.
    pub backoff_ms: u64,

    /// Seed of the think/eat durations. Mixed with the rank so neighbors differ.
    pub seed: Option<u64>,

    /// Number of meals after which the philosopher retires. `None` runs forever.
    pub meals: Option<u64>,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            think_ms: (1000, 3000),
            eat_ms: (1000, 3000),
            poll_interval_ms: 500,
            backoff_ms: 400,
            seed: None,
            meals: None,
        }
    }
}

impl Timing {
    /// Function that parses a timing configuration from a JSON formatted `String`.
    pub fn from_json_string(json: &str) -> Result<Self> {
        let timing = serde_json::from_str::<Self>(json)?;
        timing.validate()?;
        Ok(timing)
    }

    /// Function that loads a timing configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_string(&json)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, (min, max)) in [("think_ms", self.think_ms), ("eat_ms", self.eat_ms)] {
            if min > max {
                return Err(Error::Config(format!("{name} range {min}..={max} is empty")));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if self.backoff_ms == 0 {
            return Err(Error::Config("backoff_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
