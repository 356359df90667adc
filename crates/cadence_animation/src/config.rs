//! Animator defaults

use std::time::Duration;

use cadence_core::config::{validate_positive_timespan, validate_timespan};
use cadence_core::Result;

/// Timing applied to newly constructed animators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnimatorDefaults {
    pub delay: Duration,
    pub duration: Duration,
    pub interval: Duration,
}

impl AnimatorDefaults {
    /// Defaults tuned for UI transitions (~60 updates per second)
    pub fn ui() -> Self {
        Self {
            delay: Duration::ZERO,
            duration: Duration::from_millis(250),
            interval: Duration::from_millis(16),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Check every field against the limits animators enforce
    pub fn validate(&self) -> Result<()> {
        validate_timespan("delay", self.delay)?;
        validate_timespan("duration", self.duration)?;
        validate_positive_timespan("interval", self.interval)?;
        Ok(())
    }
}

impl Default for AnimatorDefaults {
    fn default() -> Self {
        Self::ui()
    }
}
