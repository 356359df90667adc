//! Configuration for schedulers and contexts

use std::time::Duration;

use crate::error::{CadenceError, Result};

/// Largest delay, duration or interval accepted anywhere in cadence
pub const MAX_TIMESPAN: Duration = Duration::from_millis(i32::MAX as u64);

/// Deferred scheduler configuration
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Name given to the background timer thread
    pub thread_name: String,
}

impl SchedulerConfig {
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "cadence-timer".to_string(),
        }
    }
}

/// Worker context configuration
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Name given to the worker thread
    pub name: String,
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "cadence-worker".to_string(),
        }
    }
}

/// Reject timespans that cannot be represented as `i32` milliseconds
pub fn validate_timespan(name: &'static str, value: Duration) -> Result<Duration> {
    if value > MAX_TIMESPAN {
        return Err(CadenceError::InvalidArgument {
            name,
            reason: format!(
                "{} ms exceeds the maximum of {} ms",
                value.as_millis(),
                MAX_TIMESPAN.as_millis()
            ),
        });
    }
    Ok(value)
}

/// Like [`validate_timespan`], additionally rejecting zero
pub fn validate_positive_timespan(name: &'static str, value: Duration) -> Result<Duration> {
    if value.as_millis() == 0 {
        return Err(CadenceError::InvalidArgument {
            name,
            reason: "must be at least 1 ms".to_string(),
        });
    }
    validate_timespan(name, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = SchedulerConfig::default().with_thread_name("timers");
        assert_eq!(config.thread_name, "timers");
        assert_eq!(WorkerConfig::default().with_name("ui").name, "ui");
    }

    #[test]
    fn test_timespan_validation() {
        assert!(validate_timespan("delay", Duration::ZERO).is_ok());
        assert!(validate_timespan("delay", MAX_TIMESPAN).is_ok());
        assert!(validate_timespan("delay", MAX_TIMESPAN + Duration::from_millis(1)).is_err());

        assert!(validate_positive_timespan("interval", Duration::from_micros(500)).is_err());
        assert!(validate_positive_timespan("interval", Duration::from_millis(1)).is_ok());
    }
}
