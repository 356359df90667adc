//! Monotonic millisecond clocks
//!
//! Everything in cadence measures time as whole milliseconds on a monotonic
//! counter. A [`TimeSource`] supplies the raw counter; a [`MonotonicClock`]
//! is a stopwatch over a source that can be started and suspended, which is
//! what the deferred scheduler and each animation scheduler actually read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// A monotonically non-decreasing millisecond counter
pub trait TimeSource: Send + Sync {
    /// Milliseconds elapsed since an arbitrary, fixed origin
    fn now_ms(&self) -> u64;
}

/// Process epoch shared by every [`SystemClock`]
static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Wall-independent system clock backed by `Instant`
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemClock {
    fn now_ms(&self) -> u64 {
        let epoch = PROCESS_EPOCH.get_or_init(Instant::now);
        epoch.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to
///
/// All clones share the same counter, so a test can hand one clone to a
/// scheduler and advance another.
///
/// ```rust
/// use cadence_core::clock::{ManualClock, TimeSource};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_millis(40));
/// assert_eq!(clock.now_ms(), 40);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::AcqRel);
    }

    /// Jump to an absolute reading; readings never go backwards
    pub fn set(&self, ms: u64) {
        self.now.fetch_max(ms, Ordering::AcqRel);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

/// A stopwatch over a [`TimeSource`]
///
/// Readings are relative to the moment [`start`](Self::start) was called.
/// While suspended the clock reads zero.
pub struct MonotonicClock {
    source: Arc<dyn TimeSource>,
    origin: Option<u64>,
}

impl MonotonicClock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            origin: None,
        }
    }

    /// A stopped clock over the process [`SystemClock`]
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Start counting from zero; no-op if already running
    pub fn start(&mut self) {
        if self.origin.is_none() {
            self.origin = Some(self.source.now_ms());
        }
    }

    /// Stop counting and reset the reading to zero
    pub fn suspend(&mut self) {
        self.origin = None;
    }

    pub fn is_running(&self) -> bool {
        self.origin.is_some()
    }

    /// Milliseconds since `start`, or zero while suspended
    pub fn now_ms(&self) -> u64 {
        match self.origin {
            Some(origin) => self.source.now_ms().saturating_sub(origin),
            None => 0,
        }
    }

    /// Milliseconds since `start`, starting the clock first if needed
    pub fn now_ms_started(&mut self) -> u64 {
        self.start();
        self.now_ms()
    }
}

impl std::fmt::Debug for MonotonicClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonotonicClock")
            .field("running", &self.is_running())
            .field("now_ms", &self.now_ms())
            .finish()
    }
}
