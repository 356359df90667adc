//! Animator
//!
//! A value-less progress source. An [`Animator`] reports a number that
//! moves from 0 to 1 over `duration` after `delay`, updated every
//! `interval`, shaped by an [`Easing`]. It is bound to the execution
//! context it was created on and must only be used from that context's
//! thread.

use std::sync::Arc;
use std::time::Duration;

use cadence_core::{ContextId, ExecutionContext, Result};

use crate::easing::Easing;
use crate::registry::AnimationRegistry;
use crate::timer::{AnimationScheduler, AnimatorKey, Timing};

/// Something that happened to an animator
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AnimatorEvent {
    /// Progress moved to a new eased value
    ProgressChanged(f64),
    /// The run reached the end of its duration
    Completed,
    /// A running animator was cancelled or restarted
    Cancelled,
}

/// Callback receiving [`AnimatorEvent`]s
pub type Listener = Arc<dyn Fn(AnimatorEvent) + Send + Sync>;

/// Handle returned by [`Animator::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Progress-over-time state machine driven by its context's [`AnimationScheduler`]
pub struct Animator {
    scheduler: Arc<AnimationScheduler>,
    key: AnimatorKey,
}

impl Animator {
    /// Create an animator bound to the current execution context
    ///
    /// Fails with `NoCurrentContext` when the calling thread is not
    /// running an execution context.
    pub fn new() -> Result<Self> {
        let scheduler = AnimationRegistry::global().current()?;
        Self::with_scheduler(&scheduler)
    }

    /// Create an animator on a specific scheduler
    pub fn with_scheduler(scheduler: &Arc<AnimationScheduler>) -> Result<Self> {
        let key = scheduler.register()?;
        Ok(Self {
            scheduler: Arc::clone(scheduler),
            key,
        })
    }

    pub fn scheduler(&self) -> &Arc<AnimationScheduler> {
        &self.scheduler
    }

    pub fn context_id(&self) -> ContextId {
        self.scheduler.context_id()
    }

    /// Begin a run from the current time, cancelling any run in progress
    pub fn start(&self) -> Result<()> {
        self.scheduler.start(self.key)
    }

    /// Stop the current run; returns `false` if the animator was idle
    pub fn cancel(&self) -> Result<bool> {
        self.scheduler.cancel(self.key)
    }

    pub fn is_started(&self) -> Result<bool> {
        self.scheduler.read(self.key, |node| node.start_time.is_some())
    }

    /// Eased progress as of the last update
    pub fn progress(&self) -> Result<f64> {
        self.scheduler.read(self.key, |node| node.progress)
    }

    pub fn delay(&self) -> Result<Duration> {
        self.scheduler.read(self.key, |node| millis(node.delay))
    }

    pub fn duration(&self) -> Result<Duration> {
        self.scheduler.read(self.key, |node| millis(node.duration))
    }

    pub fn interval(&self) -> Result<Duration> {
        self.scheduler.read(self.key, |node| millis(node.interval))
    }

    pub fn easing(&self) -> Result<Easing> {
        self.scheduler.read(self.key, |node| node.easing.clone())
    }

    /// Time of the most recent progress update, on the scheduler's clock
    pub fn last_update_ms(&self) -> Result<u64> {
        self.scheduler
            .read(self.key, |node| node.prev_animation_time.max(0) as u64)
    }

    pub fn set_delay(&self, delay: Duration) -> Result<()> {
        self.scheduler.set_timing(self.key, Timing::Delay, delay)
    }

    pub fn set_duration(&self, duration: Duration) -> Result<()> {
        self.scheduler.set_timing(self.key, Timing::Duration, duration)
    }

    /// Update period; must be non-zero
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        self.scheduler.set_timing(self.key, Timing::Interval, interval)
    }

    pub fn set_easing(&self, easing: Easing) -> Result<()> {
        self.scheduler.set_easing(self.key, easing)
    }

    /// Listen for every event of this animator
    ///
    /// Listeners run on the owning context after the scheduler's lock is
    /// released, so they may call back into the animator.
    pub fn subscribe<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(AnimatorEvent) + Send + Sync + 'static,
    {
        self.scheduler.subscribe(self.key, Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> Result<bool> {
        self.scheduler.unsubscribe(self.key, id)
    }

    pub fn on_progress<F>(&self, f: F) -> Result<ListenerId>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let AnimatorEvent::ProgressChanged(progress) = event {
                f(progress);
            }
        })
    }

    pub fn on_completed<F>(&self, f: F) -> Result<ListenerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if event == AnimatorEvent::Completed {
                f();
            }
        })
    }

    pub fn on_cancelled<F>(&self, f: F) -> Result<ListenerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if event == AnimatorEvent::Cancelled {
                f();
            }
        })
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

impl Drop for Animator {
    fn drop(&mut self) {
        if self.scheduler.check_owner().is_ok() {
            self.scheduler.release(self.key);
            return;
        }

        // Dropped off-thread: hand the release to the owning context
        let scheduler = Arc::clone(&self.scheduler);
        let key = self.key;
        let posted = self
            .scheduler
            .context()
            .post(Box::new(move || scheduler.release(key)));
        if let Err(err) = posted {
            tracing::warn!(
                "Animator: could not post release to its context ({}); releasing in place",
                err
            );
            self.scheduler.release(self.key);
        }
    }
}

impl std::fmt::Debug for Animator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Animator")
            .field("context", &self.scheduler.context_id())
            .field("key", &self.key)
            .finish()
    }
}
