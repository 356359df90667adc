//! Deferred callback stub
//!
//! A [`DeferredCallback`] pairs a target context with a one-shot callback
//! and decides, race-free, whether that callback ever runs. Three parties can
//! touch it concurrently: the timer thread calls [`fire`](DeferredCallback::fire),
//! any thread may call [`cancel`](DeferredCallback::cancel), and the target
//! context eventually drains the posted task. Each party attempts a single
//! compare-and-swap, so no lock is needed.
//!
//! ```text
//!              fire()                    context drains
//! Cancellable --------> Dispatched ---- Queued --------> Running
//!      |                               |
//!      | cancel()                      | cancel()
//!      v                               v
//!  Cancelled                        Revoked
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::context::{ExecutionContext, SharedContext};

/// Outer state: has the timer handed the callback to its context yet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StubState {
    Cancellable = 0,
    Dispatched = 1,
    Cancelled = 2,
}

impl StubState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => StubState::Cancellable,
            1 => StubState::Dispatched,
            _ => StubState::Cancelled,
        }
    }
}

// Inner phase of a dispatched callback
const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const REVOKED: u8 = 2;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot callback bound to an execution context
pub struct DeferredCallback {
    target: SharedContext,
    callback: Mutex<Option<Callback>>,
    state: AtomicU8,
    phase: AtomicU8,
}

impl DeferredCallback {
    pub fn new<F>(target: SharedContext, callback: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Arc::new(Self {
            target,
            callback: Mutex::new(Some(Box::new(callback))),
            state: AtomicU8::new(StubState::Cancellable as u8),
            phase: AtomicU8::new(QUEUED),
        })
    }

    pub fn target(&self) -> &SharedContext {
        &self.target
    }

    pub fn state(&self) -> StubState {
        StubState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the callback has started (or finished) running
    pub fn has_run(&self) -> bool {
        self.phase.load(Ordering::Acquire) == RUNNING
    }

    /// Whether the callback can no longer run
    ///
    /// True after a successful cancel, and after a dispatch whose post the
    /// target context refused.
    pub fn is_revoked(&self) -> bool {
        self.state() == StubState::Cancelled || self.phase.load(Ordering::Acquire) == REVOKED
    }

    /// Hand the callback to its target context
    ///
    /// Does nothing if the stub was cancelled first. Never runs the callback
    /// itself; it is posted, and runs later on the context's thread unless
    /// revoked in the meantime.
    pub fn fire(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(
                StubState::Cancellable as u8,
                StubState::Dispatched as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::trace!("DeferredCallback: fire skipped, already cancelled");
            return;
        }

        let stub = Arc::clone(self);
        let posted = self.target.post(Box::new(move || stub.run_on_context()));
        if let Err(err) = posted {
            tracing::warn!("DeferredCallback: dropping callback: {}", err);
            self.phase.store(REVOKED, Ordering::Release);
            self.callback.lock().unwrap().take();
        }
    }

    fn run_on_context(&self) {
        if self
            .phase
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("DeferredCallback: revoked before the context drained it");
            return;
        }
        let callback = self.callback.lock().unwrap().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Prevent the callback from running
    ///
    /// Returns true when this call flipped a state, which guarantees the
    /// callback will never run. Returns false if it already ran, is running,
    /// or was cancelled before.
    pub fn cancel(&self) -> bool {
        match self.state.compare_exchange(
            StubState::Cancellable as u8,
            StubState::Cancelled as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.callback.lock().unwrap().take();
                true
            }
            Err(current) if current == StubState::Dispatched as u8 => {
                let revoked = self
                    .phase
                    .compare_exchange(QUEUED, REVOKED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if revoked {
                    self.callback.lock().unwrap().take();
                }
                revoked
            }
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for DeferredCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCallback")
            .field("target", &self.target.id())
            .field("state", &self.state())
            .field("has_run", &self.has_run())
            .finish()
    }
}
