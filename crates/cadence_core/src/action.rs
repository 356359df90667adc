//! Scheduled action
//!
//! A [`ScheduledAction`] is a single, reusable slot of future work bound to
//! one execution context. At most one request is outstanding at a time. Each
//! request carries a ticket, and a firing whose ticket is no longer the
//! pending one is ignored, so a timer that loses a race with `reschedule`
//! or `cancel` can never run the action.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::context::SharedContext;
use crate::error::Result;
use crate::scheduler::{DeferredScheduler, ScheduleToken};
use crate::stub::DeferredCallback;

/// The work a [`ScheduledAction`] performs
pub type Action = Arc<dyn Fn() + Send + Sync>;

struct Pending {
    ticket: u64,
    token: ScheduleToken,
}

struct ActionState {
    pending: Option<Pending>,
    next_ticket: u64,
}

impl ActionState {
    /// Forget a request whose stub can no longer run
    ///
    /// The scheduler shutting down or the context refusing the post revokes
    /// a stub without consuming its ticket.
    fn prune(&mut self) {
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.token.is_revoked())
        {
            tracing::debug!("ScheduledAction: dropping revoked request");
            self.pending = None;
        }
    }
}

struct ActionInner {
    context: SharedContext,
    action: Action,
    scheduler: Arc<DeferredScheduler>,
    state: Mutex<ActionState>,
}

impl ActionInner {
    /// Entry point of a firing, on the context thread
    fn run_ticket(&self, ticket: u64) {
        let current = {
            let mut state = self.state.lock().unwrap();
            match &state.pending {
                Some(pending) if pending.ticket == ticket => {
                    state.pending = None;
                    true
                }
                _ => false,
            }
        };

        if current {
            (self.action)();
        } else {
            tracing::trace!("ScheduledAction: ignoring stale ticket {}", ticket);
        }
    }
}

/// Cancelable, reschedulable future work on one execution context
///
/// Cloning yields another handle to the same slot. Once every handle is
/// dropped, a request still in flight does nothing when it fires.
///
/// # Example
///
/// ```rust
/// use cadence_core::{ScheduledAction, WorkerContext};
/// use std::time::Duration;
///
/// let worker = WorkerContext::spawn_default().unwrap();
/// let save = ScheduledAction::new(worker, || println!("saving"));
///
/// // Debounce: every edit pushes the save back
/// save.reschedule(Duration::from_millis(300));
/// save.reschedule(Duration::from_millis(300));
/// assert!(save.is_scheduled());
/// ```
#[derive(Clone)]
pub struct ScheduledAction {
    inner: Arc<ActionInner>,
}

impl ScheduledAction {
    /// Create an action driven by the global [`DeferredScheduler`]
    pub fn new<F>(context: SharedContext, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_scheduler(DeferredScheduler::global(), context, action)
    }

    /// Create an action driven by a specific scheduler
    pub fn with_scheduler<F>(
        scheduler: Arc<DeferredScheduler>,
        context: SharedContext,
        action: F,
    ) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ActionInner {
                context,
                action: Arc::new(action),
                scheduler,
                state: Mutex::new(ActionState {
                    pending: None,
                    next_ticket: 0,
                }),
            }),
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.inner.context
    }

    /// Whether a request is outstanding
    pub fn is_scheduled(&self) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        state.prune();
        state.pending.is_some()
    }

    /// Schedule the action unless a request is already outstanding
    pub fn schedule(&self, delay: Duration) {
        let mut state = self.inner.state.lock().unwrap();
        state.prune();
        if state.pending.is_some() {
            return;
        }
        self.arm(&mut state, delay);
    }

    /// Replace any outstanding request with a new one
    pub fn reschedule(&self, delay: Duration) {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(pending) = state.pending.take() {
            self.inner.scheduler.cancel(&pending.token);
        }
        self.arm(&mut state, delay);
    }

    /// Withdraw the outstanding request
    ///
    /// Returns true if a request was outstanding; the action is then
    /// guaranteed not to run for it.
    pub fn cancel(&self) -> bool {
        let pending = {
            let mut state = self.inner.state.lock().unwrap();
            state.prune();
            state.pending.take()
        };
        match pending {
            Some(pending) => {
                self.inner.scheduler.cancel(&pending.token);
                true
            }
            None => false,
        }
    }

    /// Cancel any outstanding request and run the action now
    ///
    /// Runs inline when called on the context's thread, otherwise blocks
    /// until the context has run it.
    pub fn execute(&self) -> Result<()> {
        self.cancel();
        let action = Arc::clone(&self.inner.action);
        self.inner.context.send(Box::new(move || action()))
    }

    /// Run the action now, but only if a request was outstanding
    pub fn execute_if_scheduled(&self) -> Result<bool> {
        if !self.cancel() {
            return Ok(false);
        }
        self.execute()?;
        Ok(true)
    }

    fn arm(&self, state: &mut ActionState, delay: Duration) {
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let weak: Weak<ActionInner> = Arc::downgrade(&self.inner);
        let stub = DeferredCallback::new(Arc::clone(&self.inner.context), move || {
            if let Some(inner) = weak.upgrade() {
                inner.run_ticket(ticket);
            }
        });
        let token = self.inner.scheduler.schedule(stub, delay);
        if token.is_revoked() {
            tracing::debug!("ScheduledAction: request {} refused", ticket);
            return;
        }
        state.pending = Some(Pending { ticket, token });
    }
}

impl std::fmt::Debug for ScheduledAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledAction")
            .field("context", &self.inner.context.id())
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}
