//! Execution contexts
//!
//! An execution context is a logical single-threaded queue. Tasks posted to
//! the same context run one at a time in FIFO order. Two implementations
//! ship with cadence:
//!
//! - [`WorkerContext`](crate::worker::WorkerContext) owns a dedicated thread
//! - [`LoopContext`](crate::event_loop::LoopContext) is pumped by the thread
//!   that created it, for hosts that already run their own loop
//!
//! Each thread may have a *current* context, which is how objects such as
//! animators discover the context they belong to.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};

use crate::error::{CadenceError, Result};

/// A unit of work delivered to a context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to any execution context
pub type SharedContext = Arc<dyn ExecutionContext>;

/// Process-unique identity of an execution context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        ContextId(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// A logical single-threaded queue
pub trait ExecutionContext: Send + Sync {
    /// Identity of this context
    fn id(&self) -> ContextId;

    /// Enqueue a task and return immediately
    fn post(&self, task: Task) -> Result<()>;

    /// Run a task on the context and wait for it to finish
    ///
    /// Runs inline when the caller is already on the context's thread.
    fn send(&self, task: Task) -> Result<()>;

    /// Whether the calling thread is this context's thread
    fn is_current(&self) -> bool {
        current_context_id() == Some(self.id())
    }
}

struct CurrentContext {
    id: ContextId,
    context: Weak<dyn ExecutionContext>,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentContext>> = const { RefCell::new(None) };
}

/// The context the calling thread is running in, if any
pub fn current_context() -> Option<SharedContext> {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .and_then(|current| current.context.upgrade())
    })
}

/// Id of the context the calling thread is running in, if any
pub fn current_context_id() -> Option<ContextId> {
    CURRENT.with(|current| current.borrow().as_ref().map(|current| current.id))
}

/// Make `context` current on the calling thread until the guard drops
pub fn enter<C>(context: &Arc<C>) -> ContextGuard
where
    C: ExecutionContext + 'static,
{
    let weak: Weak<dyn ExecutionContext> = Arc::downgrade(context) as Weak<dyn ExecutionContext>;
    enter_weak(context.id(), weak)
}

pub(crate) fn enter_weak(id: ContextId, context: Weak<dyn ExecutionContext>) -> ContextGuard {
    let previous = CURRENT.with(|current| {
        current
            .borrow_mut()
            .replace(CurrentContext { id, context })
    });
    ContextGuard {
        previous,
        _not_send: std::marker::PhantomData,
    }
}

/// Restores the previously current context when dropped
#[must_use = "the context stops being current when the guard is dropped"]
pub struct ContextGuard {
    previous: Option<CurrentContext>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Outcome reported back to a blocked `send` caller
pub(crate) type SendReply = mpsc::SyncSender<bool>;

/// Wrap a task so its completion (or panic) is reported on a channel
pub(crate) fn reply_on_completion(task: Task) -> (Task, mpsc::Receiver<bool>) {
    let (reply, done): (SendReply, _) = mpsc::sync_channel(1);
    let wrapped: Task = Box::new(move || {
        let ok = panic::catch_unwind(AssertUnwindSafe(task)).is_ok();
        let _ = reply.send(ok);
    });
    (wrapped, done)
}

/// Block on a reply produced by [`reply_on_completion`]
pub(crate) fn wait_for_reply(id: ContextId, done: mpsc::Receiver<bool>) -> Result<()> {
    match done.recv() {
        Ok(true) => Ok(()),
        Ok(false) => Err(CadenceError::TaskPanicked(id)),
        // The wrapped task was dropped without running
        Err(_) => Err(CadenceError::TargetUnavailable(id)),
    }
}
