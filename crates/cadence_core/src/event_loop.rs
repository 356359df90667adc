//! Host-pumped execution context
//!
//! [`LoopContext`] is for threads that already run their own loop (a window
//! event loop, a test body). Tasks queue up until the owning thread calls
//! [`run_pending`](LoopContext::run_pending) or one of its variants. An
//! optional wake callback lets other threads nudge the host loop when work
//! arrives, in the same way an animation thread wakes a window event loop.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::context::{self, ContextGuard, ContextId, ExecutionContext, Task};
use crate::error::{CadenceError, Result};

/// Callback used to wake the owning thread when a task is queued
pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

struct LoopQueue {
    tasks: VecDeque<Task>,
    closed: bool,
}

/// An execution context drained by the thread that created it
pub struct LoopContext {
    id: ContextId,
    owner: ThreadId,
    queue: Mutex<LoopQueue>,
    ready: Condvar,
    wake: Mutex<Option<WakeCallback>>,
}

impl LoopContext {
    /// Create a context owned by the calling thread
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::next(),
            owner: thread::current().id(),
            queue: Mutex::new(LoopQueue {
                tasks: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
            wake: Mutex::new(None),
        })
    }

    /// Create a context and make it current on the calling thread
    pub fn new_entered() -> (Arc<Self>, ContextGuard) {
        let ctx = Self::new();
        let guard = context::enter(&ctx);
        (ctx, guard)
    }

    /// Set a callback invoked (from the posting thread) whenever a task is queued
    pub fn set_wake_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.wake.lock().unwrap() = Some(Arc::new(callback));
    }

    fn check_owner(&self) -> Result<()> {
        if thread::current().id() != self.owner {
            return Err(CadenceError::wrong_context(self.id));
        }
        Ok(())
    }

    fn pop(&self) -> Option<Task> {
        self.queue.lock().unwrap().tasks.pop_front()
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().tasks.len()
    }

    /// Run the tasks that were queued when the call started
    ///
    /// Returns how many tasks ran. Tasks queued by those tasks wait for the
    /// next call.
    pub fn run_pending(&self) -> Result<usize> {
        self.check_owner()?;
        let budget = self.pending();
        let mut ran = 0;
        while ran < budget {
            let Some(task) = self.pop() else { break };
            task();
            ran += 1;
        }
        Ok(ran)
    }

    /// Run tasks until the queue is empty, including newly queued ones
    pub fn run_until_idle(&self) -> Result<usize> {
        self.check_owner()?;
        let mut ran = 0;
        while let Some(task) = self.pop() {
            task();
            ran += 1;
        }
        Ok(ran)
    }

    /// Block until a task is queued or `timeout` elapses, then run what is queued
    pub fn wait_and_run(&self, timeout: Duration) -> Result<usize> {
        self.check_owner()?;
        let deadline = Instant::now() + timeout;
        {
            let mut queue = self.queue.lock().unwrap();
            while queue.tasks.is_empty() && !queue.closed {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(0);
                }
                queue = self.ready.wait_timeout(queue, deadline - now).unwrap().0;
            }
        }
        self.run_pending()
    }

    /// Keep pumping until `done` returns true or `timeout` elapses
    ///
    /// Returns whether `done` was satisfied.
    pub fn run_until<F>(&self, timeout: Duration, mut done: F) -> Result<bool>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_until_idle()?;
            if done() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.wait_and_run(deadline - now)?;
        }
    }

    /// Close the context, dropping any queued tasks
    pub fn shutdown(&self) {
        let dropped = {
            let mut queue = self.queue.lock().unwrap();
            queue.closed = true;
            std::mem::take(&mut queue.tasks)
        };
        self.ready.notify_all();
        tracing::debug!(
            "LoopContext {:?}: shut down, dropped {} queued tasks",
            self.id,
            dropped.len()
        );
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().unwrap().closed
    }
}

impl ExecutionContext for LoopContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn post(&self, task: Task) -> Result<()> {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.closed {
                return Err(CadenceError::TargetUnavailable(self.id));
            }
            queue.tasks.push_back(task);
        }
        self.ready.notify_one();

        let wake = self.wake.lock().unwrap().clone();
        if let Some(wake) = wake {
            wake();
        }
        Ok(())
    }

    fn send(&self, task: Task) -> Result<()> {
        if thread::current().id() == self.owner {
            if self.is_closed() {
                return Err(CadenceError::TargetUnavailable(self.id));
            }
            task();
            return Ok(());
        }
        let (task, done) = context::reply_on_completion(task);
        self.post(task)?;
        context::wait_for_reply(self.id, done)
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }
}

impl std::fmt::Debug for LoopContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopContext")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .finish()
    }
}
