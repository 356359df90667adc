//! Thread-pinned execution context
//!
//! A [`WorkerContext`] owns one dedicated thread that drains a FIFO queue.
//! The thread is the context's identity: tasks never overlap, and the
//! thread sees the worker as its current context.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use crate::config::WorkerConfig;
use crate::context::{self, ContextId, ExecutionContext, Task};
use crate::error::{CadenceError, Result};

/// An execution context backed by a single worker thread
///
/// The worker shuts down when [`shutdown`](Self::shutdown) is called or the
/// last handle is dropped. Tasks already queued still run; posting afterwards
/// fails with [`CadenceError::TargetUnavailable`].
///
/// ```rust
/// use cadence_core::worker::WorkerContext;
/// use cadence_core::context::ExecutionContext;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let worker = WorkerContext::spawn_default().unwrap();
/// let ran = Arc::new(AtomicBool::new(false));
/// let flag = ran.clone();
/// worker.send(Box::new(move || flag.store(true, Ordering::SeqCst))).unwrap();
/// assert!(ran.load(Ordering::SeqCst));
/// ```
pub struct WorkerContext {
    id: ContextId,
    name: String,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerContext {
    /// Start a worker thread with the given configuration
    pub fn spawn(config: WorkerConfig) -> Result<Arc<Self>> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let worker = Arc::new(Self {
            id: ContextId::next(),
            name: config.name,
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(None),
        });

        let weak: Weak<dyn ExecutionContext> =
            Arc::downgrade(&worker) as Weak<dyn ExecutionContext>;
        let id = worker.id;
        let handle = thread::Builder::new()
            .name(worker.name.clone())
            .spawn(move || run_worker(id, weak, receiver))
            .map_err(|e| CadenceError::Spawn(e.to_string()))?;

        tracing::debug!("WorkerContext {:?}: started thread '{}'", id, worker.name);
        *worker.thread.lock().unwrap() = Some(handle);
        Ok(worker)
    }

    /// Start a worker with [`WorkerConfig::default`]
    pub fn spawn_default() -> Result<Arc<Self>> {
        Self::spawn(WorkerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker still accepts tasks
    pub fn is_running(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }

    /// Stop accepting tasks, drain the queue and join the thread
    ///
    /// Called from the worker's own thread this only closes the queue; the
    /// thread exits once the current task returns.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().unwrap().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                tracing::debug!("WorkerContext {:?}: shutdown requested from own thread", self.id);
                return;
            }
            if handle.join().is_err() {
                tracing::error!("WorkerContext {:?}: worker thread panicked", self.id);
            }
        }
        tracing::debug!("WorkerContext {:?}: stopped", self.id);
    }
}

fn run_worker(id: ContextId, context: Weak<dyn ExecutionContext>, receiver: mpsc::Receiver<Task>) {
    let _guard = context::enter_weak(id, context);
    while let Ok(task) = receiver.recv() {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("WorkerContext {:?}: task panicked", id);
        }
    }
}

impl ExecutionContext for WorkerContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn post(&self, task: Task) -> Result<()> {
        let sender = self.sender.lock().unwrap();
        match sender.as_ref() {
            Some(sender) => sender
                .send(task)
                .map_err(|_| CadenceError::TargetUnavailable(self.id)),
            None => Err(CadenceError::TargetUnavailable(self.id)),
        }
    }

    fn send(&self, task: Task) -> Result<()> {
        if self.is_current() {
            task();
            return Ok(());
        }
        let (task, done) = context::reply_on_completion(task);
        self.post(task)?;
        context::wait_for_reply(self.id, done)
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
