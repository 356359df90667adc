//! Cadence Core
//!
//! Deferred callbacks on logical execution contexts:
//!
//! - **Execution Contexts**: single-threaded FIFO queues (`post` / `send`),
//!   backed by a dedicated worker thread or pumped by a host loop
//! - **Deferred Scheduler**: one timer thread keeping pending callbacks in
//!   ready-time order, safe to use from any number of producer threads
//! - **Deferred Stubs**: race-free cancel/dispatch, so a callback runs at
//!   most once and never after a successful cancel
//! - **Scheduled Actions**: a reusable, reschedulable slot of future work
//!
//! # Example
//!
//! ```rust
//! use cadence_core::{ExecutionContext, ScheduledAction, WorkerContext};
//! use std::sync::mpsc;
//! use std::time::Duration;
//!
//! let worker = WorkerContext::spawn_default().unwrap();
//! let (tx, rx) = mpsc::channel();
//! let tx = std::sync::Mutex::new(tx);
//!
//! let action = ScheduledAction::new(worker.clone(), move || {
//!     tx.lock().unwrap().send("fired").unwrap();
//! });
//! action.schedule(Duration::from_millis(10));
//!
//! assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("fired"));
//! assert!(!action.cancel());
//! ```

pub mod action;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod event_loop;
pub mod scheduler;
pub mod stub;
pub mod worker;

pub use action::{Action, ScheduledAction};
pub use clock::{ManualClock, MonotonicClock, SystemClock, TimeSource};
pub use config::{SchedulerConfig, WorkerConfig, MAX_TIMESPAN};
pub use context::{
    current_context, current_context_id, enter, ContextGuard, ContextId, ExecutionContext,
    SharedContext, Task,
};
pub use error::{CadenceError, Result};
pub use event_loop::{LoopContext, WakeCallback};
pub use scheduler::{DeferredScheduler, ScheduleToken};
pub use stub::{DeferredCallback, StubState};
pub use worker::WorkerContext;
