//! Error types for cadence_core

use thiserror::Error;

use crate::context::ContextId;

/// Errors surfaced by contexts, scheduled actions and animators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CadenceError {
    /// A timing value was rejected before any state was mutated
    #[error("invalid {name}: {reason}")]
    InvalidArgument {
        name: &'static str,
        reason: String,
    },

    /// An owning-context object was touched from another thread
    #[error("operation must run on context {expected:?}, called from thread {thread}")]
    WrongContext { expected: ContextId, thread: String },

    /// The calling thread is not running inside any execution context
    #[error("no execution context is current on thread {0}")]
    NoCurrentContext(String),

    /// The target context has been shut down
    #[error("execution context {0:?} is no longer available")]
    TargetUnavailable(ContextId),

    /// A task delivered through `send` panicked on the context thread
    #[error("task panicked on context {0:?}")]
    TaskPanicked(ContextId),

    /// A context or scheduler thread could not be started
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

impl CadenceError {
    pub(crate) fn current_thread_name() -> String {
        let thread = std::thread::current();
        match thread.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", thread.id()),
        }
    }

    /// Build a `WrongContext` error for the calling thread
    pub fn wrong_context(expected: ContextId) -> Self {
        CadenceError::WrongContext {
            expected,
            thread: Self::current_thread_name(),
        }
    }

    /// Build a `NoCurrentContext` error for the calling thread
    pub fn no_current_context() -> Self {
        CadenceError::NoCurrentContext(Self::current_thread_name())
    }
}

/// Result type for cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;
