//! Cadence Animation
//!
//! Value-less animators on top of `cadence_core` execution contexts.
//!
//! # Features
//!
//! - **Animators**: progress from 0 to 1 over a duration, after a delay,
//!   updated at a fixed interval
//! - **Easing**: standard curves, CSS-style cubic beziers and custom functions
//! - **One timer per context**: every animator on a context shares a single
//!   driver that is re-armed only when the earliest deadline changes
//! - **Registry**: animators find their context's scheduler automatically
//!
//! # Example
//!
//! ```rust
//! use cadence_animation::{Animator, AnimatorEvent};
//! use cadence_core::LoopContext;
//! use std::time::Duration;
//!
//! let (event_loop, _guard) = LoopContext::new_entered();
//!
//! let animator = Animator::new().unwrap();
//! animator.set_duration(Duration::from_millis(40)).unwrap();
//! animator.set_interval(Duration::from_millis(10)).unwrap();
//! animator.start().unwrap();
//!
//! let finished = event_loop
//!     .run_until(Duration::from_secs(5), || !animator.is_started().unwrap())
//!     .unwrap();
//! assert!(finished);
//! assert_eq!(animator.progress().unwrap(), 1.0);
//! ```

pub mod animator;
pub mod config;
pub mod easing;
pub mod registry;
pub mod timer;

pub use animator::{Animator, AnimatorEvent, Listener, ListenerId};
pub use config::AnimatorDefaults;
pub use easing::Easing;
pub use registry::AnimationRegistry;
pub use timer::{AnimationScheduler, AnimationStats, AnimatorKey};
