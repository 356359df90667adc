//! Per-context animation schedulers
//!
//! Each execution context gets at most one [`AnimationScheduler`]. The
//! registry only holds weak references: a scheduler lives as long as some
//! animator on its context does, and is recreated on demand afterwards.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use cadence_core::clock::{SystemClock, TimeSource};
use cadence_core::{
    current_context, CadenceError, ContextId, DeferredScheduler, ExecutionContext, Result,
    SharedContext,
};
use rustc_hash::FxHashMap;

use crate::config::AnimatorDefaults;
use crate::timer::AnimationScheduler;

static GLOBAL_REGISTRY: OnceLock<AnimationRegistry> = OnceLock::new();

/// Maps execution contexts to their animation scheduler
pub struct AnimationRegistry {
    schedulers: Mutex<FxHashMap<ContextId, Weak<AnimationScheduler>>>,
    deferred: Arc<DeferredScheduler>,
    source: Arc<dyn TimeSource>,
    defaults: AnimatorDefaults,
}

impl AnimationRegistry {
    /// Registry handing `defaults` to every scheduler it creates
    ///
    /// Fails with `InvalidArgument` if `defaults` would not be accepted by
    /// the animator setters.
    pub fn new(
        deferred: Arc<DeferredScheduler>,
        source: Arc<dyn TimeSource>,
        defaults: AnimatorDefaults,
    ) -> Result<Self> {
        defaults.validate()?;
        Ok(Self::with_valid_defaults(deferred, source, defaults))
    }

    fn with_valid_defaults(
        deferred: Arc<DeferredScheduler>,
        source: Arc<dyn TimeSource>,
        defaults: AnimatorDefaults,
    ) -> Self {
        Self {
            schedulers: Mutex::new(FxHashMap::default()),
            deferred,
            source,
            defaults,
        }
    }

    /// Process-wide registry on the system clock and global deferred scheduler
    pub fn global() -> &'static AnimationRegistry {
        GLOBAL_REGISTRY.get_or_init(|| {
            Self::with_valid_defaults(
                DeferredScheduler::global(),
                Arc::new(SystemClock),
                AnimatorDefaults::ui(),
            )
        })
    }

    /// Scheduler for `context`, created if none is alive
    pub fn scheduler_for(&self, context: &SharedContext) -> Result<Arc<AnimationScheduler>> {
        let mut schedulers = self.schedulers.lock().unwrap();
        let id = context.id();
        if let Some(scheduler) = schedulers.get(&id).and_then(Weak::upgrade) {
            return Ok(scheduler);
        }

        schedulers.retain(|_, scheduler| scheduler.strong_count() > 0);
        let scheduler = AnimationScheduler::with_parts(
            Arc::clone(context),
            Arc::clone(&self.deferred),
            Arc::clone(&self.source),
            self.defaults,
        )?;
        schedulers.insert(id, Arc::downgrade(&scheduler));
        tracing::debug!("AnimationRegistry: created scheduler for {:?}", id);
        Ok(scheduler)
    }

    /// Scheduler for the calling thread's current context
    pub fn current(&self) -> Result<Arc<AnimationScheduler>> {
        let context = current_context().ok_or_else(CadenceError::no_current_context)?;
        self.scheduler_for(&context)
    }

    /// Live scheduler for `id`, if any
    pub fn get(&self, id: ContextId) -> Option<Arc<AnimationScheduler>> {
        self.schedulers.lock().unwrap().get(&id).and_then(Weak::upgrade)
    }

    /// Number of contexts with a live scheduler
    pub fn len(&self) -> usize {
        self.schedulers
            .lock()
            .unwrap()
            .values()
            .filter(|scheduler| scheduler.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{enter, LoopContext, ManualClock};
    use std::time::Duration;

    fn manual_registry() -> AnimationRegistry {
        AnimationRegistry::new(
            DeferredScheduler::global(),
            Arc::new(ManualClock::new()),
            AnimatorDefaults::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_one_scheduler_per_context() {
        let registry = manual_registry();
        let first: SharedContext = LoopContext::new();
        let second: SharedContext = LoopContext::new();

        let a = registry.scheduler_for(&first).unwrap();
        let b = registry.scheduler_for(&first).unwrap();
        let c = registry.scheduler_for(&second).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.context_id(), first.id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_dead_schedulers_are_recreated() {
        let registry = manual_registry();
        let context: SharedContext = LoopContext::new();

        let scheduler = registry.scheduler_for(&context).unwrap();
        drop(scheduler);
        assert!(registry.get(context.id()).is_none());
        assert!(registry.is_empty());

        let scheduler = registry.scheduler_for(&context).unwrap();
        assert_eq!(scheduler.context_id(), context.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_current_follows_entered_context() {
        let registry = manual_registry();
        assert!(matches!(
            std::thread::spawn(move || registry.current().map(|_| ()))
                .join()
                .unwrap(),
            Err(CadenceError::NoCurrentContext(_))
        ));

        let registry = manual_registry();
        let event_loop = LoopContext::new();
        let _guard = enter(&event_loop);
        let scheduler = registry.current().unwrap();
        assert_eq!(scheduler.context_id(), event_loop.id());
    }

    #[test]
    fn test_invalid_defaults_are_rejected() {
        let zero_interval = AnimatorDefaults::default().with_interval(Duration::ZERO);
        let result = AnimationRegistry::new(
            DeferredScheduler::global(),
            Arc::new(ManualClock::new()),
            zero_interval,
        );
        assert!(matches!(
            result,
            Err(CadenceError::InvalidArgument {
                name: "interval",
                ..
            })
        ));
    }
}
