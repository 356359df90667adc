//! Animation scheduler
//!
//! One [`AnimationScheduler`] exists per execution context. It keeps every
//! started animator in a list ordered by the animator's next deadline and
//! wakes through a single [`ScheduledAction`], its *driver*. The driver is
//! re-armed only when the deadline at the head of the list changes, so N
//! running animators cost one pending timer rather than N.
//!
//! All per-animator state lives in a `SlotMap` arena owned by the
//! scheduler; animators are addressed by [`AnimatorKey`] and linked to
//! each other by key. The scheduler is only ever touched from its
//! context's thread. The internal mutex exists so the driver closure can be
//! handed to the deferred scheduler, not for cross-thread sharing.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use cadence_core::clock::{MonotonicClock, SystemClock, TimeSource};
use cadence_core::config::{validate_positive_timespan, validate_timespan};
use cadence_core::{
    CadenceError, ContextId, DeferredScheduler, ExecutionContext, Result, ScheduledAction,
    SharedContext,
};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use crate::animator::{AnimatorEvent, Listener, ListenerId};
use crate::config::AnimatorDefaults;
use crate::easing::Easing;

new_key_type! {
    /// Handle to an animator registered with an [`AnimationScheduler`]
    pub struct AnimatorKey;
}

type Listeners = SmallVec<[Listener; 2]>;

/// Notifications collected under the lock and delivered after it is released
type Dispatch = Vec<(Listeners, AnimatorEvent)>;

/// Which timing property a setter changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Timing {
    Delay,
    Duration,
    Interval,
}

/// Per-animator state, stored in the scheduler's arena
pub(crate) struct AnimatorNode {
    pub(crate) delay: i64,
    pub(crate) duration: i64,
    pub(crate) interval: i64,
    pub(crate) easing: Easing,
    /// `None` while idle
    pub(crate) start_time: Option<i64>,
    pub(crate) completion_time: i64,
    pub(crate) prev_animation_time: i64,
    pub(crate) next_animation_time: i64,
    pub(crate) progress: f64,
    linked: bool,
    prev: Option<AnimatorKey>,
    next: Option<AnimatorKey>,
    listeners: SmallVec<[(ListenerId, Listener); 2]>,
}

impl AnimatorNode {
    fn new(defaults: &AnimatorDefaults) -> Self {
        Self {
            delay: defaults.delay.as_millis() as i64,
            duration: defaults.duration.as_millis() as i64,
            interval: defaults.interval.as_millis() as i64,
            easing: Easing::Linear,
            start_time: None,
            completion_time: 0,
            prev_animation_time: 0,
            next_animation_time: 0,
            progress: 0.0,
            linked: false,
            prev: None,
            next: None,
            listeners: SmallVec::new(),
        }
    }

    fn listeners(&self) -> Listeners {
        self.listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// First deadline of a fresh run starting at `now`
    fn begin(&mut self, now: i64) {
        self.start_time = Some(now);
        self.prev_animation_time = now;
        self.progress = 0.0;
        self.completion_time = now + self.delay + self.duration;
        self.next_animation_time = (now + self.delay + self.interval).min(self.completion_time);
    }

    /// Recompute deadlines of a running animator from the current reading
    fn retime(&mut self, now: i64) {
        let Some(start) = self.start_time else {
            return;
        };
        let base = start + self.delay;
        self.completion_time = base + self.duration;
        self.next_animation_time = (now.max(base) + self.interval).min(self.completion_time);
    }

    fn reset(&mut self) {
        self.start_time = None;
        self.progress = 0.0;
    }

    /// Linear progress at `now`, before easing
    fn raw_progress(&self, now: i64) -> f64 {
        let start = self.start_time.unwrap_or(now);
        if self.duration <= 0 {
            return 1.0;
        }
        let elapsed = now - start - self.delay;
        (elapsed as f64 / self.duration as f64).max(0.0)
    }
}

/// What to do with the driver once the lock is released
#[derive(Debug, PartialEq, Eq)]
enum DriverCommand {
    Keep,
    Arm(Duration),
    Disarm,
}

struct TimerState {
    clock: MonotonicClock,
    registered: u32,
    nodes: SlotMap<AnimatorKey, AnimatorNode>,
    head: Option<AnimatorKey>,
    tail: Option<AnimatorKey>,
    /// Deadline the driver is currently armed for
    armed_for: Option<i64>,
    rearms: u64,
    next_listener: u64,
    defaults: AnimatorDefaults,
}

impl TimerState {
    fn now(&self) -> i64 {
        self.clock.now_ms() as i64
    }

    /// Link before the first animator with a strictly later deadline
    fn link_sorted(&mut self, key: AnimatorKey) {
        let deadline = self.nodes[key].next_animation_time;
        let mut before = self.head;
        while let Some(candidate) = before {
            let node = &self.nodes[candidate];
            if node.next_animation_time > deadline {
                break;
            }
            before = node.next;
        }

        let prev = match before {
            Some(next) => self.nodes[next].prev,
            None => self.tail,
        };
        {
            let node = &mut self.nodes[key];
            node.prev = prev;
            node.next = before;
            node.linked = true;
        }
        match prev {
            Some(prev) => self.nodes[prev].next = Some(key),
            None => self.head = Some(key),
        }
        match before {
            Some(next) => self.nodes[next].prev = Some(key),
            None => self.tail = Some(key),
        }
    }

    fn unlink(&mut self, key: AnimatorKey) -> bool {
        let (prev, next) = {
            let node = &mut self.nodes[key];
            if !node.linked {
                return false;
            }
            node.linked = false;
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.tail = prev,
        }
        true
    }

    fn head_deadline(&self) -> Option<i64> {
        self.head.map(|key| self.nodes[key].next_animation_time)
    }

    /// Decide whether the driver needs re-arming
    ///
    /// Only a change of the head deadline touches the driver.
    fn sync_driver(&mut self) -> DriverCommand {
        let deadline = self.head_deadline();
        if deadline == self.armed_for {
            return DriverCommand::Keep;
        }
        self.armed_for = deadline;
        match deadline {
            Some(deadline) => {
                self.rearms += 1;
                let delay = (deadline - self.now()).max(0) as u64;
                DriverCommand::Arm(Duration::from_millis(delay))
            }
            None => DriverCommand::Disarm,
        }
    }
}

/// Counters describing an animation scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnimationStats {
    /// Animators constructed on this context and not yet dropped
    pub registered: u32,
    /// Animators currently started
    pub active: usize,
    /// How many times the driver has been re-armed
    pub rearms: u64,
    /// Whether the scheduler's clock is counting
    pub clock_running: bool,
}

/// Drives every animator of one execution context with a single timer
pub struct AnimationScheduler {
    context: SharedContext,
    state: Mutex<TimerState>,
    driver: ScheduledAction,
}

impl AnimationScheduler {
    /// Scheduler for `context` using the global deferred scheduler and the system clock
    pub fn new(context: SharedContext) -> Result<Arc<Self>> {
        Self::with_parts(
            context,
            DeferredScheduler::global(),
            Arc::new(SystemClock),
            AnimatorDefaults::default(),
        )
    }

    /// Scheduler with explicit timer, clock and animator defaults
    ///
    /// Fails with `InvalidArgument` if `defaults` would not be accepted by
    /// the animator setters.
    pub fn with_parts(
        context: SharedContext,
        deferred: Arc<DeferredScheduler>,
        source: Arc<dyn TimeSource>,
        defaults: AnimatorDefaults,
    ) -> Result<Arc<Self>> {
        defaults.validate()?;
        Ok(Arc::new_cyclic(|weak: &Weak<AnimationScheduler>| {
            let weak = weak.clone();
            let driver = ScheduledAction::with_scheduler(deferred, Arc::clone(&context), move || {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.drive();
                }
            });
            Self {
                context,
                state: Mutex::new(TimerState {
                    clock: MonotonicClock::new(source),
                    registered: 0,
                    nodes: SlotMap::with_key(),
                    head: None,
                    tail: None,
                    armed_for: None,
                    rearms: 0,
                    next_listener: 0,
                    defaults,
                }),
                driver,
            }
        }))
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn context_id(&self) -> ContextId {
        self.context.id()
    }

    pub fn defaults(&self) -> AnimatorDefaults {
        self.state.lock().unwrap().defaults
    }

    /// Change the timing given to animators constructed from now on
    pub fn set_defaults(&self, defaults: AnimatorDefaults) -> Result<()> {
        defaults.validate()?;
        self.check_owner()?;
        self.state.lock().unwrap().defaults = defaults;
        Ok(())
    }

    /// Fail unless called on the owning context's thread
    pub fn check_owner(&self) -> Result<()> {
        if self.context.is_current() {
            Ok(())
        } else {
            Err(CadenceError::wrong_context(self.context.id()))
        }
    }

    /// Current clock reading in milliseconds
    pub fn now_ms(&self) -> Result<u64> {
        self.check_owner()?;
        Ok(self.state.lock().unwrap().clock.now_ms())
    }

    pub fn stats(&self) -> AnimationStats {
        let state = self.state.lock().unwrap();
        AnimationStats {
            registered: state.registered,
            active: state.nodes.values().filter(|node| node.linked).count(),
            rearms: state.rearms,
            clock_running: state.clock.is_running(),
        }
    }

    /// Advance every animator whose deadline has passed
    ///
    /// Normally called by the driver. Returns how many animators were
    /// advanced.
    pub fn tick(&self) -> Result<usize> {
        self.check_owner()?;
        let driver_idle = !self.driver.is_scheduled();

        let (advanced, command, events) = {
            let mut state = self.state.lock().unwrap();
            if driver_idle {
                state.armed_for = None;
            }
            let now = state.now();
            let mut events = Dispatch::new();
            let mut advanced = 0;

            while let Some(key) = state.head {
                if state.nodes[key].next_animation_time > now {
                    break;
                }
                state.unlink(key);
                advanced += 1;

                let node = &mut state.nodes[key];
                node.prev_animation_time = now;
                let raw = node.raw_progress(now);
                if raw >= 1.0 {
                    node.progress = node.easing.apply(1.0);
                    node.start_time = None;
                    events.push((node.listeners(), AnimatorEvent::Completed));
                    continue;
                }

                node.progress = node.easing.apply(raw);
                events.push((node.listeners(), AnimatorEvent::ProgressChanged(node.progress)));

                // Catch up on whole intervals missed while the timer was late
                let mut next = node.next_animation_time;
                if next <= now {
                    next += ((now - next) / node.interval + 1) * node.interval;
                }
                node.next_animation_time = next.min(node.completion_time);
                state.link_sorted(key);
            }

            (advanced, state.sync_driver(), events)
        };

        if advanced > 0 {
            tracing::trace!(
                "AnimationScheduler {:?}: advanced {} animators",
                self.context.id(),
                advanced
            );
        }
        self.apply(command);
        dispatch(events);
        Ok(advanced)
    }

    fn drive(&self) {
        if let Err(err) = self.tick() {
            tracing::error!("AnimationScheduler: driver tick failed: {}", err);
        }
    }

    fn apply(&self, command: DriverCommand) {
        match command {
            DriverCommand::Keep => {}
            DriverCommand::Arm(delay) => {
                tracing::trace!(
                    "AnimationScheduler {:?}: re-arming driver in {:?}",
                    self.context.id(),
                    delay
                );
                self.driver.reschedule(delay);
            }
            DriverCommand::Disarm => {
                self.driver.cancel();
            }
        }
    }

    // =========================================================================
    // Per-animator operations
    // =========================================================================

    pub(crate) fn register(&self) -> Result<AnimatorKey> {
        self.check_owner()?;
        let mut state = self.state.lock().unwrap();
        if state.registered == 0 {
            state.clock.start();
            tracing::debug!("AnimationScheduler {:?}: clock started", self.context.id());
        }
        state.registered += 1;
        let node = AnimatorNode::new(&state.defaults);
        Ok(state.nodes.insert(node))
    }

    /// Remove an animator; the clock suspends when the last one goes
    pub(crate) fn release(&self, key: AnimatorKey) {
        let command = {
            let mut state = self.state.lock().unwrap();
            if !state.nodes.contains_key(key) {
                return;
            }
            state.unlink(key);
            state.nodes.remove(key);
            state.registered = state.registered.saturating_sub(1);

            if state.registered == 0 {
                debug_assert!(state.head.is_none(), "suspending clock with linked animators");
                if state.head.is_some() {
                    tracing::error!(
                        "AnimationScheduler {:?}: animators still linked at zero registrations",
                        self.context.id()
                    );
                }
                state.clock.suspend();
                tracing::debug!("AnimationScheduler {:?}: clock suspended", self.context.id());
            }
            state.sync_driver()
        };
        self.apply(command);
    }

    pub(crate) fn start(&self, key: AnimatorKey) -> Result<()> {
        self.check_owner()?;
        let (command, events) = {
            let mut state = self.state.lock().unwrap();
            let mut events = Dispatch::new();
            if state.nodes[key].start_time.is_some() {
                state.unlink(key);
                let node = &mut state.nodes[key];
                node.reset();
                events.push((node.listeners(), AnimatorEvent::Cancelled));
            }

            let now = state.now();
            state.nodes[key].begin(now);
            state.link_sorted(key);
            (state.sync_driver(), events)
        };
        self.apply(command);
        dispatch(events);
        Ok(())
    }

    /// Returns whether the animator was running
    pub(crate) fn cancel(&self, key: AnimatorKey) -> Result<bool> {
        self.check_owner()?;
        let (command, events) = {
            let mut state = self.state.lock().unwrap();
            if state.nodes[key].start_time.is_none() {
                return Ok(false);
            }
            state.unlink(key);
            let node = &mut state.nodes[key];
            node.reset();
            let events = vec![(node.listeners(), AnimatorEvent::Cancelled)];
            (state.sync_driver(), events)
        };
        self.apply(command);
        dispatch(events);
        Ok(true)
    }

    pub(crate) fn read<R>(
        &self,
        key: AnimatorKey,
        f: impl FnOnce(&AnimatorNode) -> R,
    ) -> Result<R> {
        self.check_owner()?;
        let state = self.state.lock().unwrap();
        Ok(f(&state.nodes[key]))
    }

    pub(crate) fn set_timing(
        &self,
        key: AnimatorKey,
        timing: Timing,
        value: Duration,
    ) -> Result<()> {
        match timing {
            Timing::Delay => validate_timespan("delay", value)?,
            Timing::Duration => validate_timespan("duration", value)?,
            Timing::Interval => validate_positive_timespan("interval", value)?,
        };
        self.check_owner()?;

        let ms = value.as_millis() as i64;
        let command = {
            let mut state = self.state.lock().unwrap();
            let now = state.now();
            let node = &mut state.nodes[key];
            match timing {
                Timing::Delay => node.delay = ms,
                Timing::Duration => node.duration = ms,
                Timing::Interval => node.interval = ms,
            }
            if node.start_time.is_none() {
                return Ok(());
            }
            node.retime(now);
            state.unlink(key);
            state.link_sorted(key);
            state.sync_driver()
        };
        self.apply(command);
        Ok(())
    }

    pub(crate) fn set_easing(&self, key: AnimatorKey, easing: Easing) -> Result<()> {
        self.check_owner()?;
        self.state.lock().unwrap().nodes[key].easing = easing;
        Ok(())
    }

    pub(crate) fn subscribe(&self, key: AnimatorKey, listener: Listener) -> Result<ListenerId> {
        self.check_owner()?;
        let mut state = self.state.lock().unwrap();
        let id = ListenerId::from_raw(state.next_listener);
        state.next_listener += 1;
        state.nodes[key].listeners.push((id, listener));
        Ok(id)
    }

    pub(crate) fn unsubscribe(&self, key: AnimatorKey, id: ListenerId) -> Result<bool> {
        self.check_owner()?;
        let mut state = self.state.lock().unwrap();
        let listeners = &mut state.nodes[key].listeners;
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        Ok(listeners.len() != before)
    }
}

fn dispatch(events: Dispatch) {
    for (listeners, event) in events {
        for listener in listeners {
            listener(event);
        }
    }
}

impl std::fmt::Debug for AnimationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationScheduler")
            .field("context", &self.context.id())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animator::Animator;
    use cadence_core::{ContextGuard, LoopContext, ManualClock};

    struct Harness {
        _event_loop: Arc<LoopContext>,
        _guard: ContextGuard,
        clock: ManualClock,
        scheduler: Arc<AnimationScheduler>,
    }

    impl Harness {
        fn new() -> Self {
            let (event_loop, guard) = LoopContext::new_entered();
            let clock = ManualClock::new();
            let scheduler = AnimationScheduler::with_parts(
                event_loop.clone(),
                DeferredScheduler::global(),
                Arc::new(clock.clone()),
                AnimatorDefaults::default(),
            )
            .unwrap();
            Self {
                _event_loop: event_loop,
                _guard: guard,
                clock,
                scheduler,
            }
        }

        fn animator(&self, delay: u64, duration: u64, interval: u64) -> Animator {
            let animator = Animator::with_scheduler(&self.scheduler).unwrap();
            animator.set_delay(Duration::from_millis(delay)).unwrap();
            animator.set_duration(Duration::from_millis(duration)).unwrap();
            animator.set_interval(Duration::from_millis(interval)).unwrap();
            animator
        }

        fn advance_and_tick(&self, ms: u64) -> usize {
            self.clock.advance(Duration::from_millis(ms));
            self.scheduler.tick().unwrap()
        }
    }

    fn record(animator: &Animator) -> Arc<Mutex<Vec<AnimatorEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        animator
            .subscribe(move |event| sink.lock().unwrap().push(event))
            .unwrap();
        events
    }

    fn order(scheduler: &AnimationScheduler) -> Vec<i64> {
        let state = scheduler.state.lock().unwrap();
        let mut deadlines = Vec::new();
        let mut cursor = state.head;
        while let Some(key) = cursor {
            deadlines.push(state.nodes[key].next_animation_time);
            cursor = state.nodes[key].next;
        }
        deadlines
    }

    #[test]
    fn test_progress_is_monotonic_and_completes_once() {
        let harness = Harness::new();
        let animator = harness.animator(0, 1000, 100);
        let events = record(&animator);

        animator.start().unwrap();
        for _ in 0..15 {
            harness.advance_and_tick(100);
        }

        let events = events.lock().unwrap();
        let progress: Vec<f64> = events
            .iter()
            .filter_map(|event| match event {
                AnimatorEvent::ProgressChanged(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 9);
        assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!((progress[0] - 0.1).abs() < 1e-9);

        let completed = events
            .iter()
            .filter(|event| **event == AnimatorEvent::Completed)
            .count();
        assert_eq!(completed, 1);
        assert_eq!(events.last(), Some(&AnimatorEvent::Completed));

        assert!(!animator.is_started().unwrap());
        assert_eq!(animator.progress().unwrap(), 1.0);
        assert_eq!(harness.scheduler.stats().active, 0);
    }

    #[test]
    fn test_delay_holds_progress_at_zero() {
        let harness = Harness::new();
        let animator = harness.animator(300, 200, 100);
        let events = record(&animator);
        animator.start().unwrap();

        assert_eq!(harness.advance_and_tick(100), 0);
        assert_eq!(harness.advance_and_tick(100), 0);
        assert_eq!(harness.advance_and_tick(100), 0);
        // First update lands one interval after the delay
        assert_eq!(harness.advance_and_tick(100), 1);
        assert!((animator.progress().unwrap() - 0.5).abs() < 1e-9);

        assert_eq!(harness.advance_and_tick(100), 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec![AnimatorEvent::ProgressChanged(0.5), AnimatorEvent::Completed]
        );
    }

    #[test]
    fn test_zero_duration_completes_on_first_tick() {
        let harness = Harness::new();
        let animator = harness.animator(0, 0, 100);
        let events = record(&animator);

        animator.start().unwrap();
        assert_eq!(order(&harness.scheduler), vec![0]);
        assert_eq!(harness.scheduler.tick().unwrap(), 1);
        assert_eq!(*events.lock().unwrap(), vec![AnimatorEvent::Completed]);
        assert_eq!(animator.progress().unwrap(), 1.0);
    }

    #[test]
    fn test_driver_rearms_only_when_head_changes() {
        let harness = Harness::new();
        let a = harness.animator(0, 1000, 100);
        let b = harness.animator(0, 1000, 200);
        let c = harness.animator(0, 1000, 300);

        a.start().unwrap();
        b.start().unwrap();
        c.start().unwrap();
        assert_eq!(harness.scheduler.stats().rearms, 1);
        assert_eq!(order(&harness.scheduler), vec![100, 200, 300]);

        assert_eq!(harness.advance_and_tick(100), 1);
        assert_eq!(harness.scheduler.stats().rearms, 2);
        assert_eq!(order(&harness.scheduler), vec![200, 200, 300]);
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let harness = Harness::new();
        let first = harness.animator(0, 1000, 100);
        let second = harness.animator(0, 1000, 100);
        let log = Arc::new(Mutex::new(Vec::new()));

        for (name, animator) in [("first", &first), ("second", &second)] {
            let log = Arc::clone(&log);
            animator
                .on_progress(move |_| log.lock().unwrap().push(name))
                .unwrap();
            animator.start().unwrap();
        }

        harness.advance_and_tick(100);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_late_tick_skips_whole_intervals() {
        let harness = Harness::new();
        let animator = harness.animator(0, 1000, 100);
        animator.start().unwrap();

        assert_eq!(harness.advance_and_tick(350), 1);
        assert!((animator.progress().unwrap() - 0.35).abs() < 1e-9);
        assert_eq!(order(&harness.scheduler), vec![400]);
    }

    #[test]
    fn test_mutation_resplices_running_animator() {
        let harness = Harness::new();
        let fast = harness.animator(0, 1000, 100);
        let slow = harness.animator(0, 1000, 500);
        slow.start().unwrap();
        fast.start().unwrap();
        assert_eq!(order(&harness.scheduler), vec![100, 500]);
        let rearms = harness.scheduler.stats().rearms;

        harness.clock.advance(Duration::from_millis(50));
        fast.set_interval(Duration::from_millis(600)).unwrap();
        // next = max(now, start + delay) + interval
        assert_eq!(order(&harness.scheduler), vec![500, 650]);
        assert_eq!(harness.scheduler.stats().rearms, rearms + 1);

        slow.set_duration(Duration::from_millis(200)).unwrap();
        assert_eq!(order(&harness.scheduler), vec![200, 650]);
    }

    #[test]
    fn test_shortened_duration_completes_on_next_tick() {
        let harness = Harness::new();
        let animator = harness.animator(0, 1000, 100);
        let events = record(&animator);
        animator.start().unwrap();

        harness.advance_and_tick(300);
        animator.set_duration(Duration::from_millis(200)).unwrap();
        assert_eq!(harness.scheduler.tick().unwrap(), 1);
        assert_eq!(events.lock().unwrap().last(), Some(&AnimatorEvent::Completed));
    }

    #[test]
    fn test_mutating_idle_animator_does_not_link_it() {
        let harness = Harness::new();
        let animator = harness.animator(0, 1000, 100);
        animator.set_delay(Duration::from_millis(10)).unwrap();
        assert!(order(&harness.scheduler).is_empty());
        assert_eq!(harness.scheduler.stats().rearms, 0);
    }

    #[test]
    fn test_cancel_unlinks_and_resets() {
        let harness = Harness::new();
        let animator = harness.animator(0, 1000, 100);
        let events = record(&animator);
        animator.start().unwrap();
        harness.advance_and_tick(200);

        assert!(animator.cancel().unwrap());
        assert!(!animator.cancel().unwrap());
        assert_eq!(animator.progress().unwrap(), 0.0);
        assert!(order(&harness.scheduler).is_empty());

        assert_eq!(harness.advance_and_tick(500), 0);
        let events = events.lock().unwrap();
        assert_eq!(events.last(), Some(&AnimatorEvent::Cancelled));
        assert_eq!(
            events
                .iter()
                .filter(|event| **event == AnimatorEvent::Cancelled)
                .count(),
            1
        );
    }

    #[test]
    fn test_restart_cancels_previous_run() {
        let harness = Harness::new();
        let animator = harness.animator(0, 1000, 100);
        let events = record(&animator);
        animator.start().unwrap();
        harness.advance_and_tick(100);

        animator.start().unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![AnimatorEvent::ProgressChanged(0.1), AnimatorEvent::Cancelled]
        );
        assert_eq!(animator.progress().unwrap(), 0.0);
        assert_eq!(order(&harness.scheduler), vec![200]);
    }

    #[test]
    fn test_invalid_argument_leaves_animator_untouched() {
        let harness = Harness::new();
        let animator = harness.animator(0, 1000, 100);
        animator.start().unwrap();
        let before = order(&harness.scheduler);

        let err = animator.set_interval(Duration::ZERO).unwrap_err();
        assert!(matches!(
            err,
            CadenceError::InvalidArgument { name: "interval", .. }
        ));
        let too_long = cadence_core::MAX_TIMESPAN + Duration::from_millis(1);
        assert!(animator.set_duration(too_long).is_err());
        assert!(animator.set_delay(too_long).is_err());

        assert_eq!(animator.interval().unwrap(), Duration::from_millis(100));
        assert_eq!(animator.duration().unwrap(), Duration::from_millis(1000));
        assert_eq!(order(&harness.scheduler), before);
    }

    #[test]
    fn test_clock_runs_only_while_animators_exist() {
        let harness = Harness::new();
        harness.clock.advance(Duration::from_millis(5000));
        assert!(!harness.scheduler.stats().clock_running);

        let first = harness.animator(0, 1000, 100);
        let second = harness.animator(0, 1000, 100);
        assert!(harness.scheduler.stats().clock_running);
        assert_eq!(harness.scheduler.stats().registered, 2);
        // Time is measured from the first registration
        assert_eq!(harness.scheduler.now_ms().unwrap(), 0);

        first.start().unwrap();
        drop(first);
        assert_eq!(harness.scheduler.stats().registered, 1);
        assert_eq!(harness.scheduler.stats().active, 0);
        assert!(harness.scheduler.stats().clock_running);

        drop(second);
        assert_eq!(harness.scheduler.stats().registered, 0);
        assert!(!harness.scheduler.stats().clock_running);
    }

    #[test]
    fn test_listener_may_restart_its_animator() {
        let harness = Harness::new();
        let animator = Arc::new(harness.animator(0, 100, 100));
        let restarts = Arc::new(Mutex::new(0));

        let weak = Arc::downgrade(&animator);
        let count = Arc::clone(&restarts);
        animator
            .on_completed(move || {
                let mut count = count.lock().unwrap();
                if *count < 2 {
                    *count += 1;
                    if let Some(animator) = weak.upgrade() {
                        animator.start().unwrap();
                    }
                }
            })
            .unwrap();

        animator.start().unwrap();
        for _ in 0..5 {
            harness.advance_and_tick(100);
        }
        assert_eq!(*restarts.lock().unwrap(), 2);
        assert!(!animator.is_started().unwrap());
    }

    #[test]
    fn test_off_thread_calls_are_rejected() {
        let harness = Harness::new();
        let animator = harness.animator(0, 1000, 100);
        let scheduler = Arc::clone(&harness.scheduler);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                assert!(matches!(
                    animator.start(),
                    Err(CadenceError::WrongContext { .. })
                ));
                assert!(matches!(
                    animator.progress(),
                    Err(CadenceError::WrongContext { .. })
                ));
                assert!(matches!(
                    scheduler.tick(),
                    Err(CadenceError::WrongContext { .. })
                ));
            });
        });
        assert!(!animator.is_started().unwrap());
    }

    #[test]
    fn test_invalid_defaults_are_rejected_at_construction() {
        let (event_loop, _guard) = LoopContext::new_entered();
        let clock = ManualClock::new();

        let result = AnimationScheduler::with_parts(
            event_loop.clone(),
            DeferredScheduler::global(),
            Arc::new(clock.clone()),
            AnimatorDefaults::default().with_interval(Duration::ZERO),
        );
        assert!(matches!(
            result,
            Err(CadenceError::InvalidArgument {
                name: "interval",
                ..
            })
        ));

        let too_long = cadence_core::MAX_TIMESPAN + Duration::from_millis(1);
        assert!(AnimationScheduler::with_parts(
            event_loop.clone(),
            DeferredScheduler::global(),
            Arc::new(clock),
            AnimatorDefaults::default().with_duration(too_long),
        )
        .is_err());
    }

    #[test]
    fn test_set_defaults_applies_to_new_animators() {
        let harness = Harness::new();
        let defaults = AnimatorDefaults::default()
            .with_duration(Duration::from_millis(900))
            .with_interval(Duration::from_millis(30));
        harness.scheduler.set_defaults(defaults).unwrap();

        let animator = Animator::with_scheduler(&harness.scheduler).unwrap();
        assert_eq!(animator.duration().unwrap(), Duration::from_millis(900));
        assert_eq!(animator.interval().unwrap(), Duration::from_millis(30));
        assert!(harness
            .scheduler
            .set_defaults(defaults.with_interval(Duration::ZERO))
            .is_err());
    }
}
