//! Deferred callback scheduler
//!
//! Producers on any thread hand a [`DeferredCallback`] and a delay to the
//! scheduler. One background thread keeps the pending stubs in a list
//! ordered by ready time and, once a stub is due, fires it: the stub posts
//! its callback to the target context, so user code never runs on the
//! timer thread.
//!
//! The list lives in a `SlotMap` arena. Entries link to each other by key,
//! which keeps insertion stable (ties fire in arrival order) and makes
//! cancellation an O(1) unlink.
//!
//! A process-wide instance is available through [`DeferredScheduler::global`],
//! but schedulers are ordinary values and can be created per subsystem or
//! per test.

use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use crate::clock::MonotonicClock;
use crate::config::SchedulerConfig;
use crate::context::SharedContext;
use crate::error::{CadenceError, Result};
use crate::stub::DeferredCallback;

new_key_type! {
    /// Handle to an entry in the pending list
    struct EntryKey;
}

/// Process-wide default scheduler
static GLOBAL_SCHEDULER: OnceLock<Arc<DeferredScheduler>> = OnceLock::new();

struct Entry {
    stub: Arc<DeferredCallback>,
    ready_at: u64,
    prev: Option<EntryKey>,
    next: Option<EntryKey>,
}

/// Pending stubs ordered by ready time
struct TimerQueue {
    entries: SlotMap<EntryKey, Entry>,
    head: Option<EntryKey>,
    tail: Option<EntryKey>,
    clock: MonotonicClock,
    shutdown: bool,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            entries: SlotMap::with_key(),
            head: None,
            tail: None,
            clock: MonotonicClock::system(),
            shutdown: false,
        }
    }

    /// Insert after every entry that is ready no later than `ready_at`
    ///
    /// Returns the new key and whether it became the head. The scan starts
    /// at the tail because new timers usually expire after existing ones.
    fn insert(&mut self, stub: Arc<DeferredCallback>, ready_at: u64) -> (EntryKey, bool) {
        let mut after = self.tail;
        while let Some(key) = after {
            let entry = &self.entries[key];
            if entry.ready_at <= ready_at {
                break;
            }
            after = entry.prev;
        }

        let next = match after {
            Some(key) => self.entries[key].next,
            None => self.head,
        };
        let key = self.entries.insert(Entry {
            stub,
            ready_at,
            prev: after,
            next,
        });

        match after {
            Some(prev) => self.entries[prev].next = Some(key),
            None => self.head = Some(key),
        }
        match next {
            Some(next) => self.entries[next].prev = Some(key),
            None => self.tail = Some(key),
        }
        (key, after.is_none())
    }

    fn unlink(&mut self, key: EntryKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        match entry.prev {
            Some(prev) => self.entries[prev].next = entry.next,
            None => self.head = entry.next,
        }
        match entry.next {
            Some(next) => self.entries[next].prev = entry.prev,
            None => self.tail = entry.prev,
        }
        Some(entry)
    }

    fn head_ready_at(&self) -> Option<u64> {
        self.head.map(|key| self.entries[key].ready_at)
    }

    /// Unlink every entry whose ready time has passed
    fn pop_due(&mut self, now: u64) -> SmallVec<[Arc<DeferredCallback>; 4]> {
        let mut due = SmallVec::new();
        while let Some(key) = self.head {
            if self.entries[key].ready_at > now {
                break;
            }
            if let Some(entry) = self.unlink(key) {
                due.push(entry.stub);
            }
        }
        due
    }

    fn clear(&mut self) -> Vec<Arc<DeferredCallback>> {
        self.head = None;
        self.tail = None;
        self.entries.drain().map(|(_, entry)| entry.stub).collect()
    }
}

struct Shared {
    queue: Mutex<TimerQueue>,
    wakeup: Condvar,
}

/// Identifies one scheduling request
///
/// Tokens compare equal only when they refer to the same request. Holding a
/// token does not keep the request pending; it is only used to cancel.
#[derive(Clone)]
pub struct ScheduleToken {
    key: Option<EntryKey>,
    stub: Arc<DeferredCallback>,
}

impl ScheduleToken {
    /// The stub this token refers to
    pub fn stub(&self) -> &Arc<DeferredCallback> {
        &self.stub
    }

    /// Whether the request went through the timer list (delay > 0)
    pub fn is_timed(&self) -> bool {
        self.key.is_some()
    }

    /// Whether the request can no longer run its callback
    ///
    /// True when the request was cancelled, refused because the scheduler
    /// was shut down, or dropped because its context refused the post.
    pub fn is_revoked(&self) -> bool {
        self.stub.is_revoked()
    }
}

impl PartialEq for ScheduleToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.stub, &other.stub)
    }
}

impl Eq for ScheduleToken {}

impl std::fmt::Debug for ScheduleToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleToken")
            .field("timed", &self.is_timed())
            .field("stub", &self.stub)
            .finish()
    }
}

/// Runs one-shot callbacks on their target contexts after a delay
pub struct DeferredScheduler {
    shared: Arc<Shared>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeferredScheduler {
    /// Create a scheduler and start its timer thread
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(TimerQueue::new()),
            wakeup: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_timer(thread_shared))
            .map_err(|e| CadenceError::Spawn(e.to_string()))?;

        tracing::debug!(
            "DeferredScheduler: started timer thread '{}'",
            config.thread_name
        );
        Ok(Self {
            shared,
            thread_handle: Mutex::new(Some(handle)),
        })
    }

    /// The process-wide scheduler, created on first use
    ///
    /// # Panics
    ///
    /// Panics if the timer thread cannot be spawned.
    pub fn global() -> Arc<DeferredScheduler> {
        GLOBAL_SCHEDULER
            .get_or_init(|| {
                Arc::new(
                    DeferredScheduler::new(SchedulerConfig::default())
                        .expect("failed to start the global deferred scheduler"),
                )
            })
            .clone()
    }

    /// Schedule `stub` to fire after `delay`
    ///
    /// A zero delay fires the stub immediately on the calling thread, which
    /// posts the callback to its context. Other delays round up to whole
    /// milliseconds, so a request never fires early. A request refused by a
    /// shut-down scheduler comes back already revoked.
    pub fn schedule(&self, stub: Arc<DeferredCallback>, delay: Duration) -> ScheduleToken {
        let delay_ms = delay_to_millis(delay);
        if delay_ms == 0 {
            stub.fire();
            return ScheduleToken { key: None, stub };
        }

        let (key, became_head) = {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.shutdown {
                drop(queue);
                tracing::warn!("DeferredScheduler: schedule after shutdown, cancelling stub");
                stub.cancel();
                return ScheduleToken { key: None, stub };
            }
            let ready_at = queue.clock.now_ms_started().saturating_add(delay_ms);
            let (key, became_head) = queue.insert(Arc::clone(&stub), ready_at);
            tracing::trace!(
                "DeferredScheduler: scheduled {:?} at {} ms (head: {})",
                key,
                ready_at,
                became_head
            );
            (key, became_head)
        };

        if became_head {
            self.shared.wakeup.notify_one();
        }
        ScheduleToken {
            key: Some(key),
            stub,
        }
    }

    /// Schedule a closure to run on `target` after `delay`
    pub fn schedule_on<F>(
        &self,
        target: SharedContext,
        delay: Duration,
        callback: F,
    ) -> ScheduleToken
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(DeferredCallback::new(target, callback), delay)
    }

    /// Cancel a scheduling request
    ///
    /// Returns true only if this call prevented the callback from running.
    pub fn cancel(&self, token: &ScheduleToken) -> bool {
        if let Some(key) = token.key {
            let mut queue = self.shared.queue.lock().unwrap();
            let owned = queue
                .entries
                .get(key)
                .is_some_and(|entry| Arc::ptr_eq(&entry.stub, &token.stub));
            if owned {
                queue.unlink(key);
                tracing::trace!("DeferredScheduler: unlinked {:?}", key);
            }
        }
        token.stub.cancel()
    }

    /// Number of stubs waiting in the timer list
    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().unwrap().entries.len()
    }

    /// Whether the timer thread is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle.lock().unwrap().is_some()
    }

    /// Stop the timer thread, cancelling every pending stub
    pub fn shutdown(&self) {
        let pending = {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.shutdown = true;
            queue.clear()
        };
        self.shared.wakeup.notify_all();

        for stub in &pending {
            stub.cancel();
        }

        if let Some(handle) = self.thread_handle.lock().unwrap().take() {
            if handle.join().is_err() {
                tracing::error!("DeferredScheduler: timer thread panicked");
            }
            tracing::debug!(
                "DeferredScheduler: stopped, cancelled {} pending stubs",
                pending.len()
            );
        }
    }
}

/// Whole milliseconds, rounded up
fn delay_to_millis(delay: Duration) -> u64 {
    delay.as_nanos().div_ceil(1_000_000).min(u64::MAX as u128) as u64
}

fn run_timer(shared: Arc<Shared>) {
    let mut queue = shared.queue.lock().unwrap();
    loop {
        if queue.shutdown {
            break;
        }

        let Some(ready_at) = queue.head_ready_at() else {
            queue = shared.wakeup.wait(queue).unwrap();
            continue;
        };

        let now = queue.clock.now_ms();
        if ready_at > now {
            let timeout = Duration::from_millis(ready_at - now);
            queue = shared.wakeup.wait_timeout(queue, timeout).unwrap().0;
            continue;
        }

        let due = queue.pop_due(now);
        drop(queue);

        tracing::trace!("DeferredScheduler: firing {} stubs at {} ms", due.len(), now);
        for stub in due {
            stub.fire();
        }

        queue = shared.queue.lock().unwrap();
    }
}

impl Drop for DeferredScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DeferredScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredScheduler")
            .field("pending", &self.pending_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::event_loop::LoopContext;
    use crate::worker::WorkerContext;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    fn scheduler() -> DeferredScheduler {
        DeferredScheduler::new(SchedulerConfig::default().with_thread_name("test-timer")).unwrap()
    }

    fn keys_in_order(queue: &TimerQueue) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cursor = queue.head;
        while let Some(key) = cursor {
            out.push(queue.entries[key].ready_at);
            cursor = queue.entries[key].next;
        }
        out
    }

    #[test]
    fn test_queue_insert_is_sorted_and_stable() {
        let ctx = LoopContext::new();
        let mut queue = TimerQueue::new();
        let stub = || DeferredCallback::new(ctx.clone(), || {});

        let (_, head) = queue.insert(stub(), 200);
        assert!(head);
        let (_, head) = queue.insert(stub(), 300);
        assert!(!head);
        let (_, head) = queue.insert(stub(), 100);
        assert!(head);
        let (first_tie, _) = queue.insert(stub(), 200);
        let (second_tie, _) = queue.insert(stub(), 200);

        assert_eq!(keys_in_order(&queue), vec![100, 200, 200, 200, 300]);
        // Equal ready times keep arrival order
        assert_eq!(queue.entries[first_tie].next, Some(second_tie));
    }

    #[test]
    fn test_queue_unlink_and_pop_due() {
        let ctx = LoopContext::new();
        let mut queue = TimerQueue::new();
        let stub = || DeferredCallback::new(ctx.clone(), || {});

        let (a, _) = queue.insert(stub(), 10);
        let (b, _) = queue.insert(stub(), 20);
        let (c, _) = queue.insert(stub(), 30);

        assert!(queue.unlink(b).is_some());
        assert!(queue.unlink(b).is_none());
        assert_eq!(keys_in_order(&queue), vec![10, 30]);
        assert_eq!(queue.entries[a].next, Some(c));
        assert_eq!(queue.entries[c].prev, Some(a));

        assert_eq!(queue.pop_due(25).len(), 1);
        assert_eq!(queue.head, Some(c));
        assert_eq!(queue.pop_due(30).len(), 1);
        assert!(queue.head.is_none() && queue.tail.is_none());
    }

    #[test]
    fn test_zero_delay_fires_synchronously() {
        let scheduler = scheduler();
        let ctx = LoopContext::new();
        let token = scheduler.schedule_on(ctx.clone(), Duration::ZERO, || {});
        assert!(!token.is_timed());
        assert_eq!(scheduler.pending_count(), 0);
        // Already posted to the context
        assert_eq!(ctx.pending(), 1);
    }

    #[test]
    fn test_sub_millisecond_delay_rounds_up() {
        assert_eq!(delay_to_millis(Duration::ZERO), 0);
        assert_eq!(delay_to_millis(Duration::from_micros(1)), 1);
        assert_eq!(delay_to_millis(Duration::from_micros(1500)), 2);
        assert_eq!(delay_to_millis(Duration::from_millis(7)), 7);

        let scheduler = scheduler();
        let ctx = LoopContext::new();
        let token = scheduler.schedule_on(ctx.clone(), Duration::from_micros(500), || {});
        assert!(token.is_timed());
        assert!(!token.is_revoked());
        assert!(scheduler.cancel(&token));
    }

    #[test]
    fn test_fires_no_earlier_than_requested() {
        let scheduler = scheduler();
        let worker = WorkerContext::spawn_default().unwrap();
        let (tx, rx) = mpsc::channel();

        let start = Instant::now();
        scheduler.schedule_on(worker.clone(), Duration::from_millis(50), move || {
            tx.send(Instant::now()).unwrap();
        });

        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at.duration_since(start) >= Duration::from_millis(50));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_fires_in_ready_time_order() {
        let scheduler = scheduler();
        let worker = WorkerContext::spawn_default().unwrap();
        let (tx, rx) = mpsc::channel();

        for (label, delay) in [("c", 60), ("a", 20), ("b", 40), ("a2", 20)] {
            let tx = tx.clone();
            scheduler.schedule_on(worker.clone(), Duration::from_millis(delay), move || {
                tx.send(label).unwrap();
            });
        }

        let order: Vec<_> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec!["a", "a2", "b", "c"]);
    }

    #[test]
    fn test_cancel_before_fire() {
        let scheduler = scheduler();
        let worker = WorkerContext::spawn_default().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();

        let token = scheduler.schedule_on(worker.clone(), Duration::from_millis(50), move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scheduler.pending_count(), 1);
        assert!(scheduler.cancel(&token));
        assert_eq!(scheduler.pending_count(), 0);
        assert!(!scheduler.cancel(&token));

        thread::sleep(Duration::from_millis(100));
        worker.send(Box::new(|| {})).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_after_run_returns_false() {
        let scheduler = scheduler();
        let worker = WorkerContext::spawn_default().unwrap();
        let (tx, rx) = mpsc::channel();

        let token = scheduler.schedule_on(worker.clone(), Duration::from_millis(5), move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!scheduler.cancel(&token));
    }

    #[test]
    fn test_head_cancel_does_not_stall_later_entries() {
        let scheduler = scheduler();
        let worker = WorkerContext::spawn_default().unwrap();
        let (tx, rx) = mpsc::channel();

        let early = scheduler.schedule_on(worker.clone(), Duration::from_millis(30), || {});
        scheduler.schedule_on(worker.clone(), Duration::from_millis(60), move || {
            tx.send(()).unwrap();
        });
        assert!(scheduler.cancel(&early));
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_token_from_other_scheduler_does_not_unlink() {
        let a = scheduler();
        let b = scheduler();
        let ctx = LoopContext::new();

        let token_a = a.schedule_on(ctx.clone(), Duration::from_secs(60), || {});
        let _token_b = b.schedule_on(ctx.clone(), Duration::from_secs(60), || {});

        // Same slot key in both arenas, different stub
        assert!(b.cancel(&token_a));
        assert_eq!(b.pending_count(), 1);
        assert_eq!(a.pending_count(), 1);
    }

    #[test]
    fn test_exactly_once_under_racing_cancel() {
        let scheduler = Arc::new(scheduler());
        let worker = WorkerContext::spawn_default().unwrap();

        for i in 0..100u64 {
            let runs = Arc::new(AtomicUsize::new(0));
            let r = runs.clone();
            let token = scheduler.schedule_on(worker.clone(), Duration::from_millis(2), move || {
                r.fetch_add(1, Ordering::SeqCst);
            });

            thread::sleep(Duration::from_micros(i * 40));
            let cancelled = scheduler.cancel(&token);

            // Wait long enough for the timer, then drain the worker
            thread::sleep(Duration::from_millis(5));
            worker.send(Box::new(|| {})).unwrap();

            let ran = runs.load(Ordering::SeqCst);
            assert!(ran <= 1);
            assert_eq!(cancelled, ran == 0, "iteration {i}");
        }
    }

    #[test]
    fn test_shutdown_cancels_pending() {
        let scheduler = scheduler();
        let ctx = LoopContext::new();
        let token = scheduler.schedule_on(ctx.clone(), Duration::from_secs(60), || {});
        scheduler.shutdown();

        assert!(!scheduler.is_running());
        assert_eq!(scheduler.pending_count(), 0);
        assert!(!scheduler.cancel(&token));
        assert!(token.is_revoked());

        let late = scheduler.schedule_on(ctx.clone(), Duration::from_millis(1), || {});
        assert!(!late.is_timed());
        assert!(late.is_revoked());
        assert_eq!(ctx.pending(), 0);
    }

    #[test]
    fn test_global_scheduler_is_shared() {
        let a = DeferredScheduler::global();
        let b = DeferredScheduler::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_running());
    }
}
