#![forbid(unsafe_code)]

//! Host timer service for time-based reactive operators.
//!
//! arbor never spawns threads or owns an event loop. A [`TimerQueue`] holds
//! scheduled callbacks; the host drives it by calling
//! [`run_due`](TimerQueue::run_due) from its own loop (or
//! [`advance`](TimerQueue::advance) in lab mode, where time only moves when
//! told to).
//!
//! # Invariants
//!
//! 1. Due callbacks run in due-time order; ties run in scheduling order.
//! 2. A callback that panics is caught and logged at `ERROR`; the remaining
//!    due callbacks still run.
//! 3. A timer scheduled under a token is cleared when the token is canceled
//!    and never fires afterwards.
//! 4. Intervals are rescheduled before their callback runs, so an interval may
//!    clear itself from inside its callback.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use web_time::{Duration, Instant};

use crate::cancellation::{CallbackId, CancellationToken, WeakCancellationToken};
use crate::error::Result;

/// Shortest interval period; zero periods would never let `run_due` return.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
enum TimeSource {
    /// Wall-clock time since the queue was created.
    Real,
    /// Time advanced only through [`TimerQueue::advance`].
    Lab,
}

enum TimerCallback {
    Once(Box<dyn FnOnce()>),
    Repeat(Rc<dyn Fn()>, Duration),
}

struct TimerEntry {
    id: u64,
    callback: TimerCallback,
    token: Option<(WeakCancellationToken, CallbackId)>,
}

impl TimerEntry {
    fn release_token(&mut self) {
        if let Some((token, callback)) = self.token.take()
            && let Some(token) = token.upgrade()
        {
            token.remove(callback);
        }
    }
}

struct TimerInner {
    source: TimeSource,
    epoch: Instant,
    lab_offset: Cell<Duration>,
    /// Keyed by (due time, scheduling sequence).
    timers: RefCell<BTreeMap<(Duration, u64), TimerEntry>>,
    next_seq: Cell<u64>,
}

impl TimerInner {
    fn now(&self) -> Duration {
        match self.source {
            TimeSource::Real => Instant::now().saturating_duration_since(self.epoch),
            TimeSource::Lab => self.lab_offset.get(),
        }
    }

    fn next_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }

    fn clear(&self, id: u64) -> bool {
        let removed: Vec<TimerEntry> = {
            let mut timers = self.timers.borrow_mut();
            let keys: Vec<(Duration, u64)> = timers
                .iter()
                .filter(|(_, e)| e.id == id)
                .map(|(k, _)| *k)
                .collect();
            keys.iter().filter_map(|k| timers.remove(k)).collect()
        };
        let found = !removed.is_empty();
        for mut entry in removed {
            entry.release_token();
        }
        found
    }
}

/// Handle to a scheduled timeout or interval.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    id: u64,
    queue: Weak<TimerInner>,
}

impl std::fmt::Debug for TimerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerInner")
            .field("source", &self.source)
            .field("pending", &self.timers.borrow().len())
            .finish()
    }
}

impl TimerHandle {
    /// Clear the timer. Returns `true` if it was still pending.
    pub fn clear(&self) -> bool {
        self.queue.upgrade().is_some_and(|q| q.clear(self.id))
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Single-threaded timer queue driven by the host.
///
/// Cloning a queue creates a new handle to the **same** schedule.
#[derive(Clone, Debug)]
pub struct TimerQueue {
    inner: Rc<TimerInner>,
}

impl TimerQueue {
    fn with_source(source: TimeSource) -> Self {
        Self {
            inner: Rc::new(TimerInner {
                source,
                epoch: Instant::now(),
                lab_offset: Cell::new(Duration::ZERO),
                timers: RefCell::new(BTreeMap::new()),
                next_seq: Cell::new(0),
            }),
        }
    }

    /// Queue measuring wall-clock time.
    #[must_use]
    pub fn real() -> Self {
        Self::with_source(TimeSource::Real)
    }

    /// Queue whose clock only moves through [`advance`](Self::advance).
    #[must_use]
    pub fn lab() -> Self {
        Self::with_source(TimeSource::Lab)
    }

    /// Time elapsed since the queue was created.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.now()
    }

    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self.inner.source, TimeSource::Lab)
    }

    /// Number of scheduled timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    // ── Scheduling ───────────────────────────────────────────────────

    fn schedule(
        &self,
        delay: Duration,
        callback: TimerCallback,
        token: Option<&CancellationToken>,
    ) -> Result<TimerHandle> {
        if let Some(token) = token {
            token.check()?;
        }
        let seq = self.inner.next_seq();
        let handle = TimerHandle {
            id: seq,
            queue: Rc::downgrade(&self.inner),
        };
        let registration = match token {
            Some(token) => {
                let for_token = handle.clone();
                let callback_id = token.add(move || {
                    for_token.clear();
                })?;
                Some((token.downgrade(), callback_id))
            }
            None => None,
        };
        let due = self.now() + delay;
        self.inner.timers.borrow_mut().insert(
            (due, seq),
            TimerEntry {
                id: seq,
                callback,
                token: registration,
            },
        );
        Ok(handle)
    }

    /// Run `callback` once, `delay` from now.
    pub fn set_timeout(
        &self,
        delay: Duration,
        callback: impl FnOnce() + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<TimerHandle> {
        self.schedule(delay, TimerCallback::Once(Box::new(callback)), token)
    }

    /// Run `callback` every `period` until cleared.
    pub fn set_interval(
        &self,
        period: Duration,
        callback: impl Fn() + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<TimerHandle> {
        let period = period.max(MIN_INTERVAL);
        self.schedule(period, TimerCallback::Repeat(Rc::new(callback), period), token)
    }

    /// Clear a timer by handle. Returns `true` if it was still pending.
    pub fn clear(&self, handle: &TimerHandle) -> bool {
        self.inner.clear(handle.id)
    }

    // ── Driving ──────────────────────────────────────────────────────

    /// Move the lab clock forward by `delta` and run everything now due.
    ///
    /// On a real-time queue the clock is not touched; only due timers run.
    pub fn advance(&self, delta: Duration) -> usize {
        if let TimeSource::Lab = self.inner.source {
            self.inner.lab_offset.set(self.inner.lab_offset.get() + delta);
        }
        self.run_due()
    }

    /// Run every timer whose due time has passed. Returns how many ran.
    pub fn run_due(&self) -> usize {
        let now = self.now();
        let mut ran = 0;
        loop {
            let next = {
                let mut timers = self.inner.timers.borrow_mut();
                match timers.first_key_value() {
                    Some((&key, _)) if key.0 <= now => timers.remove(&key).map(|e| (key.0, e)),
                    _ => None,
                }
            };
            let Some((due, mut entry)) = next else {
                break;
            };
            ran += 1;
            let id = entry.id;
            match entry.callback {
                TimerCallback::Once(callback) => {
                    entry.callback = TimerCallback::Once(Box::new(|| {}));
                    entry.release_token();
                    run_guarded(id, callback);
                }
                TimerCallback::Repeat(callback, period) => {
                    let seq = self.inner.next_seq();
                    entry.callback = TimerCallback::Repeat(Rc::clone(&callback), period);
                    self.inner
                        .timers
                        .borrow_mut()
                        .insert((due + period, seq), entry);
                    run_guarded(id, move || callback());
                }
            }
        }
        ran
    }
}

fn run_guarded(timer_id: u64, callback: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(timer_id, panic = %message, "timer callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn timeouts_run_in_due_order() {
        let queue = TimerQueue::lab();
        let events = log();
        for (delay, label) in [(30, "c"), (10, "a"), (20, "b")] {
            let events = Rc::clone(&events);
            queue
                .set_timeout(
                    Duration::from_millis(delay),
                    move || events.borrow_mut().push(label),
                    None,
                )
                .unwrap();
        }
        assert_eq!(queue.advance(Duration::from_millis(15)), 1);
        assert_eq!(queue.advance(Duration::from_millis(100)), 2);
        assert_eq!(*events.borrow(), vec!["a", "b", "c"]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn cleared_timeout_never_runs() {
        let queue = TimerQueue::lab();
        let hit = Rc::new(Cell::new(false));
        let h = Rc::clone(&hit);
        let handle = queue
            .set_timeout(Duration::from_millis(5), move || h.set(true), None)
            .unwrap();
        assert!(handle.clear());
        assert!(!handle.clear());
        queue.advance(Duration::from_millis(10));
        assert!(!hit.get());
    }

    #[test]
    fn interval_repeats_until_cleared() {
        let queue = TimerQueue::lab();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let handle = queue
            .set_interval(Duration::from_millis(10), move || c.set(c.get() + 1), None)
            .unwrap();
        queue.advance(Duration::from_millis(35));
        assert_eq!(count.get(), 3);
        assert!(queue.clear(&handle));
        queue.advance(Duration::from_millis(100));
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn token_cancellation_clears_pending_timer() {
        let queue = TimerQueue::lab();
        let token = CancellationToken::new();
        let hit = Rc::new(Cell::new(false));
        let h = Rc::clone(&hit);
        queue
            .set_timeout(Duration::from_millis(5), move || h.set(true), Some(&token))
            .unwrap();
        assert_eq!(token.callback_count(), 1);
        token.cancel();
        assert_eq!(queue.pending(), 0);
        queue.advance(Duration::from_millis(10));
        assert!(!hit.get());
    }

    #[test]
    fn fired_timeout_releases_token_registration() {
        let queue = TimerQueue::lab();
        let token = CancellationToken::new();
        queue
            .set_timeout(Duration::ZERO, || {}, Some(&token))
            .unwrap();
        queue.run_due();
        assert_eq!(token.callback_count(), 0);
    }

    #[test]
    fn scheduling_under_canceled_token_fails() {
        let queue = TimerQueue::lab();
        let token = CancellationToken::new();
        token.cancel();
        assert!(queue.set_timeout(Duration::ZERO, || {}, Some(&token)).is_err());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn panicking_callback_does_not_starve_others() {
        let queue = TimerQueue::lab();
        let events = log();
        queue
            .set_timeout(Duration::from_millis(1), || panic!("boom"), None)
            .unwrap();
        let e = Rc::clone(&events);
        queue
            .set_timeout(Duration::from_millis(2), move || e.borrow_mut().push("after"), None)
            .unwrap();
        assert_eq!(queue.advance(Duration::from_millis(5)), 2);
        assert_eq!(*events.borrow(), vec!["after"]);
    }

    #[test]
    fn callback_may_schedule_more_work() {
        let queue = TimerQueue::lab();
        let events = log();
        let q = queue.clone();
        let e = Rc::clone(&events);
        queue
            .set_timeout(
                Duration::from_millis(1),
                move || {
                    let e2 = Rc::clone(&e);
                    q.set_timeout(Duration::from_millis(1), move || e2.borrow_mut().push("second"), None)
                        .unwrap();
                    e.borrow_mut().push("first");
                },
                None,
            )
            .unwrap();
        queue.advance(Duration::from_millis(1));
        assert_eq!(*events.borrow(), vec!["first"]);
        queue.advance(Duration::from_millis(1));
        assert_eq!(*events.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn real_queue_runs_zero_delay_immediately() {
        let queue = TimerQueue::real();
        assert!(!queue.is_lab());
        let hit = Rc::new(Cell::new(false));
        let h = Rc::clone(&hit);
        queue.set_timeout(Duration::ZERO, move || h.set(true), None).unwrap();
        queue.run_due();
        assert!(hit.get());
    }
}
