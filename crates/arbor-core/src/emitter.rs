#![forbid(unsafe_code)]

//! Multi-subscriber broadcast channel.
//!
//! [`EventEmitter<T>`] delivers `&T` to every subscriber synchronously, in
//! registration order. Subscriptions end through their [`Subscription`]
//! handle or through the [`CancellationToken`] they were registered under.
//!
//! # Invariants
//!
//! 1. Subscribers fire in registration order.
//! 2. A fire invokes every subscriber registered before it began, even if
//!    that subscriber is cancelled by an earlier subscriber during the same
//!    fire. Removals raised mid-fire are deferred to a cleanup pass that runs
//!    when the outermost fire returns.
//! 3. Subscribers added during a fire are first invoked by the next fire.
//! 4. A fire that starts after a subscriber was cancelled (a nested fire from
//!    inside a handler) skips it.
//! 5. One-shot subscribers are removed after a single delivered fire.
//! 6. With a throttle factor `n > 1`, only every `n`-th `fire` call is
//!    delivered.
//!
//! # Failure Modes
//!
//! - **Panicking handler**: the panic propagates to the caller of `fire`; the
//!   firing depth is restored by a drop guard so later fires still work.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use crate::cancellation::CancellationToken;
use crate::error::Result;

// ─── Subscription ────────────────────────────────────────────────────────────

struct SubscriptionInner {
    active: Cell<bool>,
    teardown: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// Handle to a live subscription.
///
/// Dropping the handle does **not** unsubscribe: lifetimes are explicit, via
/// [`Subscription::cancel`] or the token the subscription was created under.
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<SubscriptionInner>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.inner.active.get())
            .finish()
    }
}

impl Subscription {
    /// Build a subscription whose cancellation runs `teardown`.
    #[must_use]
    pub fn from_fn(teardown: impl FnOnce() + 'static) -> Self {
        Self {
            inner: Rc::new(SubscriptionInner {
                active: Cell::new(true),
                teardown: RefCell::new(vec![Box::new(teardown)]),
            }),
        }
    }

    /// A subscription that releases nothing.
    #[must_use]
    pub fn inert() -> Self {
        let sub = Self::from_fn(|| {});
        sub.inner.active.set(false);
        sub
    }

    /// Run `teardown` when this subscription is cancelled (immediately if it
    /// already is).
    pub fn on_cancel(&self, teardown: impl FnOnce() + 'static) {
        if self.inner.active.get() {
            self.inner.teardown.borrow_mut().push(Box::new(teardown));
        } else {
            teardown();
        }
    }

    /// Cancel the subscription. Subsequent calls do nothing.
    pub fn cancel(&self) {
        if !self.inner.active.replace(false) {
            return;
        }
        let teardown = std::mem::take(&mut *self.inner.teardown.borrow_mut());
        for f in teardown {
            f();
        }
    }

    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Cancel this subscription when `token` is canceled, and drop that
    /// registration again if the subscription ends first.
    pub fn bind_to(&self, token: &CancellationToken) -> Result<()> {
        let for_token = self.clone();
        let callback = token.add(move || for_token.cancel())?;
        let weak_token = token.downgrade();
        self.on_cancel(move || {
            if let Some(token) = weak_token.upgrade() {
                token.remove(callback);
            }
        });
        Ok(())
    }
}

// ─── Emitter internals ───────────────────────────────────────────────────────

type Handler<T> = Rc<dyn Fn(&T)>;

struct Entry<T> {
    id: u64,
    handler: Handler<T>,
    /// Epoch of the fire that was running when the entry was cancelled.
    removed_in: Cell<Option<u64>>,
}

struct OnceEntry<T> {
    id: u64,
    handler: Handler<T>,
    subscription: Subscription,
}

struct EmitterInner<T> {
    subscribers: RefCell<Vec<Entry<T>>>,
    once_subscribers: RefCell<Vec<OnceEntry<T>>>,
    firing: Cell<usize>,
    epoch: Cell<u64>,
    pending_removal: RefCell<Vec<u64>>,
    next_id: Cell<u64>,
    throttle: Cell<u32>,
    throttle_counter: Cell<u32>,
}

impl<T> EmitterInner<T> {
    fn unsubscribe(&self, id: u64) {
        if self.firing.get() > 0 {
            let subscribers = self.subscribers.borrow();
            if let Some(entry) = subscribers.iter().find(|e| e.id == id) {
                if entry.removed_in.get().is_none() {
                    entry.removed_in.set(Some(self.epoch.get()));
                    self.pending_removal.borrow_mut().push(id);
                }
            }
            return;
        }
        let removed: Vec<Entry<T>> = {
            let mut subscribers = self.subscribers.borrow_mut();
            let (gone, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *subscribers).into_iter().partition(|e| e.id == id);
            *subscribers = kept;
            gone
        };
        drop(removed);
    }

    fn unsubscribe_once(&self, id: u64) {
        let removed: Vec<OnceEntry<T>> = {
            let mut once = self.once_subscribers.borrow_mut();
            let (gone, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *once).into_iter().partition(|e| e.id == id);
            *once = kept;
            gone
        };
        drop(removed);
    }

    fn flush_removals(&self) {
        let pending = std::mem::take(&mut *self.pending_removal.borrow_mut());
        if pending.is_empty() {
            return;
        }
        let removed: Vec<Entry<T>> = {
            let mut subscribers = self.subscribers.borrow_mut();
            let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *subscribers)
                .into_iter()
                .partition(|e| e.removed_in.get().is_some());
            *subscribers = kept;
            gone
        };
        drop(removed);
    }
}

/// Restores the firing depth even when a handler panics.
struct FiringGuard<'a, T> {
    inner: &'a EmitterInner<T>,
}

impl<T> Drop for FiringGuard<'_, T> {
    fn drop(&mut self) {
        let depth = self.inner.firing.get().saturating_sub(1);
        self.inner.firing.set(depth);
        if depth == 0 {
            self.inner.flush_removals();
        }
    }
}

// ─── EventEmitter ────────────────────────────────────────────────────────────

/// Multi-subscriber broadcast channel.
///
/// Cloning an emitter creates a new handle to the **same** channel.
pub struct EventEmitter<T> {
    inner: Rc<EmitterInner<T>>,
}

impl<T> Clone for EventEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .field("once", &self.inner.once_subscribers.borrow().len())
            .field("firing", &self.inner.firing.get())
            .field("throttle", &self.inner.throttle.get())
            .finish()
    }
}

impl<T: 'static> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> EventEmitter<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EmitterInner {
                subscribers: RefCell::new(Vec::new()),
                once_subscribers: RefCell::new(Vec::new()),
                firing: Cell::new(0),
                epoch: Cell::new(0),
                pending_removal: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                throttle: Cell::new(1),
                throttle_counter: Cell::new(0),
            }),
        }
    }

    /// Deliver only every `factor`-th call to [`fire`](Self::fire).
    #[must_use]
    pub fn with_throttle(self, factor: u32) -> Self {
        self.inner.throttle.set(factor.max(1));
        self.inner.throttle_counter.set(0);
        self
    }

    fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    // ── Subscribing ──────────────────────────────────────────────────

    /// Register `handler` for every delivered value.
    pub fn subscribe(
        &self,
        handler: impl Fn(&T) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        if let Some(token) = token {
            token.check()?;
        }
        let id = self.next_id();
        self.inner.subscribers.borrow_mut().push(Entry {
            id,
            handler: Rc::new(handler),
            removed_in: Cell::new(None),
        });

        let weak: Weak<EmitterInner<T>> = Rc::downgrade(&self.inner);
        let subscription = Subscription::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                inner.unsubscribe(id);
            }
        });
        if let Some(token) = token {
            subscription.bind_to(token)?;
        }
        Ok(subscription)
    }

    /// Register `handler` for the next delivered value only.
    pub fn subscribe_once(
        &self,
        handler: impl Fn(&T) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        if let Some(token) = token {
            token.check()?;
        }
        let id = self.next_id();
        let weak: Weak<EmitterInner<T>> = Rc::downgrade(&self.inner);
        let subscription = Subscription::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                inner.unsubscribe_once(id);
            }
        });
        self.inner.once_subscribers.borrow_mut().push(OnceEntry {
            id,
            handler: Rc::new(handler),
            subscription: subscription.clone(),
        });
        if let Some(token) = token {
            subscription.bind_to(token)?;
        }
        Ok(subscription)
    }

    /// Resolve with the next delivered value.
    pub fn next_value(&self) -> NextValue<T>
    where
        T: Clone,
    {
        let slot = Rc::new(NextSlot {
            value: RefCell::new(None),
            waker: RefCell::new(None),
        });
        let for_handler = Rc::clone(&slot);
        let subscription = self
            .subscribe_once(
                move |value: &T| {
                    *for_handler.value.borrow_mut() = Some(value.clone());
                    if let Some(waker) = for_handler.waker.borrow_mut().take() {
                        waker.wake();
                    }
                },
                None,
            )
            .unwrap_or_else(|_| Subscription::inert());
        NextValue { slot, subscription }
    }

    /// Re-fire every delivered value on `other`.
    pub fn link_to(
        &self,
        other: &EventEmitter<T>,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        let target = other.clone();
        self.subscribe(move |value| target.fire(value), token)
    }

    /// Cancel every subscriber, deferring removal if a fire is in flight.
    pub fn cancel_all(&self) {
        let once: Vec<Subscription> = self
            .inner
            .once_subscribers
            .borrow()
            .iter()
            .map(|e| e.subscription.clone())
            .collect();
        for subscription in once {
            subscription.cancel();
        }
        let ids: Vec<u64> = self.inner.subscribers.borrow().iter().map(|e| e.id).collect();
        for id in ids {
            self.inner.unsubscribe(id);
        }
    }

    // ── Firing ───────────────────────────────────────────────────────

    /// Deliver `data` to every current subscriber, subject to throttling.
    pub fn fire(&self, data: &T) {
        let factor = self.inner.throttle.get();
        if factor > 1 {
            let count = self.inner.throttle_counter.get() + 1;
            if count < factor {
                self.inner.throttle_counter.set(count);
                return;
            }
            self.inner.throttle_counter.set(0);
        }
        self.deliver(data);
    }

    fn deliver(&self, data: &T) {
        let inner = &*self.inner;
        let epoch = inner.epoch.get() + 1;
        inner.epoch.set(epoch);
        inner.firing.set(inner.firing.get() + 1);
        let _guard = FiringGuard { inner };
        let once = std::mem::take(&mut *inner.once_subscribers.borrow_mut());

        let len = inner.subscribers.borrow().len();
        for index in 0..len {
            let handler = {
                let subscribers = inner.subscribers.borrow();
                match subscribers.get(index) {
                    Some(entry) if entry.removed_in.get().is_none_or(|r| r >= epoch) => {
                        Some(Rc::clone(&entry.handler))
                    }
                    Some(_) => None,
                    None => break,
                }
            };
            if let Some(handler) = handler {
                handler(data);
            }
        }

        for entry in once {
            if entry.subscription.is_active() {
                (entry.handler)(data);
                entry.subscription.cancel();
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Number of live (not cancelled) subscribers, one-shot included.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        let regular = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .filter(|e| e.removed_in.get().is_none())
            .count();
        regular + self.inner.once_subscribers.borrow().len()
    }

    #[must_use]
    pub fn has_subscriptions(&self) -> bool {
        self.subscription_count() > 0
    }

    /// Whether a fire is currently in flight on this emitter.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.inner.firing.get() > 0
    }
}

// ─── NextValue future ────────────────────────────────────────────────────────

struct NextSlot<T> {
    value: RefCell<Option<T>>,
    waker: RefCell<Option<Waker>>,
}

/// Future returned by [`EventEmitter::next_value`].
///
/// Dropping it before resolution cancels the underlying one-shot subscription.
pub struct NextValue<T> {
    slot: Rc<NextSlot<T>>,
    subscription: Subscription,
}

impl<T> Future for NextValue<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        if let Some(value) = self.slot.value.borrow_mut().take() {
            return Poll::Ready(value);
        }
        *self.slot.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> Drop for NextValue<T> {
    fn drop(&mut self) {
        self.subscription.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_handler(log: &Rc<RefCell<Vec<String>>>, label: &'static str) -> impl Fn(&i32) + 'static {
        let log = Rc::clone(log);
        move |v: &i32| log.borrow_mut().push(format!("{label}:{v}"))
    }

    #[test]
    fn fires_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter = EventEmitter::<i32>::new();
        emitter.subscribe(log_handler(&log, "a"), None).unwrap();
        emitter.subscribe(log_handler(&log, "b"), None).unwrap();
        emitter.fire(&1);
        assert_eq!(*log.borrow(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn self_cancel_during_fire_does_not_skip_others() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter = EventEmitter::<i32>::new();
        let own: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let own_for_handler = Rc::clone(&own);
        let log_a = Rc::clone(&log);
        let sub = emitter
            .subscribe(
                move |v: &i32| {
                    log_a.borrow_mut().push(format!("a:{v}"));
                    if let Some(sub) = own_for_handler.borrow().as_ref() {
                        sub.cancel();
                    }
                },
                None,
            )
            .unwrap();
        *own.borrow_mut() = Some(sub);
        emitter.subscribe(log_handler(&log, "b"), None).unwrap();
        emitter.subscribe(log_handler(&log, "c"), None).unwrap();

        emitter.fire(&1);
        assert_eq!(*log.borrow(), vec!["a:1", "b:1", "c:1"]);
        assert_eq!(emitter.subscription_count(), 2);

        emitter.fire(&2);
        assert_eq!(*log.borrow(), vec!["a:1", "b:1", "c:1", "b:2", "c:2"]);
    }

    #[test]
    fn cancelling_later_subscriber_mid_fire_is_deferred() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter = EventEmitter::<i32>::new();
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let victim_for_a = Rc::clone(&victim);
        emitter
            .subscribe(
                move |_: &i32| {
                    if let Some(sub) = victim_for_a.borrow().as_ref() {
                        sub.cancel();
                    }
                },
                None,
            )
            .unwrap();
        let sub_b = emitter.subscribe(log_handler(&log, "b"), None).unwrap();
        *victim.borrow_mut() = Some(sub_b);

        emitter.fire(&1);
        assert_eq!(*log.borrow(), vec!["b:1"]);
        emitter.fire(&2);
        assert_eq!(*log.borrow(), vec!["b:1"]);
    }

    #[test]
    fn subscriber_added_during_fire_waits_for_next_fire() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter: EventEmitter<i32> = EventEmitter::new();
        let emitter_for_handler = emitter.clone();
        let log_for_handler = Rc::clone(&log);
        let added = Rc::new(Cell::new(false));
        emitter
            .subscribe(
                move |_: &i32| {
                    if !added.replace(true) {
                        emitter_for_handler
                            .subscribe(log_handler(&log_for_handler, "late"), None)
                            .unwrap();
                    }
                },
                None,
            )
            .unwrap();
        emitter.fire(&1);
        assert!(log.borrow().is_empty());
        emitter.fire(&2);
        assert_eq!(*log.borrow(), vec!["late:2"]);
    }

    #[test]
    fn nested_fire_skips_subscriber_cancelled_before_it_started() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter: EventEmitter<i32> = EventEmitter::new();
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let victim_for_a = Rc::clone(&victim);
        let emitter_for_a = emitter.clone();
        emitter
            .subscribe(
                move |v: &i32| {
                    if *v == 1 {
                        if let Some(sub) = victim_for_a.borrow().as_ref() {
                            sub.cancel();
                        }
                        emitter_for_a.fire(&2);
                    }
                },
                None,
            )
            .unwrap();
        let sub_b = emitter.subscribe(log_handler(&log, "b"), None).unwrap();
        *victim.borrow_mut() = Some(sub_b);

        emitter.fire(&1);
        // The nested fire of 2 started after b was cancelled; the outer fire of
        // 1 was already scheduled to reach b.
        assert_eq!(*log.borrow(), vec!["b:1"]);
    }

    #[test]
    fn token_cancellation_removes_subscription() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter = EventEmitter::<i32>::new();
        let token = CancellationToken::new();
        let sub = emitter
            .subscribe(log_handler(&log, "a"), Some(&token))
            .unwrap();
        assert_eq!(token.callback_count(), 1);
        token.cancel();
        assert!(!sub.is_active());
        emitter.fire(&1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn cancelling_subscription_releases_token_registration() {
        let emitter: EventEmitter<i32> = EventEmitter::new();
        let token = CancellationToken::new();
        let sub = emitter.subscribe(|_| {}, Some(&token)).unwrap();
        sub.cancel();
        assert_eq!(token.callback_count(), 0);
        assert_eq!(emitter.subscription_count(), 0);
    }

    #[test]
    fn subscribe_with_canceled_token_fails() {
        let emitter: EventEmitter<i32> = EventEmitter::new();
        let token = CancellationToken::new();
        token.cancel();
        assert!(emitter.subscribe(|_| {}, Some(&token)).is_err());
        assert_eq!(emitter.subscription_count(), 0);
    }

    #[test]
    fn subscribe_once_fires_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter = EventEmitter::<i32>::new();
        let token = CancellationToken::new();
        emitter
            .subscribe_once(log_handler(&log, "once"), Some(&token))
            .unwrap();
        emitter.fire(&1);
        emitter.fire(&2);
        assert_eq!(*log.borrow(), vec!["once:1"]);
        assert_eq!(token.callback_count(), 0);
    }

    #[test]
    fn once_subscriber_added_mid_fire_waits_for_next_fire() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter = EventEmitter::<i32>::new();
        let (inner_emitter, inner_log) = (emitter.clone(), Rc::clone(&log));
        let added = Rc::new(Cell::new(false));
        emitter
            .subscribe(
                move |_| {
                    if !added.replace(true) {
                        inner_emitter
                            .subscribe_once(log_handler(&inner_log, "late"), None)
                            .unwrap();
                    }
                },
                None,
            )
            .unwrap();
        emitter.fire(&1);
        assert!(log.borrow().is_empty());
        emitter.fire(&2);
        emitter.fire(&3);
        assert_eq!(*log.borrow(), vec!["late:2"]);
    }

    #[test]
    fn once_subscriber_cancelled_mid_fire_is_skipped() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter = EventEmitter::<i32>::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let target = Rc::clone(&slot);
        emitter
            .subscribe(
                move |_| {
                    if let Some(sub) = target.borrow().as_ref() {
                        sub.cancel();
                    }
                },
                None,
            )
            .unwrap();
        let once = emitter
            .subscribe_once(log_handler(&log, "once"), None)
            .unwrap();
        *slot.borrow_mut() = Some(once);
        emitter.fire(&1);
        assert!(log.borrow().is_empty());
        assert_eq!(emitter.subscription_count(), 1);
    }

    #[test]
    fn throttle_delivers_every_nth_fire() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter = EventEmitter::<i32>::new().with_throttle(3);
        emitter.subscribe(log_handler(&log, "t"), None).unwrap();
        for v in 1..=7 {
            emitter.fire(&v);
        }
        assert_eq!(*log.borrow(), vec!["t:3", "t:6"]);
    }

    #[test]
    fn link_forwards_to_other_emitter() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let source = EventEmitter::<i32>::new();
        let target = EventEmitter::<i32>::new();
        target.subscribe(log_handler(&log, "target"), None).unwrap();
        let link = source.link_to(&target, None).unwrap();
        source.fire(&5);
        link.cancel();
        source.fire(&6);
        assert_eq!(*log.borrow(), vec!["target:5"]);
    }

    #[test]
    fn next_value_resolves_after_fire() {
        let emitter = EventEmitter::<i32>::new();
        let mut future = emitter.next_value();
        let mut cx = Context::from_waker(Waker::noop());
        assert!(Pin::new(&mut future).poll(&mut cx).is_pending());
        emitter.fire(&42);
        assert_eq!(Pin::new(&mut future).poll(&mut cx), Poll::Ready(42));
    }

    #[test]
    fn dropping_next_value_unsubscribes() {
        let emitter: EventEmitter<i32> = EventEmitter::new();
        let future = emitter.next_value();
        assert_eq!(emitter.subscription_count(), 1);
        drop(future);
        assert_eq!(emitter.subscription_count(), 0);
    }

    #[test]
    fn cancel_all_clears_everything() {
        let emitter: EventEmitter<i32> = EventEmitter::new();
        emitter.subscribe(|_| {}, None).unwrap();
        emitter.subscribe_once(|_| {}, None).unwrap();
        assert!(emitter.has_subscriptions());
        emitter.cancel_all();
        assert!(!emitter.has_subscriptions());
    }

    #[test]
    fn panicking_handler_restores_firing_state() {
        let emitter: EventEmitter<i32> = EventEmitter::new();
        emitter.subscribe(|v| assert!(*v != 0, "zero"), None).unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| emitter.fire(&0)));
        assert!(outcome.is_err());
        assert!(!emitter.is_firing());
        emitter.fire(&1);
    }
}
