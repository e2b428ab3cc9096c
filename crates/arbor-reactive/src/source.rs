#![forbid(unsafe_code)]

//! Reactive scalar cell.
//!
//! A [`DataSource<T>`] holds an optional current value and a list of
//! listeners. [`update`](DataSource::update) is the only mutator: it
//! overwrites the value and then notifies every listener synchronously, in
//! subscription order.
//!
//! # Invariants
//!
//! 1. Listeners observe the new value through [`DataSource::value`] while
//!    they run (the value is stored before notification starts).
//! 2. Listeners run in subscription order; a listener cancelled mid-update
//!    still sees that update.
//! 3. Re-entrant `update` from inside a listener is allowed and is delivered
//!    depth-first.
//!
//! # Failure Modes
//!
//! - **Borrow inside `with`**: calling `update` from inside the closure passed
//!   to [`DataSource::with`] panics with a `RefCell` borrow error. Read the
//!   value out first.

use std::cell::RefCell;
use std::rc::Rc;

use arbor_core::{CancellationToken, EventEmitter, NextValue, Result, Subscription};

struct SourceInner<T> {
    value: RefCell<Option<T>>,
    emitter: EventEmitter<T>,
}

/// Reactive scalar cell.
///
/// Cloning a `DataSource` creates a new handle to the **same** cell.
pub struct DataSource<T> {
    inner: Rc<SourceInner<T>>,
}

impl<T> Clone for DataSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for DataSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("value", &self.inner.value.borrow())
            .field("listeners", &self.inner.emitter.subscription_count())
            .finish()
    }
}

impl<T: Clone + 'static> Default for DataSource<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Clone + 'static> DataSource<T> {
    /// Cell holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_option(Some(value))
    }

    /// Cell with no value yet.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_option(None)
    }

    pub(crate) fn from_option(value: Option<T>) -> Self {
        Self {
            inner: Rc::new(SourceInner {
                value: RefCell::new(value),
                emitter: EventEmitter::new(),
            }),
        }
    }

    /// Store `value` and notify every listener.
    pub fn update(&self, value: T) {
        *self.inner.value.borrow_mut() = Some(value.clone());
        self.inner.emitter.fire(&value);
    }

    /// Clone of the current value.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value without cloning.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.inner.value.borrow().as_ref())
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    // ── Listening ────────────────────────────────────────────────────

    /// Call `listener` on every future update.
    pub fn listen(
        &self,
        listener: impl Fn(&T) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        self.inner.emitter.subscribe(listener, token)
    }

    /// Like [`listen`](Self::listen), but first call `listener` with the
    /// current value if there is one.
    pub fn listen_and_repeat(
        &self,
        listener: impl Fn(&T) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        let listener: Rc<dyn Fn(&T)> = Rc::new(listener);
        let forward = Rc::clone(&listener);
        let subscription = self.listen(move |value| forward(value), token)?;
        if let Some(current) = self.value() {
            listener(&current);
        }
        Ok(subscription)
    }

    /// Call `listener` on the next update only.
    pub fn listen_once(
        &self,
        listener: impl Fn(&T) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        self.inner.emitter.subscribe_once(listener, token)
    }

    /// Future resolving with the next updated value.
    pub fn next_update(&self) -> NextValue<T> {
        self.inner.emitter.next_value()
    }

    /// Remove every listener.
    pub fn cancel_all(&self) {
        self.inner.emitter.cancel_all();
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.emitter.subscription_count()
    }

    /// Whether both handles point at the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Type-erased "something changed" source, used for dependency lists whose
/// members carry different value types.
pub trait ChangeSignal {
    /// Call `callback` whenever the underlying source changes.
    fn on_change(
        &self,
        callback: Rc<dyn Fn()>,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription>;
}

impl<T: Clone + 'static> ChangeSignal for DataSource<T> {
    fn on_change(
        &self,
        callback: Rc<dyn Fn()>,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        self.listen(move |_| callback(), token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::future::Future;
    use std::pin::pin;
    use std::task::{Context, Poll, Waker};

    #[test]
    fn update_stores_then_notifies() {
        let source = DataSource::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let reader = source.clone();
        source
            .listen(
                move |v: &i32| s.borrow_mut().push((*v, reader.value())),
                None,
            )
            .unwrap();
        source.update(2);
        assert_eq!(*seen.borrow(), vec![(2, Some(2))]);
        assert_eq!(source.value(), Some(2));
    }

    #[test]
    fn empty_source_has_no_value() {
        let source = DataSource::<String>::empty();
        assert!(!source.has_value());
        assert_eq!(source.with(|v| v.cloned()), None);
        source.update("x".into());
        assert_eq!(source.with(|v| v.map(String::len)), Some(1));
    }

    #[test]
    fn listen_and_repeat_replays_current_value() {
        let source = DataSource::new(7);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        source
            .listen_and_repeat(move |v: &i32| s.borrow_mut().push(*v), None)
            .unwrap();
        source.update(8);
        assert_eq!(*seen.borrow(), vec![7, 8]);
    }

    #[test]
    fn listen_and_repeat_on_empty_waits() {
        let source = DataSource::<i32>::empty();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        source
            .listen_and_repeat(move |_| c.set(c.get() + 1), None)
            .unwrap();
        assert_eq!(count.get(), 0);
        source.update(1);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn token_ends_listening() {
        let source = DataSource::new(0);
        let token = CancellationToken::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        source
            .listen(move |_| c.set(c.get() + 1), Some(&token))
            .unwrap();
        source.update(1);
        token.cancel();
        source.update(2);
        assert_eq!(count.get(), 1);
        assert_eq!(source.listener_count(), 0);
        assert!(source.listen(|_| {}, Some(&token)).is_err());
    }

    #[test]
    fn listen_once_fires_once() {
        let source = DataSource::new(0);
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        source.listen_once(move |_| c.set(c.get() + 1), None).unwrap();
        source.update(1);
        source.update(2);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn recursive_update_is_allowed() {
        let source = DataSource::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let again = source.clone();
        source
            .listen(
                move |v: &i32| {
                    s.borrow_mut().push(*v);
                    if *v < 3 {
                        again.update(v + 1);
                    }
                },
                None,
            )
            .unwrap();
        source.update(1);
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert_eq!(source.value(), Some(3));
    }

    #[test]
    fn next_update_resolves() {
        let source = DataSource::new(0);
        let mut future = pin!(source.next_update());
        let mut cx = Context::from_waker(Waker::noop());
        assert!(future.as_mut().poll(&mut cx).is_pending());
        source.update(5);
        assert_eq!(future.as_mut().poll(&mut cx), Poll::Ready(5));
    }

    #[test]
    fn change_signal_erases_type() {
        let a = DataSource::new(1u8);
        let b = DataSource::new("x".to_string());
        let count = Rc::new(Cell::new(0));
        let signals: Vec<&dyn ChangeSignal> = vec![&a, &b];
        for signal in signals {
            let c = Rc::clone(&count);
            signal.on_change(Rc::new(move || c.set(c.get() + 1)), None).unwrap();
        }
        a.update(2);
        b.update("y".into());
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn cancel_all_removes_listeners() {
        let source = DataSource::new(0);
        source.listen(|_| {}, None).unwrap();
        source.listen_once(|_| {}, None).unwrap();
        assert_eq!(source.listener_count(), 2);
        source.cancel_all();
        assert_eq!(source.listener_count(), 0);
    }
}
