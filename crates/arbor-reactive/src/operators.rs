#![forbid(unsafe_code)]

//! Derived-source operators for [`DataSource`].
//!
//! Every operator returns a new, independent `DataSource` wired to its
//! parent(s) by a subscription registered under the supplied token. The
//! parent is never mutated. Where the parent already holds a value, the
//! derived source starts with the transformed value.
//!
//! Time-based operators (`debounce`, `buffer`, `delay`, `throttle`) schedule
//! on a host [`TimerQueue`]. Their pending timers are registered under the same
//! token, so cancelling it also drops any emission still in flight.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arbor_core::{CancellationToken, Result, TimerHandle, TimerQueue};
use web_time::Duration;

use crate::source::DataSource;

impl<T: Clone + 'static> DataSource<T> {
    // ── Pure transforms ──────────────────────────────────────────────

    /// Derived source holding `f(value)`.
    pub fn map<U: Clone + 'static>(
        &self,
        f: impl Fn(&T) -> U + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<U>> {
        let derived = DataSource::from_option(self.with(|v| v.map(&f)));
        let target = derived.clone();
        self.listen(move |v| target.update(f(v)), token)?;
        Ok(derived)
    }

    /// Derived source that only receives values accepted by `predicate`.
    pub fn filter(
        &self,
        predicate: impl Fn(&T) -> bool + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<T>> {
        let initial = self.value().filter(|v| predicate(v));
        let derived = DataSource::from_option(initial);
        let target = derived.clone();
        self.listen(
            move |v| {
                if predicate(v) {
                    target.update(v.clone());
                }
            },
            token,
        )?;
        Ok(derived)
    }

    /// Derived source that skips values equal to the one it last emitted.
    pub fn unique(&self, token: Option<&CancellationToken>) -> Result<DataSource<T>>
    where
        T: PartialEq,
    {
        let derived = DataSource::from_option(self.value());
        let target = derived.clone();
        self.listen(
            move |v| {
                if !target.with(|current| current == Some(v)) {
                    target.update(v.clone());
                }
            },
            token,
        )?;
        Ok(derived)
    }

    /// Projection of one field that only fires when the projected value changes.
    pub fn pick<U: Clone + PartialEq + 'static>(
        &self,
        field: impl Fn(&T) -> U + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<U>> {
        let derived = DataSource::from_option(self.with(|v| v.map(&field)));
        let target = derived.clone();
        self.listen(
            move |v| {
                let next = field(v);
                if !target.with(|current| current == Some(&next)) {
                    target.update(next);
                }
            },
            token,
        )?;
        Ok(derived)
    }

    /// Running fold over every value; starts at `seed` folded with the
    /// current value, if any.
    pub fn reduce<A: Clone + 'static>(
        &self,
        f: impl Fn(&A, &T) -> A + 'static,
        seed: A,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<A>> {
        let initial = self.with(|v| match v {
            Some(v) => f(&seed, v),
            None => seed.clone(),
        });
        let derived = DataSource::new(initial);
        let target = derived.clone();
        self.listen(
            move |v| {
                let next = target.with(|acc| acc.map(|acc| f(acc, v)));
                if let Some(next) = next {
                    target.update(next);
                }
            },
            token,
        )?;
        Ok(derived)
    }

    /// Pairs of `(previous, next)` values.
    pub fn diff(&self, token: Option<&CancellationToken>) -> Result<DataSource<(Option<T>, T)>> {
        let previous = Rc::new(RefCell::new(self.value()));
        let derived = DataSource::empty();
        let target = derived.clone();
        self.listen(
            move |v| {
                let old = previous.replace(Some(v.clone()));
                target.update((old, v.clone()));
            },
            token,
        )?;
        Ok(derived)
    }

    // ── Combinators ──────────────────────────────────────────────────

    /// `f(a, b)` over the latest value of both sources, once both have one.
    pub fn aggregate2<U, R>(
        &self,
        other: &DataSource<U>,
        f: impl Fn(&T, &U) -> R + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<R>>
    where
        U: Clone + 'static,
        R: Clone + 'static,
    {
        let (a, b) = (self.clone(), other.clone());
        let compute = Rc::new(move || a.with(|a| b.with(|b| Some(f(a?, b?)))));
        let derived = DataSource::from_option(compute());
        recompute_on(self, &derived, &compute, token)?;
        recompute_on(other, &derived, &compute, token)?;
        Ok(derived)
    }

    /// `f(a, b, c)` over the latest value of all three sources.
    pub fn aggregate3<U, V, R>(
        &self,
        second: &DataSource<U>,
        third: &DataSource<V>,
        f: impl Fn(&T, &U, &V) -> R + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<R>>
    where
        U: Clone + 'static,
        V: Clone + 'static,
        R: Clone + 'static,
    {
        let (a, b, c) = (self.clone(), second.clone(), third.clone());
        let compute =
            Rc::new(move || a.with(|a| b.with(|b| c.with(|c| Some(f(a?, b?, c?))))));
        let derived = DataSource::from_option(compute());
        recompute_on(self, &derived, &compute, token)?;
        recompute_on(second, &derived, &compute, token)?;
        recompute_on(third, &derived, &compute, token)?;
        Ok(derived)
    }

    /// Latest values of every source, in order, once all have one.
    pub fn aggregate_all(
        sources: &[DataSource<T>],
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<Vec<T>>> {
        let all: Vec<DataSource<T>> = sources.to_vec();
        let compute = Rc::new(move || all.iter().map(DataSource::value).collect::<Option<Vec<T>>>());
        let derived = DataSource::from_option(compute());
        for source in sources {
            recompute_on(source, &derived, &compute, token)?;
        }
        Ok(derived)
    }

    /// Whichever source updated most recently.
    pub fn combine(
        sources: &[DataSource<T>],
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<T>> {
        let initial = sources.iter().rev().find_map(DataSource::value);
        let derived = DataSource::from_option(initial);
        for source in sources {
            let target = derived.clone();
            source.listen(move |v| target.update(v.clone()), token)?;
        }
        Ok(derived)
    }

    // ── Time-based ───────────────────────────────────────────────────

    /// Emit the latest value once `delay` passes without a newer one.
    pub fn debounce(
        &self,
        delay: Duration,
        timers: &TimerQueue,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<T>> {
        let derived = DataSource::from_option(self.value());
        let target = derived.clone();
        let timers = timers.clone();
        let owned_token = token.cloned();
        let pending: Rc<RefCell<Option<TimerHandle>>> = Rc::new(RefCell::new(None));
        self.listen(
            move |v| {
                if let Some(previous) = pending.borrow_mut().take() {
                    previous.clear();
                }
                let target = target.clone();
                let value = v.clone();
                let scheduled =
                    timers.set_timeout(delay, move || target.update(value), owned_token.as_ref());
                store_pending(&pending, scheduled);
            },
            token,
        )?;
        Ok(derived)
    }

    /// Collect values into batches emitted `window` after each batch opens.
    pub fn buffer(
        &self,
        window: Duration,
        timers: &TimerQueue,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<Vec<T>>> {
        let derived = DataSource::empty();
        let target = derived.clone();
        let timers = timers.clone();
        let owned_token = token.cloned();
        let batch: Rc<RefCell<Vec<T>>> = Rc::new(RefCell::new(Vec::new()));
        let pending: Rc<RefCell<Option<TimerHandle>>> = Rc::new(RefCell::new(None));
        self.listen(
            move |v| {
                let opens_batch = {
                    let mut batch = batch.borrow_mut();
                    batch.push(v.clone());
                    batch.len() == 1
                };
                if !opens_batch {
                    return;
                }
                let target = target.clone();
                let flush_batch = Rc::clone(&batch);
                let flush_pending = Rc::clone(&pending);
                let scheduled = timers.set_timeout(
                    window,
                    move || {
                        flush_pending.borrow_mut().take();
                        let items = std::mem::take(&mut *flush_batch.borrow_mut());
                        target.update(items);
                    },
                    owned_token.as_ref(),
                );
                store_pending(&pending, scheduled);
            },
            token,
        )?;
        Ok(derived)
    }

    /// Re-emit every value `delay` later.
    pub fn delay(
        &self,
        delay: Duration,
        timers: &TimerQueue,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<T>> {
        let derived = DataSource::from_option(self.value());
        let target = derived.clone();
        let timers = timers.clone();
        let owned_token = token.cloned();
        self.listen(
            move |v| {
                let target = target.clone();
                let value = v.clone();
                if let Err(err) =
                    timers.set_timeout(delay, move || target.update(value), owned_token.as_ref())
                {
                    tracing::debug!(%err, "delayed value dropped");
                }
            },
            token,
        )?;
        Ok(derived)
    }

    /// Emit the first value of every `window`; later values in the same
    /// window are dropped.
    pub fn throttle(
        &self,
        window: Duration,
        timers: &TimerQueue,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<T>> {
        let derived = DataSource::from_option(self.value());
        let target = derived.clone();
        let timers = timers.clone();
        let owned_token = token.cloned();
        let open = Rc::new(Cell::new(true));
        self.listen(
            move |v| {
                if !open.get() {
                    return;
                }
                open.set(false);
                target.update(v.clone());
                let reopen = Rc::clone(&open);
                if let Err(err) =
                    timers.set_timeout(window, move || reopen.set(true), owned_token.as_ref())
                {
                    tracing::debug!(%err, "throttle window not scheduled");
                }
            },
            token,
        )?;
        Ok(derived)
    }
}

fn recompute_on<S, R>(
    source: &DataSource<S>,
    derived: &DataSource<R>,
    compute: &Rc<impl Fn() -> Option<R> + 'static>,
    token: Option<&CancellationToken>,
) -> Result<()>
where
    S: Clone + 'static,
    R: Clone + 'static,
{
    let target = derived.clone();
    let compute = Rc::clone(compute);
    source.listen(
        move |_| {
            if let Some(value) = compute() {
                target.update(value);
            }
        },
        token,
    )?;
    Ok(())
}

fn store_pending(slot: &RefCell<Option<TimerHandle>>, scheduled: Result<TimerHandle>) {
    match scheduled {
        Ok(handle) => *slot.borrow_mut() = Some(handle),
        Err(err) => tracing::debug!(%err, "timer not scheduled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record<T: Clone + 'static>(source: &DataSource<T>) -> Rc<RefCell<Vec<T>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        source
            .listen(move |v: &T| s.borrow_mut().push(v.clone()), None)
            .unwrap();
        seen
    }

    #[test]
    fn map_starts_from_parent_and_follows() {
        let source = DataSource::new(2);
        let doubled = source.map(|v| v * 2, None).unwrap();
        assert_eq!(doubled.value(), Some(4));
        source.update(5);
        assert_eq!(doubled.value(), Some(10));
    }

    #[test]
    fn map_chain_survives_dropped_intermediate() {
        let source = DataSource::new(1);
        let tail = source
            .map(|v| v + 1, None)
            .unwrap()
            .map(|v| v * 10, None)
            .unwrap();
        source.update(4);
        assert_eq!(tail.value(), Some(50));
    }

    #[test]
    fn filter_drops_rejected_values() {
        let source = DataSource::new(1);
        let even = source.filter(|v| v % 2 == 0, None).unwrap();
        assert_eq!(even.value(), None);
        let seen = record(&even);
        for v in 2..=6 {
            source.update(v);
        }
        assert_eq!(*seen.borrow(), vec![2, 4, 6]);
    }

    #[test]
    fn unique_never_fires_for_repeat() {
        let source = DataSource::new(1);
        let unique = source.unique(None).unwrap();
        let seen = record(&unique);
        for v in [1, 1, 2, 2, 2, 1, 3, 3] {
            source.update(v);
        }
        assert_eq!(*seen.borrow(), vec![2, 1, 3]);
    }

    #[test]
    fn pick_fires_only_on_field_change() {
        #[derive(Clone)]
        struct User {
            name: &'static str,
            age: u32,
        }
        let source = DataSource::new(User { name: "ana", age: 30 });
        let name = source.pick(|u| u.name, None).unwrap();
        let seen = record(&name);
        source.update(User { name: "ana", age: 31 });
        source.update(User { name: "bo", age: 31 });
        assert_eq!(*seen.borrow(), vec!["bo"]);
        assert_eq!(source.value().map(|u| u.age), Some(31));
    }

    #[test]
    fn reduce_folds_values() {
        let source = DataSource::<i32>::empty();
        let sum = source.reduce(|acc, v| acc + v, 0, None).unwrap();
        assert_eq!(sum.value(), Some(0));
        for v in [1, 2, 3] {
            source.update(v);
        }
        assert_eq!(sum.value(), Some(6));
    }

    #[test]
    fn diff_pairs_previous_and_next() {
        let source = DataSource::new("a");
        let pairs = source.diff(None).unwrap();
        source.update("b");
        assert_eq!(pairs.value(), Some((Some("a"), "b")));
        source.update("c");
        assert_eq!(pairs.value(), Some((Some("b"), "c")));
    }

    #[test]
    fn aggregate2_waits_for_both() {
        let a = DataSource::new(2);
        let b = DataSource::<i32>::empty();
        let product = a.aggregate2(&b, |a, b| a * b, None).unwrap();
        assert_eq!(product.value(), None);
        b.update(3);
        assert_eq!(product.value(), Some(6));
        a.update(4);
        assert_eq!(product.value(), Some(12));
    }

    #[test]
    fn aggregate3_combines_three() {
        let a = DataSource::new(1);
        let b = DataSource::new("x".to_string());
        let c = DataSource::new(true);
        let joined = a
            .aggregate3(&b, &c, |a, b, c| format!("{a}{b}{c}"), None)
            .unwrap();
        assert_eq!(joined.value().as_deref(), Some("1xtrue"));
        c.update(false);
        assert_eq!(joined.value().as_deref(), Some("1xfalse"));
    }

    #[test]
    fn aggregate_all_and_combine() {
        let sources = vec![DataSource::new(1), DataSource::new(2), DataSource::new(3)];
        let all = DataSource::aggregate_all(&sources, None).unwrap();
        let latest = DataSource::combine(&sources, None).unwrap();
        assert_eq!(all.value(), Some(vec![1, 2, 3]));
        sources[1].update(20);
        assert_eq!(all.value(), Some(vec![1, 20, 3]));
        assert_eq!(latest.value(), Some(20));
        sources[0].update(10);
        assert_eq!(latest.value(), Some(10));
    }

    #[test]
    fn operators_stop_when_token_cancels() {
        let source = DataSource::new(1);
        let token = CancellationToken::new();
        let mapped = source.map(|v| v + 1, Some(&token)).unwrap();
        token.cancel();
        source.update(10);
        assert_eq!(mapped.value(), Some(2));
        assert_eq!(source.listener_count(), 0);
        assert!(source.map(|v| v + 1, Some(&token)).is_err());
    }

    #[test]
    fn debounce_emits_latest_after_quiet_period() {
        let timers = TimerQueue::lab();
        let source = DataSource::new(0);
        let debounced = source.debounce(Duration::from_millis(50), &timers, None).unwrap();
        let seen = record(&debounced);
        source.update(1);
        timers.advance(Duration::from_millis(30));
        source.update(2);
        timers.advance(Duration::from_millis(30));
        assert!(seen.borrow().is_empty());
        timers.advance(Duration::from_millis(30));
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn debounce_pending_timer_cancelled_with_token() {
        let timers = TimerQueue::lab();
        let token = CancellationToken::new();
        let source = DataSource::new(0);
        let debounced = source
            .debounce(Duration::from_millis(10), &timers, Some(&token))
            .unwrap();
        source.update(1);
        assert_eq!(timers.pending(), 1);
        token.cancel();
        assert_eq!(timers.pending(), 0);
        timers.advance(Duration::from_millis(20));
        assert_eq!(debounced.value(), Some(0));
    }

    #[test]
    fn buffer_batches_within_window() {
        let timers = TimerQueue::lab();
        let source = DataSource::new(0);
        let batches = source.buffer(Duration::from_millis(10), &timers, None).unwrap();
        source.update(1);
        source.update(2);
        timers.advance(Duration::from_millis(10));
        source.update(3);
        timers.advance(Duration::from_millis(10));
        assert_eq!(batches.value(), Some(vec![3]));
        let seen = record(&batches);
        source.update(4);
        source.update(5);
        timers.advance(Duration::from_millis(10));
        assert_eq!(*seen.borrow(), vec![vec![4, 5]]);
    }

    #[test]
    fn delay_shifts_every_value() {
        let timers = TimerQueue::lab();
        let source = DataSource::new(0);
        let delayed = source.delay(Duration::from_millis(5), &timers, None).unwrap();
        let seen = record(&delayed);
        source.update(1);
        source.update(2);
        assert!(seen.borrow().is_empty());
        timers.advance(Duration::from_millis(5));
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn throttle_keeps_leading_value_per_window() {
        let timers = TimerQueue::lab();
        let source = DataSource::new(0);
        let throttled = source.throttle(Duration::from_millis(10), &timers, None).unwrap();
        let seen = record(&throttled);
        source.update(1);
        source.update(2);
        timers.advance(Duration::from_millis(10));
        source.update(3);
        assert_eq!(*seen.borrow(), vec![1, 3]);
    }
}
