#![forbid(unsafe_code)]

//! Reactive ordered collections.
//!
//! [`ArrayDataSource<T>`] is a mutable `Vec<T>` that announces every structural
//! edit as a [`CollectionChange`]. Derived views ([`FilteredArrayView`],
//! [`MappedArrayView`], [`SortedArrayView`]) keep their own backing `Vec` and
//! translate each parent change into the equivalent edit on themselves, so no
//! view is ever rebuilt from scratch on a parent mutation.
//!
//! # Invariants
//!
//! 1. Each mutator emits exactly one change record (`merge` emits a short
//!    sequence; no-op mutations emit nothing).
//! 2. A change is applied to the backing `Vec` before it is announced, and
//!    `new_state` equals the contents after the edit.
//! 3. After every parent change, a view equals `transform(parent)`.
//! 4. Every dependent view has received a change before the mutator returns.

mod change;
mod filtered;
mod mapped;
mod sorted;

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use arbor_core::{ArborError, CancellationToken, EventEmitter, Result, Subscription};

use crate::source::{ChangeSignal, DataSource};

pub use change::{CollectionChange, Operation, merge_plan};
pub use filtered::FilteredArrayView;
pub use mapped::MappedArrayView;
pub use sorted::SortedArrayView;

// ─── Shared backing state ────────────────────────────────────────────────────

/// Backing `Vec`, change emitter, and lazily created length cell shared by the
/// source collection and every view.
pub(crate) struct ArrayState<T> {
    items: RefCell<Vec<T>>,
    changes: EventEmitter<CollectionChange<T>>,
    length: RefCell<Option<DataSource<usize>>>,
}

impl<T: Clone + 'static> ArrayState<T> {
    pub(crate) fn new(items: Vec<T>) -> Self {
        Self {
            items: RefCell::new(items),
            changes: EventEmitter::new(),
            length: RefCell::new(None),
        }
    }

    /// Apply `change`, stamp `new_state`, then announce it.
    pub(crate) fn commit(&self, mut change: CollectionChange<T>) -> Result<()> {
        let len = {
            let mut items = self.items.borrow_mut();
            change.apply(&mut items)?;
            change.new_state = items.clone();
            items.len()
        };
        self.changes.fire(&change);
        let length = self.length.borrow().clone();
        if let Some(length) = length {
            length.update(len);
        }
        Ok(())
    }

    /// Commit the minimal edit sequence turning the current contents into `new`.
    pub(crate) fn merge(&self, new: &[T]) -> Result<()>
    where
        T: PartialEq,
    {
        let plan = merge_plan(&self.items.borrow(), new);
        for change in plan {
            self.commit(change)?;
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<T> {
        self.items.borrow().get(index).cloned()
    }

    pub(crate) fn to_vec(&self) -> Vec<T> {
        self.items.borrow().clone()
    }

    pub(crate) fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.items.borrow())
    }

    pub(crate) fn changes(&self) -> EventEmitter<CollectionChange<T>> {
        self.changes.clone()
    }

    pub(crate) fn length(&self) -> DataSource<usize> {
        let mut slot = self.length.borrow_mut();
        slot.get_or_insert_with(|| DataSource::new(self.items.borrow().len()))
            .clone()
    }
}

// ─── Read surface ────────────────────────────────────────────────────────────

/// Read surface shared by [`ArrayDataSource`] and its derived views.
pub trait ReadableArray<T: Clone + 'static> {
    /// Snapshot of the current contents.
    fn to_vec(&self) -> Vec<T>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<T>;

    /// Emitter announcing every structural edit.
    fn changes(&self) -> EventEmitter<CollectionChange<T>>;

    /// Scalar cell tracking the length, updated after every change.
    fn length(&self) -> DataSource<usize>;

    /// Call `listener` for every future change.
    fn listen(
        &self,
        listener: impl Fn(&CollectionChange<T>) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription>
    where
        Self: Sized,
    {
        self.changes().subscribe(listener, token)
    }

    /// Like [`listen`](Self::listen), but first replay the current contents as
    /// a single `Append` (skipped when empty).
    fn listen_and_repeat(
        &self,
        listener: impl Fn(&CollectionChange<T>) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription>
    where
        Self: Sized,
    {
        let listener: Rc<dyn Fn(&CollectionChange<T>)> = Rc::new(listener);
        let forward = Rc::clone(&listener);
        let subscription = self.changes().subscribe(move |c| forward(c), token)?;
        if let Some(replay) = replay_change(self) {
            listener(&replay);
        }
        Ok(subscription)
    }

    /// View holding the items accepted by `predicate`; refilters whenever a
    /// dependency in `deps` changes.
    fn filter(
        &self,
        predicate: impl Fn(&T) -> bool + 'static,
        deps: &[&dyn ChangeSignal],
        token: Option<&CancellationToken>,
    ) -> Result<FilteredArrayView<T>>
    where
        Self: Sized,
        T: PartialEq,
    {
        FilteredArrayView::new(self, predicate, deps, token)
    }

    /// View holding `f(item)` for every item, position for position.
    fn map<U: Clone + 'static>(
        &self,
        f: impl Fn(&T) -> U + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<MappedArrayView<T, U>>
    where
        Self: Sized,
    {
        MappedArrayView::new(self, f, token)
    }

    /// View holding the items ordered by `comparator` (stable for ties).
    fn sort(
        &self,
        comparator: impl Fn(&T, &T) -> Ordering + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<SortedArrayView<T>>
    where
        Self: Sized,
        T: PartialEq,
    {
        SortedArrayView::new(self, comparator, token)
    }
}

/// Current contents of `array` as one `Append`, or `None` when empty.
pub fn replay_change<T: Clone + 'static>(
    array: &(impl ReadableArray<T> + ?Sized),
) -> Option<CollectionChange<T>> {
    let current = array.to_vec();
    if current.is_empty() {
        return None;
    }
    let mut change = CollectionChange::append(0, current.clone());
    change.new_state = current;
    Some(change)
}

// ─── ArrayDataSource ─────────────────────────────────────────────────────────

/// Reactive ordered collection.
///
/// Cloning creates a new handle to the **same** collection.
pub struct ArrayDataSource<T> {
    state: Rc<ArrayState<T>>,
}

impl<T> Clone for ArrayDataSource<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ArrayDataSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayDataSource")
            .field("items", &self.state.items.borrow())
            .finish()
    }
}

impl<T: Clone + 'static> Default for ArrayDataSource<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: Clone + 'static> From<Vec<T>> for ArrayDataSource<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T: Clone + 'static> ArrayDataSource<T> {
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Self {
            state: Rc::new(ArrayState::new(items)),
        }
    }

    /// Borrow the contents without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        self.state.with_items(f)
    }

    fn check_index(&self, index: usize) -> Result<usize> {
        let len = self.state.len();
        if index < len {
            Ok(len)
        } else {
            Err(ArborError::out_of_bounds(index, len))
        }
    }

    // ── Growing ──────────────────────────────────────────────────────

    pub fn push(&self, item: T) -> Result<()> {
        self.append(vec![item])
    }

    /// Add `items` at the end as one change.
    pub fn append(&self, items: Vec<T>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.state
            .commit(CollectionChange::append(self.state.len(), items))
    }

    pub fn unshift(&self, item: T) -> Result<()> {
        self.prepend(vec![item])
    }

    /// Add `items` at the front as one change.
    pub fn prepend(&self, items: Vec<T>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.state.commit(CollectionChange::prepend(items))
    }

    /// Insert `item` before position `index` (`index == len` appends).
    pub fn insert_at(&self, index: usize, item: T) -> Result<()> {
        let len = self.state.len();
        if index > len {
            return Err(ArborError::out_of_bounds(index, len));
        }
        self.state.commit(CollectionChange::insert(index, vec![item]))
    }

    // ── Shrinking ────────────────────────────────────────────────────

    /// Remove and return the last item.
    pub fn pop(&self) -> Result<Option<T>> {
        Ok(self.remove_right(1)?.pop())
    }

    /// Remove and return the first item.
    pub fn shift(&self) -> Result<Option<T>> {
        Ok(self.remove_left(1)?.pop())
    }

    /// Remove the first item equal to `item`. Returns whether one was found.
    pub fn remove(&self, item: &T) -> Result<bool>
    where
        T: PartialEq,
    {
        match self.index_of(item) {
            Some(index) => self.remove_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        let mut removed = self.remove_range(index, 1)?;
        removed
            .pop()
            .ok_or_else(|| ArborError::out_of_bounds(index, self.state.len()))
    }

    /// Remove `count` items starting at `start`.
    pub fn remove_range(&self, start: usize, count: usize) -> Result<Vec<T>> {
        let len = self.state.len();
        let end = start.saturating_add(count);
        if end > len {
            return Err(ArborError::out_of_bounds(end - 1, len));
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let removed = self.state.with_items(|items| items[start..end].to_vec());
        self.state
            .commit(CollectionChange::remove(start, removed.clone()))?;
        Ok(removed)
    }

    /// Remove up to `count` items from the front.
    pub fn remove_left(&self, count: usize) -> Result<Vec<T>> {
        let count = count.min(self.state.len());
        if count == 0 {
            return Ok(Vec::new());
        }
        let removed = self.state.with_items(|items| items[..count].to_vec());
        self.state
            .commit(CollectionChange::remove_left(removed.clone()))?;
        Ok(removed)
    }

    /// Remove up to `count` items from the back.
    pub fn remove_right(&self, count: usize) -> Result<Vec<T>> {
        let len = self.state.len();
        let count = count.min(len);
        if count == 0 {
            return Ok(Vec::new());
        }
        let removed = self.state.with_items(|items| items[len - count..].to_vec());
        self.state
            .commit(CollectionChange::remove_right(len - count, removed.clone()))?;
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        if self.state.len() == 0 {
            return Ok(());
        }
        let removed = self.state.to_vec();
        self.state.commit(CollectionChange::clear(removed))
    }

    // ── Rearranging ──────────────────────────────────────────────────

    /// Replace the item at `index`, returning the old one.
    pub fn set(&self, index: usize, item: T) -> Result<T> {
        self.check_index(index)?;
        let old = self
            .state
            .get(index)
            .ok_or_else(|| ArborError::out_of_bounds(index, self.state.len()))?;
        self.state
            .commit(CollectionChange::replace(index, old.clone(), item))?;
        Ok(old)
    }

    /// Swap two positions. Swapping a position with itself emits nothing.
    pub fn swap(&self, a: usize, b: usize) -> Result<()> {
        self.check_index(a)?;
        self.check_index(b)?;
        if a == b {
            return Ok(());
        }
        let (first, second) = (a.min(b), a.max(b));
        let (at_first, at_second) = self.state.with_items(|items| {
            (items[second].clone(), items[first].clone())
        });
        self.state
            .commit(CollectionChange::swap(first, second, at_first, at_second))
    }

    /// Swap the first occurrences of two items. Returns `false` if either is
    /// missing.
    pub fn swap_items(&self, a: &T, b: &T) -> Result<bool>
    where
        T: PartialEq,
    {
        match (self.index_of(a), self.index_of(b)) {
            (Some(i), Some(j)) => self.swap(i, j).map(|()| true),
            _ => Ok(false),
        }
    }

    /// Bring the contents to `new` with the minimal edit sequence.
    pub fn merge(&self, new: Vec<T>) -> Result<()>
    where
        T: PartialEq,
    {
        self.state.merge(&new)
    }

    // ── Queries ──────────────────────────────────────────────────────

    #[must_use]
    pub fn index_of(&self, item: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.state.with_items(|items| items.iter().position(|x| x == item))
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.index_of(item).is_some()
    }
}

impl<T: Clone + 'static> ReadableArray<T> for ArrayDataSource<T> {
    fn to_vec(&self) -> Vec<T> {
        self.state.to_vec()
    }

    fn len(&self) -> usize {
        self.state.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.state.get(index)
    }

    fn changes(&self) -> EventEmitter<CollectionChange<T>> {
        self.state.changes()
    }

    fn length(&self) -> DataSource<usize> {
        self.state.length()
    }
}
