#![forbid(unsafe_code)]

//! Sorted view of a reactive collection.
//!
//! Each view item remembers its position in the parent. Items are ordered by
//! the comparator, then by that position, so ties keep the parent's order and
//! the view always equals a stable sort of the parent.
//!
//! # Invariants
//!
//! 1. `origins` is parallel to the view items: `origins[k]` is the parent
//!    index of view item `k`.
//! 2. The sequence of `(item, origin)` keys is strictly increasing.
//! 3. A parent swap of two items that are not tied produces no edits.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use arbor_core::{ArborError, CancellationToken, EventEmitter, Result};

use super::{ArrayState, CollectionChange, Operation, ReadableArray};
use crate::source::DataSource;

type Comparator<T> = Rc<dyn Fn(&T, &T) -> Ordering>;

struct SortInner<T> {
    state: ArrayState<T>,
    origins: RefCell<Vec<usize>>,
    comparator: RefCell<Comparator<T>>,
}

/// Incrementally maintained stable sort of a parent collection.
///
/// Cloning creates a new handle to the **same** view.
pub struct SortedArrayView<T> {
    inner: Rc<SortInner<T>>,
}

impl<T> Clone for SortedArrayView<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SortedArrayView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedArrayView")
            .field("items", &self.inner.state.items.borrow())
            .finish()
    }
}

/// Parent indices of `items` in stable sorted order.
fn sorted_order<T>(items: &[T], cmp: &dyn Fn(&T, &T) -> Ordering) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| cmp(&items[a], &items[b]));
    order
}

impl<T: Clone + PartialEq + 'static> SortedArrayView<T> {
    pub(crate) fn new(
        parent: &dyn ReadableArray<T>,
        comparator: impl Fn(&T, &T) -> Ordering + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Self> {
        if let Some(token) = token {
            token.check()?;
        }
        let source = parent.to_vec();
        let origins = sorted_order(&source, &comparator);
        let initial = origins.iter().map(|&i| source[i].clone()).collect();
        let inner = Rc::new(SortInner {
            state: ArrayState::new(initial),
            origins: RefCell::new(origins),
            comparator: RefCell::new(Rc::new(comparator)),
        });
        let on_change = Rc::clone(&inner);
        parent.changes().subscribe(
            move |change| {
                if let Err(err) = on_change.on_parent_change(change) {
                    tracing::warn!(%err, "sorted view dropped a parent change");
                }
            },
            token,
        )?;
        Ok(Self { inner })
    }

    /// Swap in a new ordering and re-sort through a merge.
    pub fn update_comparator(
        &self,
        comparator: impl Fn(&T, &T) -> Ordering + 'static,
    ) -> Result<()> {
        let comparator: Comparator<T> = Rc::new(comparator);
        *self.inner.comparator.borrow_mut() = Rc::clone(&comparator);
        let current = self.inner.state.to_vec();
        let origins = self.inner.origins.borrow().clone();
        let mut order: Vec<usize> = (0..current.len()).collect();
        order.sort_by(|&a, &b| {
            comparator(&current[a], &current[b]).then(origins[a].cmp(&origins[b]))
        });
        let resorted: Vec<T> = order.iter().map(|&k| current[k].clone()).collect();
        *self.inner.origins.borrow_mut() = order.iter().map(|&k| origins[k]).collect();
        self.inner.state.merge(&resorted)
    }
}

impl<T: Clone + PartialEq + 'static> SortInner<T> {
    fn comparator(&self) -> Comparator<T> {
        Rc::clone(&*self.comparator.borrow())
    }

    fn key_cmp(&self, a: &T, a_origin: usize, b: &T, b_origin: usize) -> Ordering {
        (self.comparator())(a, b).then(a_origin.cmp(&b_origin))
    }

    /// View index of the item that sits at parent index `origin`.
    fn locate(&self, origin: usize) -> Result<usize> {
        let origins = self.origins.borrow();
        origins
            .iter()
            .position(|&o| o == origin)
            .ok_or_else(|| ArborError::out_of_bounds(origin, origins.len()))
    }

    fn insert_entry(&self, item: T, origin: usize) -> Result<()> {
        let at = {
            let origins = self.origins.borrow();
            self.state.with_items(|items| {
                let (mut lo, mut hi) = (0, items.len());
                while lo < hi {
                    let mid = lo + (hi - lo) / 2;
                    if self.key_cmp(&items[mid], origins[mid], &item, origin) == Ordering::Less {
                        lo = mid + 1;
                    } else {
                        hi = mid;
                    }
                }
                lo
            })
        };
        self.origins.borrow_mut().insert(at, origin);
        self.state.commit(CollectionChange::insert(at, vec![item]))
    }

    fn remove_entry(&self, at: usize) -> Result<()> {
        let Some(item) = self.state.get(at) else {
            return Err(ArborError::out_of_bounds(at, self.state.len()));
        };
        self.origins.borrow_mut().remove(at);
        self.state.commit(CollectionChange::remove(at, vec![item]))
    }

    fn insert_range(&self, start: usize, items: &[T]) -> Result<()> {
        for origin in self.origins.borrow_mut().iter_mut() {
            if *origin >= start {
                *origin += items.len();
            }
        }
        for (offset, item) in items.iter().enumerate() {
            self.insert_entry(item.clone(), start + offset)?;
        }
        Ok(())
    }

    fn remove_range(&self, start: usize, count: usize) -> Result<()> {
        for origin in start..start + count {
            let at = self.locate(origin)?;
            self.remove_entry(at)?;
        }
        for origin in self.origins.borrow_mut().iter_mut() {
            if *origin >= start + count {
                *origin -= count;
            }
        }
        Ok(())
    }

    fn is_ordered_at(&self, k: usize) -> bool {
        let origins = self.origins.borrow();
        self.state.with_items(|items| {
            let before = k == 0
                || self.key_cmp(&items[k - 1], origins[k - 1], &items[k], origins[k])
                    == Ordering::Less;
            let after = k + 1 >= items.len()
                || self.key_cmp(&items[k], origins[k], &items[k + 1], origins[k + 1])
                    == Ordering::Less;
            before && after
        })
    }

    fn swap_origins(&self, a: usize, b: usize) -> Result<()> {
        let (ka, kb) = (self.locate(a)?, self.locate(b)?);
        if self.state.get(ka) == self.state.get(kb) {
            return Ok(());
        }
        {
            let mut origins = self.origins.borrow_mut();
            origins[ka] = b;
            origins[kb] = a;
        }
        if self.is_ordered_at(ka) && self.is_ordered_at(kb) {
            return Ok(());
        }
        let (first, second) = (ka.min(kb), ka.max(kb));
        let moved = [
            (self.state.get(second), self.origins.borrow()[second]),
            (self.state.get(first), self.origins.borrow()[first]),
        ];
        self.remove_entry(second)?;
        self.remove_entry(first)?;
        for (item, origin) in moved {
            if let Some(item) = item {
                self.insert_entry(item, origin)?;
            }
        }
        Ok(())
    }

    fn on_parent_change(&self, change: &CollectionChange<T>) -> Result<()> {
        match change.operation {
            Operation::Append => {
                let start = change.new_state.len().saturating_sub(change.count);
                self.insert_range(start, &change.items)?;
            }
            Operation::Prepend => self.insert_range(0, &change.items)?,
            Operation::Insert => self.insert_range(change.index, &change.items)?,
            Operation::Remove => self.remove_range(change.index, change.count)?,
            Operation::RemoveLeft => self.remove_range(0, change.count)?,
            Operation::RemoveRight => self.remove_range(change.new_state.len(), change.count)?,
            Operation::Replace => {
                let at = self.locate(change.index)?;
                self.remove_entry(at)?;
                for item in &change.items {
                    self.insert_entry(item.clone(), change.index)?;
                }
            }
            Operation::Swap => {
                let other = change.index2.unwrap_or(change.index);
                if other != change.index {
                    self.swap_origins(change.index, other)?;
                }
            }
            Operation::Clear => {
                self.origins.borrow_mut().clear();
                if self.state.len() > 0 {
                    self.state.commit(CollectionChange::clear(self.state.to_vec()))?;
                }
            }
        }
        Ok(())
    }
}

impl<T: Clone + 'static> ReadableArray<T> for SortedArrayView<T> {
    fn to_vec(&self) -> Vec<T> {
        self.inner.state.to_vec()
    }

    fn len(&self) -> usize {
        self.inner.state.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.inner.state.get(index)
    }

    fn changes(&self) -> EventEmitter<CollectionChange<T>> {
        self.inner.state.changes()
    }

    fn length(&self) -> DataSource<usize> {
        self.inner.state.length()
    }
}

#[cfg(test)]
mod tests {
    use super::super::ArrayDataSource;
    use super::*;

    #[test]
    fn sorts_and_tracks_inserts_and_removals() {
        let array = ArrayDataSource::new(vec![5, 1, 4]);
        let view = array.sort(|a: &i32, b: &i32| a.cmp(b), None).unwrap();
        assert_eq!(view.to_vec(), vec![1, 4, 5]);
        array.push(3).unwrap();
        array.unshift(9).unwrap();
        assert_eq!(view.to_vec(), vec![1, 3, 4, 5, 9]);
        array.remove(&4).unwrap();
        array.set(0, 0).unwrap();
        assert_eq!(view.to_vec(), vec![0, 1, 3, 5]);
        array.clear().unwrap();
        assert!(view.is_empty());
    }

    #[test]
    fn parent_swap_is_silent() {
        let array = ArrayDataSource::new(vec![3, 1, 2]);
        let view = array.sort(|a: &i32, b: &i32| a.cmp(b), None).unwrap();
        let count = Rc::new(std::cell::Cell::new(0));
        let c = Rc::clone(&count);
        view.listen(move |_: &CollectionChange<i32>| c.set(c.get() + 1), None)
            .unwrap();
        array.swap(0, 2).unwrap();
        assert_eq!(count.get(), 0);
        assert_eq!(view.to_vec(), vec![1, 2, 3]);
    }

    fn by_key(a: &(i32, char), b: &(i32, char)) -> Ordering {
        a.0.cmp(&b.0)
    }

    #[test]
    fn ties_follow_parent_order() {
        let array = ArrayDataSource::new(vec![(1, 'a'), (0, 'b'), (1, 'c')]);
        let view = array.sort(by_key, None).unwrap();
        array.push((1, 'd')).unwrap();
        array.remove(&(1, 'c')).unwrap();
        assert_eq!(view.to_vec(), vec![(0, 'b'), (1, 'a'), (1, 'd')]);

        array.unshift((1, 'e')).unwrap();
        assert_eq!(view.to_vec(), vec![(0, 'b'), (1, 'e'), (1, 'a'), (1, 'd')]);
        array.insert_at(2, (1, 'f')).unwrap();
        assert_eq!(
            view.to_vec(),
            vec![(0, 'b'), (1, 'e'), (1, 'a'), (1, 'f'), (1, 'd')]
        );
    }

    #[test]
    fn unshift_of_tied_item_lands_first() {
        let array = ArrayDataSource::new(vec![(1, 'a')]);
        let view = array.sort(by_key, None).unwrap();
        array.unshift((1, 'b')).unwrap();
        assert_eq!(view.to_vec(), vec![(1, 'b'), (1, 'a')]);
    }

    #[test]
    fn parent_swap_reorders_ties() {
        let array = ArrayDataSource::new(vec![(1, 'a'), (0, 'x'), (1, 'b')]);
        let view = array.sort(by_key, None).unwrap();
        assert_eq!(view.to_vec(), vec![(0, 'x'), (1, 'a'), (1, 'b')]);
        array.swap(0, 2).unwrap();
        assert_eq!(view.to_vec(), vec![(0, 'x'), (1, 'b'), (1, 'a')]);
        array.set(1, (2, 'y')).unwrap();
        array.remove_at(0).unwrap();
        assert_eq!(view.to_vec(), vec![(1, 'a'), (2, 'y')]);
    }

    #[test]
    fn update_comparator_resorts() {
        let array = ArrayDataSource::new(vec![2, 3, 1]);
        let view = array.sort(|a: &i32, b: &i32| a.cmp(b), None).unwrap();
        view.update_comparator(|a: &i32, b: &i32| b.cmp(a)).unwrap();
        assert_eq!(view.to_vec(), vec![3, 2, 1]);
        array.push(5).unwrap();
        assert_eq!(view.to_vec(), vec![5, 3, 2, 1]);
    }
}
