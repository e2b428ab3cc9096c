#![forbid(unsafe_code)]

//! Filtered view of a reactive collection.
//!
//! The view mirrors its parent and keeps one acceptance flag per parent
//! item. A parent change is translated using those flags, so the predicate
//! only runs on items the change actually introduces.

use std::cell::RefCell;
use std::rc::Rc;

use arbor_core::{CancellationToken, EventEmitter, Result};

use super::{ArrayState, CollectionChange, Operation, ReadableArray};
use crate::source::{ChangeSignal, DataSource};

type Predicate<T> = Rc<dyn Fn(&T) -> bool>;

struct FilterInner<T> {
    state: ArrayState<T>,
    parent_items: RefCell<Vec<T>>,
    accepted: RefCell<Vec<bool>>,
    predicate: RefCell<Predicate<T>>,
}

/// Incrementally maintained `parent.filter(predicate)`.
///
/// Cloning creates a new handle to the **same** view.
pub struct FilteredArrayView<T> {
    inner: Rc<FilterInner<T>>,
}

impl<T> Clone for FilteredArrayView<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for FilteredArrayView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteredArrayView")
            .field("items", &self.inner.state.items.borrow())
            .field("parent_len", &self.inner.accepted.borrow().len())
            .finish()
    }
}

/// Number of accepted flags before parent position `index`.
fn view_index(accepted: &[bool], index: usize) -> usize {
    accepted[..index.min(accepted.len())]
        .iter()
        .filter(|a| **a)
        .count()
}

fn kept<T: Clone>(items: &[T], flags: &[bool]) -> Vec<T> {
    items
        .iter()
        .zip(flags)
        .filter(|(_, accepted)| **accepted)
        .map(|(item, _)| item.clone())
        .collect()
}

impl<T: Clone + PartialEq + 'static> FilteredArrayView<T> {
    pub(crate) fn new(
        parent: &dyn ReadableArray<T>,
        predicate: impl Fn(&T) -> bool + 'static,
        deps: &[&dyn ChangeSignal],
        token: Option<&CancellationToken>,
    ) -> Result<Self> {
        if let Some(token) = token {
            token.check()?;
        }
        let parent_items = parent.to_vec();
        let accepted: Vec<bool> = parent_items.iter().map(&predicate).collect();
        let inner = Rc::new(FilterInner {
            state: ArrayState::new(kept(&parent_items, &accepted)),
            parent_items: RefCell::new(parent_items),
            accepted: RefCell::new(accepted),
            predicate: RefCell::new(Rc::new(predicate)),
        });

        let on_change = Rc::clone(&inner);
        parent.changes().subscribe(
            move |change| {
                if let Err(err) = on_change.on_parent_change(change) {
                    tracing::warn!(%err, "filtered view dropped a parent change");
                }
            },
            token,
        )?;
        for dep in deps {
            let on_dep = Rc::clone(&inner);
            dep.on_change(
                Rc::new(move || {
                    if let Err(err) = on_dep.refilter() {
                        tracing::warn!(%err, "filtered view refilter failed");
                    }
                }),
                token,
            )?;
        }
        Ok(Self { inner })
    }

    /// Swap in a new predicate and refilter.
    pub fn update_filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Result<()> {
        *self.inner.predicate.borrow_mut() = Rc::new(predicate);
        self.inner.refilter()
    }

    /// Re-evaluate the predicate on every parent item.
    pub fn refilter(&self) -> Result<()> {
        self.inner.refilter()
    }
}

impl<T: Clone + PartialEq + 'static> FilterInner<T> {
    fn refilter(&self) -> Result<()> {
        let predicate = Rc::clone(&*self.predicate.borrow());
        let next = {
            let parent = self.parent_items.borrow();
            let flags: Vec<bool> = parent.iter().map(|item| predicate(item)).collect();
            let next = kept(&parent, &flags);
            *self.accepted.borrow_mut() = flags;
            next
        };
        self.state.merge(&next)
    }

    fn on_parent_change(&self, change: &CollectionChange<T>) -> Result<()> {
        change.apply(&mut self.parent_items.borrow_mut())?;
        let edits = self.translate(change);
        for edit in edits {
            self.state.commit(edit)?;
        }
        Ok(())
    }

    /// Update the flags for `change` and return the equivalent view edits.
    fn translate(&self, change: &CollectionChange<T>) -> Vec<CollectionChange<T>> {
        let predicate = Rc::clone(&*self.predicate.borrow());
        let mut accepted = self.accepted.borrow_mut();
        let mut edits = Vec::new();
        let flags_for = |items: &[T]| -> Vec<bool> { items.iter().map(|i| predicate(i)).collect() };

        match change.operation {
            Operation::Append => {
                let flags = flags_for(&change.items);
                let at = view_index(&accepted, accepted.len());
                let items = kept(&change.items, &flags);
                accepted.extend(flags);
                if !items.is_empty() {
                    edits.push(CollectionChange::append(at, items));
                }
            }
            Operation::Prepend => {
                let flags = flags_for(&change.items);
                let items = kept(&change.items, &flags);
                accepted.splice(0..0, flags);
                if !items.is_empty() {
                    edits.push(CollectionChange::prepend(items));
                }
            }
            Operation::Insert => {
                let flags = flags_for(&change.items);
                let at = view_index(&accepted, change.index);
                let items = kept(&change.items, &flags);
                accepted.splice(change.index..change.index, flags);
                if !items.is_empty() {
                    edits.push(CollectionChange::insert(at, items));
                }
            }
            Operation::Remove => {
                let at = view_index(&accepted, change.index);
                let flags: Vec<bool> = accepted
                    .drain(change.index..change.index + change.count)
                    .collect();
                let items = kept(&change.items, &flags);
                if !items.is_empty() {
                    edits.push(CollectionChange::remove(at, items));
                }
            }
            Operation::RemoveLeft => {
                let flags: Vec<bool> = accepted.drain(..change.count).collect();
                let items = kept(&change.items, &flags);
                if !items.is_empty() {
                    edits.push(CollectionChange::remove_left(items));
                }
            }
            Operation::RemoveRight => {
                let start = accepted.len() - change.count;
                let new_len = view_index(&accepted, start);
                let flags: Vec<bool> = accepted.drain(start..).collect();
                let items = kept(&change.items, &flags);
                if !items.is_empty() {
                    edits.push(CollectionChange::remove_right(new_len, items));
                }
            }
            Operation::Replace => {
                let index = change.index;
                let was = accepted[index];
                let Some(new) = change.items.first().cloned() else {
                    return edits;
                };
                let is = predicate(&new);
                let at = view_index(&accepted, index);
                accepted[index] = is;
                match (was, is, change.target.clone()) {
                    (true, true, Some(old)) => edits.push(CollectionChange::replace(at, old, new)),
                    (true, false, Some(old)) => edits.push(CollectionChange::remove(at, vec![old])),
                    (false, true, _) => edits.push(CollectionChange::insert(at, vec![new])),
                    _ => {}
                }
            }
            Operation::Swap => {
                let i = change.index;
                let j = change.index2.unwrap_or(i);
                match (accepted[i], accepted[j]) {
                    (true, true) => {
                        if let [at_i, at_j] = change.items.as_slice() {
                            edits.push(CollectionChange::swap(
                                view_index(&accepted, i),
                                view_index(&accepted, j),
                                at_i.clone(),
                                at_j.clone(),
                            ));
                        }
                    }
                    (false, false) => {}
                    (from_i, _) => {
                        // One accepted item moves across rejected ones: remove + insert,
                        // unless its view position is unchanged.
                        let (from, to, item) = if from_i {
                            (i, j, change.items.get(1))
                        } else {
                            (j, i, change.items.first())
                        };
                        let old_at = view_index(&accepted, from);
                        accepted.swap(i, j);
                        let new_at = view_index(&accepted, to);
                        if let Some(item) = item
                            && old_at != new_at
                        {
                            edits.push(CollectionChange::remove(old_at, vec![item.clone()]));
                            edits.push(CollectionChange::insert(new_at, vec![item.clone()]));
                        }
                    }
                }
            }
            Operation::Clear => {
                accepted.clear();
                let items = self.state.to_vec();
                if !items.is_empty() {
                    edits.push(CollectionChange::clear(items));
                }
            }
        }
        edits
    }
}

impl<T: Clone + 'static> ReadableArray<T> for FilteredArrayView<T> {
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

    fn even(v: &i32) -> bool {
        v % 2 == 0
    }

    fn ops(view: &FilteredArrayView<i32>) -> Rc<RefCell<Vec<Operation>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        view.listen(move |c: &CollectionChange<i32>| s.borrow_mut().push(c.operation), None)
            .unwrap();
        seen
    }

    #[test]
    fn starts_filtered_and_follows_edits() {
        let array = ArrayDataSource::new(vec![1, 2, 3, 4]);
        let view = array.filter(even, &[], None).unwrap();
        assert_eq!(view.to_vec(), vec![2, 4]);
        array.push(6).unwrap();
        array.unshift(0).unwrap();
        array.insert_at(3, 8).unwrap();
        assert_eq!(view.to_vec(), vec![0, 2, 8, 4, 6]);
        array.remove_at(2).unwrap();
        array.remove_range(0, 2).unwrap();
        assert_eq!(view.to_vec(), vec![8, 4, 6]);
        array.shift().unwrap();
        array.pop().unwrap();
        assert_eq!(view.to_vec(), vec![4]);
        array.clear().unwrap();
        assert!(view.is_empty());
    }

    #[test]
    fn rejected_changes_are_silent() {
        let array = ArrayDataSource::new(vec![2]);
        let view = array.filter(even, &[], None).unwrap();
        let seen = ops(&view);
        array.push(1).unwrap();
        array.insert_at(0, 3).unwrap();
        array.remove(&1).unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn replace_crossing_predicate() {
        let array = ArrayDataSource::new(vec![1, 2, 3]);
        let view = array.filter(even, &[], None).unwrap();
        let seen = ops(&view);
        array.set(0, 4).unwrap();
        array.set(1, 5).unwrap();
        array.set(0, 6).unwrap();
        assert_eq!(view.to_vec(), vec![6]);
        assert_eq!(
            *seen.borrow(),
            vec![Operation::Insert, Operation::Remove, Operation::Replace]
        );
    }

    #[test]
    fn swaps_translate() {
        let array = ArrayDataSource::new(vec![2, 1, 4, 3, 6]);
        let view = array.filter(even, &[], None).unwrap();
        let seen = ops(&view);
        array.swap(0, 4).unwrap();
        assert_eq!(view.to_vec(), vec![6, 4, 2]);
        array.swap(1, 3).unwrap();
        assert_eq!(seen.borrow().len(), 1);
        array.swap(0, 1).unwrap();
        assert_eq!(view.to_vec(), vec![6, 4, 2]);
        assert_eq!(seen.borrow().len(), 1);
        array.swap(1, 3).unwrap();
        assert_eq!(array.to_vec(), vec![1, 3, 4, 6, 2]);
        assert_eq!(view.to_vec(), vec![4, 6, 2]);
        assert_eq!(
            seen.borrow()[1..],
            [Operation::Remove, Operation::Insert]
        );
    }

    #[test]
    fn update_filter_refilters_by_merge() {
        let array = ArrayDataSource::new((1..=6).collect());
        let view = array.filter(even, &[], None).unwrap();
        view.update_filter(|v| *v > 3).unwrap();
        assert_eq!(view.to_vec(), vec![4, 5, 6]);
        array.push(7).unwrap();
        assert_eq!(view.to_vec(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn dependency_change_refilters() {
        let array = ArrayDataSource::new((1..=5).collect::<Vec<i32>>());
        let threshold = DataSource::new(2);
        let limit = threshold.clone();
        let view = array
            .filter(
                move |v| *v > limit.value().unwrap_or(0),
                &[&threshold],
                None,
            )
            .unwrap();
        assert_eq!(view.to_vec(), vec![3, 4, 5]);
        threshold.update(4);
        assert_eq!(view.to_vec(), vec![5]);
    }

    #[test]
    fn token_stops_tracking() {
        let array = ArrayDataSource::new(vec![2]);
        let token = CancellationToken::new();
        let view = array.filter(even, &[], Some(&token)).unwrap();
        token.cancel();
        array.push(4).unwrap();
        assert_eq!(view.to_vec(), vec![2]);
    }
}
