#![forbid(unsafe_code)]

//! Mapped view of a reactive collection: a 1:1 positional transform.

use std::marker::PhantomData;
use std::rc::Rc;

use arbor_core::{CancellationToken, EventEmitter, Result};

use super::{ArrayState, CollectionChange, Operation, ReadableArray};
use crate::source::DataSource;

struct MapInner<T, U> {
    state: ArrayState<U>,
    transform: Rc<dyn Fn(&T) -> U>,
}

/// Incrementally maintained `parent.map(f)`.
///
/// The transform runs once per item entering the parent; removals and swaps
/// reuse the already mapped values.
pub struct MappedArrayView<T, U> {
    inner: Rc<MapInner<T, U>>,
    _source: PhantomData<fn(&T)>,
}

impl<T, U> Clone for MappedArrayView<T, U> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            _source: PhantomData,
        }
    }
}

impl<T, U: std::fmt::Debug> std::fmt::Debug for MappedArrayView<T, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedArrayView")
            .field("items", &self.inner.state.items.borrow())
            .finish()
    }
}

impl<T: Clone + 'static, U: Clone + 'static> MappedArrayView<T, U> {
    pub(crate) fn new(
        parent: &dyn ReadableArray<T>,
        transform: impl Fn(&T) -> U + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Self> {
        if let Some(token) = token {
            token.check()?;
        }
        let initial: Vec<U> = parent.to_vec().iter().map(&transform).collect();
        let inner = Rc::new(MapInner {
            state: ArrayState::new(initial),
            transform: Rc::new(transform),
        });
        let on_change = Rc::clone(&inner);
        parent.changes().subscribe(
            move |change| {
                if let Err(err) = on_change.on_parent_change(change) {
                    tracing::warn!(%err, "mapped view dropped a parent change");
                }
            },
            token,
        )?;
        Ok(Self {
            inner,
            _source: PhantomData,
        })
    }
}

impl<T: Clone + 'static, U: Clone + 'static> MapInner<T, U> {
    fn mapped(&self, items: &[T]) -> Vec<U> {
        items.iter().map(|item| (self.transform)(item)).collect()
    }

    fn slice(&self, start: usize, count: usize) -> Vec<U> {
        self.state.with_items(|items| {
            items
                .get(start..start + count)
                .map(<[U]>::to_vec)
                .unwrap_or_default()
        })
    }

    fn on_parent_change(&self, change: &CollectionChange<T>) -> Result<()> {
        let len = self.state.len();
        let edit = match change.operation {
            Operation::Append => CollectionChange::append(len, self.mapped(&change.items)),
            Operation::Prepend => CollectionChange::prepend(self.mapped(&change.items)),
            Operation::Insert => CollectionChange::insert(change.index, self.mapped(&change.items)),
            Operation::Remove => {
                CollectionChange::remove(change.index, self.slice(change.index, change.count))
            }
            Operation::RemoveLeft => CollectionChange::remove_left(self.slice(0, change.count)),
            Operation::RemoveRight => CollectionChange::remove_right(
                change.index,
                self.slice(change.index, change.count),
            ),
            Operation::Replace => {
                let (Some(old), Some(new)) = (self.state.get(change.index), change.items.first())
                else {
                    return Err(arbor_core::ArborError::out_of_bounds(change.index, len));
                };
                CollectionChange::replace(change.index, old, (self.transform)(new))
            }
            Operation::Swap => {
                let other = change.index2.unwrap_or(change.index);
                let (Some(a), Some(b)) = (self.state.get(change.index), self.state.get(other))
                else {
                    return Err(arbor_core::ArborError::out_of_bounds(change.index.max(other), len));
                };
                CollectionChange::swap(change.index, other, b, a)
            }
            Operation::Clear => CollectionChange::clear(self.state.to_vec()),
        };
        self.state.commit(edit)
    }
}

impl<T: Clone + 'static, U: Clone + 'static> ReadableArray<U> for MappedArrayView<T, U> {
    fn to_vec(&self) -> Vec<U> {
        self.inner.state.to_vec()
    }

    fn len(&self) -> usize {
        self.inner.state.len()
    }

    fn get(&self, index: usize) -> Option<U> {
        self.inner.state.get(index)
    }

    fn changes(&self) -> EventEmitter<CollectionChange<U>> {
        self.inner.state.changes()
    }

    fn length(&self) -> DataSource<usize> {
        self.inner.state.length()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::super::ArrayDataSource;
    use super::*;

    #[test]
    fn mirrors_every_edit_positionally() {
        let array = ArrayDataSource::new(vec![1, 2, 3]);
        let view = array.map(|v| v.to_string(), None).unwrap();
        assert_eq!(view.to_vec(), vec!["1", "2", "3"]);
        array.push(4).unwrap();
        array.unshift(0).unwrap();
        array.insert_at(2, 9).unwrap();
        array.swap(0, 5).unwrap();
        array.set(1, 7).unwrap();
        array.remove_at(2).unwrap();
        array.remove_left(1).unwrap();
        array.remove_right(1).unwrap();
        let expected: Vec<String> = array.to_vec().iter().map(ToString::to_string).collect();
        assert_eq!(view.to_vec(), expected);
        array.clear().unwrap();
        assert!(view.is_empty());
    }

    #[test]
    fn transform_runs_only_for_new_items() {
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let array = ArrayDataSource::new(vec![1, 2, 3]);
        let view = array
            .map(
                move |v| {
                    c.set(c.get() + 1);
                    v * 10
                },
                None,
            )
            .unwrap();
        assert_eq!(calls.get(), 3);
        array.swap(0, 2).unwrap();
        array.remove_at(0).unwrap();
        assert_eq!(calls.get(), 3);
        array.push(5).unwrap();
        assert_eq!(calls.get(), 4);
        assert_eq!(view.to_vec(), vec![20, 10, 50]);
    }

    #[test]
    fn chains_onto_filtered_view() {
        let array = ArrayDataSource::new((1..=6).collect::<Vec<i32>>());
        let view = array
            .filter(|v| v % 2 == 1, &[], None)
            .unwrap()
            .map(|v| v * v, None)
            .unwrap();
        assert_eq!(view.to_vec(), vec![1, 9, 25]);
        array.push(7).unwrap();
        assert_eq!(view.to_vec(), vec![1, 9, 25, 49]);
    }
}
