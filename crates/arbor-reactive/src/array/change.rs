#![forbid(unsafe_code)]

//! Structural change records for reactive collections.
//!
//! Every mutation of an [`ArrayDataSource`](super::ArrayDataSource) or one of
//! its views is described by exactly one [`CollectionChange`] (a merge by a
//! short sequence). Applying the records in order onto an empty `Vec`
//! reproduces the collection at every step.
//!
//! | Operation     | `index`          | `count`         | `items`               |
//! |---------------|------------------|-----------------|-----------------------|
//! | `Append`      | old length       | items added     | added items           |
//! | `Prepend`     | 0                | items added     | added items           |
//! | `Insert`      | insertion point  | items added     | added items           |
//! | `Remove`      | first removed    | items removed   | removed items         |
//! | `RemoveLeft`  | 0                | items removed   | removed items         |
//! | `RemoveRight` | new length       | items removed   | removed items         |
//! | `Replace`     | replaced slot    | 1               | `[new]`, `target=old` |
//! | `Swap`        | first slot       | 2               | `[at index, at index2]` after the swap |
//! | `Clear`       | 0                | items removed   | removed items         |

use arbor_core::{ArborError, Result};

/// Kind of structural edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Append,
    Prepend,
    Insert,
    Remove,
    RemoveLeft,
    RemoveRight,
    Replace,
    Swap,
    Clear,
}

/// One structural edit to an ordered reactive collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionChange<T> {
    pub operation: Operation,
    pub count: usize,
    pub index: usize,
    /// Second slot; `Swap` only.
    pub index2: Option<usize>,
    /// Replaced item; `Replace` only.
    pub target: Option<T>,
    pub items: Vec<T>,
    /// Full collection contents after this edit.
    pub new_state: Vec<T>,
}

impl<T: Clone> CollectionChange<T> {
    fn with_items(operation: Operation, index: usize, items: Vec<T>) -> Self {
        Self {
            operation,
            count: items.len(),
            index,
            index2: None,
            target: None,
            items,
            new_state: Vec::new(),
        }
    }

    #[must_use]
    pub fn append(index: usize, items: Vec<T>) -> Self {
        Self::with_items(Operation::Append, index, items)
    }

    #[must_use]
    pub fn prepend(items: Vec<T>) -> Self {
        Self::with_items(Operation::Prepend, 0, items)
    }

    #[must_use]
    pub fn insert(index: usize, items: Vec<T>) -> Self {
        Self::with_items(Operation::Insert, index, items)
    }

    #[must_use]
    pub fn remove(index: usize, removed: Vec<T>) -> Self {
        Self::with_items(Operation::Remove, index, removed)
    }

    #[must_use]
    pub fn remove_left(removed: Vec<T>) -> Self {
        Self::with_items(Operation::RemoveLeft, 0, removed)
    }

    #[must_use]
    pub fn remove_right(new_len: usize, removed: Vec<T>) -> Self {
        Self::with_items(Operation::RemoveRight, new_len, removed)
    }

    #[must_use]
    pub fn replace(index: usize, old: T, new: T) -> Self {
        Self {
            target: Some(old),
            ..Self::with_items(Operation::Replace, index, vec![new])
        }
    }

    /// Swap record; `items` holds the values at `index` and `index2` after the swap.
    #[must_use]
    pub fn swap(index: usize, index2: usize, at_index: T, at_index2: T) -> Self {
        Self {
            index2: Some(index2),
            ..Self::with_items(Operation::Swap, index, vec![at_index, at_index2])
        }
    }

    #[must_use]
    pub fn clear(removed: Vec<T>) -> Self {
        Self::with_items(Operation::Clear, 0, removed)
    }

    /// Apply this edit to `target`.
    ///
    /// # Errors
    ///
    /// [`ArborError::IndexOutOfBounds`] when the edit does not fit `target`.
    pub fn apply(&self, target: &mut Vec<T>) -> Result<()> {
        let len = target.len();
        match self.operation {
            Operation::Append => target.extend(self.items.iter().cloned()),
            Operation::Prepend => {
                target.splice(0..0, self.items.iter().cloned());
            }
            Operation::Insert => {
                if self.index > len {
                    return Err(ArborError::out_of_bounds(self.index, len));
                }
                target.splice(self.index..self.index, self.items.iter().cloned());
            }
            Operation::Remove => {
                let end = self.index + self.count;
                if end > len {
                    return Err(ArborError::out_of_bounds(end.saturating_sub(1), len));
                }
                target.drain(self.index..end);
            }
            Operation::RemoveLeft => {
                if self.count > len {
                    return Err(ArborError::out_of_bounds(self.count - 1, len));
                }
                target.drain(..self.count);
            }
            Operation::RemoveRight => {
                if self.count > len {
                    return Err(ArborError::out_of_bounds(self.count - 1, len));
                }
                target.truncate(len - self.count);
            }
            Operation::Replace => {
                let slot = target
                    .get_mut(self.index)
                    .ok_or_else(|| ArborError::out_of_bounds(self.index, len))?;
                if let Some(item) = self.items.first() {
                    *slot = item.clone();
                }
            }
            Operation::Swap => {
                let other = self.index2.unwrap_or(self.index);
                if self.index >= len || other >= len {
                    return Err(ArborError::out_of_bounds(self.index.max(other), len));
                }
                target.swap(self.index, other);
            }
            Operation::Clear => target.clear(),
        }
        Ok(())
    }
}

/// Edits turning `old` into `new`: a `Replace` per differing position, one
/// `Append` for a longer tail, one `RemoveRight` for a shorter one.
///
/// `new_state` is left empty; the committing collection fills it.
pub fn merge_plan<T: Clone + PartialEq>(old: &[T], new: &[T]) -> Vec<CollectionChange<T>> {
    let shared = old.len().min(new.len());
    let mut plan: Vec<CollectionChange<T>> = old[..shared]
        .iter()
        .zip(&new[..shared])
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(i, (a, b))| CollectionChange::replace(i, a.clone(), b.clone()))
        .collect();
    if new.len() > old.len() {
        plan.push(CollectionChange::append(old.len(), new[shared..].to_vec()));
    } else if old.len() > new.len() {
        plan.push(CollectionChange::remove_right(new.len(), old[shared..].to_vec()));
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(changes: &[CollectionChange<i32>]) -> Vec<i32> {
        let mut out = Vec::new();
        for change in changes {
            change.apply(&mut out).unwrap();
        }
        out
    }

    #[test]
    fn apply_covers_every_operation() {
        let changes = vec![
            CollectionChange::append(0, vec![1, 2, 3]),
            CollectionChange::prepend(vec![0]),
            CollectionChange::insert(2, vec![9]),
            CollectionChange::remove(2, vec![9]),
            CollectionChange::replace(0, 0, 10),
            CollectionChange::swap(1, 3, 3, 1),
            CollectionChange::remove_left(vec![10]),
            CollectionChange::remove_right(2, vec![1]),
        ];
        assert_eq!(replay(&changes), vec![3, 2]);
    }

    #[test]
    fn clear_empties() {
        let mut v = vec![1, 2];
        CollectionChange::clear(vec![1, 2]).apply(&mut v).unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn out_of_range_apply_fails() {
        let mut v = vec![1];
        assert_eq!(
            CollectionChange::insert(3, vec![0]).apply(&mut v),
            Err(ArborError::IndexOutOfBounds { index: 3, len: 1 })
        );
        assert!(CollectionChange::replace(1, 0, 0).apply(&mut v).is_err());
        assert!(CollectionChange::remove(0, vec![1, 2]).apply(&mut v).is_err());
        assert_eq!(v, vec![1]);
    }

    #[test]
    fn merge_plan_is_minimal() {
        assert!(merge_plan(&[1, 2, 3], &[1, 2, 3]).is_empty());

        let plan = merge_plan(&[1, 2, 3], &[1, 5, 3, 4, 6]);
        let ops: Vec<Operation> = plan.iter().map(|c| c.operation).collect();
        assert_eq!(ops, vec![Operation::Replace, Operation::Append]);
        assert_eq!(plan[0].target, Some(2));
        assert_eq!(plan[1].items, vec![4, 6]);

        let plan = merge_plan(&[1, 2, 3, 4], &[0, 2]);
        let ops: Vec<Operation> = plan.iter().map(|c| c.operation).collect();
        assert_eq!(ops, vec![Operation::Replace, Operation::RemoveRight]);
        assert_eq!(plan[1].count, 2);
        assert_eq!(plan[1].index, 2);
    }

    #[test]
    fn merge_plan_replays_to_new() {
        let mut state = vec![1, 2, 3, 4];
        for change in merge_plan(&state.clone(), &[4, 3]) {
            change.apply(&mut state).unwrap();
        }
        assert_eq!(state, vec![4, 3]);
    }
}
