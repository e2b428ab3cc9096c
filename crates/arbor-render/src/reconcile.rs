#![forbid(unsafe_code)]

//! Host child-list reconciliation.
//!
//! [`reconcile`] edits the children of one host node until they equal a
//! model list, touching only positions that differ:
//!
//! 1. live children absent from the model are removed;
//! 2. walking the model index by index, a mismatch is fixed by swapping the
//!    wanted node up from later in the live list when it is there, and by
//!    inserting it before the current live node otherwise;
//! 3. model nodes past the end of the live list are appended.
//!
//! # Invariants
//!
//! - After a successful call the host children equal `model`.
//! - A live list that already equals `model` produces zero backend calls
//!   beyond the initial `children` read.
//! - Each swap fixes one position and never disturbs an earlier one.

use ahash::AHashSet;
use arbor_core::Result;

use crate::backend::{HostNode, RenderBackend};

/// Backend edits performed by one [`reconcile`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub swapped: usize,
    /// Host nodes removed from the parent, in removal order.
    pub removed: Vec<HostNode>,
}

impl ReconcileOutcome {
    /// Total number of backend mutations.
    #[must_use]
    pub fn ops(&self) -> usize {
        self.inserted + self.swapped + self.removed.len()
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.ops() == 0
    }
}

/// Make the children of `parent` equal `model`.
///
/// `model` must not contain duplicates.
///
/// # Errors
///
/// Propagates backend failures; the host list is then partially updated.
pub fn reconcile(
    backend: &dyn RenderBackend,
    parent: HostNode,
    model: &[HostNode],
) -> Result<ReconcileOutcome> {
    let wanted: AHashSet<HostNode> = model.iter().copied().collect();
    let mut live = backend.children(parent)?;
    let mut outcome = ReconcileOutcome::default();

    // ── Strays ───────────────────────────────────────────────────────
    for node in live.iter().copied().filter(|n| !wanted.contains(n)) {
        backend.remove_child(parent, node)?;
        tracing::trace!(%parent, child = %node, "reconcile remove");
        outcome.removed.push(node);
    }
    live.retain(|n| wanted.contains(n));

    // ── Ordering ─────────────────────────────────────────────────────
    for (index, &target) in model.iter().enumerate() {
        match live.get(index).copied() {
            Some(current) if current == target => {}
            Some(current) => {
                let later = live[index + 1..]
                    .iter()
                    .position(|n| *n == target)
                    .map(|offset| index + 1 + offset);
                if let Some(found) = later {
                    backend.swap_children(parent, current, target)?;
                    tracing::trace!(%parent, a = %current, b = %target, "reconcile swap");
                    live.swap(index, found);
                    outcome.swapped += 1;
                } else {
                    backend.insert_before(parent, target, Some(current))?;
                    tracing::trace!(%parent, child = %target, before = %current, "reconcile insert");
                    live.insert(index, target);
                    outcome.inserted += 1;
                }
            }
            None => {
                backend.insert_before(parent, target, None)?;
                tracing::trace!(%parent, child = %target, "reconcile append");
                live.push(target);
                outcome.inserted += 1;
            }
        }
    }

    // ── Tail ─────────────────────────────────────────────────────────
    for node in live.drain(model.len()..) {
        backend.remove_child(parent, node)?;
        tracing::trace!(%parent, child = %node, "reconcile remove tail");
        outcome.removed.push(node);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessBackend, Mutation};

    fn setup(labels: &[&str]) -> (HeadlessBackend, HostNode, Vec<HostNode>) {
        let backend = HeadlessBackend::new();
        let parent = backend.create_element("div");
        let nodes: Vec<HostNode> = labels.iter().map(|l| backend.create_text(l)).collect();
        backend.clear_mutations();
        (backend, parent, nodes)
    }

    #[test]
    fn empty_parent_appends_everything() {
        let (backend, parent, nodes) = setup(&["a", "b", "c"]);
        let outcome = reconcile(&backend, parent, &nodes).unwrap();
        assert_eq!(outcome.inserted, 3);
        assert_eq!(backend.text_content(parent), "abc");
    }

    #[test]
    fn identical_lists_do_nothing() {
        let (backend, parent, nodes) = setup(&["a", "b"]);
        reconcile(&backend, parent, &nodes).unwrap();
        backend.clear_mutations();
        let outcome = reconcile(&backend, parent, &nodes).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(backend.mutation_count(), 0);
    }

    #[test]
    fn single_transposition_is_one_swap() {
        let (backend, parent, nodes) = setup(&["a", "b", "c"]);
        reconcile(&backend, parent, &nodes).unwrap();
        backend.clear_mutations();
        let reordered = [nodes[0], nodes[2], nodes[1]];
        let outcome = reconcile(&backend, parent, &reordered).unwrap();
        assert_eq!(outcome.swapped, 1);
        assert_eq!(outcome.ops(), 1);
        assert_eq!(
            backend.mutations(),
            vec![Mutation::Swap {
                parent,
                a: nodes[1],
                b: nodes[2]
            }]
        );
        assert_eq!(backend.text_content(parent), "acb");
    }

    #[test]
    fn new_node_is_inserted_in_place() {
        let (backend, parent, nodes) = setup(&["a", "b", "x"]);
        reconcile(&backend, parent, &nodes[..2]).unwrap();
        backend.clear_mutations();
        let outcome = reconcile(&backend, parent, &[nodes[0], nodes[2], nodes[1]]).unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(
            backend.mutations(),
            vec![Mutation::Insert {
                parent,
                child: nodes[2],
                before: Some(nodes[1])
            }]
        );
    }

    #[test]
    fn strays_are_removed_and_reported() {
        let (backend, parent, nodes) = setup(&["a", "b", "c"]);
        reconcile(&backend, parent, &nodes).unwrap();
        let outcome = reconcile(&backend, parent, &[nodes[2]]).unwrap();
        assert_eq!(outcome.removed, vec![nodes[0], nodes[1]]);
        assert_eq!(backend.text_content(parent), "c");
        let outcome = reconcile(&backend, parent, &[]).unwrap();
        assert_eq!(outcome.removed, vec![nodes[2]]);
    }

    #[test]
    fn nodes_from_another_parent_are_moved() {
        let (backend, parent, nodes) = setup(&["a", "b"]);
        let other = backend.create_element("span");
        backend.insert_before(other, nodes[1], None).unwrap();
        reconcile(&backend, parent, &nodes).unwrap();
        assert_eq!(backend.parent(nodes[1]), Some(parent));
        assert!(backend.children(other).unwrap().is_empty());
    }
}
