#![forbid(unsafe_code)]

//! Fragments: placeholders owning zero or more nodes for one child position.
//!
//! Three flavours share one type:
//!
//! - **list**: a fixed sequence of renderables;
//! - **reactive**: the value of a `DataSource<Renderable>`, rebuilt on every
//!   update (an `Empty` value holds no slot);
//! - **collection**: one slot per item of a reactive collection, with every
//!   [`CollectionChange`] mirrored onto the slot list.
//!
//! A fragment has no host node. The owning element flattens it into its own
//! child list and re-renders whenever the fragment fires `changed`. Nested
//! fragments forward `changed` to their parent fragment.
//!
//! # Failure Modes
//!
//! A collection change that does not fit the slot list (which can only
//! happen if the collection and fragment were desynchronised) is logged and
//! dropped; the fragment keeps its previous slots.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use arbor_core::{ArborError, CancellationToken, EventEmitter, Result};
use arbor_reactive::{CollectionChange, DataSource, Operation, ReadableArray};

use crate::context::RenderContext;
use crate::descriptor::Renderable;
use crate::slot::{RenderNode, Slot};

struct FragmentInner {
    id: u64,
    ctx: RenderContext,
    token: CancellationToken,
    slots: RefCell<Vec<Slot>>,
    changed: EventEmitter<()>,
    disposed: Cell<bool>,
}

/// Zero-or-more node placeholder.
///
/// Cloning creates a new handle to the **same** fragment.
#[derive(Clone)]
pub struct Fragment {
    inner: Rc<FragmentInner>,
}

impl std::fmt::Debug for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fragment")
            .field("id", &self.inner.id)
            .field("slots", &self.inner.slots.borrow().len())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

impl Fragment {
    fn empty(ctx: &RenderContext, token: Option<&CancellationToken>) -> Result<Self> {
        if let Some(token) = token {
            token.check()?;
        }
        let token = token.map_or_else(CancellationToken::new, CancellationToken::child);
        let fragment = Self {
            inner: Rc::new(FragmentInner {
                id: ctx.next_id(),
                ctx: ctx.clone(),
                token: token.with_warn_threshold(ctx.config().leak_threshold()),
                slots: RefCell::new(Vec::new()),
                changed: EventEmitter::new(),
                disposed: Cell::new(false),
            }),
        };
        let weak = Rc::downgrade(&fragment.inner);
        fragment.inner.token.add(move || {
            if let Some(inner) = weak.upgrade() {
                Fragment { inner }.dispose();
            }
        })?;
        Ok(fragment)
    }

    pub(crate) fn list(
        ctx: &RenderContext,
        items: Vec<Renderable>,
        token: Option<&CancellationToken>,
    ) -> Result<Self> {
        let fragment = Self::empty(ctx, token)?;
        let slots = fragment.build_all(items)?;
        *fragment.inner.slots.borrow_mut() = slots;
        Ok(fragment)
    }

    pub(crate) fn reactive(
        ctx: &RenderContext,
        source: &DataSource<Renderable>,
        token: Option<&CancellationToken>,
    ) -> Result<Self> {
        let fragment = Self::empty(ctx, token)?;
        let weak = Rc::downgrade(&fragment.inner);
        source.listen_and_repeat(
            move |value: &Renderable| {
                let Some(fragment) = upgrade(&weak) else {
                    return;
                };
                if let Err(err) = fragment.replace_value(value.clone()) {
                    tracing::warn!(%err, fragment_id = fragment.id(), "reactive child rebuild failed");
                }
            },
            Some(&fragment.inner.token),
        )?;
        Ok(fragment)
    }

    pub(crate) fn collection(
        ctx: &RenderContext,
        array: Rc<dyn ReadableArray<Renderable>>,
        token: Option<&CancellationToken>,
    ) -> Result<Self> {
        let fragment = Self::empty(ctx, token)?;
        let slots = fragment.build_all(array.to_vec())?;
        *fragment.inner.slots.borrow_mut() = slots;
        let weak = Rc::downgrade(&fragment.inner);
        array.changes().subscribe(
            move |change: &CollectionChange<Renderable>| {
                let Some(fragment) = upgrade(&weak) else {
                    return;
                };
                if let Err(err) = fragment.apply_change(change) {
                    tracing::warn!(
                        %err,
                        fragment_id = fragment.id(),
                        operation = ?change.operation,
                        "collection change dropped"
                    );
                }
            },
            Some(&fragment.inner.token),
        )?;
        Ok(fragment)
    }

    // ── Queries ──────────────────────────────────────────────────────

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Number of direct child positions (a nested fragment counts once).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    /// Live nodes of this fragment, nested fragments flattened.
    #[must_use]
    pub fn nodes(&self) -> Vec<RenderNode> {
        let mut out = Vec::new();
        self.collect_nodes(&mut out);
        out
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Emitter fired after every change to the fragment's node list.
    #[must_use]
    pub fn changed(&self) -> EventEmitter<()> {
        self.inner.changed.clone()
    }

    pub(crate) fn collect_nodes(&self, out: &mut Vec<RenderNode>) {
        let slots = self.inner.slots.borrow().clone();
        for slot in &slots {
            slot.collect_nodes(out);
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Building ─────────────────────────────────────────────────────

    fn build_slot(&self, renderable: Renderable) -> Result<Slot> {
        let slot = self.inner.ctx.build(renderable, Some(&self.inner.token))?;
        if let Slot::Fragment(nested) = &slot {
            let weak = Rc::downgrade(&self.inner);
            nested.changed().subscribe(
                move |_: &()| {
                    if let Some(parent) = upgrade(&weak) {
                        parent.inner.changed.fire(&());
                    }
                },
                Some(nested.token()),
            )?;
        }
        Ok(slot)
    }

    fn build_all(&self, items: Vec<Renderable>) -> Result<Vec<Slot>> {
        let mut slots = Vec::with_capacity(items.len());
        for item in items {
            match self.build_slot(item) {
                Ok(slot) => slots.push(slot),
                Err(err) => {
                    for built in &slots {
                        built.dispose(true);
                    }
                    return Err(err);
                }
            }
        }
        Ok(slots)
    }

    fn replace_value(&self, value: Renderable) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        let next = match value {
            Renderable::Empty => Vec::new(),
            other => vec![self.build_slot(other)?],
        };
        let previous = self.inner.slots.replace(next.clone());
        for old in &previous {
            if !next.iter().any(|slot| slot.ptr_eq(old)) {
                old.dispose(true);
            }
        }
        self.inner.changed.fire(&());
        Ok(())
    }

    fn apply_change(&self, change: &CollectionChange<Renderable>) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        let len = self.slot_count();
        let removed: Vec<Slot> = match change.operation {
            Operation::Append => {
                let built = self.build_all(change.items.clone())?;
                self.inner.slots.borrow_mut().extend(built);
                Vec::new()
            }
            Operation::Prepend | Operation::Insert => {
                let at = if change.operation == Operation::Prepend {
                    0
                } else {
                    change.index
                };
                if at > len {
                    return Err(ArborError::out_of_bounds(at, len));
                }
                let built = self.build_all(change.items.clone())?;
                self.inner.slots.borrow_mut().splice(at..at, built);
                Vec::new()
            }
            Operation::Remove | Operation::RemoveLeft | Operation::RemoveRight => {
                let start = match change.operation {
                    Operation::RemoveLeft => 0,
                    _ => change.index,
                };
                let end = start + change.count;
                if end > len {
                    return Err(ArborError::out_of_bounds(end.saturating_sub(1), len));
                }
                self.inner.slots.borrow_mut().drain(start..end).collect()
            }
            Operation::Replace => {
                if change.index >= len {
                    return Err(ArborError::out_of_bounds(change.index, len));
                }
                let item = change.items.first().cloned().unwrap_or_default();
                let built = self.build_slot(item)?;
                let old = std::mem::replace(&mut self.inner.slots.borrow_mut()[change.index], built);
                vec![old]
            }
            Operation::Swap => {
                let other = change.index2.unwrap_or(change.index);
                if change.index >= len || other >= len {
                    return Err(ArborError::out_of_bounds(change.index.max(other), len));
                }
                self.inner.slots.borrow_mut().swap(change.index, other);
                Vec::new()
            }
            Operation::Clear => std::mem::take(&mut *self.inner.slots.borrow_mut()),
        };
        let released: Vec<Slot> = {
            let kept = self.inner.slots.borrow();
            removed
                .into_iter()
                .filter(|old| !kept.iter().any(|slot| slot.ptr_eq(old)))
                .collect()
        };
        for slot in &released {
            slot.dispose(true);
        }
        self.inner.changed.fire(&());
        Ok(())
    }

    // ── Disposal ─────────────────────────────────────────────────────

    /// Dispose every owned node and end the fragment's token.
    pub fn dispose(&self) {
        self.dispose_inner(true);
    }

    pub(crate) fn dispose_inner(&self, remove_host: bool) {
        let inner = &self.inner;
        if inner.disposed.replace(true) {
            return;
        }
        let slots = inner.slots.take();
        for slot in &slots {
            slot.dispose(remove_host);
        }
        inner.changed.cancel_all();
        inner.token.cancel();
    }
}

fn upgrade(weak: &Weak<FragmentInner>) -> Option<Fragment> {
    weak.upgrade().map(|inner| Fragment { inner })
}
