#![forbid(unsafe_code)]

//! Element nodes.
//!
//! An [`ElementNode`] owns one host element, a model list of child slots,
//! and a cancellation token scoping everything it created. Rendering
//! reconciles the host children against the flattened slot list.
//!
//! Lifecycle: constructed → attached ⇄ detached → disposed.
//!
//! # Invariants
//!
//! 1. `attached` implies the host node was connected when it was set.
//! 2. `on_attach` hooks run parent first, once per attach transition; the
//!    same holds for `on_detach`.
//! 3. After `dispose` the node's token is canceled, its host is out of the
//!    side table, and every child slot is disposed.
//! 4. Rendering identical state performs no backend mutations.
//!
//! # Failure Modes
//!
//! - Child mutations on a disposed node return `ArborError::Disposed`.
//! - `render` on a disposed node logs a warning and does nothing.
//! - Re-entering `dispose` from a detach hook logs a warning and returns.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arbor_core::{ArborError, CallbackId, CancellationToken, Result};
use arbor_reactive::ReadableArray;

use crate::backend::{HostNode, ListenerId};
use crate::context::{RenderContext, ResolvedKind};
use crate::descriptor::{AttrBinding, Attributes, ElementDescriptor, LifecycleHook, Renderable};
use crate::reconcile::reconcile;
use crate::slot::{RenderNode, Slot, WeakRenderNode, flatten};

pub(crate) struct ElementInner {
    id: u64,
    ctx: RenderContext,
    host: HostNode,
    tag: String,
    children: RefCell<Vec<Slot>>,
    token: CancellationToken,
    attached: Cell<bool>,
    disposed: Cell<bool>,
    disposing: Cell<bool>,
    rendering: Cell<bool>,
    dirty: Cell<bool>,
    on_attach: RefCell<Vec<LifecycleHook>>,
    on_detach: RefCell<Vec<LifecycleHook>>,
    listeners: RefCell<Vec<ListenerId>>,
    dispose_hook: Cell<Option<CallbackId>>,
}

/// Live element node.
///
/// Cloning creates a new handle to the **same** node.
#[derive(Clone)]
pub struct ElementNode {
    inner: Rc<ElementInner>,
}

impl std::fmt::Debug for ElementNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementNode")
            .field("id", &self.inner.id)
            .field("tag", &self.inner.tag)
            .field("host", &self.inner.host)
            .field("children", &self.inner.children.borrow().len())
            .field("attached", &self.inner.attached.get())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

struct Parts {
    attributes: Attributes,
    children: Vec<Renderable>,
    on_attach: Vec<LifecycleHook>,
    on_detach: Vec<LifecycleHook>,
}

impl ElementNode {
    pub(crate) fn from_inner(inner: Rc<ElementInner>) -> Self {
        Self { inner }
    }

    /// Build a live element from `descriptor`.
    ///
    /// A component kind is expanded first. When it produces an element
    /// that element is returned; any other output is wrapped in a host
    /// element named after the component.
    ///
    /// # Errors
    ///
    /// `TokenCanceled` if `token` has ended, `UnknownNodeKind` for kinds the
    /// registry rejects, or the first error raised while building children.
    pub fn new(
        ctx: &RenderContext,
        descriptor: ElementDescriptor,
        token: Option<&CancellationToken>,
    ) -> Result<Self> {
        if let Some(token) = token {
            token.check()?;
        }
        let ElementDescriptor {
            kind,
            attributes,
            children,
            on_attach,
            on_detach,
        } = descriptor;
        let parts = Parts {
            attributes,
            children,
            on_attach,
            on_detach,
        };
        match ctx.resolve(&kind)? {
            ResolvedKind::Tag(tag) => Self::construct(ctx, tag, parts, token),
            ResolvedKind::Component { name, factory } => {
                let output = factory(&parts.attributes, &parts.children, ctx)?;
                match output {
                    Renderable::Element(mut produced) => {
                        produced.on_attach.extend(parts.on_attach);
                        produced.on_detach.extend(parts.on_detach);
                        Self::new(ctx, produced, token)
                    }
                    Renderable::Node(RenderNode::Element(node)) => {
                        node.inner.on_attach.borrow_mut().extend(parts.on_attach);
                        node.inner.on_detach.borrow_mut().extend(parts.on_detach);
                        Ok(node)
                    }
                    other => {
                        let wrapper = Parts {
                            attributes: Attributes::default(),
                            children: vec![other],
                            ..parts
                        };
                        Self::construct(ctx, name, wrapper, token)
                    }
                }
            }
        }
    }

    fn construct(
        ctx: &RenderContext,
        tag: String,
        parts: Parts,
        parent_token: Option<&CancellationToken>,
    ) -> Result<Self> {
        let token = parent_token
            .map_or_else(CancellationToken::new, CancellationToken::child)
            .with_warn_threshold(ctx.config().leak_threshold());
        let host = ctx.backend().create_element(&tag);
        let node = Self {
            inner: Rc::new(ElementInner {
                id: ctx.next_id(),
                ctx: ctx.clone(),
                host,
                tag,
                children: RefCell::new(Vec::new()),
                token,
                attached: Cell::new(false),
                disposed: Cell::new(false),
                disposing: Cell::new(false),
                rendering: Cell::new(false),
                dirty: Cell::new(false),
                on_attach: RefCell::new(parts.on_attach),
                on_detach: RefCell::new(parts.on_detach),
                listeners: RefCell::new(Vec::new()),
                dispose_hook: Cell::new(None),
            }),
        };
        ctx.register_owner(host, WeakRenderNode::Element(Rc::downgrade(&node.inner)));

        if let Err(err) = node.populate(parts.attributes, parts.children) {
            node.dispose();
            return Err(err);
        }
        Ok(node)
    }

    fn populate(&self, attributes: Attributes, children: Vec<Renderable>) -> Result<()> {
        let weak = Rc::downgrade(&self.inner);
        let hook = self.inner.token.add(move || {
            if let Some(inner) = weak.upgrade() {
                ElementNode { inner }.dispose();
            }
        })?;
        self.inner.dispose_hook.set(Some(hook));

        for (name, binding) in attributes.into_entries() {
            self.bind_attribute(name, binding)?;
        }
        let mut slots = Vec::with_capacity(children.len());
        for child in children {
            slots.push(self.build_slot(child)?);
        }
        *self.inner.children.borrow_mut() = slots;
        self.render()
    }

    // ── Attributes ───────────────────────────────────────────────────

    fn bind_attribute(&self, name: String, binding: AttrBinding) -> Result<()> {
        let inner = &self.inner;
        let host = inner.host;
        match binding {
            AttrBinding::Static(value) => inner.ctx.backend().set_attribute(host, &name, &value)?,
            AttrBinding::Reactive(source) => {
                let backend = inner.ctx.backend_rc();
                source.listen_and_repeat(
                    move |value: &String| {
                        if let Err(err) = backend.set_attribute(host, &name, value) {
                            tracing::warn!(%err, %host, attribute = %name, "attribute update failed");
                        }
                    },
                    Some(&inner.token),
                )?;
            }
            AttrBinding::ReactiveList(list) => {
                let backend = inner.ctx.backend_rc();
                write_list_attribute(&*backend, host, &name, &list.to_vec())?;
                list.changes().subscribe(
                    move |change| {
                        if let Err(err) = write_list_attribute(&*backend, host, &name, &change.new_state) {
                            tracing::warn!(%err, %host, attribute = %name, "attribute update failed");
                        }
                    },
                    Some(&inner.token),
                )?;
            }
            AttrBinding::Callback(handler) => {
                let id = inner.ctx.backend().add_event_listener(host, &name, handler)?;
                inner.listeners.borrow_mut().push(id);
            }
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn host(&self) -> HostNode {
        self.inner.host
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// Token ending with this node; children are scoped under it.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    #[must_use]
    pub fn context(&self) -> &RenderContext {
        &self.inner.ctx
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.attached.get()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Number of child positions in the model list.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Live child nodes, fragments flattened, in model order.
    #[must_use]
    pub fn child_nodes(&self) -> Vec<RenderNode> {
        let slots = self.inner.children.borrow().clone();
        flatten(&slots)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Child mutation ───────────────────────────────────────────────

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(ArborError::Disposed {
                node_id: self.inner.id,
            });
        }
        Ok(())
    }

    fn build_slot(&self, child: Renderable) -> Result<Slot> {
        let slot = self.inner.ctx.build(child, Some(&self.inner.token))?;
        if let Slot::Fragment(fragment) = &slot {
            let weak = Rc::downgrade(&self.inner);
            fragment.changed().subscribe(
                move |_: &()| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let node = ElementNode { inner };
                    if let Err(err) = node.render() {
                        tracing::warn!(%err, node_id = node.id(), "render after fragment change failed");
                    }
                },
                Some(fragment.token()),
            )?;
        }
        Ok(slot)
    }

    /// Append a child and render.
    ///
    /// # Errors
    ///
    /// `Disposed` once disposed, or any error building the child.
    pub fn add_child(&self, child: impl Into<Renderable>) -> Result<()> {
        self.ensure_live()?;
        let slot = self.build_slot(child.into())?;
        self.inner.children.borrow_mut().push(slot);
        self.render()
    }

    /// Insert a child at model position `index` and render.
    ///
    /// # Errors
    ///
    /// `Disposed` once disposed, `IndexOutOfBounds` when `index > child_count()`.
    pub fn insert_child(&self, index: usize, child: impl Into<Renderable>) -> Result<()> {
        self.ensure_live()?;
        let len = self.child_count();
        if index > len {
            return Err(ArborError::out_of_bounds(index, len));
        }
        let slot = self.build_slot(child.into())?;
        self.inner.children.borrow_mut().insert(index, slot);
        self.render()
    }

    /// Remove and dispose the child at model position `index`, then render.
    ///
    /// # Errors
    ///
    /// `Disposed` once disposed, `IndexOutOfBounds` for a missing position.
    pub fn remove_child_at(&self, index: usize) -> Result<()> {
        self.ensure_live()?;
        let len = self.child_count();
        if index >= len {
            return Err(ArborError::out_of_bounds(index, len));
        }
        let removed = self.inner.children.borrow_mut().remove(index);
        removed.dispose(true);
        self.render()
    }

    /// Exchange two model positions and render. Equal indices do nothing.
    ///
    /// # Errors
    ///
    /// `Disposed` once disposed, `IndexOutOfBounds` for a missing position.
    pub fn swap_children(&self, a: usize, b: usize) -> Result<()> {
        self.ensure_live()?;
        let len = self.child_count();
        if a >= len || b >= len {
            return Err(ArborError::out_of_bounds(a.max(b), len));
        }
        if a == b {
            return Ok(());
        }
        self.inner.children.borrow_mut().swap(a, b);
        self.render()
    }

    /// Replace the whole model list and render.
    ///
    /// Existing nodes passed back in as [`Renderable::Node`] are kept; every
    /// other previous child is disposed.
    ///
    /// # Errors
    ///
    /// `Disposed` once disposed, or any error building the new children.
    pub fn set_children<I>(&self, children: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Renderable>,
    {
        self.ensure_live()?;
        let mut next = Vec::new();
        for child in children {
            next.push(self.build_slot(child.into())?);
        }
        let previous = self.inner.children.replace(next.clone());
        for old in &previous {
            if !next.iter().any(|slot| slot.ptr_eq(old)) {
                old.dispose(true);
            }
        }
        self.render()
    }

    /// Dispose every child and render.
    ///
    /// # Errors
    ///
    /// `Disposed` once disposed.
    pub fn clear_children(&self) -> Result<()> {
        self.set_children(std::iter::empty::<Renderable>())
    }

    // ── Rendering ────────────────────────────────────────────────────

    /// Reconcile the host children against the model list.
    ///
    /// Calls made while a render of this node is already running are folded
    /// into one extra pass.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn render(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.disposed.get() {
            tracing::warn!(node_id = inner.id, tag = %inner.tag, "render called on disposed element");
            return Ok(());
        }
        if inner.rendering.replace(true) {
            inner.dirty.set(true);
            return Ok(());
        }
        let result = loop {
            inner.dirty.set(false);
            if let Err(err) = self.render_pass() {
                break Err(err);
            }
            if !inner.dirty.get() || inner.disposed.get() {
                break Ok(());
            }
        };
        inner.rendering.set(false);
        result
    }

    fn render_pass(&self) -> Result<()> {
        let inner = &self.inner;
        let nodes = self.child_nodes();
        let model: Vec<HostNode> = nodes.iter().map(RenderNode::host).collect();

        let span = tracing::debug_span!(
            "arbor.render",
            node_id = inner.id,
            model_len = model.len(),
            ops = tracing::field::Empty
        );
        let _guard = span.enter();

        let outcome = reconcile(inner.ctx.backend(), inner.host, &model)?;
        span.record("ops", outcome.ops());

        for host in &outcome.removed {
            if let Some(owner) = inner.ctx.owner_of(*host) {
                owner.dispose_inner(false);
            }
        }
        if inner.attached.get() {
            for node in &nodes {
                node.attach();
            }
        }
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Mark the subtree attached if the host is connected, running
    /// `on_attach` hooks parent first.
    pub(crate) fn attach(&self) {
        let inner = &self.inner;
        if inner.disposed.get() || inner.attached.get() {
            return;
        }
        if !inner.ctx.backend().is_connected(inner.host) {
            return;
        }
        inner.attached.set(true);
        tracing::debug!(node_id = inner.id, tag = %inner.tag, "element attached");
        let hooks = inner.on_attach.borrow().clone();
        for hook in &hooks {
            hook(self);
        }
        for child in self.child_nodes() {
            child.attach();
        }
    }

    /// Detach if the host is no longer connected.
    pub(crate) fn detach(&self) {
        if self.inner.attached.get() && !self.inner.ctx.backend().is_connected(self.inner.host) {
            self.detach_now();
        }
    }

    fn detach_now(&self) {
        let inner = &self.inner;
        if !inner.attached.replace(false) {
            return;
        }
        tracing::debug!(node_id = inner.id, tag = %inner.tag, "element detached");
        let hooks = inner.on_detach.borrow().clone();
        for hook in &hooks {
            hook(self);
        }
        for child in self.child_nodes() {
            if let RenderNode::Element(element) = child {
                element.detach_now();
            }
        }
    }

    /// Detach, release listeners and bindings, dispose every child, and
    /// cancel the node's token. Later calls do nothing.
    pub fn dispose(&self) {
        self.dispose_inner(true);
    }

    pub(crate) fn dispose_inner(&self, remove_host: bool) {
        let inner = &self.inner;
        if inner.disposing.get() {
            tracing::warn!(node_id = inner.id, tag = %inner.tag, "dispose re-entered while disposing");
            return;
        }
        if inner.disposed.get() {
            return;
        }
        inner.disposing.set(true);
        if let Some(hook) = inner.dispose_hook.take() {
            inner.token.remove(hook);
        }
        self.detach_now();
        inner.disposed.set(true);

        let backend = inner.ctx.backend();
        if remove_host
            && let Some(parent) = backend.parent(inner.host)
            && let Err(err) = backend.remove_child(parent, inner.host)
        {
            tracing::warn!(%err, node_id = inner.id, "failed to remove disposed element");
        }
        for listener in inner.listeners.take() {
            if let Err(err) = backend.remove_event_listener(inner.host, listener) {
                tracing::warn!(%err, node_id = inner.id, "failed to remove event listener");
            }
        }
        for slot in &inner.children.take() {
            slot.dispose(false);
        }
        inner.ctx.forget(inner.host);
        inner.token.cancel();
        inner.disposing.set(false);
        tracing::debug!(node_id = inner.id, tag = %inner.tag, "element disposed");
    }
}

fn write_list_attribute(
    backend: &dyn crate::backend::RenderBackend,
    host: HostNode,
    name: &str,
    items: &[String],
) -> Result<()> {
    if items.is_empty() {
        backend.remove_attribute(host, name)
    } else {
        backend.set_attribute(host, name, &items.join(" "))
    }
}
