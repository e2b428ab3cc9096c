#![forbid(unsafe_code)]

//! Shared state for one render tree.
//!
//! A [`RenderContext`] owns the backend handle, the node id generator, the
//! configuration, and the host→owner side table. Every node built through a
//! context holds a handle to it.
//!
//! # Invariants
//!
//! 1. The side table stores weak handles only: it never keeps a node alive.
//! 2. An entry is removed when its node is disposed.
//! 3. Ids are unique per context and strictly increasing.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use arbor_core::{ArborError, CancellationToken, IdGenerator, Result};

use crate::backend::{HostNode, RenderBackend};
use crate::config::RenderConfig;
use crate::descriptor::{ComponentFn, ElementDescriptor, NodeKind, Renderable};
use crate::fragment::Fragment;
use crate::node::ElementNode;
use crate::registry::KindHandler;
use crate::slot::{RenderNode, Slot, WeakRenderNode};
use crate::text::TextNode;

struct ContextInner {
    backend: Rc<dyn RenderBackend>,
    ids: IdGenerator,
    owners: RefCell<AHashMap<HostNode, WeakRenderNode>>,
    config: RenderConfig,
}

/// Handle to a render tree's shared state.
///
/// Cloning creates a new handle to the **same** context.
#[derive(Clone)]
pub struct RenderContext {
    inner: Rc<ContextInner>,
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("next_id", &self.inner.ids.peek())
            .field("owners", &self.inner.owners.borrow().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Outcome of looking up a descriptor kind.
pub(crate) enum ResolvedKind {
    Tag(String),
    Component { name: String, factory: ComponentFn },
}

impl RenderContext {
    #[must_use]
    pub fn new(backend: Rc<dyn RenderBackend>, config: RenderConfig) -> Self {
        Self::with_ids(backend, config, IdGenerator::new())
    }

    /// Context drawing node ids from `ids`.
    #[must_use]
    pub fn with_ids(backend: Rc<dyn RenderBackend>, config: RenderConfig, ids: IdGenerator) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                backend,
                ids,
                owners: RefCell::new(AHashMap::new()),
                config,
            }),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &dyn RenderBackend {
        &*self.inner.backend
    }

    pub(crate) fn backend_rc(&self) -> Rc<dyn RenderBackend> {
        Rc::clone(&self.inner.backend)
    }

    #[must_use]
    pub fn config(&self) -> &RenderConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn ids(&self) -> &IdGenerator {
        &self.inner.ids
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.inner.ids.next_id()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Side table ───────────────────────────────────────────────────

    pub(crate) fn register_owner(&self, host: HostNode, owner: WeakRenderNode) {
        self.inner.owners.borrow_mut().insert(host, owner);
    }

    pub(crate) fn forget(&self, host: HostNode) {
        self.inner.owners.borrow_mut().remove(&host);
    }

    /// Live node owning `host`, if any.
    #[must_use]
    pub fn owner_of(&self, host: HostNode) -> Option<RenderNode> {
        let weak = self.inner.owners.borrow().get(&host).cloned()?;
        weak.upgrade()
    }

    /// Number of host nodes with a registered owner.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.inner.owners.borrow().len()
    }

    // ── Building ─────────────────────────────────────────────────────

    /// Build a live element from `descriptor`, scoped under `token`.
    ///
    /// # Errors
    ///
    /// `TokenCanceled` if `token` has ended, `UnknownNodeKind` for kinds
    /// rejected by the registry, or any error raised by a component.
    pub fn create_element(
        &self,
        descriptor: ElementDescriptor,
        token: Option<&CancellationToken>,
    ) -> Result<ElementNode> {
        ElementNode::new(self, descriptor, token)
    }

    /// Build a static text node.
    ///
    /// # Errors
    ///
    /// `TokenCanceled` if `token` has ended.
    pub fn create_text(&self, text: &str, token: Option<&CancellationToken>) -> Result<TextNode> {
        TextNode::new(self, text, token)
    }

    pub(crate) fn resolve(&self, kind: &NodeKind) -> Result<ResolvedKind> {
        match kind {
            NodeKind::Component { name, factory } => Ok(ResolvedKind::Component {
                name: name.clone(),
                factory: Rc::clone(factory),
            }),
            NodeKind::Tag(name) => match self.inner.config.registry().resolve(name) {
                Some(KindHandler::Element { tag }) => Ok(ResolvedKind::Tag(tag.clone())),
                Some(KindHandler::Component(factory)) => Ok(ResolvedKind::Component {
                    name: name.clone(),
                    factory: Rc::clone(factory),
                }),
                None if self.inner.config.strict_kinds() => Err(ArborError::unknown_kind(name)),
                None => Ok(ResolvedKind::Tag(name.clone())),
            },
        }
    }

    /// Turn one child renderable into a slot.
    pub(crate) fn build(
        &self,
        renderable: Renderable,
        token: Option<&CancellationToken>,
    ) -> Result<Slot> {
        let slot = match renderable {
            Renderable::Empty => Slot::Fragment(Fragment::list(self, Vec::new(), token)?),
            Renderable::Text(text) => Slot::Node(RenderNode::Text(TextNode::new(self, &text, token)?)),
            Renderable::ReactiveText(source) => {
                Slot::Node(RenderNode::Text(TextNode::reactive(self, &source, token)?))
            }
            Renderable::Element(descriptor) => {
                Slot::Node(RenderNode::Element(ElementNode::new(self, descriptor, token)?))
            }
            Renderable::List(items) => Slot::Fragment(Fragment::list(self, items, token)?),
            Renderable::Reactive(source) => Slot::Fragment(Fragment::reactive(self, &source, token)?),
            Renderable::Collection(array) => Slot::Fragment(Fragment::collection(self, array, token)?),
            Renderable::Node(node) => Slot::Node(node),
        };
        Ok(slot)
    }
}
