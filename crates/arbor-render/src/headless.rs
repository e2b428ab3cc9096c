#![forbid(unsafe_code)]

//! In-memory [`RenderBackend`] for tests and benchmarks.
//!
//! Nodes live in an arena indexed by [`HostNode`] id and are never freed.
//! Node `#0` is the document root and is always connected; any node whose
//! ancestor chain reaches it is connected too. Every tree mutation is
//! appended to a log so tests can assert exactly what reconciliation did.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::rc::Rc;

use arbor_core::{ArborError, Result};

use crate::backend::{EventHandler, HostEvent, HostNode, ListenerId, RenderBackend};

/// One recorded host-tree mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateElement { node: HostNode, tag: String },
    CreateText { node: HostNode, text: String },
    SetText { node: HostNode, text: String },
    SetAttribute { node: HostNode, name: String, value: String },
    RemoveAttribute { node: HostNode, name: String },
    Insert { parent: HostNode, child: HostNode, before: Option<HostNode> },
    Remove { parent: HostNode, child: HostNode },
    Swap { parent: HostNode, a: HostNode, b: HostNode },
    AddListener { node: HostNode, event: String },
    RemoveListener { node: HostNode },
}

impl Mutation {
    /// Whether this mutation changes the shape of the tree.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Insert { .. } | Self::Remove { .. } | Self::Swap { .. }
        )
    }
}

#[derive(Debug)]
enum Content {
    Document,
    Element(String),
    Text(String),
}

struct Listener {
    id: ListenerId,
    event: String,
    handler: EventHandler,
}

struct NodeData {
    content: Content,
    attributes: BTreeMap<String, String>,
    children: Vec<HostNode>,
    parent: Option<HostNode>,
    listeners: Vec<Listener>,
}

impl NodeData {
    fn new(content: Content) -> Self {
        Self {
            content,
            attributes: BTreeMap::new(),
            children: Vec::new(),
            parent: None,
            listeners: Vec::new(),
        }
    }
}

struct HeadlessInner {
    arena: RefCell<Vec<NodeData>>,
    log: RefCell<Vec<Mutation>>,
    next_listener: Cell<u64>,
}

/// Arena-backed host tree with a connected document root.
///
/// Cloning creates a new handle to the **same** tree.
#[derive(Clone)]
pub struct HeadlessBackend {
    inner: Rc<HeadlessInner>,
}

impl std::fmt::Debug for HeadlessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessBackend")
            .field("nodes", &self.inner.arena.borrow().len())
            .field("mutations", &self.inner.log.borrow().len())
            .finish()
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

const DOCUMENT: HostNode = HostNode(0);

fn slot(node: HostNode) -> usize {
    usize::try_from(node.0).unwrap_or(usize::MAX)
}

fn unknown(node: HostNode) -> ArborError {
    ArborError::UnknownHostNode { host: node.0 }
}

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(HeadlessInner {
                arena: RefCell::new(vec![NodeData::new(Content::Document)]),
                log: RefCell::new(Vec::new()),
                next_listener: Cell::new(1),
            }),
        }
    }

    /// The always-connected document root.
    #[must_use]
    pub fn document(&self) -> HostNode {
        DOCUMENT
    }

    /// Create an element and append it to the document, for use as a mount
    /// container.
    pub fn create_container(&self, tag: &str) -> Result<HostNode> {
        let node = self.create_element(tag);
        self.insert_before(DOCUMENT, node, None)?;
        Ok(node)
    }

    fn push(&self, content: Content) -> HostNode {
        let mut arena = self.inner.arena.borrow_mut();
        let node = HostNode(arena.len() as u64);
        arena.push(NodeData::new(content));
        node
    }

    fn record(&self, mutation: Mutation) {
        self.inner.log.borrow_mut().push(mutation);
    }

    fn with_node<R>(&self, node: HostNode, f: impl FnOnce(&mut NodeData) -> R) -> Result<R> {
        let mut arena = self.inner.arena.borrow_mut();
        let data = arena.get_mut(slot(node)).ok_or_else(|| unknown(node))?;
        Ok(f(data))
    }

    fn detach_from_parent(arena: &mut [NodeData], child: HostNode) {
        let Some(parent) = arena.get_mut(slot(child)).and_then(|d| d.parent.take()) else {
            return;
        };
        if let Some(data) = arena.get_mut(slot(parent)) {
            data.children.retain(|c| *c != child);
        }
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// Snapshot of the mutation log.
    #[must_use]
    pub fn mutations(&self) -> Vec<Mutation> {
        self.inner.log.borrow().clone()
    }

    /// Drain the mutation log.
    pub fn take_mutations(&self) -> Vec<Mutation> {
        std::mem::take(&mut *self.inner.log.borrow_mut())
    }

    pub fn clear_mutations(&self) {
        self.inner.log.borrow_mut().clear();
    }

    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.inner.log.borrow().len()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.arena.borrow().len()
    }

    #[must_use]
    pub fn tag(&self, node: HostNode) -> Option<String> {
        match &self.inner.arena.borrow().get(slot(node))?.content {
            Content::Element(tag) => Some(tag.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn text(&self, node: HostNode) -> Option<String> {
        match &self.inner.arena.borrow().get(slot(node))?.content {
            Content::Text(text) => Some(text.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn attribute(&self, node: HostNode, name: &str) -> Option<String> {
        self.inner
            .arena
            .borrow()
            .get(slot(node))?
            .attributes
            .get(name)
            .cloned()
    }

    #[must_use]
    pub fn listener_count(&self, node: HostNode) -> usize {
        self.inner
            .arena
            .borrow()
            .get(slot(node))
            .map_or(0, |d| d.listeners.len())
    }

    /// Concatenated text of `node` and its descendants.
    #[must_use]
    pub fn text_content(&self, node: HostNode) -> String {
        let arena = self.inner.arena.borrow();
        let mut out = String::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let Some(data) = arena.get(slot(current)) else {
                continue;
            };
            if let Content::Text(text) = &data.content {
                out.push_str(text);
            }
            stack.extend(data.children.iter().rev());
        }
        out
    }

    /// Compact markup rendering of the subtree rooted at `node`, e.g.
    /// `<ul class="x"><li>a</li></ul>`.
    #[must_use]
    pub fn serialize(&self, node: HostNode) -> String {
        let arena = self.inner.arena.borrow();
        let mut out = String::new();
        Self::serialize_into(&arena, node, &mut out);
        out
    }

    fn serialize_into(arena: &[NodeData], node: HostNode, out: &mut String) {
        let Some(data) = arena.get(slot(node)) else {
            return;
        };
        let tag = match &data.content {
            Content::Text(text) => {
                out.push_str(text);
                return;
            }
            Content::Document => "#document",
            Content::Element(tag) => tag.as_str(),
        };
        out.push('<');
        out.push_str(tag);
        for (name, value) in &data.attributes {
            let _ = write!(out, " {name}=\"{value}\"");
        }
        out.push('>');
        for child in &data.children {
            Self::serialize_into(arena, *child, out);
        }
        let _ = write!(out, "</{tag}>");
    }

    /// Invoke every `event` listener registered on `node`. Returns how many ran.
    pub fn dispatch(&self, node: HostNode, event: &str, detail: Option<&str>) -> Result<usize> {
        let handlers: Vec<EventHandler> = self.with_node(node, |data| {
            data.listeners
                .iter()
                .filter(|l| l.event == event)
                .map(|l| Rc::clone(&l.handler))
                .collect()
        })?;
        let payload = HostEvent {
            name: event.to_string(),
            target: node,
            detail: detail.map(str::to_string),
        };
        for handler in &handlers {
            handler(&payload);
        }
        Ok(handlers.len())
    }
}

impl RenderBackend for HeadlessBackend {
    fn create_element(&self, tag: &str) -> HostNode {
        let node = self.push(Content::Element(tag.to_string()));
        self.record(Mutation::CreateElement {
            node,
            tag: tag.to_string(),
        });
        node
    }

    fn create_text(&self, text: &str) -> HostNode {
        let node = self.push(Content::Text(text.to_string()));
        self.record(Mutation::CreateText {
            node,
            text: text.to_string(),
        });
        node
    }

    fn set_text(&self, node: HostNode, text: &str) -> Result<()> {
        self.with_node(node, |data| match &mut data.content {
            Content::Text(current) => {
                *current = text.to_string();
                Ok(())
            }
            _ => Err(unknown(node)),
        })??;
        self.record(Mutation::SetText {
            node,
            text: text.to_string(),
        });
        Ok(())
    }

    fn set_attribute(&self, node: HostNode, name: &str, value: &str) -> Result<()> {
        self.with_node(node, |data| {
            data.attributes.insert(name.to_string(), value.to_string());
        })?;
        self.record(Mutation::SetAttribute {
            node,
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn remove_attribute(&self, node: HostNode, name: &str) -> Result<()> {
        self.with_node(node, |data| {
            data.attributes.remove(name);
        })?;
        self.record(Mutation::RemoveAttribute {
            node,
            name: name.to_string(),
        });
        Ok(())
    }

    fn children(&self, node: HostNode) -> Result<Vec<HostNode>> {
        self.with_node(node, |data| data.children.clone())
    }

    fn parent(&self, node: HostNode) -> Option<HostNode> {
        self.inner.arena.borrow().get(slot(node))?.parent
    }

    fn insert_before(
        &self,
        parent: HostNode,
        child: HostNode,
        reference: Option<HostNode>,
    ) -> Result<()> {
        {
            let mut arena = self.inner.arena.borrow_mut();
            if arena.get(slot(child)).is_none() || child == DOCUMENT {
                return Err(unknown(child));
            }
            if arena.get(slot(parent)).is_none() {
                return Err(unknown(parent));
            }
            if let Some(reference) = reference
                && arena[slot(parent)].children.iter().all(|c| *c != reference)
            {
                return Err(unknown(reference));
            }
            Self::detach_from_parent(&mut arena, child);
            let siblings = &mut arena[slot(parent)].children;
            let at = reference
                .and_then(|r| siblings.iter().position(|c| *c == r))
                .unwrap_or(siblings.len());
            siblings.insert(at, child);
            arena[slot(child)].parent = Some(parent);
        }
        self.record(Mutation::Insert {
            parent,
            child,
            before: reference,
        });
        Ok(())
    }

    fn remove_child(&self, parent: HostNode, child: HostNode) -> Result<()> {
        {
            let mut arena = self.inner.arena.borrow_mut();
            if arena.get(slot(child)).and_then(|d| d.parent) != Some(parent) {
                return Err(unknown(child));
            }
            Self::detach_from_parent(&mut arena, child);
        }
        self.record(Mutation::Remove { parent, child });
        Ok(())
    }

    fn swap_children(&self, parent: HostNode, a: HostNode, b: HostNode) -> Result<()> {
        self.with_node(parent, |data| {
            let i = data.children.iter().position(|c| *c == a);
            let j = data.children.iter().position(|c| *c == b);
            match (i, j) {
                (Some(i), Some(j)) => {
                    data.children.swap(i, j);
                    Ok(())
                }
                (None, _) => Err(unknown(a)),
                (_, None) => Err(unknown(b)),
            }
        })??;
        self.record(Mutation::Swap { parent, a, b });
        Ok(())
    }

    fn add_event_listener(
        &self,
        node: HostNode,
        event: &str,
        handler: EventHandler,
    ) -> Result<ListenerId> {
        let id = ListenerId(self.inner.next_listener.get());
        self.with_node(node, |data| {
            data.listeners.push(Listener {
                id,
                event: event.to_string(),
                handler,
            });
        })?;
        self.inner.next_listener.set(id.0 + 1);
        self.record(Mutation::AddListener {
            node,
            event: event.to_string(),
        });
        Ok(id)
    }

    fn remove_event_listener(&self, node: HostNode, listener: ListenerId) -> Result<()> {
        self.with_node(node, |data| data.listeners.retain(|l| l.id != listener))?;
        self.record(Mutation::RemoveListener { node });
        Ok(())
    }

    fn is_connected(&self, node: HostNode) -> bool {
        let arena = self.inner.arena.borrow();
        let mut current = Some(node);
        while let Some(n) = current {
            if n == DOCUMENT {
                return true;
            }
            current = arena.get(slot(n)).and_then(|d| d.parent);
        }
        false
    }
}
