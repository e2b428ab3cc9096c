#![forbid(unsafe_code)]

//! Child positions of an element.
//!
//! Each child position is a [`Slot`]: either one concrete node or a
//! [`Fragment`] standing in for zero or more nodes. Flattening the slots in
//! order yields the host children an element should have.

use std::rc::Weak;

use arbor_core::Result;

use crate::backend::HostNode;
use crate::fragment::Fragment;
use crate::node::{ElementInner, ElementNode};
use crate::text::{TextInner, TextNode};

/// A concrete node owning exactly one host node.
#[derive(Clone)]
pub enum RenderNode {
    Element(ElementNode),
    Text(TextNode),
}

impl std::fmt::Debug for RenderNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Element(node) => std::fmt::Debug::fmt(node, f),
            Self::Text(node) => std::fmt::Debug::fmt(node, f),
        }
    }
}

impl RenderNode {
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Element(node) => node.id(),
            Self::Text(node) => node.id(),
        }
    }

    #[must_use]
    pub fn host(&self) -> HostNode {
        match self {
            Self::Element(node) => node.host(),
            Self::Text(node) => node.host(),
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        match self {
            Self::Element(node) => node.is_disposed(),
            Self::Text(node) => node.is_disposed(),
        }
    }

    #[must_use]
    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            Self::Element(node) => Some(node),
            Self::Text(_) => None,
        }
    }

    /// Append a child.
    ///
    /// # Errors
    ///
    /// `TextNodeChildren` for text nodes; otherwise as
    /// [`ElementNode::add_child`].
    pub fn add_child(&self, child: impl Into<crate::Renderable>) -> Result<()> {
        match self {
            Self::Element(node) => node.add_child(child),
            Self::Text(node) => node.add_child(child),
        }
    }

    /// Release the node, its subtree, and its tokens.
    pub fn dispose(&self) {
        self.dispose_inner(true);
    }

    pub(crate) fn dispose_inner(&self, remove_host: bool) {
        match self {
            Self::Element(node) => node.dispose_inner(remove_host),
            Self::Text(node) => node.dispose_inner(remove_host),
        }
    }

    pub(crate) fn attach(&self) {
        if let Self::Element(node) = self {
            node.attach();
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Element(a), Self::Element(b)) => a.ptr_eq(b),
            (Self::Text(a), Self::Text(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Non-owning [`RenderNode`] handle, stored in the host→owner side table.
#[derive(Clone)]
pub(crate) enum WeakRenderNode {
    Element(Weak<ElementInner>),
    Text(Weak<TextInner>),
}

impl WeakRenderNode {
    pub(crate) fn upgrade(&self) -> Option<RenderNode> {
        match self {
            Self::Element(weak) => weak
                .upgrade()
                .map(|inner| RenderNode::Element(ElementNode::from_inner(inner))),
            Self::Text(weak) => weak
                .upgrade()
                .map(|inner| RenderNode::Text(TextNode::from_inner(inner))),
        }
    }
}

/// One child position of an element or fragment.
#[derive(Clone)]
pub(crate) enum Slot {
    Node(RenderNode),
    Fragment(Fragment),
}

impl Slot {
    /// Append the live nodes of this slot, in order. Disposed nodes are skipped.
    pub(crate) fn collect_nodes(&self, out: &mut Vec<RenderNode>) {
        match self {
            Self::Node(node) => {
                if !node.is_disposed() {
                    out.push(node.clone());
                }
            }
            Self::Fragment(fragment) => fragment.collect_nodes(out),
        }
    }

    pub(crate) fn dispose(&self, remove_host: bool) {
        match self {
            Self::Node(node) => node.dispose_inner(remove_host),
            Self::Fragment(fragment) => fragment.dispose_inner(remove_host),
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Node(a), Self::Node(b)) => a.ptr_eq(b),
            (Self::Fragment(a), Self::Fragment(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Flatten `slots` into their live nodes.
pub(crate) fn flatten(slots: &[Slot]) -> Vec<RenderNode> {
    let mut out = Vec::new();
    for slot in slots {
        slot.collect_nodes(&mut out);
    }
    out
}
