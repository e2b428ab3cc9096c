#![forbid(unsafe_code)]

//! Render-target boundary.
//!
//! arbor never touches a concrete UI toolkit. Everything it does to the host
//! tree goes through [`RenderBackend`], which addresses host nodes by opaque
//! [`HostNode`] ids. [`HeadlessBackend`](crate::headless::HeadlessBackend) is
//! the in-memory implementation used by tests and benches.

use std::rc::Rc;

use arbor_core::Result;

/// Opaque id of a node in the host tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostNode(pub u64);

impl std::fmt::Display for HostNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle returned by [`RenderBackend::add_event_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Event delivered by the host to a registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    /// Event name, e.g. `"click"`.
    pub name: String,
    /// Node the event was dispatched on.
    pub target: HostNode,
    /// Optional payload (input value, key name, ...).
    pub detail: Option<String>,
}

pub type EventHandler = Rc<dyn Fn(&HostEvent)>;

/// Operations arbor needs from a host render tree.
///
/// Every method takes `&self`; implementations keep their tree behind
/// interior mutability so one backend can be shared by every node of a
/// render context.
pub trait RenderBackend {
    /// Create a detached element node.
    fn create_element(&self, tag: &str) -> HostNode;

    /// Create a detached text node.
    fn create_text(&self, text: &str) -> HostNode;

    /// Replace the content of a text node.
    ///
    /// # Errors
    ///
    /// `UnknownHostNode` if `node` does not exist.
    fn set_text(&self, node: HostNode, text: &str) -> Result<()>;

    /// # Errors
    ///
    /// `UnknownHostNode` if `node` does not exist.
    fn set_attribute(&self, node: HostNode, name: &str, value: &str) -> Result<()>;

    /// # Errors
    ///
    /// `UnknownHostNode` if `node` does not exist.
    fn remove_attribute(&self, node: HostNode, name: &str) -> Result<()>;

    /// Children of `node`, in order.
    ///
    /// # Errors
    ///
    /// `UnknownHostNode` if `node` does not exist.
    fn children(&self, node: HostNode) -> Result<Vec<HostNode>>;

    /// Current parent of `node`, if it has one.
    fn parent(&self, node: HostNode) -> Option<HostNode>;

    /// Insert `child` under `parent` before `reference`; `None` appends.
    ///
    /// A child that already has a parent is moved.
    ///
    /// # Errors
    ///
    /// `UnknownHostNode` if any node does not exist or `reference` is not a
    /// child of `parent`.
    fn insert_before(
        &self,
        parent: HostNode,
        child: HostNode,
        reference: Option<HostNode>,
    ) -> Result<()>;

    /// # Errors
    ///
    /// `UnknownHostNode` if `child` is not a child of `parent`.
    fn remove_child(&self, parent: HostNode, child: HostNode) -> Result<()>;

    /// Exchange the positions of two children of `parent`.
    ///
    /// # Errors
    ///
    /// `UnknownHostNode` if either node is not a child of `parent`.
    fn swap_children(&self, parent: HostNode, a: HostNode, b: HostNode) -> Result<()>;

    /// # Errors
    ///
    /// `UnknownHostNode` if `node` does not exist.
    fn add_event_listener(
        &self,
        node: HostNode,
        event: &str,
        handler: EventHandler,
    ) -> Result<ListenerId>;

    /// # Errors
    ///
    /// `UnknownHostNode` if `node` does not exist.
    fn remove_event_listener(&self, node: HostNode, listener: ListenerId) -> Result<()>;

    /// Whether `node` is part of the live, displayed tree.
    fn is_connected(&self, node: HostNode) -> bool;
}
