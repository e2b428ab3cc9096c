#![forbid(unsafe_code)]

//! Declarative node descriptions.
//!
//! An [`ElementDescriptor`] is inert data: a kind, attribute bindings,
//! children, and lifecycle hooks. Nothing touches the backend until a
//! [`RenderContext`] turns it into live nodes.

use std::rc::Rc;

use arbor_core::Result;
use arbor_reactive::{ArrayDataSource, DataSource, ReadableArray};

use crate::backend::{EventHandler, HostEvent};
use crate::context::RenderContext;
use crate::node::ElementNode;
use crate::slot::RenderNode;
use crate::text::TextNode;

/// Component factory: `(attributes, children, context) -> output`.
pub type ComponentFn = Rc<dyn Fn(&Attributes, &[Renderable], &RenderContext) -> Result<Renderable>>;

/// Callback run with the node it was registered on.
pub type LifecycleHook = Rc<dyn Fn(&ElementNode)>;

/// Kind of a descriptor.
#[derive(Clone)]
pub enum NodeKind {
    /// Name looked up in the [`ElementRegistry`](crate::ElementRegistry).
    Tag(String),
    /// Inline component factory.
    Component { name: String, factory: ComponentFn },
}

impl NodeKind {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Tag(name) | Self::Component { name, .. } => name,
        }
    }
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tag(name) => f.debug_tuple("Tag").field(name).finish(),
            Self::Component { name, .. } => f.debug_tuple("Component").field(name).finish(),
        }
    }
}

// ─── Attributes ──────────────────────────────────────────────────────────────

/// How an attribute value reaches the host node.
#[derive(Clone)]
pub enum AttrBinding {
    /// Written once at construction.
    Static(String),
    /// Rewritten on every update of the source.
    Reactive(DataSource<String>),
    /// Items joined with spaces; the attribute is removed while the list is empty.
    ReactiveList(ArrayDataSource<String>),
    /// Event listener; the attribute name is the event name.
    Callback(EventHandler),
}

impl std::fmt::Debug for AttrBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Reactive(source) => f.debug_tuple("Reactive").field(&source.value()).finish(),
            Self::ReactiveList(list) => f.debug_tuple("ReactiveList").field(&list.to_vec()).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Ordered attribute bindings of a descriptor. Later bindings for the same
/// name override earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    entries: Vec<(String, AttrBinding)>,
}

impl Attributes {
    pub fn set(&mut self, name: impl Into<String>, binding: AttrBinding) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = binding,
            None => self.entries.push((name, binding)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttrBinding> {
        self.entries
            .iter()
            .find_map(|(n, binding)| (n == name).then_some(binding))
    }

    /// Value of a [`AttrBinding::Static`] attribute.
    #[must_use]
    pub fn static_value(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            AttrBinding::Static(value) => Some(value),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrBinding)> {
        self.entries.iter().map(|(n, b)| (n.as_str(), b))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, AttrBinding)> {
        self.entries
    }
}

// ─── Renderable ──────────────────────────────────────────────────────────────

/// Anything that can sit in a child position.
#[derive(Clone, Default)]
pub enum Renderable {
    /// Produces no host nodes.
    #[default]
    Empty,
    Text(String),
    ReactiveText(DataSource<String>),
    Element(ElementDescriptor),
    /// Several children sharing one position.
    List(Vec<Renderable>),
    /// Child rebuilt whenever the source updates.
    Reactive(DataSource<Renderable>),
    /// One child per collection item, kept in step with every change.
    Collection(Rc<dyn ReadableArray<Renderable>>),
    /// An already constructed node.
    Node(RenderNode),
}

impl Renderable {
    /// Wrap any readable collection (including derived views).
    pub fn collection(array: impl ReadableArray<Renderable> + 'static) -> Self {
        Self::Collection(Rc::new(array))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl std::fmt::Debug for Renderable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::ReactiveText(source) => f.debug_tuple("ReactiveText").field(&source.value()).finish(),
            Self::Element(descriptor) => std::fmt::Debug::fmt(descriptor, f),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Reactive(_) => f.write_str("Reactive(..)"),
            Self::Collection(array) => f.debug_struct("Collection").field("len", &array.len()).finish(),
            Self::Node(node) => f.debug_tuple("Node").field(&node.id()).finish(),
        }
    }
}

impl From<&str> for Renderable {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Renderable {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<DataSource<String>> for Renderable {
    fn from(source: DataSource<String>) -> Self {
        Self::ReactiveText(source)
    }
}

impl From<DataSource<Renderable>> for Renderable {
    fn from(source: DataSource<Renderable>) -> Self {
        Self::Reactive(source)
    }
}

impl From<ArrayDataSource<Renderable>> for Renderable {
    fn from(array: ArrayDataSource<Renderable>) -> Self {
        Self::collection(array)
    }
}

impl From<ElementDescriptor> for Renderable {
    fn from(descriptor: ElementDescriptor) -> Self {
        Self::Element(descriptor)
    }
}

impl From<Vec<Renderable>> for Renderable {
    fn from(items: Vec<Renderable>) -> Self {
        Self::List(items)
    }
}

impl From<RenderNode> for Renderable {
    fn from(node: RenderNode) -> Self {
        Self::Node(node)
    }
}

impl From<ElementNode> for Renderable {
    fn from(node: ElementNode) -> Self {
        Self::Node(RenderNode::Element(node))
    }
}

impl From<TextNode> for Renderable {
    fn from(node: TextNode) -> Self {
        Self::Node(RenderNode::Text(node))
    }
}

// ─── ElementDescriptor ───────────────────────────────────────────────────────

/// Builder-style description of one element.
///
/// ```ignore
/// let item = ElementDescriptor::new("li")
///     .attr("class", "item")
///     .on("click", |_| println!("clicked"))
///     .child("label");
/// ```
#[derive(Clone)]
pub struct ElementDescriptor {
    pub(crate) kind: NodeKind,
    pub(crate) attributes: Attributes,
    pub(crate) children: Vec<Renderable>,
    pub(crate) on_attach: Vec<LifecycleHook>,
    pub(crate) on_detach: Vec<LifecycleHook>,
}

impl std::fmt::Debug for ElementDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementDescriptor")
            .field("kind", &self.kind)
            .field("attributes", &self.attributes)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl ElementDescriptor {
    /// Descriptor whose kind is resolved through the registry.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self::with_kind(NodeKind::Tag(kind.into()))
    }

    /// Descriptor for an inline component.
    #[must_use]
    pub fn component(
        name: impl Into<String>,
        factory: impl Fn(&Attributes, &[Renderable], &RenderContext) -> Result<Renderable> + 'static,
    ) -> Self {
        Self::with_kind(NodeKind::Component {
            name: name.into(),
            factory: Rc::new(factory),
        })
    }

    #[must_use]
    pub fn with_kind(kind: NodeKind) -> Self {
        Self {
            kind,
            attributes: Attributes::default(),
            children: Vec::new(),
            on_attach: Vec::new(),
            on_detach: Vec::new(),
        }
    }

    // ── Attributes ───────────────────────────────────────────────────

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.set(name, AttrBinding::Static(value.into()));
        self
    }

    /// Attribute tracking `source`.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, source: DataSource<String>) -> Self {
        self.attributes.set(name, AttrBinding::Reactive(source));
        self
    }

    /// `class` attribute tracking a list of class names.
    #[must_use]
    pub fn class_list(mut self, classes: ArrayDataSource<String>) -> Self {
        self.attributes.set("class", AttrBinding::ReactiveList(classes));
        self
    }

    /// Listener for host events named `event`.
    #[must_use]
    pub fn on(mut self, event: impl Into<String>, handler: impl Fn(&HostEvent) + 'static) -> Self {
        self.attributes
            .set(event, AttrBinding::Callback(Rc::new(handler)));
        self
    }

    // ── Children ─────────────────────────────────────────────────────

    #[must_use]
    pub fn child(mut self, child: impl Into<Renderable>) -> Self {
        self.children.push(child.into());
        self
    }

    #[must_use]
    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Renderable>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Run `hook` each time the node becomes attached to a connected host tree.
    #[must_use]
    pub fn on_attach(mut self, hook: impl Fn(&ElementNode) + 'static) -> Self {
        self.on_attach.push(Rc::new(hook));
        self
    }

    /// Run `hook` each time the node leaves the connected host tree.
    #[must_use]
    pub fn on_detach(mut self, hook: impl Fn(&ElementNode) + 'static) -> Self {
        self.on_detach.push(Rc::new(hook));
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    #[must_use]
    pub fn child_renderables(&self) -> &[Renderable] {
        &self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_bindings_and_children() {
        let title = DataSource::new("t".to_string());
        let descriptor = ElementDescriptor::new("div")
            .attr("id", "root")
            .bind("title", title)
            .on("click", |_| {})
            .child("a")
            .children(["b", "c"]);
        assert_eq!(descriptor.kind().name(), "div");
        assert_eq!(descriptor.attributes().len(), 3);
        assert_eq!(descriptor.attributes().static_value("id"), Some("root"));
        assert!(descriptor.attributes().static_value("title").is_none());
        assert_eq!(descriptor.child_renderables().len(), 3);
    }

    #[test]
    fn later_attribute_replaces_earlier() {
        let descriptor = ElementDescriptor::new("p").attr("class", "a").attr("class", "b");
        assert_eq!(descriptor.attributes().len(), 1);
        assert_eq!(descriptor.attributes().static_value("class"), Some("b"));
    }

    #[test]
    fn conversions_pick_variants() {
        assert!(matches!(Renderable::from("x"), Renderable::Text(_)));
        assert!(matches!(
            Renderable::from(DataSource::new("x".to_string())),
            Renderable::ReactiveText(_)
        ));
        assert!(matches!(
            Renderable::from(DataSource::new(Renderable::Empty)),
            Renderable::Reactive(_)
        ));
        assert!(matches!(
            Renderable::from(ArrayDataSource::<Renderable>::default()),
            Renderable::Collection(_)
        ));
        assert!(Renderable::default().is_empty());
    }
}
