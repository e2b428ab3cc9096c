#![forbid(unsafe_code)]

//! Node kind lookup.
//!
//! Descriptors name their kind with a string. The registry maps that name
//! onto a closed set of handlers: a host element tag or a component factory.
//! Names missing from the registry are either rejected or passed through as
//! host tags, depending on [`RenderConfig::strict_kinds`](crate::RenderConfig::strict_kinds).

use std::rc::Rc;

use ahash::AHashMap;
use arbor_core::Result;

use crate::context::RenderContext;
use crate::descriptor::{Attributes, ComponentFn, Renderable};

/// Standard HTML element names registered by [`ElementRegistry::with_html_tags`].
pub const HTML_TAGS: &[&str] = &[
    "a", "abbr", "address", "article", "aside", "audio", "b", "blockquote", "body", "br",
    "button", "canvas", "caption", "code", "col", "colgroup", "data", "datalist", "dd",
    "details", "dialog", "div", "dl", "dt", "em", "fieldset", "figcaption", "figure", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "head", "header", "hr", "html", "i", "iframe",
    "img", "input", "label", "legend", "li", "link", "main", "meta", "nav", "ol", "optgroup",
    "option", "output", "p", "pre", "progress", "section", "select", "slot", "small", "source",
    "span", "strong", "style", "sub", "summary", "sup", "table", "tbody", "td", "template",
    "textarea", "tfoot", "th", "thead", "time", "title", "tr", "u", "ul", "video",
];

/// What a registered kind name produces.
#[derive(Clone)]
pub enum KindHandler {
    /// A host element with the given tag.
    Element { tag: String },
    /// A component factory invoked with the descriptor's attributes and children.
    Component(ComponentFn),
}

impl std::fmt::Debug for KindHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Element { tag } => f.debug_struct("Element").field("tag", tag).finish(),
            Self::Component(_) => f.write_str("Component(..)"),
        }
    }
}

/// Table of known node kinds.
#[derive(Clone, Default)]
pub struct ElementRegistry {
    kinds: AHashMap<String, KindHandler>,
}

impl std::fmt::Debug for ElementRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ElementRegistry")
            .field("kinds", &names)
            .finish()
    }
}

impl ElementRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with [`HTML_TAGS`].
    #[must_use]
    pub fn with_html_tags() -> Self {
        let mut registry = Self::new();
        for tag in HTML_TAGS {
            registry.register_element(*tag, *tag);
        }
        registry
    }

    /// Map `name` onto the host tag `tag`, replacing any previous entry.
    pub fn register_element(&mut self, name: impl Into<String>, tag: impl Into<String>) {
        self.kinds
            .insert(name.into(), KindHandler::Element { tag: tag.into() });
    }

    /// Map `name` onto a component factory, replacing any previous entry.
    pub fn register_component(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&Attributes, &[Renderable], &RenderContext) -> Result<Renderable> + 'static,
    ) {
        self.kinds
            .insert(name.into(), KindHandler::Component(Rc::new(factory)));
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&KindHandler> {
        self.kinds.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
