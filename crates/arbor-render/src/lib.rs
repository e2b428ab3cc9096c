#![forbid(unsafe_code)]

//! Element tree for arbor.
//!
//! Descriptors ([`ElementDescriptor`], [`Renderable`]) describe a tree;
//! a [`RenderContext`] turns them into live [`ElementNode`]s, [`TextNode`]s
//! and [`Fragment`]s that own host nodes behind a [`RenderBackend`]. Each
//! element reconciles its host children against its model list, and a
//! [`Renderer`] mounts roots into host containers.
//!
//! [`HeadlessBackend`] is an in-memory backend with a mutation log, used by
//! the tests and benches.

pub mod backend;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod fragment;
pub mod headless;
pub mod mount;
pub mod node;
pub mod reconcile;
pub mod registry;
pub mod slot;
pub mod text;

pub use backend::{EventHandler, HostEvent, HostNode, ListenerId, RenderBackend};
pub use config::RenderConfig;
pub use context::RenderContext;
pub use descriptor::{
    AttrBinding, Attributes, ComponentFn, ElementDescriptor, LifecycleHook, NodeKind, Renderable,
};
pub use fragment::Fragment;
pub use headless::{HeadlessBackend, Mutation};
pub use mount::Renderer;
pub use node::ElementNode;
pub use reconcile::{ReconcileOutcome, reconcile};
pub use registry::{ElementRegistry, HTML_TAGS, KindHandler};
pub use slot::RenderNode;
pub use text::TextNode;
