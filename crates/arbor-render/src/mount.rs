#![forbid(unsafe_code)]

//! Mounting element trees into host containers.
//!
//! A [`Renderer`] appends a root element to a host container, runs the attach
//! cascade, and remembers the pairing so the tree can be torn down later.
//! One container holds at most one mounted root.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use arbor_core::{ArborError, Result};

use crate::backend::{HostNode, RenderBackend};
use crate::config::RenderConfig;
use crate::context::RenderContext;
use crate::descriptor::ElementDescriptor;
use crate::node::ElementNode;

/// Owner of the mounted roots of one render context.
pub struct Renderer {
    ctx: RenderContext,
    mounts: RefCell<AHashMap<HostNode, ElementNode>>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("mounted", &self.mounted())
            .finish()
    }
}

impl Renderer {
    #[must_use]
    pub fn new(backend: Rc<dyn RenderBackend>, config: RenderConfig) -> Self {
        Self::with_context(RenderContext::new(backend, config))
    }

    #[must_use]
    pub fn with_context(ctx: RenderContext) -> Self {
        Self {
            ctx,
            mounts: RefCell::new(AHashMap::new()),
        }
    }

    #[must_use]
    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    /// Build `descriptor` and attach it to `container`.
    ///
    /// # Errors
    ///
    /// As [`attach`](Self::attach), plus any construction error. Nothing is
    /// built when the container is taken.
    pub fn mount(&self, descriptor: ElementDescriptor, container: HostNode) -> Result<ElementNode> {
        self.check_container(container)?;
        let root = self.ctx.create_element(descriptor, None)?;
        if let Err(err) = self.attach(&root, container) {
            root.dispose();
            return Err(err);
        }
        Ok(root)
    }

    /// Append `root` to `container` and run the attach cascade if the
    /// container is connected.
    ///
    /// # Errors
    ///
    /// - `HostAlreadyAttached` if the container already holds a mounted
    ///   root, is itself owned by a node, or `root` already has a parent.
    /// - `Disposed` if `root` is disposed.
    pub fn attach(&self, root: &ElementNode, container: HostNode) -> Result<()> {
        self.check_container(container)?;
        if root.is_disposed() {
            return Err(ArborError::Disposed { node_id: root.id() });
        }
        let backend = self.ctx.backend();
        if backend.parent(root.host()).is_some() {
            return Err(ArborError::HostAlreadyAttached {
                host: root.host().0,
            });
        }
        backend.insert_before(container, root.host(), None)?;
        self.mounts.borrow_mut().insert(container, root.clone());
        tracing::debug!(%container, root = root.id(), "mounted");
        root.attach();
        Ok(())
    }

    /// Remove the root mounted in `container`, run detach hooks, and dispose
    /// the tree (cancelling every token it owns).
    ///
    /// # Errors
    ///
    /// `HostNotAttached` if nothing is mounted in `container`.
    pub fn detach(&self, container: HostNode) -> Result<()> {
        let root = self
            .mounts
            .borrow_mut()
            .remove(&container)
            .ok_or(ArborError::HostNotAttached { host: container.0 })?;
        let backend = self.ctx.backend();
        if backend.parent(root.host()) == Some(container) {
            backend.remove_child(container, root.host())?;
        }
        root.detach();
        root.dispose();
        tracing::debug!(%container, root = root.id(), "unmounted");
        Ok(())
    }

    /// Re-check connectivity of every mounted root after the host moved a
    /// container in or out of the live tree.
    pub fn refresh_connections(&self) {
        let roots: Vec<ElementNode> = self.mounts.borrow().values().cloned().collect();
        for root in roots {
            if self.ctx.backend().is_connected(root.host()) {
                root.attach();
            } else {
                root.detach();
            }
        }
    }

    /// Root mounted in `container`.
    #[must_use]
    pub fn root(&self, container: HostNode) -> Option<ElementNode> {
        self.mounts.borrow().get(&container).cloned()
    }

    #[must_use]
    pub fn is_mounted(&self, container: HostNode) -> bool {
        self.mounts.borrow().contains_key(&container)
    }

    /// Containers with a mounted root, ascending.
    #[must_use]
    pub fn mounted(&self) -> Vec<HostNode> {
        let mut containers: Vec<HostNode> = self.mounts.borrow().keys().copied().collect();
        containers.sort_unstable();
        containers
    }

    fn check_container(&self, container: HostNode) -> Result<()> {
        if self.is_mounted(container) || self.ctx.owner_of(container).is_some() {
            return Err(ArborError::HostAlreadyAttached { host: container.0 });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::headless::HeadlessBackend;

    fn renderer() -> (HeadlessBackend, Renderer) {
        let backend = HeadlessBackend::new();
        let renderer = Renderer::new(Rc::new(backend.clone()), RenderConfig::default());
        (backend, renderer)
    }

    #[test]
    fn mount_and_detach_round_trip() {
        let (backend, renderer) = renderer();
        let container = backend.create_container("main").unwrap();
        let root = renderer
            .mount(ElementDescriptor::new("div").child("hi"), container)
            .unwrap();
        assert!(root.is_attached());
        assert_eq!(backend.serialize(container), "<main><div>hi</div></main>");
        assert_eq!(renderer.mounted(), vec![container]);

        renderer.detach(container).unwrap();
        assert!(root.is_disposed());
        assert!(root.token().is_canceled());
        assert_eq!(backend.serialize(container), "<main></main>");
        assert_eq!(renderer.context().owner_count(), 0);
    }

    #[test]
    fn second_mount_on_same_container_fails() {
        let (backend, renderer) = renderer();
        let container = backend.create_container("main").unwrap();
        renderer.mount(ElementDescriptor::new("div"), container).unwrap();
        let before = backend.node_count();
        assert_eq!(
            renderer.mount(ElementDescriptor::new("p"), container).unwrap_err(),
            ArborError::HostAlreadyAttached { host: container.0 }
        );
        assert_eq!(backend.node_count(), before);
    }

    #[test]
    fn container_owned_by_a_node_is_rejected() {
        let (_, renderer) = renderer();
        let owned = renderer
            .context()
            .create_element(ElementDescriptor::new("section"), None)
            .unwrap();
        let root = renderer
            .context()
            .create_element(ElementDescriptor::new("div"), None)
            .unwrap();
        assert_eq!(
            renderer.attach(&root, owned.host()),
            Err(ArborError::HostAlreadyAttached {
                host: owned.host().0
            })
        );
    }

    #[test]
    fn detach_unknown_container_fails() {
        let (backend, renderer) = renderer();
        let container = backend.create_container("main").unwrap();
        assert_eq!(
            renderer.detach(container),
            Err(ArborError::HostNotAttached { host: container.0 })
        );
    }

    #[test]
    fn disconnected_container_attaches_on_refresh() {
        let (backend, renderer) = renderer();
        let container = backend.create_element("main");
        let attached = Rc::new(Cell::new(0));
        let a = Rc::clone(&attached);
        let root = renderer
            .mount(
                ElementDescriptor::new("div").on_attach(move |_| a.set(a.get() + 1)),
                container,
            )
            .unwrap();
        assert!(!root.is_attached());
        assert_eq!(attached.get(), 0);

        backend.insert_before(backend.document(), container, None).unwrap();
        renderer.refresh_connections();
        assert!(root.is_attached());
        assert_eq!(attached.get(), 1);

        backend.remove_child(backend.document(), container).unwrap();
        renderer.refresh_connections();
        assert!(!root.is_attached());
        assert!(!root.is_disposed());
    }
}
