#![forbid(unsafe_code)]

//! Text leaf nodes.

use std::cell::Cell;
use std::rc::Rc;

use arbor_core::{ArborError, CancellationToken, Result};
use arbor_reactive::DataSource;

use crate::backend::HostNode;
use crate::context::RenderContext;
use crate::descriptor::Renderable;
use crate::slot::WeakRenderNode;

pub(crate) struct TextInner {
    id: u64,
    ctx: RenderContext,
    host: HostNode,
    token: CancellationToken,
    disposed: Cell<bool>,
}

/// Live text node, static or tracking a `DataSource<String>`.
///
/// Cloning creates a new handle to the **same** node.
#[derive(Clone)]
pub struct TextNode {
    inner: Rc<TextInner>,
}

impl std::fmt::Debug for TextNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextNode")
            .field("id", &self.inner.id)
            .field("host", &self.inner.host)
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

impl TextNode {
    pub(crate) fn from_inner(inner: Rc<TextInner>) -> Self {
        Self { inner }
    }

    /// Static text node.
    ///
    /// # Errors
    ///
    /// `TokenCanceled` if `token` has ended.
    pub fn new(ctx: &RenderContext, text: &str, token: Option<&CancellationToken>) -> Result<Self> {
        if let Some(token) = token {
            token.check()?;
        }
        let host = ctx.backend().create_text(text);
        Self::register(ctx, host, token)
    }

    /// Text node rewritten on every update of `source`.
    ///
    /// # Errors
    ///
    /// `TokenCanceled` if `token` has ended.
    pub fn reactive(
        ctx: &RenderContext,
        source: &DataSource<String>,
        token: Option<&CancellationToken>,
    ) -> Result<Self> {
        if let Some(token) = token {
            token.check()?;
        }
        let initial = source.value().unwrap_or_default();
        let host = ctx.backend().create_text(&initial);
        let node = Self::register(ctx, host, token)?;

        let backend = ctx.backend_rc();
        let shown = std::cell::RefCell::new(initial);
        source.listen(
            move |text: &String| {
                if *shown.borrow() == *text {
                    return;
                }
                match backend.set_text(host, text) {
                    Ok(()) => *shown.borrow_mut() = text.clone(),
                    Err(err) => tracing::warn!(%err, %host, "text update failed"),
                }
            },
            Some(&node.inner.token),
        )?;
        Ok(node)
    }

    fn register(ctx: &RenderContext, host: HostNode, token: Option<&CancellationToken>) -> Result<Self> {
        let token = token.map_or_else(CancellationToken::new, CancellationToken::child);
        let node = Self {
            inner: Rc::new(TextInner {
                id: ctx.next_id(),
                ctx: ctx.clone(),
                host,
                token: token.with_warn_threshold(ctx.config().leak_threshold()),
                disposed: Cell::new(false),
            }),
        };
        ctx.register_owner(host, WeakRenderNode::Text(Rc::downgrade(&node.inner)));
        let weak = Rc::downgrade(&node.inner);
        node.inner.token.add(move || {
            if let Some(inner) = weak.upgrade() {
                TextNode { inner }.dispose();
            }
        })?;
        Ok(node)
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn host(&self) -> HostNode {
        self.inner.host
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Replace the displayed text.
    ///
    /// # Errors
    ///
    /// `Disposed` once the node is disposed.
    pub fn set_text(&self, text: &str) -> Result<()> {
        if self.is_disposed() {
            return Err(ArborError::Disposed {
                node_id: self.inner.id,
            });
        }
        self.inner.ctx.backend().set_text(self.inner.host, text)
    }

    /// Text nodes are leaves.
    ///
    /// # Errors
    ///
    /// Always `TextNodeChildren`.
    pub fn add_child(&self, _child: impl Into<Renderable>) -> Result<()> {
        Err(ArborError::TextNodeChildren {
            node_id: self.inner.id,
        })
    }

    /// Detach the host node and end the node's token. Later calls do nothing.
    pub fn dispose(&self) {
        self.dispose_inner(true);
    }

    pub(crate) fn dispose_inner(&self, remove_host: bool) {
        let inner = &self.inner;
        if inner.disposed.replace(true) {
            return;
        }
        let backend = inner.ctx.backend();
        if remove_host
            && let Some(parent) = backend.parent(inner.host)
            && let Err(err) = backend.remove_child(parent, inner.host)
        {
            tracing::warn!(%err, node_id = inner.id, "failed to remove disposed text node");
        }
        inner.ctx.forget(inner.host);
        inner.token.cancel();
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
