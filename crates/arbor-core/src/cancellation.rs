#![forbid(unsafe_code)]

//! Cancellation tokens: explicit, composable resource lifetimes.
//!
//! A [`CancellationToken`] owns an ordered list of release callbacks. Every
//! subscription, timer, and render node in arbor registers its teardown with
//! the token that scopes it, so cancelling one token releases a whole subtree
//! of work synchronously.
//!
//! # Invariants
//!
//! 1. `cancel()` runs every pending callback exactly once, in insertion order,
//!    before returning, then clears the list.
//! 2. The canceled state is irreversible; a second `cancel()` is a no-op.
//! 3. `add()` on a canceled token fails with [`ArborError::TokenCanceled`]
//!    (this includes callbacks added from inside a running release callback).
//! 4. Duplicate callbacks are allowed and each runs once per registration.
//!
//! # Failure Modes
//!
//! - **Leaks**: a long-lived token accumulating callbacks from short-lived
//!   children. Tokens log a single `WARN` once their live callback count
//!   reaches the warn threshold, but keep accepting callbacks.
//! - **Panicking callback**: callbacks after the panicking one are dropped
//!   without running; the token still reports canceled.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ArborError, Result};

/// Live callback count at which a token logs its leak warning.
pub const DEFAULT_WARN_THRESHOLD: usize = 10_000;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

fn next_token_id() -> u64 {
    NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle to one registered release callback, used with
/// [`CancellationToken::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type ReleaseFn = Box<dyn FnOnce()>;

struct TokenInner {
    id: u64,
    canceled: Cell<bool>,
    callbacks: RefCell<Vec<(CallbackId, ReleaseFn)>>,
    next_callback: Cell<u64>,
    warn_threshold: Cell<usize>,
    warned: Cell<bool>,
}

/// Composable unit of resource lifetime.
///
/// Cloning a token creates a new handle to the **same** lifetime.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Rc<TokenInner>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("id", &self.inner.id)
            .field("canceled", &self.inner.canceled.get())
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CancellationToken {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for CancellationToken {}

impl CancellationToken {
    // ── Constructors ─────────────────────────────────────────────────

    /// Create a live token with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(TokenInner {
                id: next_token_id(),
                canceled: Cell::new(false),
                callbacks: RefCell::new(Vec::new()),
                next_callback: Cell::new(0),
                warn_threshold: Cell::new(DEFAULT_WARN_THRESHOLD),
                warned: Cell::new(false),
            }),
        }
    }

    /// Set the live callback count at which the leak warning is logged.
    #[must_use]
    pub fn with_warn_threshold(self, threshold: usize) -> Self {
        self.inner.warn_threshold.set(threshold.max(1));
        self
    }

    /// Create a token that is canceled as soon as **any** parent is canceled.
    ///
    /// Cancelling the composite itself deregisters it from every parent, so
    /// short-lived composites do not accumulate on long-lived parents. If a
    /// parent is already canceled the composite is returned canceled.
    #[must_use]
    pub fn from_tokens(parents: &[&CancellationToken]) -> Self {
        let composite = Self::new();
        for parent in parents {
            let child = composite.clone();
            match parent.add(move || child.cancel()) {
                Ok(id) => {
                    let weak_parent = Rc::downgrade(&parent.inner);
                    let release = composite.add(move || {
                        if let Some(inner) = weak_parent.upgrade() {
                            CancellationToken { inner }.remove(id);
                        }
                    });
                    if let Err(err) = release {
                        tracing::trace!(%err, "composite ended before parent release was registered");
                        parent.remove(id);
                    }
                }
                Err(_) => {
                    composite.cancel();
                    break;
                }
            }
        }
        composite
    }

    /// Create a nested scope that ends with `self` or on its own cancellation.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::from_tokens(&[self])
    }

    /// Weak handle that does not keep the token's callbacks alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakCancellationToken {
        WeakCancellationToken {
            inner: Rc::downgrade(&self.inner),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Unique identifier for diagnostics.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[inline]
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.get()
    }

    /// Number of pending release callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.inner.callbacks.borrow().len()
    }

    /// Fail with [`ArborError::TokenCanceled`] if this token has ended.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(ArborError::TokenCanceled {
                token_id: self.inner.id,
            });
        }
        Ok(())
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Register a release callback.
    pub fn add(&self, callback: impl FnOnce() + 'static) -> Result<CallbackId> {
        self.check()?;
        let id = CallbackId(self.inner.next_callback.get());
        self.inner.next_callback.set(id.0 + 1);

        let count = {
            let mut callbacks = self.inner.callbacks.borrow_mut();
            callbacks.push((id, Box::new(callback)));
            callbacks.len()
        };

        if count >= self.inner.warn_threshold.get() && !self.inner.warned.replace(true) {
            tracing::warn!(
                token_id = self.inner.id,
                callbacks = count,
                "cancellation token callback count reached warn threshold; possible leak"
            );
        }
        Ok(id)
    }

    /// Remove one registered callback. Returns `true` if it was still pending.
    pub fn remove(&self, id: CallbackId) -> bool {
        let mut callbacks = self.inner.callbacks.borrow_mut();
        match callbacks.iter().position(|(cid, _)| *cid == id) {
            Some(pos) => {
                // Dropped outside the borrow: the closure may own other tokens.
                let removed = callbacks.remove(pos);
                drop(callbacks);
                drop(removed);
                true
            }
            None => false,
        }
    }

    /// Cancel the token, running every pending callback in insertion order.
    ///
    /// Only the first call has any effect.
    pub fn cancel(&self) {
        if self.inner.canceled.replace(true) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.borrow_mut());
        tracing::trace!(
            token_id = self.inner.id,
            callbacks = callbacks.len(),
            "token canceled"
        );
        for (_, callback) in callbacks {
            callback();
        }
    }

    /// Cancel `other` when `self` is canceled; with `two_way`, also the reverse.
    ///
    /// The reverse edge holds `self` weakly so chained tokens never keep each
    /// other alive.
    pub fn chain(&self, other: &CancellationToken, two_way: bool) -> Result<()> {
        let target = other.clone();
        self.add(move || target.cancel())?;
        if two_way {
            let weak_self: Weak<TokenInner> = Rc::downgrade(&self.inner);
            other.add(move || {
                if let Some(inner) = weak_self.upgrade() {
                    CancellationToken { inner }.cancel();
                }
            })?;
        }
        Ok(())
    }
}

/// Non-owning handle to a [`CancellationToken`].
#[derive(Clone, Debug)]
pub struct WeakCancellationToken {
    inner: Weak<TokenInner>,
}

impl WeakCancellationToken {
    #[must_use]
    pub fn upgrade(&self) -> Option<CancellationToken> {
        self.inner.upgrade().map(|inner| CancellationToken { inner })
    }
}
