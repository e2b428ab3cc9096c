#![forbid(unsafe_code)]

//! Two-way reactive cell.
//!
//! A [`DuplexDataSource<T>`] shares one value between two one-directional
//! channels: *downstream* (model → view) and *upstream* (view → model).
//! Two-way bindings such as form inputs listen downstream and write upstream.
//!
//! # Invariants
//!
//! 1. Both directions store into the same value before notifying.
//! 2. A direction may not be re-entered while it is notifying: a listener that
//!    updates the direction it was called from gets
//!    [`ArborError::UnstablePropagation`].
//! 3. Cross-direction updates from a listener are allowed.
//!
//! # Failure Modes
//!
//! - **Panicking listener**: the in-flight flag is cleared by a drop guard, so
//!   the direction stays usable afterwards.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arbor_core::{ArborError, CancellationToken, EventEmitter, FlowDirection, Result, Subscription};

use crate::source::DataSource;

struct Channel<T> {
    emitter: EventEmitter<T>,
    in_flight: Cell<bool>,
}

impl<T: 'static> Channel<T> {
    fn new() -> Self {
        Self {
            emitter: EventEmitter::new(),
            in_flight: Cell::new(false),
        }
    }
}

struct InFlight<'a>(&'a Cell<bool>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct DuplexInner<T> {
    value: RefCell<Option<T>>,
    downstream: Channel<T>,
    upstream: Channel<T>,
}

/// Two-way reactive cell with a reentrancy guard per direction.
///
/// Cloning creates a new handle to the **same** cell.
pub struct DuplexDataSource<T> {
    inner: Rc<DuplexInner<T>>,
}

impl<T> Clone for DuplexDataSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DuplexDataSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexDataSource")
            .field("value", &self.inner.value.borrow())
            .field("downstream_in_flight", &self.inner.downstream.in_flight.get())
            .field("upstream_in_flight", &self.inner.upstream.in_flight.get())
            .finish()
    }
}

impl<T: Clone + 'static> DuplexDataSource<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_option(Some(value))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::from_option(None)
    }

    fn from_option(value: Option<T>) -> Self {
        Self {
            inner: Rc::new(DuplexInner {
                value: RefCell::new(value),
                downstream: Channel::new(),
                upstream: Channel::new(),
            }),
        }
    }

    fn channel(&self, direction: FlowDirection) -> &Channel<T> {
        match direction {
            FlowDirection::Downstream => &self.inner.downstream,
            FlowDirection::Upstream => &self.inner.upstream,
        }
    }

    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    /// Store `value` and notify listeners of `direction`.
    pub fn update(&self, direction: FlowDirection, value: T) -> Result<()> {
        let channel = self.channel(direction);
        if channel.in_flight.replace(true) {
            return Err(ArborError::UnstablePropagation { direction });
        }
        let _guard = InFlight(&channel.in_flight);
        *self.inner.value.borrow_mut() = Some(value.clone());
        channel.emitter.fire(&value);
        Ok(())
    }

    /// Push a model-side change toward the view.
    pub fn update_downstream(&self, value: T) -> Result<()> {
        self.update(FlowDirection::Downstream, value)
    }

    /// Push a view-side change toward the model.
    pub fn update_upstream(&self, value: T) -> Result<()> {
        self.update(FlowDirection::Upstream, value)
    }

    /// Listen to updates flowing in `direction`.
    pub fn listen(
        &self,
        direction: FlowDirection,
        listener: impl Fn(&T) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        self.channel(direction).emitter.subscribe(listener, token)
    }

    pub fn listen_downstream(
        &self,
        listener: impl Fn(&T) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        self.listen(FlowDirection::Downstream, listener, token)
    }

    pub fn listen_upstream(
        &self,
        listener: impl Fn(&T) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        self.listen(FlowDirection::Upstream, listener, token)
    }

    /// Listen downstream, first replaying the current value if any.
    pub fn listen_and_repeat_downstream(
        &self,
        listener: impl Fn(&T) + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<Subscription> {
        let listener: Rc<dyn Fn(&T)> = Rc::new(listener);
        let forward = Rc::clone(&listener);
        let subscription = self.listen_downstream(move |v| forward(v), token)?;
        if let Some(current) = self.value() {
            listener(&current);
        }
        Ok(subscription)
    }

    // ── Derivatives ──────────────────────────────────────────────────

    /// Derived cell that only carries `direction`.
    ///
    /// With `Downstream`, parent downstream updates reach the derived cell but
    /// its upstream updates stay local. With `Upstream`, the reverse.
    pub fn one_way_flow(
        &self,
        direction: FlowDirection,
        token: Option<&CancellationToken>,
    ) -> Result<DuplexDataSource<T>> {
        let derived = DuplexDataSource::from_option(self.value());
        match direction {
            FlowDirection::Downstream => {
                let target = derived.clone();
                self.listen_downstream(
                    move |v| forward(&target, FlowDirection::Downstream, v.clone()),
                    token,
                )?;
            }
            FlowDirection::Upstream => {
                let target = self.clone();
                derived.listen_upstream(
                    move |v| forward(&target, FlowDirection::Upstream, v.clone()),
                    token,
                )?;
            }
        }
        Ok(derived)
    }

    /// Read-only scalar view of the downstream channel.
    pub fn downstream_to_data_source(
        &self,
        token: Option<&CancellationToken>,
    ) -> Result<DataSource<T>> {
        let derived = DataSource::from_option(self.value());
        let target = derived.clone();
        self.listen_downstream(move |v| target.update(v.clone()), token)?;
        Ok(derived)
    }

    /// Two-way transform: `down` maps parent values into the derived cell,
    /// `up` maps derived upstream writes back into the parent.
    pub fn map_duplex<U: Clone + 'static>(
        &self,
        down: impl Fn(&T) -> U + 'static,
        up: impl Fn(&U) -> T + 'static,
        token: Option<&CancellationToken>,
    ) -> Result<DuplexDataSource<U>> {
        let derived = DuplexDataSource::from_option(self.inner.value.borrow().as_ref().map(&down));
        let into_derived = derived.clone();
        self.listen_downstream(
            move |v| forward(&into_derived, FlowDirection::Downstream, down(v)),
            token,
        )?;
        let into_parent = self.clone();
        derived.listen_upstream(
            move |u| forward(&into_parent, FlowDirection::Upstream, up(u)),
            token,
        )?;
        Ok(derived)
    }
}

/// Listener-side update; a propagation cycle is reported, not panicked on.
fn forward<T: Clone + 'static>(target: &DuplexDataSource<T>, direction: FlowDirection, value: T) {
    if let Err(err) = target.update(direction, value) {
        tracing::warn!(%err, "duplex forward dropped");
    }
}
