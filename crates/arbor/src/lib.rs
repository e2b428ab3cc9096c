#![forbid(unsafe_code)]

//! Arbor public facade crate.
//!
//! Declarative UI trees driven by reactive data. Build an
//! [`ElementDescriptor`](render::ElementDescriptor), bind
//! [`DataSource`](reactive::DataSource)s and
//! [`ArrayDataSource`](reactive::ArrayDataSource)s into it, and mount it with a
//! [`Renderer`](render::Renderer) over any
//! [`RenderBackend`](render::RenderBackend).

pub use arbor_core as core;
pub use arbor_reactive as reactive;
pub use arbor_render as render;

pub use arbor_core::{ArborError, Result};

pub mod prelude {
    pub use arbor_core::{ArborError, CancellationToken, EventEmitter, Result, Subscription};
    pub use arbor_reactive::{
        ArrayDataSource, CollectionChange, DataSource, DuplexDataSource, Operation, ReadableArray,
    };
    pub use arbor_render::{
        ElementDescriptor, ElementNode, HeadlessBackend, HostNode, RenderBackend, RenderConfig,
        RenderContext, RenderNode, Renderable, Renderer, TextNode,
    };
}

#[cfg(feature = "tracing-json")]
pub mod logging {
    //! JSON log output for hosts without their own subscriber.

    use tracing_subscriber::EnvFilter;

    /// Install a global JSON `tracing` subscriber filtered by `RUST_LOG`
    /// (default `warn`).
    ///
    /// Returns `false` if a global subscriber was already installed.
    pub fn init_json() -> bool {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    }
}
