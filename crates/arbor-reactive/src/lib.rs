#![forbid(unsafe_code)]

//! Reactive data flow: scalar cells, two-way cells, and ordered collections.
//!
//! - [`DataSource`]: a push-based scalar cell with derived operators
//!   (`map`, `filter`, `unique`, `debounce`, ...).
//! - [`DuplexDataSource`]: a value shared by a downstream and an upstream
//!   channel, guarded against same-direction feedback loops.
//! - [`ArrayDataSource`]: an ordered collection announcing structural edits
//!   as [`CollectionChange`] records, with filtered, mapped and sorted views
//!   kept in sync incrementally.
//!
//! Subscriptions live until cancelled, either through their
//! [`Subscription`](arbor_core::Subscription) handle or through the
//! [`CancellationToken`](arbor_core::CancellationToken) they were created
//! under. Dropping a handle never unsubscribes.

pub mod array;
pub mod duplex;
pub mod operators;
pub mod source;

pub use array::{
    ArrayDataSource, CollectionChange, FilteredArrayView, MappedArrayView, Operation,
    ReadableArray, SortedArrayView,
};
pub use duplex::DuplexDataSource;
pub use source::{ChangeSignal, DataSource};
