#![forbid(unsafe_code)]

//! Core: lifetime tokens, event emitters, id generation, and host timers.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`). A UI tree lives on one
//! thread and its callbacks run synchronously on that thread.

pub mod cancellation;
pub mod emitter;
pub mod error;
pub mod ids;
pub mod timer;

pub use cancellation::{CallbackId, CancellationToken, WeakCancellationToken};
pub use emitter::{EventEmitter, NextValue, Subscription};
pub use error::{ArborError, FlowDirection, Result};
pub use ids::IdGenerator;
pub use timer::{TimerHandle, TimerQueue};
