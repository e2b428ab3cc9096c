#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArborError>;

/// Direction of a value flowing through a two-way binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowDirection {
    /// From the data owner toward the view.
    Downstream,
    /// From the view back toward the data owner.
    Upstream,
}

impl std::fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Downstream => write!(f, "downstream"),
            Self::Upstream => write!(f, "upstream"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArborError {
    #[error("cancellation token {token_id} is already canceled")]
    TokenCanceled { token_id: u64 },

    #[error("node {node_id} is disposed")]
    Disposed { node_id: u64 },

    #[error("unstable value propagation: re-entrant {direction} update")]
    UnstablePropagation { direction: FlowDirection },

    #[error("text nodes cannot have children (node {node_id})")]
    TextNodeChildren { node_id: u64 },

    #[error("unknown node kind: {kind}")]
    UnknownNodeKind { kind: String },

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("host container {host} is already owned by an attached instance")]
    HostAlreadyAttached { host: u64 },

    #[error("host container {host} has nothing attached")]
    HostNotAttached { host: u64 },

    #[error("unknown host node {host}")]
    UnknownHostNode { host: u64 },
}

impl ArborError {
    #[must_use]
    pub fn out_of_bounds(index: usize, len: usize) -> Self {
        Self::IndexOutOfBounds { index, len }
    }

    #[must_use]
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownNodeKind { kind: kind.into() }
    }

    /// Whether the error reports use of something whose lifetime already ended.
    #[must_use]
    pub fn is_lifetime_violation(&self) -> bool {
        matches!(self, Self::TokenCanceled { .. } | Self::Disposed { .. })
    }
}
