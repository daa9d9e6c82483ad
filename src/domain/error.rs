//! Domain-level errors (no external dependencies)

use thiserror::Error;

use crate::domain::arena::NodeId;

/// Programming errors raised by the scheduling tree.
///
/// None of these are retryable: they indicate a caller bug in ownership
/// tracking or a broken tree invariant. "Nothing eligible right now" is not
/// an error and is reported as `Ok(None)` by the selection calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrabError {
    #[error("item already linked into bag {bag} of tree {tree}")]
    AlreadyLinked { tree: u64, bag: NodeId },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("node no longer in tree: {0}")]
    UnknownNode(NodeId),

    #[error("consistency violation: {0}")]
    Consistency(String),
}

impl GrabError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Builds a consistency error and logs it; these are never swallowed.
    pub fn consistency(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "tree consistency violation");
        Self::Consistency(message)
    }
}

/// Result type for tree operations.
pub type GrabResult<T> = Result<T, GrabError>;
