//! Input engine error types

use tactile_platform::SourceId;
use thiserror::Error;

use crate::staging::MarkerId;
use crate::tree::ElementId;

/// Errors surfaced by the input engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    /// The element handle does not refer to a live element
    #[error("Element {0:?} is not part of the tree")]
    InvalidElement(ElementId),

    /// No presentation source is registered under this id
    #[error("Unknown presentation source {0:?}")]
    UnknownSource(SourceId),

    /// No active touch contact has this id
    #[error("Unknown touch contact {0}")]
    UnknownContact(u64),

    /// Caller-provided buffer cannot hold the result
    #[error("Buffer too small: {needed} points needed, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    /// A drain tried to pop past the bottom of the staging area
    #[error("Staging area underflow while draining to {0:?}")]
    StagingUnderflow(MarkerId),

    /// A drain found a different marker on top of the staging area
    #[error("Mismatched staging marker: expected {expected:?}, found {found:?}")]
    MismatchedMarker { expected: MarkerId, found: MarkerId },

    /// A phase or routed handler reported a failure
    #[error("Input handler failed: {0}")]
    Handler(String),
}

impl InputError {
    /// Convenience constructor for handler failures
    pub fn handler(message: impl Into<String>) -> Self {
        InputError::Handler(message.into())
    }
}

/// Result type for input operations
pub type Result<T> = std::result::Result<T, InputError>;
