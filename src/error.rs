//! Shared error type for the crate.
//!
//! Every fallible API surface (training, cross-validation, model I/O,
//! prediction) returns [`Result`]. Scheduler and worker internals cannot fail
//! after training starts, so errors are reported before any thread is spawned
//! or at the I/O boundary.

use std::io;

/// Errors surfaced at the crate's API boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("aligned allocation failed ({bytes} bytes)")]
    Allocation {
        /// Requested size of the failed allocation.
        bytes: usize,
    },

    #[error("corrupt model: {0}")]
    CorruptModel(String),

    #[error("incompatible options: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an [`Error::InvalidInput`] with a formatted message.
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Shorthand for an [`Error::CorruptModel`] with a formatted message.
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptModel(msg.into())
    }
}
