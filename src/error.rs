//! Error taxonomy for the instrument server.
//!
//! Every fallible operation in this crate returns a [`Result`] built around
//! [`Error`]. The dispatcher is the single place that turns an `Error` into
//! the wire-level `1 <message>` reply; nothing upstream of it
//! swallows an error, and nothing downstream of it formats one for the
//! client.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// The five documented error kinds. Concrete [`Error`] variants each
/// report one of these so the dispatcher can apply kind-independent policy
/// (e.g. "never touch hardware on a `State` error") without a full match on
/// every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Argument out of declared bounds.
    ArgumentRange,
    /// A device read/write failed or timed out.
    Transport,
    /// The operation is not valid in the current `in_progress` state.
    State,
    /// Allocation or file-creation failure.
    Resource,
    /// `abort_requested` was observed mid-operation.
    Aborted,
    /// Missing or malformed configuration key.
    Configuration,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("argument out of range: {0}")]
    ArgumentRange(String),

    #[error("{device} transport error: {message}")]
    Transport { device: &'static str, message: String },

    #[error("{device} timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout {
        device: &'static str,
        elapsed_ms: u64,
        limit_ms: u64,
    },

    #[error("invalid in current state: {0}")]
    State(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("Aborted")]
    Aborted,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown command")]
    UnknownCommand,

    #[error("{0}")]
    ParseError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fits(#[from] fitsio::errors::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ArgumentRange(_) => ErrorKind::ArgumentRange,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Timeout { .. } => ErrorKind::Transport,
            Error::State(_) => ErrorKind::State,
            Error::Resource(_) => ErrorKind::Resource,
            Error::Aborted => ErrorKind::Aborted,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::UnknownCommand => ErrorKind::ArgumentRange,
            Error::ParseError(_) => ErrorKind::ArgumentRange,
            Error::Io(_) => ErrorKind::Resource,
            Error::Fits(_) => ErrorKind::Resource,
        }
    }

    pub fn transport(device: &'static str, message: impl Into<String>) -> Error {
        Error::Transport {
            device,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ArgumentRange => "argument-range",
            ErrorKind::Transport => "transport",
            ErrorKind::State => "state",
            ErrorKind::Resource => "resource",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Configuration => "configuration",
        };
        f.write_str(s)
    }
}
