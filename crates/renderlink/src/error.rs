//! Error taxonomy for calls into the renderer.

use std::fmt;

use thiserror::Error;

/// Status reported by the remote end (or the transport) for a failed call.
///
/// The codes mirror the usual RPC status set so that any transport can map
/// its own status type onto them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// The operation was cancelled.
    Cancelled,
    /// Unknown error.
    Unknown,
    /// The request arguments were rejected.
    InvalidArgument,
    /// The deadline expired before the call completed.
    DeadlineExceeded,
    /// A referenced object does not exist (e.g. a stale handle).
    NotFound,
    /// The object already exists.
    AlreadyExists,
    /// The caller lacks permission.
    PermissionDenied,
    /// A resource was exhausted.
    ResourceExhausted,
    /// The object is not in a state that allows the operation.
    FailedPrecondition,
    /// The operation was aborted.
    Aborted,
    /// An argument was outside its valid range.
    OutOfRange,
    /// The method is not implemented by the peer.
    Unimplemented,
    /// Internal error in the peer.
    Internal,
    /// The peer is unreachable.
    Unavailable,
    /// Unrecoverable data loss.
    DataLoss,
    /// Missing or invalid credentials.
    Unauthenticated,
}

impl StatusCode {
    /// Whether this status means the remote looked at the request and
    /// rejected its arguments, as opposed to the call not completing.
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            Self::InvalidArgument | Self::NotFound | Self::FailedPrecondition | Self::OutOfRange
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid argument",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::PermissionDenied => "permission denied",
            Self::ResourceExhausted => "resource exhausted",
            Self::FailedPrecondition => "failed precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out of range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data loss",
            Self::Unauthenticated => "unauthenticated",
        };
        f.write_str(s)
    }
}

/// A failed unary call as reported by a transport, before classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallFailure {
    /// Status code.
    pub code: StatusCode,
    /// Message from the peer or the transport.
    pub message: String,
}

impl CallFailure {
    /// Create a new failure.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors returned to the caller of a unary call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The renderer rejected the arguments. The connection is still usable.
    #[error("validation error ({code}): {message}")]
    Validation {
        /// Status that triggered the rejection.
        code: StatusCode,
        /// Message from the renderer.
        message: String,
    },
    /// The call did not complete. Repeated transport errors usually mean the
    /// session is dead.
    #[error("transport error ({code}): {message}")]
    Transport {
        /// Status reported by the transport.
        code: StatusCode,
        /// Message from the transport.
        message: String,
    },
}

impl RpcError {
    /// A validation error raised on the client side before anything is sent.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            code: StatusCode::InvalidArgument,
            message: message.into(),
        }
    }

    /// A transport error that never reached the peer.
    pub fn transport(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Transport {
            code,
            message: message.into(),
        }
    }

    /// Whether this is a [`RpcError::Validation`].
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Whether this is a [`RpcError::Transport`].
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Status code carried by the error.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::Validation { code, .. } | Self::Transport { code, .. } => *code,
        }
    }
}

impl From<CallFailure> for RpcError {
    fn from(failure: CallFailure) -> Self {
        let CallFailure { code, message } = failure;
        if code.is_rejection() {
            Self::Validation { code, message }
        } else {
            Self::Transport { code, message }
        }
    }
}

/// Errors that end an event stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The stream could not be opened.
    #[error("failed to open event stream: {0}")]
    Open(RpcError),
    /// Reading from an open stream failed.
    #[error("event stream read failed: {0}")]
    Read(String),
    /// The client has already been started or shut down.
    #[error("event stream already {0}")]
    InvalidState(&'static str),
    /// The reader thread could not be spawned.
    #[error("failed to spawn reader thread: {0}")]
    Spawn(String),
}
