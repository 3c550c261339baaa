//! Error types for altcom-rpc.
//!
//! Each layer reports its own error type:
//! - [`DecodeError`] from the frame codec
//! - [`AllocationFailure`] from the buffer pool
//! - [`GatewayError`] from the command gateway
//!
//! The operation façade converts all of them into [`AltcomError`], the
//! error domain seen by callers.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// POSIX-style error numbers reported by [`AltcomError::errno`].
pub mod errno {
    /// I/O error.
    pub const EIO: i32 = 5;
    /// Out of memory.
    pub const ENOMEM: i32 = 12;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
    /// Protocol error.
    pub const EPROTO: i32 = 71;
    /// Network is down.
    pub const ENETDOWN: i32 = 100;
    /// Connection timed out.
    pub const ETIMEDOUT: i32 = 110;
    /// Operation already in progress.
    pub const EALREADY: i32 = 114;
}

/// Framing error raised while decoding a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Received payload length differs from the declared size.
    #[error("payload length mismatch: expected {expected} bytes, received {actual}")]
    LengthMismatch {
        /// Declared payload size for the operation.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },
}

/// The buffer pool could not provide a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer pool exhausted: cannot allocate {requested} bytes")]
pub struct AllocationFailure {
    /// Size of the failed request in bytes.
    pub requested: usize,
}

/// Failure of a single synchronous exchange.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No link to the modem is attached.
    #[error("modem link is not initialized")]
    NotInitialized,

    /// Sending the command or receiving the response failed.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] io::Error),

    /// No correlated response arrived within the deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    pub(crate) fn link_closed() -> Self {
        GatewayError::TransportFailure(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "modem link closed",
        ))
    }
}

/// Caller-facing error for every remote operation.
#[derive(Debug, Error)]
pub enum AltcomError {
    /// The modem link has not been attached, or has gone down.
    #[error("modem link is not initialized")]
    NotInitialized,

    /// Command/response buffers could not be allocated.
    #[error(transparent)]
    AllocationFailure(#[from] AllocationFailure),

    /// Link-layer failure while exchanging frames.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] io::Error),

    /// The modem did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The response payload had the wrong size and was not decoded.
    #[error("unexpected response length: expected {expected} bytes, received {actual}")]
    LengthMismatch {
        /// Declared response payload size.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },

    /// The operation ran on the modem and reported a nonzero result code.
    #[error("remote operation failed with code {0}")]
    RemoteFailure(i32),

    /// Invalid frame or protocol state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `attach` was called on a session that already has a link.
    #[error("modem link is already attached")]
    AlreadyAttached,

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error outside of an exchange (socket connect, config file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AltcomError {
    /// Map the error to the errno value the modem SDK reports for it.
    pub fn errno(&self) -> i32 {
        match self {
            AltcomError::NotInitialized => errno::ENETDOWN,
            AltcomError::AllocationFailure(_) => errno::ENOMEM,
            AltcomError::TransportFailure(_) | AltcomError::Io(_) => errno::EIO,
            AltcomError::Timeout(_) => errno::ETIMEDOUT,
            AltcomError::LengthMismatch { .. } | AltcomError::Protocol(_) => errno::EPROTO,
            AltcomError::RemoteFailure(_) => errno::EIO,
            AltcomError::AlreadyAttached => errno::EALREADY,
            AltcomError::Config(_) => errno::EINVAL,
        }
    }

    /// True for the timeout class of failures.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AltcomError::Timeout(_))
    }
}

impl From<GatewayError> for AltcomError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotInitialized => AltcomError::NotInitialized,
            GatewayError::TransportFailure(e) => AltcomError::TransportFailure(e),
            GatewayError::Timeout(d) => AltcomError::Timeout(d),
        }
    }
}

impl From<DecodeError> for AltcomError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::LengthMismatch { expected, actual } => {
                AltcomError::LengthMismatch { expected, actual }
            }
        }
    }
}

/// Result type alias using AltcomError.
pub type Result<T> = std::result::Result<T, AltcomError>;
