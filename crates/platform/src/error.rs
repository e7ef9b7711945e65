//! Error types for Skiff.

/// Unified error type for all Skiff operations.
///
/// The dispatcher sorts these into two tiers: errors produced by a backend
/// or an adapter are answered with an SFTP status response and the session
/// continues; transport and protocol errors tear the channel down.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from the channel, a backend, or an adapter.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed or out-of-spec wire data. Fatal to the channel.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The client referred to a handle the server never issued or has
    /// already released. Fatal on data-bearing opcodes.
    #[error("client supplied an invalid handle")]
    InvalidHandle,

    /// The per-channel handle limit was reached.
    #[error("too many open handles")]
    TooManyHandles,

    /// End of stream.
    #[error("end of file")]
    Eof,

    /// The operation is not supported, either by the protocol subset this
    /// server implements or by the backend.
    #[error("operation unsupported: {0}")]
    Unsupported(&'static str),
}

/// Result type for Skiff operations.
pub type Result<T> = std::result::Result<T, Error>;
