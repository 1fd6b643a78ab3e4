//! Transport error taxonomy.
//!
//! A single error category covers everything a [`Transport`](crate::transport::Transport)
//! can report. The session layer never classifies or wraps it; callers see
//! exactly what the transport produced.

use irc::proto::error::ProtocolError;

/// Failure reported by a message transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the connection (or the stream ended).
    #[error("connection closed")]
    Closed,
    /// A frame arrived that could not be parsed as a protocol message.
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => TransportError::Io(e),
            other => TransportError::Malformed(other.to_string()),
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
