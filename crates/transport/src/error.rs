//! Transport and protocol error types

use std::io;

use thiserror::Error;

/// Error type for the TLS transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    /// Handshake failed for a non-authentication reason
    #[error("TLS handshake failed: {reason}")]
    Handshake {
        /// Library-reported failure description
        reason: String,
    },

    /// Peer presented an unknown PSK identity or the wrong key
    #[error("PSK authentication failed")]
    Authentication {
        /// Identity the peer presented, when one was seen
        identity: Option<String>,
    },

    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read or write did not finish within its deadline
    #[error("operation timed out")]
    Timeout,

    /// Connection closed while data was still expected
    #[error("connection closed mid-session")]
    Closed,
}

impl TransportError {
    /// True for failures that the retry policy may reconnect after
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Authentication { .. } | Self::Handshake { .. } => false,
            Self::Io(_) | Self::Timeout | Self::Closed => true,
        }
    }
}

/// Error type for the HTTP admin protocol framing
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Framing could not be parsed
    #[error("malformed HTTP framing: {0}")]
    Malformed(String),

    /// Peer closed the connection mid-message
    #[error("HTTP message truncated")]
    Truncated,

    /// Request used a method other than POST
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Request targeted a path other than the admin endpoint
    #[error("unknown path: {0}")]
    UnknownPath(String),

    /// Content-Type did not match the Amendment B media type
    #[error("unsupported content type: {0:?}")]
    UnsupportedContentType(String),

    /// Server answered with an error status
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus {
        /// Status code from the response line
        status: u16,
        /// Diagnostic body, if any
        body: String,
    },
}
