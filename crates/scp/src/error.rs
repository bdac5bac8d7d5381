//! Secure channel error type

use thiserror::Error;

/// Error type for secure channel establishment and use
///
/// Every variant is terminal for the session: authentication failures are
/// never retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Card cryptogram did not match the host computation (or vice versa)
    #[error("cryptogram verification failed")]
    CryptogramMismatch,

    /// Command MAC did not verify
    #[error("command MAC verification failed")]
    MacMismatch,

    /// INITIALIZE UPDATE response advertised an unexpected protocol
    #[error("unsupported SCP version: {0:#04x}")]
    UnsupportedScpVersion(u8),

    /// INITIALIZE UPDATE payload had the wrong shape
    #[error("malformed INITIALIZE UPDATE payload: expected {expected} bytes, got {actual}")]
    MalformedInitUpdate {
        /// Expected payload length
        expected: usize,
        /// Actual payload length
        actual: usize,
    },

    /// Wrapped command too short to carry a MAC, or padding did not verify
    #[error("malformed secure messaging data")]
    MalformedSecureData,

    /// The SCP03 encryption counter would repeat; the channel must be
    /// re-established
    #[error("encryption counter exhausted")]
    CounterExhausted,

    /// Requested security level is not available on this protocol variant
    #[error("security level not supported by this SCP variant")]
    UnsupportedLevel,

    /// Channel used before mutual authentication completed
    #[error("secure channel not authenticated")]
    NotAuthenticated,
}
