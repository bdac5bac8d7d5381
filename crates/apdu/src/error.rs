//! Parse errors for APDU commands and responses

use thiserror::Error;

/// Error type for APDU decoding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input shorter than the 4-byte command header
    #[error("APDU too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum length required
        expected: usize,
        /// Length actually supplied
        actual: usize,
    },

    /// Lc does not match the number of bytes that follow it
    #[error("Lc inconsistent with APDU length: Lc={lc}, trailing bytes={trailing}")]
    LcMismatch {
        /// Declared data length
        lc: usize,
        /// Bytes present after the header
        trailing: usize,
    },

    /// Extended-length encoding (Lc/Le > 255) is not negotiated here
    #[error("extended-length APDUs are not supported")]
    ExtendedLength,

    /// Response without a trailing status word
    #[error("response truncated: missing status word")]
    MissingStatusWord,

    /// Malformed or unencodable TLV structure
    #[error("TLV error: {0}")]
    Tlv(String),
}
