//! APDU response definitions
//!
//! A response APDU is an optional payload followed by a mandatory two-byte
//! status word.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ParseError;
use crate::status::StatusWord;

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data (may be empty)
    pub data: Bytes,
    /// Status word, always present
    pub status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(data: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            data: data.into(),
            status: status.into(),
        }
    }

    /// Create a `9000` response with the given payload
    pub fn success(data: impl Into<Bytes>) -> Self {
        Self::new(data, StatusWord::new(0x90, 0x00))
    }

    /// Create a data-less response carrying only a status word
    pub fn status_only(status: impl Into<StatusWord>) -> Self {
        Self::new(Bytes::new(), status)
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parse a raw response APDU (payload + trailing SW1 SW2)
    pub fn from_bytes(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.len() < 2 {
            return Err(ParseError::MissingStatusWord);
        }

        let (payload, trailer) = raw.split_at(raw.len() - 2);
        Ok(Self {
            data: Bytes::copy_from_slice(payload),
            status: StatusWord::new(trailer[0], trailer[1]),
        })
    }

    /// Serialize to raw bytes (payload + SW1 SW2)
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.data.len() + 2);
        buffer.put_slice(&self.data);
        buffer.put_u8(self.status.sw1);
        buffer.put_u8(self.status.sw2);
        buffer.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn round_trip_with_payload() {
        let resp = Response::success(hex!("6F088407A000000003").to_vec());
        let raw = resp.to_bytes();
        assert_eq!(raw.as_ref(), hex!("6F088407A0000000039000"));
        assert_eq!(Response::from_bytes(&raw).unwrap(), resp);
    }

    #[test]
    fn status_only_round_trip() {
        let resp = Response::status_only(0x6A82u16);
        assert_eq!(resp.to_bytes().as_ref(), hex!("6A82"));
        assert!(!resp.is_success());
    }

    #[test]
    fn rejects_truncated() {
        assert_eq!(
            Response::from_bytes(&hex!("90")),
            Err(ParseError::MissingStatusWord)
        );
    }
}
