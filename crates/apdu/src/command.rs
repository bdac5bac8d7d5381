//! APDU command definitions
//!
//! A command APDU is a 4-byte header (CLA, INS, P1, P2) optionally followed
//! by a length-prefixed data field and an expected-response length, covering
//! the four ISO/IEC 7816-4 cases:
//!
//! | case | data | Le |
//! |------|------|----|
//! | 1    | no   | no |
//! | 2    | no   | yes|
//! | 3    | yes  | no |
//! | 4    | yes  | yes|

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ParseError;

/// Generic APDU command structure
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional, at most 255 bytes)
    pub data: Option<Bytes>,
    /// Expected response length (optional; `0x00` encodes 256)
    pub le: Option<u8>,
}

impl Command {
    /// Create a new case-1 command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Attach a data field. Short form only: lengths above 255 are a
    /// caller bug.
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        debug_assert!(data.len() <= 255, "short-form APDU data exceeds 255 bytes");
        self.data = Some(data);
        self
    }

    /// Attach an expected response length (`0x00` means 256)
    pub const fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Length of the serialized command
    pub fn encoded_len(&self) -> usize {
        4 + self.data.as_ref().map_or(0, |d| 1 + d.len()) + usize::from(self.le.is_some())
    }

    /// Serialize to raw APDU bytes, deterministically from which fields are
    /// present
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.encoded_len());

        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        if let Some(data) = &self.data {
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            buffer.put_u8(le);
        }

        buffer.freeze()
    }

    /// Parse a raw command APDU. Left inverse of [`Self::to_bytes`] for all
    /// four ISO cases.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.len() < 4 {
            return Err(ParseError::TooShort {
                expected: 4,
                actual: raw.len(),
            });
        }

        let mut command = Self::new(raw[0], raw[1], raw[2], raw[3]);
        let body = &raw[4..];

        match body.len() {
            // Case 1
            0 => Ok(command),
            // Case 2
            1 => Ok(command.with_le(body[0])),
            _ => {
                let lc = body[0] as usize;
                if lc == 0 {
                    // A zero first length byte with more bytes following is
                    // the extended-length marker.
                    return Err(ParseError::ExtendedLength);
                }
                let trailing = body.len() - 1;
                if trailing == lc {
                    // Case 3
                    command.data = Some(Bytes::copy_from_slice(&body[1..]));
                    Ok(command)
                } else if trailing == lc + 1 {
                    // Case 4
                    command.data = Some(Bytes::copy_from_slice(&body[1..1 + lc]));
                    Ok(command.with_le(body[1 + lc]))
                } else {
                    Err(ParseError::LcMismatch { lc, trailing })
                }
            }
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("cla", &format_args!("{:#04x}", self.cla))
            .field("ins", &format_args!("{:#04x}", self.ins))
            .field("p1", &format_args!("{:#04x}", self.p1))
            .field("p2", &format_args!("{:#04x}", self.p2))
            .field("lc", &self.data.as_ref().map_or(0, |d| d.len()))
            .field("le", &self.le)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn case_1_round_trip() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        let raw = cmd.to_bytes();
        assert_eq!(raw.as_ref(), hex!("00A40400"));
        assert_eq!(Command::from_bytes(&raw).unwrap(), cmd);
    }

    #[test]
    fn case_2_round_trip() {
        let cmd = Command::new(0x80, 0xCA, 0x9F, 0x7F).with_le(0x00);
        let raw = cmd.to_bytes();
        assert_eq!(raw.as_ref(), hex!("80CA9F7F00"));
        assert_eq!(Command::from_bytes(&raw).unwrap(), cmd);
    }

    #[test]
    fn case_3_round_trip() {
        let cmd = Command::new(0x80, 0xE2, 0x00, 0x01).with_data(hex!("0102030405").to_vec());
        let raw = cmd.to_bytes();
        assert_eq!(raw.as_ref(), hex!("80E20001050102030405"));
        assert_eq!(Command::from_bytes(&raw).unwrap(), cmd);
    }

    #[test]
    fn case_4_round_trip() {
        let aid = hex!("A000000151000000");
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00)
            .with_data(aid.to_vec())
            .with_le(0x00);
        let raw = cmd.to_bytes();
        assert_eq!(raw.as_ref(), hex!("00A4040008A00000015100000000"));
        assert_eq!(Command::from_bytes(&raw).unwrap(), cmd);
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(
            Command::from_bytes(&hex!("00A404")),
            Err(ParseError::TooShort { .. })
        ));
    }

    #[test]
    fn rejects_lc_mismatch() {
        // Lc claims 4 bytes, only 2 follow plus nothing else valid
        assert!(matches!(
            Command::from_bytes(&hex!("00A40400040102")),
            Err(ParseError::LcMismatch { lc: 4, trailing: 2 })
        ));
    }

    #[test]
    fn rejects_extended_length() {
        assert!(matches!(
            Command::from_bytes(&hex!("00A404000001020102")),
            Err(ParseError::ExtendedLength)
        ));
    }
}
