//! GlobalPlatform constants, lifecycle values and host-side command builders
//!
//! The builders produce the unwrapped (clear) form of each card-management
//! command; secure-channel wrapping is layered on by the channel engine.

use bytes::{BufMut, Bytes, BytesMut};

use crate::command::Command;
use crate::error::ParseError;
use crate::tlv;

/// GlobalPlatform command classes
pub mod cla {
    /// ISO7816 command class
    pub const ISO7816: u8 = 0x00;
    /// GlobalPlatform command class
    pub const GP: u8 = 0x80;
    /// Secure messaging bit, ORed into CLA by the channel wrapper
    pub const SECURE: u8 = 0x04;
}

/// GlobalPlatform instruction codes
pub mod ins {
    /// SELECT command
    pub const SELECT: u8 = 0xA4;
    /// INITIALIZE UPDATE command
    pub const INITIALIZE_UPDATE: u8 = 0x50;
    /// EXTERNAL AUTHENTICATE command
    pub const EXTERNAL_AUTHENTICATE: u8 = 0x82;
    /// GET DATA command
    pub const GET_DATA: u8 = 0xCA;
    /// DELETE command
    pub const DELETE: u8 = 0xE4;
    /// INSTALL command
    pub const INSTALL: u8 = 0xE6;
    /// GET STATUS command
    pub const GET_STATUS: u8 = 0xF2;
    /// PUT KEY command
    pub const PUT_KEY: u8 = 0xD8;
    /// STORE DATA command
    pub const STORE_DATA: u8 = 0xE2;
}

/// Parameter values for SELECT (P1)
pub mod select_p1 {
    /// Select by DF name (AID)
    pub const BY_NAME: u8 = 0x04;
}

/// Parameter values for GET STATUS (P1)
pub mod get_status_p1 {
    /// Issuer Security Domain scope
    pub const ISSUER_SECURITY_DOMAIN: u8 = 0x80;
    /// Applications scope
    pub const APPLICATIONS: u8 = 0x40;
}

/// Parameter values for GET STATUS (P2)
pub mod get_status_p2 {
    /// Return entries in TLV format
    pub const TLV_DATA: u8 = 0x02;
}

/// Parameter values for INSTALL (P1)
pub mod install_p1 {
    /// Install for install
    pub const FOR_INSTALL: u8 = 0x04;
    /// Install for make selectable
    pub const FOR_MAKE_SELECTABLE: u8 = 0x08;
    /// Install and make selectable in one step
    pub const FOR_INSTALL_AND_MAKE_SELECTABLE: u8 = FOR_INSTALL | FOR_MAKE_SELECTABLE;
}

/// Parameter values for DELETE (P2)
pub mod delete_p2 {
    /// Delete the named object only
    pub const OBJECT: u8 = 0x00;
    /// Delete the object and everything related to it
    pub const OBJECT_AND_RELATED: u8 = 0x80;
}

/// Parameter values for EXTERNAL AUTHENTICATE (P1)
pub mod security_level {
    /// Command MAC only
    pub const CMAC: u8 = 0x01;
    /// Command MAC and command encryption
    pub const CENC_CMAC: u8 = 0x03;
}

/// Tags used in GlobalPlatform payloads
pub mod tags {
    /// AID in GET STATUS / DELETE payloads
    pub const AID: u16 = 0x4F;
    /// Application label
    pub const APPLICATION_LABEL: u16 = 0x50;
    /// FCI template
    pub const FCI: u16 = 0x6F;
    /// DF name (AID) inside an FCI
    pub const DF_NAME: u16 = 0x84;
    /// Lifecycle state inside a GET STATUS entry
    pub const LIFECYCLE: u16 = 0x9F70;
    /// Privilege bytes inside a GET STATUS entry
    pub const PRIVILEGES: u16 = 0xC5;
    /// GET STATUS registry entry template
    pub const REGISTRY_ENTRY: u16 = 0xE3;
}

/// Well-known application identifiers
pub mod aid {
    /// ISD-R, the root Security Domain targeted by the default script
    pub const ISD_R: [u8; 8] = [0xA0, 0x00, 0x00, 0x01, 0x51, 0x00, 0x00, 0x00];
}

/// Lifecycle state of a Security Domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdLifecycle {
    /// OP_READY
    OpReady,
    /// INITIALIZED
    Initialized,
    /// SECURED
    Secured,
    /// CARD_LOCKED
    CardLocked,
    /// TERMINATED
    Terminated,
}

impl SdLifecycle {
    /// Coding of the state byte in GET STATUS entries
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::OpReady => 0x01,
            Self::Initialized => 0x07,
            Self::Secured => 0x0F,
            Self::CardLocked => 0x7F,
            Self::Terminated => 0xFF,
        }
    }
}

/// Lifecycle state of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    /// LOADED
    Loaded,
    /// INSTALLED
    Installed,
    /// SELECTABLE
    Selectable,
    /// LOCKED
    Locked,
}

impl AppLifecycle {
    /// Coding of the state byte in GET STATUS entries
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Loaded => 0x01,
            Self::Installed => 0x03,
            Self::Selectable => 0x07,
            Self::Locked => 0x83,
        }
    }
}

/// One entry of a GET STATUS response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Application (or Security Domain) identifier
    pub aid: Bytes,
    /// Raw lifecycle state byte
    pub lifecycle: u8,
    /// Privilege bytes
    pub privileges: Bytes,
}

impl StatusEntry {
    /// Serialize as an `E3 { 4F, 9F70, C5 }` registry entry
    pub fn to_tlv(&self) -> Result<Vec<u8>, ParseError> {
        let entry = tlv::constructed(
            tags::REGISTRY_ENTRY,
            vec![
                tlv::primitive(tags::AID, &self.aid)?,
                tlv::primitive(tags::LIFECYCLE, &[self.lifecycle])?,
                tlv::primitive(tags::PRIVILEGES, &self.privileges)?,
            ],
        )?;
        Ok(entry.to_vec())
    }

    /// Parse every registry entry in a GET STATUS response payload
    pub fn parse_all(data: &[u8]) -> Vec<Self> {
        tlv::parse_ber_all(data)
            .iter()
            .filter_map(|entry| {
                let aid = tlv::ber_child(entry, tags::AID)
                    .and_then(tlv::ber_primitive_value)
                    .map(Bytes::copy_from_slice)?;
                let lifecycle = tlv::ber_child(entry, tags::LIFECYCLE)
                    .and_then(tlv::ber_primitive_value)
                    .and_then(|v| v.first().copied())?;
                let privileges = tlv::ber_child(entry, tags::PRIVILEGES)
                    .and_then(tlv::ber_primitive_value)
                    .map(Bytes::copy_from_slice)
                    .unwrap_or_default();
                Some(Self {
                    aid,
                    lifecycle,
                    privileges,
                })
            })
            .collect()
    }
}

/// Build the FCI template (`6F { 84 aid }`) returned by a successful SELECT
pub fn fci_template(aid: &[u8]) -> Result<Vec<u8>, ParseError> {
    let fci = tlv::constructed(tags::FCI, vec![tlv::primitive(tags::DF_NAME, aid)?])?;
    Ok(fci.to_vec())
}

/// SELECT by AID
pub fn select_by_aid(aid: impl Into<Bytes>) -> Command {
    Command::new(cla::ISO7816, ins::SELECT, select_p1::BY_NAME, 0x00).with_data(aid.into())
}

/// INITIALIZE UPDATE with a host challenge; P1 carries the key version
pub fn initialize_update(key_version: u8, host_challenge: [u8; 8]) -> Command {
    Command::new(cla::GP, ins::INITIALIZE_UPDATE, key_version, 0x00)
        .with_data(host_challenge.to_vec())
        .with_le(0x00)
}

/// EXTERNAL AUTHENTICATE carrying the host cryptogram (unwrapped form; the
/// channel wrapper appends the MAC and sets the secure CLA bit)
pub fn external_authenticate(level: u8, host_cryptogram: [u8; 8]) -> Command {
    Command::new(cla::GP, ins::EXTERNAL_AUTHENTICATE, level, 0x00)
        .with_data(host_cryptogram.to_vec())
}

/// GET STATUS for a scope, with an (optionally empty) AID filter
pub fn get_status(scope: u8, aid_filter: &[u8]) -> Command {
    let mut data = BytesMut::with_capacity(2 + aid_filter.len());
    data.put_u8(tags::AID as u8);
    data.put_u8(aid_filter.len() as u8);
    data.put_slice(aid_filter);
    Command::new(cla::GP, ins::GET_STATUS, scope, get_status_p2::TLV_DATA)
        .with_data(data.freeze())
        .with_le(0x00)
}

/// GET DATA for a two-byte tag
pub fn get_data(tag: u16) -> Command {
    Command::new(cla::GP, ins::GET_DATA, (tag >> 8) as u8, tag as u8).with_le(0x00)
}

/// INSTALL [for install and make selectable]
pub fn install_for_install(
    load_file_aid: &[u8],
    module_aid: &[u8],
    application_aid: &[u8],
    privileges: &[u8],
    params: &[u8],
) -> Command {
    let mut data = BytesMut::new();
    for field in [load_file_aid, module_aid, application_aid, privileges] {
        data.put_u8(field.len() as u8);
        data.put_slice(field);
    }
    data.put_u8(params.len() as u8);
    data.put_slice(params);
    // No install token
    data.put_u8(0x00);
    Command::new(
        cla::GP,
        ins::INSTALL,
        install_p1::FOR_INSTALL_AND_MAKE_SELECTABLE,
        0x00,
    )
    .with_data(data.freeze())
    .with_le(0x00)
}

/// DELETE an object by AID
pub fn delete_object(aid: &[u8], and_related: bool) -> Command {
    let p2 = if and_related {
        delete_p2::OBJECT_AND_RELATED
    } else {
        delete_p2::OBJECT
    };
    let mut data = BytesMut::with_capacity(2 + aid.len());
    data.put_u8(tags::AID as u8);
    data.put_u8(aid.len() as u8);
    data.put_slice(aid);
    Command::new(cla::GP, ins::DELETE, 0x00, p2)
        .with_data(data.freeze())
        .with_le(0x00)
}

/// PUT KEY replacing or adding a key set
pub fn put_key(key_version: u8, key_id: u8, key_data: &[u8]) -> Command {
    Command::new(cla::GP, ins::PUT_KEY, key_version, key_id)
        .with_data(key_data.to_vec())
        .with_le(0x00)
}

/// STORE DATA block; `last` flags the final block
pub fn store_data(last: bool, block_number: u8, data: &[u8]) -> Command {
    let p1 = if last { 0x80 } else { 0x00 };
    Command::new(cla::GP, ins::STORE_DATA, p1, block_number).with_data(data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn select_isd_r_wire_format() {
        let cmd = select_by_aid(aid::ISD_R.to_vec());
        assert_eq!(cmd.to_bytes().as_ref(), hex!("00A4040008A000000151000000"));
    }

    #[test]
    fn initialize_update_wire_format() {
        let cmd = initialize_update(0x00, hex!("0001020304050607"));
        assert_eq!(
            cmd.to_bytes().as_ref(),
            hex!("8050000008000102030405060700")
        );
    }

    #[test]
    fn get_status_empty_filter() {
        let cmd = get_status(get_status_p1::ISSUER_SECURITY_DOMAIN, &[]);
        assert_eq!(cmd.to_bytes().as_ref(), hex!("80F28002024F0000"));
    }

    #[test]
    fn fci_wraps_aid() {
        let fci = fci_template(&aid::ISD_R).unwrap();
        assert_eq!(fci.as_slice(), hex!("6F0A8408A000000151000000"));
    }

    #[test]
    fn status_entry_round_trip() {
        let entry = StatusEntry {
            aid: Bytes::copy_from_slice(&aid::ISD_R),
            lifecycle: SdLifecycle::OpReady.to_byte(),
            privileges: Bytes::copy_from_slice(&[0x9E, 0x00, 0x00]),
        };
        let raw = entry.to_tlv().unwrap();
        let parsed = StatusEntry::parse_all(&raw);
        assert_eq!(parsed, vec![entry]);
    }

    #[test]
    fn delete_wraps_aid_in_4f() {
        let cmd = delete_object(&hex!("A0000000030000"), true);
        assert_eq!(
            cmd.to_bytes().as_ref(),
            hex!("80E40080094F07A000000003000000")
        );
    }
}
