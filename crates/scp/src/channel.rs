//! Secure channel facade
//!
//! One contract over the two protocol variants. The host half lives on the
//! administration server, the card half inside the simulated card; both are
//! tagged variants rather than trait objects because the variants differ in
//! key sizes and KDFs but share one call surface.

use ramb_apdu::Command;
use ramb_apdu::gp::security_level;
use tracing::debug;

use crate::error::AuthError;
use crate::keys::StaticKeys;
use crate::scp02::{Scp02Card, Scp02Host};
use crate::scp03::{Scp03Card, Scp03Host};

/// Which secure channel protocol a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpVariant {
    /// SCP02: Triple-DES
    Scp02,
    /// SCP03: AES
    Scp03,
}

/// Command-direction security level negotiated in EXTERNAL AUTHENTICATE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    /// Command MAC only
    Mac,
    /// Command MAC plus command encryption (SCP03 only)
    MacEnc,
}

impl SecurityLevel {
    /// P1 coding for EXTERNAL AUTHENTICATE
    pub const fn p1(self) -> u8 {
        match self {
            Self::Mac => security_level::CMAC,
            Self::MacEnc => security_level::CENC_CMAC,
        }
    }

    /// Decode the P1 byte of EXTERNAL AUTHENTICATE
    pub const fn from_p1(p1: u8) -> Option<Self> {
        match p1 {
            security_level::CMAC => Some(Self::Mac),
            security_level::CENC_CMAC => Some(Self::MacEnc),
            _ => None,
        }
    }
}

/// Host half of a secure channel, one variant per protocol
#[derive(Debug)]
pub enum HostChannel {
    /// SCP02 host half
    Scp02(Scp02Host),
    /// SCP03 host half
    Scp03(Scp03Host),
}

impl HostChannel {
    /// Build the host half from an INITIALIZE UPDATE response payload,
    /// deriving session keys and verifying the card cryptogram.
    pub fn initialize(
        variant: ScpVariant,
        static_keys: &StaticKeys,
        host_challenge: [u8; 8],
        init_update_payload: &[u8],
    ) -> Result<Self, AuthError> {
        match variant {
            ScpVariant::Scp02 => Ok(Self::Scp02(Scp02Host::initialize(
                static_keys,
                host_challenge,
                init_update_payload,
            )?)),
            ScpVariant::Scp03 => Ok(Self::Scp03(Scp03Host::initialize(
                static_keys,
                host_challenge,
                init_update_payload,
            )?)),
        }
    }

    /// Cryptogram sent in EXTERNAL AUTHENTICATE
    pub fn host_cryptogram(&self) -> [u8; 8] {
        match self {
            Self::Scp02(host) => host.host_cryptogram(),
            Self::Scp03(host) => host.host_cryptogram(),
        }
    }

    /// Finish establishment after EXTERNAL AUTHENTICATE succeeds
    ///
    /// Turns on command encryption when the negotiated level asks for it;
    /// SCP02 here is MAC-only.
    pub fn activate(&mut self, level: SecurityLevel) -> Result<(), AuthError> {
        match (self, level) {
            (Self::Scp02(_), SecurityLevel::Mac) => Ok(()),
            (Self::Scp02(_), SecurityLevel::MacEnc) => Err(AuthError::UnsupportedLevel),
            (Self::Scp03(_), SecurityLevel::Mac) => Ok(()),
            (Self::Scp03(host), SecurityLevel::MacEnc) => {
                host.enable_encryption();
                debug!("SCP03 command encryption enabled");
                Ok(())
            }
        }
    }

    /// Wrap an outgoing command for the secure channel
    pub fn wrap_command(&mut self, command: &Command) -> Result<Command, AuthError> {
        match self {
            Self::Scp02(host) => Ok(host.wrap_command(command)),
            Self::Scp03(host) => host.wrap_command(command),
        }
    }

    /// Protocol variant of this channel
    pub const fn variant(&self) -> ScpVariant {
        match self {
            Self::Scp02(_) => ScpVariant::Scp02,
            Self::Scp03(_) => ScpVariant::Scp03,
        }
    }
}

/// Card half of a secure channel, one variant per protocol
#[derive(Debug)]
pub enum CardChannel {
    /// SCP02 card half
    Scp02(Scp02Card),
    /// SCP03 card half
    Scp03(Scp03Card),
}

impl CardChannel {
    /// Handle INITIALIZE UPDATE: create the card half and the response
    /// payload to return to the host.
    pub fn respond(
        variant: ScpVariant,
        static_keys: &StaticKeys,
        key_diversification: [u8; 10],
        key_version: u8,
        sequence_counter: [u8; 2],
        host_challenge: [u8; 8],
    ) -> (Self, Vec<u8>) {
        match variant {
            ScpVariant::Scp02 => {
                let (card, payload) = Scp02Card::respond(
                    static_keys,
                    key_diversification,
                    key_version,
                    sequence_counter,
                    host_challenge,
                );
                (Self::Scp02(card), payload)
            }
            ScpVariant::Scp03 => {
                let (card, payload) = Scp03Card::respond(
                    static_keys,
                    key_diversification,
                    key_version,
                    host_challenge,
                );
                (Self::Scp03(card), payload)
            }
        }
    }

    /// Verify the host cryptogram from EXTERNAL AUTHENTICATE
    pub fn verify_host_cryptogram(&self, cryptogram: &[u8]) -> Result<(), AuthError> {
        match self {
            Self::Scp02(card) => card.verify_host_cryptogram(cryptogram),
            Self::Scp03(card) => card.verify_host_cryptogram(cryptogram),
        }
    }

    /// Finish establishment on the card side with the level the host put in
    /// EXTERNAL AUTHENTICATE P1
    pub fn activate(&mut self, level: SecurityLevel) -> Result<(), AuthError> {
        match (self, level) {
            (Self::Scp02(_), SecurityLevel::Mac) => Ok(()),
            (Self::Scp02(_), SecurityLevel::MacEnc) => Err(AuthError::UnsupportedLevel),
            (Self::Scp03(_), SecurityLevel::Mac) => Ok(()),
            (Self::Scp03(card), SecurityLevel::MacEnc) => {
                card.enable_encryption();
                Ok(())
            }
        }
    }

    /// Verify, strip and (when negotiated) decrypt a wrapped command
    pub fn unwrap_command(&mut self, command: &Command) -> Result<Command, AuthError> {
        match self {
            Self::Scp02(card) => card.unwrap_command(command),
            Self::Scp03(card) => card.unwrap_command(command),
        }
    }

    /// Protocol variant of this channel
    pub const fn variant(&self) -> ScpVariant {
        match self {
            Self::Scp02(_) => ScpVariant::Scp02,
            Self::Scp03(_) => ScpVariant::Scp03,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use ramb_apdu::gp;

    fn establish(
        variant: ScpVariant,
        level: SecurityLevel,
    ) -> (HostChannel, CardChannel) {
        let static_keys = StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"));
        let host_challenge = hex!("f0467f908e5ca23f");

        let (mut card, payload) = CardChannel::respond(
            variant,
            &static_keys,
            hex!("00000265018303953662"),
            0x20,
            hex!("002a"),
            host_challenge,
        );
        let mut host =
            HostChannel::initialize(variant, &static_keys, host_challenge, &payload).unwrap();

        // EXTERNAL AUTHENTICATE round trip through both halves
        let ext_auth = gp::external_authenticate(level.p1(), host.host_cryptogram());
        let wrapped = host.wrap_command(&ext_auth).unwrap();
        let unwrapped = card.unwrap_command(&wrapped).unwrap();
        let data = unwrapped.data.as_deref().unwrap();
        card.verify_host_cryptogram(data).unwrap();
        card.activate(level).unwrap();
        host.activate(level).unwrap();

        (host, card)
    }

    #[test]
    fn scp02_full_establishment() {
        let (mut host, mut card) = establish(ScpVariant::Scp02, SecurityLevel::Mac);
        let cmd = gp::get_status(gp::get_status_p1::ISSUER_SECURITY_DOMAIN, &[]);
        let wrapped = host.wrap_command(&cmd).unwrap();
        let unwrapped = card.unwrap_command(&wrapped).unwrap();
        assert_eq!(unwrapped.ins, gp::ins::GET_STATUS);
    }

    #[test]
    fn scp03_full_establishment_with_encryption() {
        let (mut host, mut card) = establish(ScpVariant::Scp03, SecurityLevel::MacEnc);
        let cmd = gp::store_data(true, 0, &hex!("c9021234"));
        let wrapped = host.wrap_command(&cmd).unwrap();
        // Payload is encrypted on the wire
        assert_ne!(
            &wrapped.data.as_deref().unwrap()[..4],
            hex!("c9021234").as_slice()
        );
        let unwrapped = card.unwrap_command(&wrapped).unwrap();
        assert_eq!(unwrapped.data.as_deref(), Some(hex!("c9021234").as_slice()));
    }

    #[test]
    fn scp02_rejects_encryption_level() {
        let static_keys = StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"));
        let host_challenge = hex!("0000000000000001");
        let (_, payload) = CardChannel::respond(
            ScpVariant::Scp02,
            &static_keys,
            [0u8; 10],
            0x20,
            hex!("0001"),
            host_challenge,
        );
        let mut host =
            HostChannel::initialize(ScpVariant::Scp02, &static_keys, host_challenge, &payload)
                .unwrap();
        assert_eq!(
            host.activate(SecurityLevel::MacEnc),
            Err(AuthError::UnsupportedLevel)
        );
    }

    #[test]
    fn variant_mismatch_is_detected() {
        let static_keys = StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"));
        let host_challenge = hex!("0102030405060708");
        let (_, payload) = CardChannel::respond(
            ScpVariant::Scp03,
            &static_keys,
            [0u8; 10],
            0x30,
            hex!("0000"),
            host_challenge,
        );
        // An SCP02 host refuses an SCP03 INITIALIZE UPDATE response
        assert!(matches!(
            HostChannel::initialize(ScpVariant::Scp02, &static_keys, host_challenge, &payload),
            Err(AuthError::MalformedInitUpdate { .. } | AuthError::UnsupportedScpVersion(_))
        ));
    }

    #[test]
    fn security_level_p1_round_trip() {
        assert_eq!(SecurityLevel::from_p1(0x01), Some(SecurityLevel::Mac));
        assert_eq!(SecurityLevel::from_p1(0x03), Some(SecurityLevel::MacEnc));
        assert_eq!(SecurityLevel::from_p1(0x42), None);
    }
}
