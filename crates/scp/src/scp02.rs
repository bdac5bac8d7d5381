//! SCP02 cryptographic operations and channel halves
//!
//! Key derivation, cryptogram calculation and the full-3DES retail MAC per
//! the GlobalPlatform Card Specification: session keys are derived from the
//! sequence counter with Triple-DES in CBC mode, commands carry a chained
//! C-MAC computed with single DES over all blocks but the last.

use bytes::{BufMut, BytesMut};
use cbc::Encryptor;
use cbc_mac::{CbcMac, Mac};
use cipher::{BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit, generic_array::GenericArray};
use des::{Des, TdesEde3};
use rand::RngCore;

use ramb_apdu::Command;
use ramb_apdu::gp::cla;

use crate::error::AuthError;
use crate::keys::{SessionKeys, StaticKeys};

/// Derivation purpose for the session encryption key
pub const DERIVATION_ENC: [u8; 2] = [0x01, 0x82];
/// Derivation purpose for the session MAC key
pub const DERIVATION_MAC: [u8; 2] = [0x01, 0x01];
/// Derivation purpose for the session data encryption key
pub const DERIVATION_DEK: [u8; 2] = [0x01, 0x81];

/// SCP02 protocol identifier in the INITIALIZE UPDATE key information
pub const SCP02_ID: u8 = 0x02;

const INIT_UPDATE_LEN: usize = 28;

/// Resize a 16-byte key to 24 bytes for 3DES by repeating the first half
fn resize_key(key: &[u8; 16]) -> [u8; 24] {
    let mut result = [0u8; 24];
    result[..16].copy_from_slice(key);
    result[16..24].copy_from_slice(&key[..8]);
    result
}

fn subkey8(key: &[u8; 16]) -> [u8; 8] {
    let mut result = [0u8; 8];
    result.copy_from_slice(&key[..8]);
    result
}

/// Derive a session key from a static key using the sequence counter and a
/// two-byte purpose constant
pub fn derive_session_key(static_key: &[u8; 16], seq: &[u8; 2], purpose: &[u8; 2]) -> [u8; 16] {
    let mut blocks = [0u8; 16];
    blocks[0..2].copy_from_slice(purpose);
    blocks[2..4].copy_from_slice(seq);

    let mut encryptor =
        Encryptor::<TdesEde3>::new(&resize_key(static_key).into(), &[0u8; 8].into());
    for chunk in blocks.chunks_exact_mut(8) {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }

    blocks
}

/// Calculate a host or card cryptogram over the challenge material
///
/// The card cryptogram covers host challenge ‖ sequence counter ‖ card
/// challenge; the host cryptogram covers sequence counter ‖ card challenge ‖
/// host challenge.
pub fn calculate_cryptogram(
    enc_key: &[u8; 16],
    sequence_counter: &[u8; 2],
    card_challenge: &[u8; 6],
    host_challenge: &[u8; 8],
    for_host: bool,
) -> [u8; 8] {
    let mut data = [0u8; 24];

    if for_host {
        data[0..2].copy_from_slice(sequence_counter);
        data[2..8].copy_from_slice(card_challenge);
        data[8..16].copy_from_slice(host_challenge);
    } else {
        data[0..8].copy_from_slice(host_challenge);
        data[8..10].copy_from_slice(sequence_counter);
        data[10..16].copy_from_slice(card_challenge);
    }

    // ISO 9797-1 method 2 padding fills the third block
    data[16] = 0x80;

    let mut encryptor = Encryptor::<TdesEde3>::new(&resize_key(enc_key).into(), &[0u8; 8].into());
    for chunk in data.chunks_exact_mut(8) {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }

    let mut cryptogram = [0u8; 8];
    cryptogram.copy_from_slice(&data[16..24]);
    cryptogram
}

/// Calculate the SCP02 retail MAC: single DES for all blocks except the
/// last, which uses 3DES
pub fn mac_full_3des(key: &[u8; 16], icv: &[u8; 8], data: &[u8]) -> [u8; 8] {
    let mut padded = data.to_vec();
    padded.push(0x80);
    while padded.len() % 8 != 0 {
        padded.push(0x00);
    }

    let des_cipher = Des::new(&subkey8(key).into());
    let des3_cipher = TdesEde3::new(&resize_key(key).into());

    let mut chain = *icv;
    let (head, last) = padded.split_at(padded.len() - 8);

    for chunk in head.chunks_exact(8) {
        let mut block = [0u8; 8];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = chunk[i] ^ chain[i];
        }
        des_cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        chain = block;
    }

    let mut block = [0u8; 8];
    for (i, byte) in block.iter_mut().enumerate() {
        *byte = last[i] ^ chain[i];
    }
    des3_cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
    block
}

/// Encrypt the ICV for MAC chaining (DES CBC-MAC with the first key half)
pub fn encrypt_icv(mac_key: &[u8; 16], icv: &[u8; 8]) -> [u8; 8] {
    let mut mac = <CbcMac<Des> as Mac>::new(&subkey8(mac_key).into());
    mac.update(icv);
    mac.finalize().into_bytes().into()
}

/// SCP02 command wrapper: appends the chained C-MAC and sets the secure
/// messaging class bit. Both halves run the same chain; the card half
/// verifies instead of appending.
#[derive(Clone)]
pub struct Scp02Wrapper {
    mac_key: [u8; 16],
    icv: [u8; 8],
}

impl std::fmt::Debug for Scp02Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scp02Wrapper").finish_non_exhaustive()
    }
}

impl Scp02Wrapper {
    /// Create a wrapper over the session MAC key
    pub const fn new(mac_key: [u8; 16]) -> Self {
        Self {
            mac_key,
            icv: [0u8; 8],
        }
    }

    /// Current chaining vector
    pub const fn icv(&self) -> &[u8; 8] {
        &self.icv
    }

    fn icv_for_mac(&self) -> [u8; 8] {
        if self.icv == [0u8; 8] {
            self.icv
        } else {
            encrypt_icv(&self.mac_key, &self.icv)
        }
    }

    fn mac_input(command: &Command, payload: &[u8]) -> BytesMut {
        let mut mac_data = BytesMut::with_capacity(5 + payload.len());
        mac_data.put_u8(command.cla | cla::SECURE);
        mac_data.put_u8(command.ins);
        mac_data.put_u8(command.p1);
        mac_data.put_u8(command.p2);
        // Lc covers the payload plus the 8-byte MAC
        mac_data.put_u8((payload.len() + 8) as u8);
        mac_data.put_slice(payload);
        mac_data
    }

    /// Wrap an APDU command by appending the chained MAC
    pub fn wrap_command(&mut self, command: &Command) -> Command {
        let payload = command.data.as_deref().unwrap_or(&[]);
        let mac_data = Self::mac_input(command, payload);

        let mac = mac_full_3des(&self.mac_key, &self.icv_for_mac(), &mac_data);
        self.icv = mac;

        let mut new_data = BytesMut::with_capacity(payload.len() + 8);
        new_data.put_slice(payload);
        new_data.put_slice(&mac);

        let mut wrapped = Command::new(
            command.cla | cla::SECURE,
            command.ins,
            command.p1,
            command.p2,
        )
        .with_data(new_data.freeze());
        if let Some(le) = command.le {
            wrapped = wrapped.with_le(le);
        }
        wrapped
    }

    /// Verify the MAC on a received command and strip it
    pub fn verify_command(&mut self, command: &Command) -> Result<Command, AuthError> {
        let data = command.data.as_deref().unwrap_or(&[]);
        if data.len() < 8 {
            return Err(AuthError::MalformedSecureData);
        }
        let (payload, received_mac) = data.split_at(data.len() - 8);

        let mac_data = Self::mac_input(command, payload);
        let mac = mac_full_3des(&self.mac_key, &self.icv_for_mac(), &mac_data);
        if mac != received_mac {
            return Err(AuthError::MacMismatch);
        }
        self.icv = mac;

        let mut unwrapped = Command::new(command.cla, command.ins, command.p1, command.p2);
        if !payload.is_empty() {
            unwrapped = unwrapped.with_data(payload.to_vec());
        }
        if let Some(le) = command.le {
            unwrapped = unwrapped.with_le(le);
        }
        Ok(unwrapped)
    }
}

fn derive_all(static_keys: &StaticKeys, seq: &[u8; 2]) -> SessionKeys {
    SessionKeys::new(
        derive_session_key(static_keys.enc(), seq, &DERIVATION_ENC),
        derive_session_key(static_keys.mac(), seq, &DERIVATION_MAC),
        derive_session_key(static_keys.dek(), seq, &DERIVATION_DEK),
    )
}

/// Host half of an SCP02 channel
#[derive(Debug)]
pub struct Scp02Host {
    keys: SessionKeys,
    wrapper: Scp02Wrapper,
    sequence_counter: [u8; 2],
    card_challenge: [u8; 6],
    host_challenge: [u8; 8],
}

impl Scp02Host {
    /// Process an INITIALIZE UPDATE response payload: derive session keys
    /// and verify the card cryptogram. A mismatch is terminal.
    pub fn initialize(
        static_keys: &StaticKeys,
        host_challenge: [u8; 8],
        payload: &[u8],
    ) -> Result<Self, AuthError> {
        if payload.len() != INIT_UPDATE_LEN {
            return Err(AuthError::MalformedInitUpdate {
                expected: INIT_UPDATE_LEN,
                actual: payload.len(),
            });
        }

        let scp_version = payload[11];
        if scp_version != SCP02_ID {
            return Err(AuthError::UnsupportedScpVersion(scp_version));
        }

        let mut sequence_counter = [0u8; 2];
        sequence_counter.copy_from_slice(&payload[12..14]);
        let mut card_challenge = [0u8; 6];
        card_challenge.copy_from_slice(&payload[14..20]);
        let card_cryptogram = &payload[20..28];

        let keys = derive_all(static_keys, &sequence_counter);
        let expected = calculate_cryptogram(
            keys.enc(),
            &sequence_counter,
            &card_challenge,
            &host_challenge,
            false,
        );
        if expected != card_cryptogram {
            return Err(AuthError::CryptogramMismatch);
        }

        let wrapper = Scp02Wrapper::new(*keys.mac());
        Ok(Self {
            keys,
            wrapper,
            sequence_counter,
            card_challenge,
            host_challenge,
        })
    }

    /// Cryptogram the host sends in EXTERNAL AUTHENTICATE
    pub fn host_cryptogram(&self) -> [u8; 8] {
        calculate_cryptogram(
            self.keys.enc(),
            &self.sequence_counter,
            &self.card_challenge,
            &self.host_challenge,
            true,
        )
    }

    /// Wrap an outgoing command with the chained C-MAC
    pub fn wrap_command(&mut self, command: &Command) -> Command {
        self.wrapper.wrap_command(command)
    }
}

/// Card half of an SCP02 channel
#[derive(Debug)]
pub struct Scp02Card {
    keys: SessionKeys,
    wrapper: Scp02Wrapper,
    sequence_counter: [u8; 2],
    card_challenge: [u8; 6],
    host_challenge: [u8; 8],
}

impl Scp02Card {
    /// Handle INITIALIZE UPDATE on the card side: generate a challenge,
    /// derive session keys and produce the 28-byte response payload.
    pub fn respond(
        static_keys: &StaticKeys,
        key_diversification: [u8; 10],
        key_version: u8,
        sequence_counter: [u8; 2],
        host_challenge: [u8; 8],
    ) -> (Self, Vec<u8>) {
        let mut card_challenge = [0u8; 6];
        rand::rng().fill_bytes(&mut card_challenge);

        let keys = derive_all(static_keys, &sequence_counter);
        let card_cryptogram = calculate_cryptogram(
            keys.enc(),
            &sequence_counter,
            &card_challenge,
            &host_challenge,
            false,
        );

        let mut payload = Vec::with_capacity(INIT_UPDATE_LEN);
        payload.extend_from_slice(&key_diversification);
        payload.extend_from_slice(&[key_version, SCP02_ID]);
        payload.extend_from_slice(&sequence_counter);
        payload.extend_from_slice(&card_challenge);
        payload.extend_from_slice(&card_cryptogram);

        let wrapper = Scp02Wrapper::new(*keys.mac());
        (
            Self {
                keys,
                wrapper,
                sequence_counter,
                card_challenge,
                host_challenge,
            },
            payload,
        )
    }

    /// Verify the host cryptogram from EXTERNAL AUTHENTICATE
    pub fn verify_host_cryptogram(&self, cryptogram: &[u8]) -> Result<(), AuthError> {
        let expected = calculate_cryptogram(
            self.keys.enc(),
            &self.sequence_counter,
            &self.card_challenge,
            &self.host_challenge,
            true,
        );
        if cryptogram != expected {
            return Err(AuthError::CryptogramMismatch);
        }
        Ok(())
    }

    /// Verify and strip the C-MAC on a received command
    pub fn unwrap_command(&mut self, command: &Command) -> Result<Command, AuthError> {
        self.wrapper.verify_command(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_derive_key() {
        let card_key = hex!("404142434445464748494a4b4c4d4e4f");
        let seq = hex!("0065");

        let enc_key = derive_session_key(&card_key, &seq, &DERIVATION_ENC);
        assert_eq!(enc_key, hex!("85e72aaf47874218a202bf5ef891dd21"));
    }

    #[test]
    fn test_resize_key_24() {
        let key = hex!("404142434445464748494a4b4c4d4e4f");
        assert_eq!(
            resize_key(&key),
            hex!("404142434445464748494a4b4c4d4e4f4041424344454647")
        );
    }

    #[test]
    fn test_verify_cryptogram() {
        let enc_key = hex!("16b5867ff50be7239c2bf1245b83a362");
        let host_challenge = hex!("32da078d7aac1cff");
        let sequence_counter = hex!("0072");
        let card_challenge = hex!("84f64a7d6465");
        let card_cryptogram = hex!("05c4bb8a86014e22");

        let result = calculate_cryptogram(
            &enc_key,
            &sequence_counter,
            &card_challenge,
            &host_challenge,
            false,
        );
        assert_eq!(result, card_cryptogram);
    }

    #[test]
    fn test_mac_full_3des() {
        let key = hex!("5b02e75ad63190aece0622936f11abab");
        let data = hex!("8482010010810b098a8fbb88da");
        let result = mac_full_3des(&key, &[0u8; 8], &data);

        assert_eq!(result, hex!("5271d7174a5a166a"));
    }

    #[test]
    fn test_wrap_command_chains_icv() {
        let mac_key = hex!("2983ba77d709c2daa1e6000abccac951");
        let mut wrapper = Scp02Wrapper::new(mac_key);
        assert_eq!(wrapper.icv(), &[0u8; 8]);

        let cmd =
            Command::new(0x80, 0x82, 0x01, 0x00).with_data(hex!("1d4de92eaf7a2c9f").to_vec());
        let wrapped = wrapper.wrap_command(&cmd);
        assert_eq!(
            wrapped.to_bytes().as_ref(),
            hex!("84820100101d4de92eaf7a2c9f8f9b0df681c1d3ec")
        );
        assert_eq!(wrapper.icv(), &hex!("8f9b0df681c1d3ec"));

        let cmd = Command::new(0x80, 0xF2, 0x80, 0x02)
            .with_data(hex!("4f00").to_vec())
            .with_le(0);
        let wrapped = wrapper.wrap_command(&cmd);
        assert_eq!(
            wrapped.to_bytes().as_ref(),
            hex!("84f280020a4f0030f149209e17b39700")
        );
    }

    #[test]
    fn test_host_initialize_from_card_response() {
        // Captured INITIALIZE UPDATE exchange (status word stripped)
        let static_keys = StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"));
        let payload = hex!("000002650183039536622002000de9c62ba1c4c8e55fcb91b6654ce4");
        let host_challenge = hex!("f0467f908e5ca23f");

        let host = Scp02Host::initialize(&static_keys, host_challenge, &payload).unwrap();
        assert_eq!(host.sequence_counter, hex!("000d"));
    }

    #[test]
    fn test_host_initialize_rejects_bad_input() {
        let static_keys = StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"));
        let host_challenge = hex!("f0467f908e5ca23f");

        // Truncated payload
        assert!(matches!(
            Scp02Host::initialize(&static_keys, host_challenge, &hex!("0102")),
            Err(AuthError::MalformedInitUpdate { .. })
        ));

        // Wrong SCP version byte
        let payload = hex!("000002650183039536622001000de9c62ba1c4c8e55fcb91b6654ce4");
        assert!(matches!(
            Scp02Host::initialize(&static_keys, host_challenge, &payload),
            Err(AuthError::UnsupportedScpVersion(0x01))
        ));

        // Corrupted cryptogram
        let payload = hex!("000002650183039536622002000de9c62ba1c4c8e55fcb91b6654c00");
        assert!(matches!(
            Scp02Host::initialize(&static_keys, host_challenge, &payload),
            Err(AuthError::CryptogramMismatch)
        ));
    }

    #[test]
    fn test_mutual_authentication_between_halves() {
        let static_keys = StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"));
        let host_challenge = hex!("0011223344556677");

        let (card, payload) = Scp02Card::respond(
            &static_keys,
            hex!("00000265018303953662"),
            0x20,
            hex!("0001"),
            host_challenge,
        );

        let mut host = Scp02Host::initialize(&static_keys, host_challenge, &payload).unwrap();
        card.verify_host_cryptogram(&host.host_cryptogram()).unwrap();

        // A wrapped command verifies on the card side and round-trips
        let mut card = card;
        let cmd = Command::new(0x80, 0xF2, 0x80, 0x02)
            .with_data(hex!("4f00").to_vec())
            .with_le(0);
        let wrapped = host.wrap_command(&cmd);
        assert_eq!(wrapped.cla, 0x84);
        let unwrapped = card.unwrap_command(&wrapped).unwrap();
        assert_eq!(unwrapped.ins, 0xF2);
        assert_eq!(unwrapped.data.as_deref(), Some(hex!("4f00").as_slice()));

        // Tampering with the MAC is caught
        let cmd2 = Command::new(0x80, 0xCA, 0x00, 0x66).with_le(0);
        let mut tampered = host.wrap_command(&cmd2);
        let mut data = tampered.data.as_ref().unwrap().to_vec();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        tampered.data = Some(data.into());
        assert_eq!(
            card.unwrap_command(&tampered),
            Err(AuthError::MacMismatch)
        );
    }

    #[test]
    fn test_host_cryptogram_differs_from_card_cryptogram() {
        let enc_key = hex!("16b5867ff50be7239c2bf1245b83a362");
        let host = calculate_cryptogram(
            &enc_key,
            &hex!("0072"),
            &hex!("84f64a7d6465"),
            &hex!("32da078d7aac1cff"),
            true,
        );
        let card = calculate_cryptogram(
            &enc_key,
            &hex!("0072"),
            &hex!("84f64a7d6465"),
            &hex!("32da078d7aac1cff"),
            false,
        );
        assert_ne!(host, card);
    }
}
