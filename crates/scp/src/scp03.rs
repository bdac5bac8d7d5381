//! SCP03 cryptographic operations and channel halves
//!
//! AES-based secure channel per the GlobalPlatform Card Specification
//! Amendment D: session keys come from an SP 800-108 counter-mode KDF with
//! AES-CMAC as the PRF, commands carry an AES-CMAC chained through a 16-byte
//! MAC chaining value, and command data is optionally encrypted in CBC mode
//! under an ICV derived from a per-command counter.

use aes::Aes128;
use cipher::{BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use cipher::generic_array::GenericArray;
use cmac::{Cmac, Mac};
use rand::RngCore;

use ramb_apdu::Command;
use ramb_apdu::gp::cla;

use crate::error::AuthError;
use crate::keys::{SessionKeys, StaticKeys};

/// Derivation constant for the card cryptogram
pub const DDC_CARD_CRYPTOGRAM: u8 = 0x00;
/// Derivation constant for the host cryptogram
pub const DDC_HOST_CRYPTOGRAM: u8 = 0x01;
/// Derivation constant for the session encryption key
pub const DDC_S_ENC: u8 = 0x04;
/// Derivation constant for the session MAC key
pub const DDC_S_MAC: u8 = 0x06;
/// Derivation constant for the session response MAC key
pub const DDC_S_RMAC: u8 = 0x07;

/// SCP03 protocol identifier in the INITIALIZE UPDATE key information
pub const SCP03_ID: u8 = 0x03;

const INIT_UPDATE_LEN: usize = 29;
const INIT_UPDATE_LEN_WITH_COUNTER: usize = 32;

fn cmac16(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as Mac>::new(&(*key).into());
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// SP 800-108 counter-mode KDF with AES-CMAC as PRF
///
/// Derivation data: 11 zero bytes ‖ constant ‖ 0x00 ‖ L (bits, big endian)
/// ‖ counter (1, fixed: one iteration covers every output used here) ‖
/// context. Returns the full PRF block; callers take the prefix they need.
fn kdf_block(key: &[u8; 16], constant: u8, context: &[u8], out_bytes: usize) -> [u8; 16] {
    let mut data = Vec::with_capacity(16 + context.len());
    data.extend_from_slice(&[0u8; 11]);
    data.push(constant);
    data.push(0x00);
    data.extend_from_slice(&((out_bytes as u16) * 8).to_be_bytes());
    data.push(0x01);
    data.extend_from_slice(context);
    cmac16(key, &data)
}

/// Derive a 16-byte session key
pub fn derive_key(static_key: &[u8; 16], constant: u8, context: &[u8]) -> [u8; 16] {
    kdf_block(static_key, constant, context, 16)
}

/// Derive an 8-byte cryptogram under the session MAC key
pub fn derive_cryptogram(s_mac: &[u8; 16], constant: u8, context: &[u8]) -> [u8; 8] {
    let block = kdf_block(s_mac, constant, context, 8);
    let mut out = [0u8; 8];
    out.copy_from_slice(&block[..8]);
    out
}

fn pad80(data: &[u8]) -> Vec<u8> {
    let mut padded = data.to_vec();
    padded.push(0x80);
    while padded.len() % 16 != 0 {
        padded.push(0x00);
    }
    padded
}

fn unpad80(mut data: Vec<u8>) -> Result<Vec<u8>, AuthError> {
    while let Some(&byte) = data.last() {
        data.pop();
        match byte {
            0x00 => continue,
            0x80 => return Ok(data),
            _ => break,
        }
    }
    Err(AuthError::MalformedSecureData)
}

fn counter_icv(enc_key: &[u8; 16], counter: u128) -> [u8; 16] {
    let mut block = counter.to_be_bytes();
    Aes128::new(&(*enc_key).into()).encrypt_block(GenericArray::from_mut_slice(&mut block));
    block
}

fn encrypt_payload(enc_key: &[u8; 16], counter: u128, payload: &[u8]) -> Vec<u8> {
    let icv = counter_icv(enc_key, counter);
    let mut padded = pad80(payload);
    let mut encryptor = cbc::Encryptor::<Aes128>::new(&(*enc_key).into(), &icv.into());
    for chunk in padded.chunks_exact_mut(16) {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
    padded
}

fn decrypt_payload(enc_key: &[u8; 16], counter: u128, data: &[u8]) -> Result<Vec<u8>, AuthError> {
    if data.is_empty() || data.len() % 16 != 0 {
        return Err(AuthError::MalformedSecureData);
    }
    let icv = counter_icv(enc_key, counter);
    let mut buffer = data.to_vec();
    let mut decryptor = cbc::Decryptor::<Aes128>::new(&(*enc_key).into(), &icv.into());
    for chunk in buffer.chunks_exact_mut(16) {
        decryptor.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
    unpad80(buffer)
}

/// SCP03 command wrapper shared by both halves: AES-CMAC chained through a
/// 16-byte MAC chaining value, optional counter-based command encryption.
#[derive(Clone)]
struct Scp03Wrapper {
    enc_key: [u8; 16],
    mac_key: [u8; 16],
    chaining: [u8; 16],
    counter: u128,
    encrypt: bool,
}

impl std::fmt::Debug for Scp03Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scp03Wrapper")
            .field("encrypt", &self.encrypt)
            .finish_non_exhaustive()
    }
}

impl Scp03Wrapper {
    const fn new(enc_key: [u8; 16], mac_key: [u8; 16]) -> Self {
        Self {
            enc_key,
            mac_key,
            chaining: [0u8; 16],
            counter: 0,
            encrypt: false,
        }
    }

    fn bump_counter(&mut self) -> Result<(), AuthError> {
        // A repeated counter would reuse an ICV; the channel must die first.
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(AuthError::CounterExhausted)?;
        Ok(())
    }

    fn mac_input(&self, cla: u8, command: &Command, payload: &[u8]) -> Vec<u8> {
        let mut input = Vec::with_capacity(16 + 5 + payload.len());
        input.extend_from_slice(&self.chaining);
        input.extend_from_slice(&[
            cla,
            command.ins,
            command.p1,
            command.p2,
            (payload.len() + 8) as u8,
        ]);
        input.extend_from_slice(payload);
        input
    }

    fn wrap_command(&mut self, command: &Command) -> Result<Command, AuthError> {
        let mut payload = command.data.as_deref().unwrap_or(&[]).to_vec();
        if self.encrypt {
            self.bump_counter()?;
            if !payload.is_empty() {
                payload = encrypt_payload(&self.enc_key, self.counter, &payload);
            }
        }

        let cla = command.cla | cla::SECURE;
        let full_mac = cmac16(&self.mac_key, &self.mac_input(cla, command, &payload));
        self.chaining = full_mac;

        payload.extend_from_slice(&full_mac[..8]);
        let mut wrapped =
            Command::new(cla, command.ins, command.p1, command.p2).with_data(payload);
        if let Some(le) = command.le {
            wrapped = wrapped.with_le(le);
        }
        Ok(wrapped)
    }

    fn unwrap_command(&mut self, command: &Command) -> Result<Command, AuthError> {
        let data = command.data.as_deref().unwrap_or(&[]);
        if data.len() < 8 {
            return Err(AuthError::MalformedSecureData);
        }
        let (payload, received_mac) = data.split_at(data.len() - 8);

        let full_mac = cmac16(&self.mac_key, &self.mac_input(command.cla, command, payload));
        if &full_mac[..8] != received_mac {
            return Err(AuthError::MacMismatch);
        }
        self.chaining = full_mac;

        let mut clear = payload.to_vec();
        if self.encrypt {
            self.bump_counter()?;
            if !clear.is_empty() {
                clear = decrypt_payload(&self.enc_key, self.counter, &clear)?;
            }
        }

        let mut unwrapped = Command::new(command.cla, command.ins, command.p1, command.p2);
        if !clear.is_empty() {
            unwrapped = unwrapped.with_data(clear);
        }
        if let Some(le) = command.le {
            unwrapped = unwrapped.with_le(le);
        }
        Ok(unwrapped)
    }
}

fn session_context(host_challenge: &[u8; 8], card_challenge: &[u8; 8]) -> [u8; 16] {
    let mut context = [0u8; 16];
    context[..8].copy_from_slice(host_challenge);
    context[8..].copy_from_slice(card_challenge);
    context
}

fn derive_all(static_keys: &StaticKeys, context: &[u8; 16]) -> SessionKeys {
    SessionKeys::new(
        derive_key(static_keys.enc(), DDC_S_ENC, context),
        derive_key(static_keys.mac(), DDC_S_MAC, context),
        // The DEK stays static in SCP03; it is used for key wrapping only
        *static_keys.dek(),
    )
}

/// Host half of an SCP03 channel
#[derive(Debug)]
pub struct Scp03Host {
    keys: SessionKeys,
    wrapper: Scp03Wrapper,
    context: [u8; 16],
}

impl Scp03Host {
    /// Process an INITIALIZE UPDATE response payload: derive session keys
    /// and verify the card cryptogram. A mismatch is terminal.
    pub fn initialize(
        static_keys: &StaticKeys,
        host_challenge: [u8; 8],
        payload: &[u8],
    ) -> Result<Self, AuthError> {
        // 29 bytes, or 32 with the trailing sequence counter of
        // pseudo-random challenge mode (ignored here).
        if payload.len() != INIT_UPDATE_LEN && payload.len() != INIT_UPDATE_LEN_WITH_COUNTER {
            return Err(AuthError::MalformedInitUpdate {
                expected: INIT_UPDATE_LEN,
                actual: payload.len(),
            });
        }

        let scp_version = payload[11];
        if scp_version != SCP03_ID {
            return Err(AuthError::UnsupportedScpVersion(scp_version));
        }

        let mut card_challenge = [0u8; 8];
        card_challenge.copy_from_slice(&payload[13..21]);
        let card_cryptogram = &payload[21..29];

        let context = session_context(&host_challenge, &card_challenge);
        let keys = derive_all(static_keys, &context);

        let expected = derive_cryptogram(keys.mac(), DDC_CARD_CRYPTOGRAM, &context);
        if expected != card_cryptogram {
            return Err(AuthError::CryptogramMismatch);
        }

        let wrapper = Scp03Wrapper::new(*keys.enc(), *keys.mac());
        Ok(Self {
            keys,
            wrapper,
            context,
        })
    }

    /// Cryptogram the host sends in EXTERNAL AUTHENTICATE
    pub fn host_cryptogram(&self) -> [u8; 8] {
        derive_cryptogram(self.keys.mac(), DDC_HOST_CRYPTOGRAM, &self.context)
    }

    /// Turn on command encryption (after EXTERNAL AUTHENTICATE succeeds
    /// with C-DECRYPTION in the security level)
    pub const fn enable_encryption(&mut self) {
        self.wrapper.encrypt = true;
    }

    /// Wrap an outgoing command: chained C-MAC plus optional encryption
    pub fn wrap_command(&mut self, command: &Command) -> Result<Command, AuthError> {
        self.wrapper.wrap_command(command)
    }
}

/// Card half of an SCP03 channel
#[derive(Debug)]
pub struct Scp03Card {
    keys: SessionKeys,
    wrapper: Scp03Wrapper,
    context: [u8; 16],
}

impl Scp03Card {
    /// Handle INITIALIZE UPDATE on the card side: generate a challenge,
    /// derive session keys and produce the 29-byte response payload.
    pub fn respond(
        static_keys: &StaticKeys,
        key_diversification: [u8; 10],
        key_version: u8,
        host_challenge: [u8; 8],
    ) -> (Self, Vec<u8>) {
        let mut card_challenge = [0u8; 8];
        rand::rng().fill_bytes(&mut card_challenge);

        let context = session_context(&host_challenge, &card_challenge);
        let keys = derive_all(static_keys, &context);
        let card_cryptogram = derive_cryptogram(keys.mac(), DDC_CARD_CRYPTOGRAM, &context);

        let mut payload = Vec::with_capacity(INIT_UPDATE_LEN);
        payload.extend_from_slice(&key_diversification);
        payload.extend_from_slice(&[key_version, SCP03_ID, 0x00]);
        payload.extend_from_slice(&card_challenge);
        payload.extend_from_slice(&card_cryptogram);

        let wrapper = Scp03Wrapper::new(*keys.enc(), *keys.mac());
        (
            Self {
                keys,
                wrapper,
                context,
            },
            payload,
        )
    }

    /// Verify the host cryptogram from EXTERNAL AUTHENTICATE
    pub fn verify_host_cryptogram(&self, cryptogram: &[u8]) -> Result<(), AuthError> {
        let expected = derive_cryptogram(self.keys.mac(), DDC_HOST_CRYPTOGRAM, &self.context);
        if cryptogram != expected {
            return Err(AuthError::CryptogramMismatch);
        }
        Ok(())
    }

    /// Turn on command decryption for subsequent unwraps
    pub const fn enable_encryption(&mut self) {
        self.wrapper.encrypt = true;
    }

    /// Verify the C-MAC on a received command, strip it and decrypt the
    /// payload when encryption is active
    pub fn unwrap_command(&mut self, command: &Command) -> Result<Command, AuthError> {
        self.wrapper.unwrap_command(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // RFC 4493 AES-CMAC test vectors pin the PRF
    #[test]
    fn cmac_reference_vectors() {
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        assert_eq!(cmac16(&key, &[]), hex!("bb1d6929e95937287fa37d129b756746"));
        assert_eq!(
            cmac16(&key, &hex!("6bc1bee22e409f96e93d7e117393172a")),
            hex!("070a16b46b4d4144f79bdd9dd04a287c")
        );
    }

    #[test]
    fn kdf_constants_separate_keys() {
        let key = hex!("404142434445464748494a4b4c4d4e4f");
        let context = hex!("00112233445566778899aabbccddeeff");
        let enc = derive_key(&key, DDC_S_ENC, &context);
        let mac = derive_key(&key, DDC_S_MAC, &context);
        let rmac = derive_key(&key, DDC_S_RMAC, &context);
        assert_ne!(enc, mac);
        assert_ne!(mac, rmac);
        // Deterministic for a fixed context
        assert_eq!(enc, derive_key(&key, DDC_S_ENC, &context));
    }

    #[test]
    fn pad80_round_trip() {
        for len in [0usize, 1, 15, 16, 17, 31] {
            let data = vec![0xAB; len];
            let padded = pad80(&data);
            assert_eq!(padded.len() % 16, 0);
            assert_eq!(unpad80(padded).unwrap(), data);
        }
    }

    #[test]
    fn unpad80_rejects_garbage() {
        assert!(unpad80(vec![0x01, 0x02, 0x03]).is_err());
        assert!(unpad80(vec![0x00; 16]).is_err());
    }

    #[test]
    fn mutual_authentication_between_halves() {
        let static_keys = StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"));
        let host_challenge = hex!("1122334455667788");

        let (card, payload) = Scp03Card::respond(
            &static_keys,
            hex!("01020304050607080910"),
            0x30,
            host_challenge,
        );
        assert_eq!(payload.len(), 29);
        assert_eq!(payload[11], SCP03_ID);

        let host = Scp03Host::initialize(&static_keys, host_challenge, &payload).unwrap();
        card.verify_host_cryptogram(&host.host_cryptogram()).unwrap();

        // Wrong-key host fails cryptogram verification
        let other = StaticKeys::from_single_key(hex!("505152535455565758595a5b5c5d5e5f"));
        assert_eq!(
            Scp03Host::initialize(&other, host_challenge, &payload).unwrap_err(),
            AuthError::CryptogramMismatch
        );
    }

    #[test]
    fn wrap_unwrap_mac_only() {
        let static_keys = StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"));
        let host_challenge = hex!("8877665544332211");
        let (mut card, payload) =
            Scp03Card::respond(&static_keys, [0u8; 10], 0x30, host_challenge);
        let mut host = Scp03Host::initialize(&static_keys, host_challenge, &payload).unwrap();

        let cmd = Command::new(0x80, 0xF2, 0x80, 0x02)
            .with_data(hex!("4f00").to_vec())
            .with_le(0);
        let wrapped = host.wrap_command(&cmd).unwrap();
        assert_eq!(wrapped.cla, 0x84);
        assert_eq!(wrapped.data.as_ref().unwrap().len(), 2 + 8);

        let unwrapped = card.unwrap_command(&wrapped).unwrap();
        assert_eq!(unwrapped.data.as_deref(), Some(hex!("4f00").as_slice()));

        // Chaining: a second identical command wraps to a different MAC
        let wrapped2 = host.wrap_command(&cmd).unwrap();
        assert_ne!(wrapped.data, wrapped2.data);
        card.unwrap_command(&wrapped2).unwrap();
    }

    #[test]
    fn wrap_unwrap_with_encryption() {
        let static_keys = StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"));
        let host_challenge = hex!("0102030405060708");
        let (mut card, payload) =
            Scp03Card::respond(&static_keys, [0u8; 10], 0x30, host_challenge);
        let mut host = Scp03Host::initialize(&static_keys, host_challenge, &payload).unwrap();

        host.enable_encryption();
        card.enable_encryption();

        let secret = hex!("deadbeefcafebabe");
        let cmd = Command::new(0x80, 0xE2, 0x80, 0x00).with_data(secret.to_vec());
        let wrapped = host.wrap_command(&cmd).unwrap();

        // Ciphertext on the wire: padded to a block plus the MAC
        let wire = wrapped.data.as_ref().unwrap();
        assert_eq!(wire.len(), 16 + 8);
        assert!(!wire.windows(secret.len()).any(|w| w == secret));

        let unwrapped = card.unwrap_command(&wrapped).unwrap();
        assert_eq!(unwrapped.data.as_deref(), Some(secret.as_slice()));

        // Several commands in a row keep the counters in lockstep
        for _ in 0..3 {
            let wrapped = host.wrap_command(&cmd).unwrap();
            let unwrapped = card.unwrap_command(&wrapped).unwrap();
            assert_eq!(unwrapped.data.as_deref(), Some(secret.as_slice()));
        }
    }

    #[test]
    fn tampered_mac_is_rejected() {
        let static_keys = StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"));
        let host_challenge = hex!("a1a2a3a4a5a6a7a8");
        let (mut card, payload) =
            Scp03Card::respond(&static_keys, [0u8; 10], 0x30, host_challenge);
        let mut host = Scp03Host::initialize(&static_keys, host_challenge, &payload).unwrap();

        let cmd = Command::new(0x80, 0xCA, 0x00, 0x66).with_le(0);
        let mut wrapped = host.wrap_command(&cmd).unwrap();
        let mut data = wrapped.data.as_ref().unwrap().to_vec();
        data[0] ^= 0x01;
        wrapped.data = Some(data.into());
        assert_eq!(card.unwrap_command(&wrapped), Err(AuthError::MacMismatch));
    }

    #[test]
    fn exhausted_counter_is_fatal() {
        let mut wrapper = Scp03Wrapper::new([0u8; 16], [1u8; 16]);
        wrapper.encrypt = true;
        wrapper.counter = u128::MAX;
        let cmd = Command::new(0x80, 0xE2, 0x00, 0x00).with_data(vec![0x01]);
        assert_eq!(
            wrapper.wrap_command(&cmd),
            Err(AuthError::CounterExhausted)
        );
    }
}
