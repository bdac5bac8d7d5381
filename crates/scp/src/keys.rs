//! Key containers for the secure channel
//!
//! Static keys are the long-lived ENC/MAC/DEK set shared with the card; they
//! are used only to derive per-session keys. Both containers zeroize their
//! contents on drop.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Static Secure Channel key set (ENC, MAC, DEK)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StaticKeys {
    enc: [u8; 16],
    mac: [u8; 16],
    dek: [u8; 16],
}

impl StaticKeys {
    /// Create a key set from its three components
    pub const fn new(enc: [u8; 16], mac: [u8; 16], dek: [u8; 16]) -> Self {
        Self { enc, mac, dek }
    }

    /// Create a key set where all three keys are the same
    pub const fn from_single_key(key: [u8; 16]) -> Self {
        Self {
            enc: key,
            mac: key,
            dek: key,
        }
    }

    /// Static encryption key
    pub const fn enc(&self) -> &[u8; 16] {
        &self.enc
    }

    /// Static MAC key
    pub const fn mac(&self) -> &[u8; 16] {
        &self.mac
    }

    /// Static data encryption key
    pub const fn dek(&self) -> &[u8; 16] {
        &self.dek
    }
}

impl fmt::Debug for StaticKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticKeys { .. }")
    }
}

/// Per-session key set derived during channel establishment
///
/// Never written to persistent storage or logs; destroyed with the channel.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    enc: [u8; 16],
    mac: [u8; 16],
    dek: [u8; 16],
}

impl SessionKeys {
    /// Assemble a derived session key set
    pub const fn new(enc: [u8; 16], mac: [u8; 16], dek: [u8; 16]) -> Self {
        Self { enc, mac, dek }
    }

    /// Session encryption key
    pub const fn enc(&self) -> &[u8; 16] {
        &self.enc
    }

    /// Session MAC key
    pub const fn mac(&self) -> &[u8; 16] {
        &self.mac
    }

    /// Session data encryption key
    pub const fn dek(&self) -> &[u8; 16] {
        &self.dek
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys { .. }")
    }
}
