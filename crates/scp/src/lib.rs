//! GlobalPlatform secure channel engine
//!
//! Implements the two secure channel protocols used by the admin protocol —
//! SCP02 (Triple-DES) and SCP03 (AES) — for both sides of the wire: the host
//! half drives INITIALIZE UPDATE / EXTERNAL AUTHENTICATE and wraps outgoing
//! commands, the card half produces the INITIALIZE UPDATE response, checks
//! the host cryptogram and unwraps incoming commands.
//!
//! Session keys live only inside the channel values and are zeroized on
//! drop; nothing in this crate logs or serializes key material.

pub mod channel;
pub mod error;
pub mod keys;
pub mod scp02;
pub mod scp03;

pub use channel::{CardChannel, HostChannel, ScpVariant, SecurityLevel};
pub use error::AuthError;
pub use keys::{SessionKeys, StaticKeys};
