//! Secure transport for the admin protocol
//!
//! TLS 1.2 authenticated by a pre-shared key, for both the accepting
//! (administration server) and initiating (card agent) side, plus the HTTP
//! framing that carries APDUs between them. Key lookup happens through an
//! explicit [`KeyStore`] handle passed in at handshake time.

pub mod error;
pub mod http;
pub mod keystore;
pub mod policy;
pub mod tls;

pub use error::{ProtocolError, TransportError};
pub use keystore::{KeyStore, MemoryKeyStore};
pub use policy::CipherPolicy;
pub use tls::{TlsSession, TlsSessionInfo, handshake_as_client, handshake_as_server};
