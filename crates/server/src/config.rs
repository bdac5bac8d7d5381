//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use ramb_transport::CipherPolicy;

/// Administration server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Worker pool size; one worker owns one connection end-to-end
    pub workers: usize,
    /// Per-session inactivity timeout
    pub inactivity_timeout: Duration,
    /// Cipher suites offered to agents
    pub cipher_policy: CipherPolicy,
    /// Key version number reported in INITIALIZE UPDATE
    pub key_version: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9443)),
            workers: 10,
            inactivity_timeout: Duration::from_secs(30),
            cipher_policy: CipherPolicy::new(),
            key_version: 0x20,
        }
    }
}
