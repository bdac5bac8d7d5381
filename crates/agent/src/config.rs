//! Agent configuration

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;

use ramb_apdu::gp;
use ramb_scp::{ScpVariant, StaticKeys};
use ramb_session::RetryPolicy;
use ramb_transport::CipherPolicy;

/// Simulated card personalisation
#[derive(Debug, Clone)]
pub struct CardConfig {
    /// AID of the card's root Security Domain
    pub isd_aid: Bytes,
    /// Static secure channel keys
    pub scp_keys: StaticKeys,
    /// Secure channel protocol the card speaks
    pub variant: ScpVariant,
    /// Key version number reported in INITIALIZE UPDATE
    pub key_version: u8,
    /// Key diversification data reported in INITIALIZE UPDATE
    pub key_diversification: [u8; 10],
    /// SCP02 sequence counter at session start
    pub sequence_counter: [u8; 2],
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            isd_aid: Bytes::from_static(&gp::aid::ISD_R),
            scp_keys: StaticKeys::from_single_key([0u8; 16]),
            variant: ScpVariant::Scp02,
            key_version: 0x20,
            key_diversification: [0u8; 10],
            sequence_counter: [0x00, 0x01],
        }
    }
}

/// One simulated device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Administration server address
    pub server: SocketAddr,
    /// Host header value for admin requests
    pub host_name: String,
    /// PSK identity presented in the TLS handshake
    pub identity: String,
    /// PSK value; never logged
    pub psk_key: Vec<u8>,
    /// Card personalisation
    pub card: CardConfig,
    /// Cipher suites offered
    pub cipher_policy: CipherPolicy,
    /// Reconnect policy for retryable failures
    pub retry: RetryPolicy,
    /// TCP connect / handshake deadline
    pub connect_timeout: Duration,
    /// Read deadline within a session
    pub exchange_timeout: Duration,
    /// Test-mode delay injected before each R-APDU
    pub response_delay: Option<Duration>,
}

impl DeviceConfig {
    /// Configuration for one device against `server`
    pub fn new(server: SocketAddr, identity: impl Into<String>, psk_key: Vec<u8>) -> Self {
        Self {
            server,
            host_name: server.to_string(),
            identity: identity.into(),
            psk_key,
            card: CardConfig::default(),
            cipher_policy: CipherPolicy::new(),
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            exchange_timeout: Duration::from_secs(30),
            response_delay: None,
        }
    }
}
