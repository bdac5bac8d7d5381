//! PSK-authenticated TLS 1.2 session establishment and teardown
//!
//! Both roles run over a blocking `TcpStream`. The server side resolves the
//! peer's PSK identity through the [`KeyStore`] handle it is given for that
//! handshake; an unknown identity or a wrong key fails the handshake and is
//! classified as an authentication failure, never a transient one.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use openssl::ssl::{Ssl, SslContextBuilder, SslMethod, SslVersion};
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::keystore::KeyStore;
use crate::policy::CipherPolicy;

/// Negotiated TLS parameters, immutable once the handshake completes
#[derive(Debug, Clone)]
pub struct TlsSessionInfo {
    /// Negotiated cipher suite name
    pub cipher_suite: String,
    /// Negotiated protocol version
    pub protocol: String,
    /// PSK identity used for authentication
    pub psk_identity: String,
    /// Time the handshake took
    pub handshake_duration: Duration,
}

/// An established PSK-TLS session
pub struct TlsSession {
    stream: openssl::ssl::SslStream<TcpStream>,
    info: TlsSessionInfo,
    closed: bool,
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("info", &self.info)
            .field("closed", &self.closed)
            .finish()
    }
}

impl TlsSession {
    /// Negotiated session parameters
    pub const fn info(&self) -> &TlsSessionInfo {
        &self.info
    }

    /// Peer socket address
    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.stream.get_ref().peer_addr()
    }

    /// Send all of `bytes`
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes).map_err(map_io)?;
        self.stream.flush().map_err(map_io)?;
        Ok(())
    }

    /// Receive up to `max_bytes`; an empty buffer means clean EOF
    pub fn receive(
        &mut self,
        max_bytes: usize,
        timeout: Option<Duration>,
    ) -> Result<Bytes, TransportError> {
        self.stream.get_ref().set_read_timeout(timeout)?;
        let mut buffer = vec![0u8; max_bytes];
        match self.stream.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                Ok(Bytes::from(buffer))
            }
            Err(e) => Err(map_io(e)),
        }
    }

    /// Close the session: sends close-notify, ignores errors, idempotent
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown() {
            trace!("close-notify not delivered: {e}");
        }
        let _ = self.stream.get_ref().shutdown(std::net::Shutdown::Both);
    }

    /// Set the read deadline used by [`Read`] calls
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.get_ref().set_read_timeout(timeout)
    }
}

impl Read for TlsSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TlsSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Drop for TlsSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn map_io(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => TransportError::Closed,
        _ => TransportError::Io(e),
    }
}

fn base_context(policy: &CipherPolicy, server: bool) -> Result<SslContextBuilder, TransportError> {
    let method = if server {
        SslMethod::tls_server()
    } else {
        SslMethod::tls_client()
    };
    let mut builder = SslContextBuilder::new(method).map_err(stack_err)?;
    builder
        .set_min_proto_version(Some(SslVersion::TLS1_2))
        .map_err(stack_err)?;
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_2))
        .map_err(stack_err)?;
    builder
        .set_cipher_list(&policy.cipher_list())
        .map_err(stack_err)?;
    Ok(builder)
}

fn stack_err(e: openssl::error::ErrorStack) -> TransportError {
    TransportError::Handshake {
        reason: e.to_string(),
    }
}

/// Accept side: run the PSK handshake on an accepted connection
///
/// `key_store` is consulted once, for the identity the peer presents. The
/// PSK value itself never reaches any log.
pub fn handshake_as_server(
    stream: TcpStream,
    key_store: Arc<dyn KeyStore>,
    policy: &CipherPolicy,
    timeout: Option<Duration>,
) -> Result<TlsSession, TransportError> {
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    let presented: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let presented_cb = Arc::clone(&presented);

    let mut builder = base_context(policy, true)?;
    builder.set_psk_server_callback(move |_ssl, identity, psk_out| {
        let identity = identity.map(|bytes| String::from_utf8_lossy(bytes).into_owned());
        if let Ok(mut slot) = presented_cb.lock() {
            slot.clone_from(&identity);
        }

        match identity.as_deref().and_then(|id| key_store.get_key(id)) {
            Some(key) if key.len() <= psk_out.len() => {
                psk_out[..key.len()].copy_from_slice(&key);
                Ok(key.len())
            }
            // Unknown identity (or oversized key): zero-length PSK makes
            // the handshake fail with a decrypt-error alert.
            _ => Ok(0),
        }
    });
    let context = builder.build();

    let started = Instant::now();
    let ssl = Ssl::new(&context).map_err(stack_err)?;
    let tls_stream = match ssl.accept(stream) {
        Ok(s) => s,
        Err(e) => {
            let identity = presented.lock().ok().and_then(|slot| slot.clone());
            return Err(if identity.is_some() {
                TransportError::Authentication { identity }
            } else {
                TransportError::Handshake {
                    reason: e.to_string(),
                }
            });
        }
    };

    let identity = presented
        .lock()
        .ok()
        .and_then(|slot| slot.clone())
        .unwrap_or_default();
    finish(tls_stream, identity, started.elapsed())
}

/// Initiate side: connect-and-handshake with one identity/key pair
pub fn handshake_as_client(
    stream: TcpStream,
    identity: &str,
    key: &[u8],
    policy: &CipherPolicy,
    timeout: Option<Duration>,
) -> Result<TlsSession, TransportError> {
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    let identity_bytes = identity.as_bytes().to_vec();
    let key_bytes = key.to_vec();

    let mut builder = base_context(policy, false)?;
    builder.set_psk_client_callback(move |_ssl, _hint, identity_out, psk_out| {
        if identity_bytes.len() + 1 > identity_out.len() || key_bytes.len() > psk_out.len() {
            return Ok(0);
        }
        identity_out[..identity_bytes.len()].copy_from_slice(&identity_bytes);
        // NUL terminator for the C string view of the identity
        identity_out[identity_bytes.len()] = 0;
        psk_out[..key_bytes.len()].copy_from_slice(&key_bytes);
        Ok(key_bytes.len())
    });
    let context = builder.build();

    let started = Instant::now();
    let ssl = Ssl::new(&context).map_err(stack_err)?;
    let tls_stream = ssl.connect(stream).map_err(|e| {
        // A server rejecting our PSK surfaces as a fatal alert here
        let reason = e.to_string();
        if reason.contains("decrypt") || reason.contains("handshake failure") {
            TransportError::Authentication {
                identity: Some(identity.to_string()),
            }
        } else {
            TransportError::Handshake { reason }
        }
    })?;

    finish(tls_stream, identity.to_string(), started.elapsed())
}

fn finish(
    stream: openssl::ssl::SslStream<TcpStream>,
    psk_identity: String,
    handshake_duration: Duration,
) -> Result<TlsSession, TransportError> {
    let ssl = stream.ssl();
    let cipher_suite = ssl
        .current_cipher()
        .map(|c| c.name().to_string())
        .unwrap_or_default();
    let protocol = ssl.version_str().to_string();

    if cipher_suite.contains("NULL") {
        warn!(%cipher_suite, "session negotiated a NULL cipher; traffic is unencrypted");
    }
    debug!(%cipher_suite, %protocol, %psk_identity, ?handshake_duration, "TLS handshake complete");

    Ok(TlsSession {
        stream,
        info: TlsSessionInfo {
            cipher_suite,
            protocol,
            psk_identity,
            handshake_duration,
        },
        closed: false,
    })
}
