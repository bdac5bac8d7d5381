//! Accept loop, worker pool and per-session driver
//!
//! One logical worker owns one connection end-to-end; workers run in
//! parallel up to the configured bound, fed by a bounded channel so a burst
//! of connections queues instead of spawning unbounded threads.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, bounded};
use serde_json::json;
use tracing::{debug, info, warn};

use ramb_apdu::Response;
use ramb_scp::StaticKeys;
use ramb_session::event::events;
use ramb_session::{EventSink, ServerEvent, ServerState, SessionRecord};
use ramb_transport::{KeyStore, ProtocolError, TransportError, http, tls};

use crate::config::ServerConfig;
use crate::mismatch::MismatchTracker;
use crate::script::{ProvisioningScript, ScriptDriver};

/// The administration server
pub struct AdminServer {
    config: ServerConfig,
    listener: TcpListener,
    key_store: Arc<dyn KeyStore>,
    static_keys: StaticKeys,
    script: ProvisioningScript,
    sink: Arc<dyn EventSink>,
    mismatches: Arc<MismatchTracker>,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for AdminServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AdminServer {
    /// Bind the listen socket; the accept loop starts with [`Self::run`]
    pub fn bind(
        config: ServerConfig,
        key_store: Arc<dyn KeyStore>,
        static_keys: StaticKeys,
        script: ProvisioningScript,
        sink: Arc<dyn EventSink>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen)?;
        listener.set_nonblocking(true)?;
        info!(listen = %listener.local_addr()?, workers = config.workers, "admin server bound");
        Ok(Self {
            config,
            listener,
            key_store,
            static_keys,
            script,
            sink,
            mismatches: Arc::new(MismatchTracker::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Actual bound address (useful with port 0)
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for stopping the accept loop from another thread
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the accept loop until the shutdown flag is set
    ///
    /// Blocks the calling thread. Each accepted connection is dispatched to
    /// the fixed worker pool; a full queue makes callers wait in the TCP
    /// backlog rather than in memory.
    pub fn run(&self) -> io::Result<()> {
        let (tx, rx) = bounded::<TcpStream>(self.config.workers * 2);

        let mut workers = Vec::with_capacity(self.config.workers);
        for worker_id in 0..self.config.workers {
            let rx: Receiver<TcpStream> = rx.clone();
            let context = self.worker_context();
            let handle = thread::Builder::new()
                .name(format!("ramb-worker-{worker_id}"))
                .spawn(move || {
                    for stream in rx.iter() {
                        context.serve(stream);
                    }
                })?;
            workers.push(handle);
        }

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    if tx.send(stream).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(25));
                }
                Err(e) => return Err(e),
            }
        }

        drop(tx);
        for handle in workers {
            let _ = handle.join();
        }
        info!("admin server stopped");
        Ok(())
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            config: self.config.clone(),
            key_store: Arc::clone(&self.key_store),
            static_keys: self.static_keys.clone(),
            script: self.script.clone(),
            sink: Arc::clone(&self.sink),
            mismatches: Arc::clone(&self.mismatches),
        }
    }
}

struct WorkerContext {
    config: ServerConfig,
    key_store: Arc<dyn KeyStore>,
    static_keys: StaticKeys,
    script: ProvisioningScript,
    sink: Arc<dyn EventSink>,
    mismatches: Arc<MismatchTracker>,
}

impl WorkerContext {
    fn serve(&self, stream: TcpStream) {
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                warn!("peer address unavailable: {e}");
                return;
            }
        };
        let mut record = SessionRecord::new(peer);
        let mut state = ServerState::Handshaking;

        let mut session = match tls::handshake_as_server(
            stream,
            Arc::clone(&self.key_store),
            &self.config.cipher_policy,
            Some(self.config.inactivity_timeout),
        ) {
            Ok(session) => session,
            Err(TransportError::Authentication { identity }) => {
                warn!(session = %record.id, %peer, "PSK authentication failed");
                self.sink.emit(
                    events::PSK_MISMATCH,
                    json!({
                        "session_id": record.id.to_string(),
                        "peer": peer.to_string(),
                        "identity": identity,
                    }),
                );
                if self.mismatches.record(peer.ip()) {
                    self.sink.emit(
                        events::POSSIBLE_MISCONFIGURATION,
                        json!({ "peer": peer.ip().to_string() }),
                    );
                }
                return;
            }
            Err(e) => {
                warn!(session = %record.id, %peer, "handshake interrupted: {e}");
                self.sink.emit(
                    events::HANDSHAKE_INTERRUPTED,
                    json!({
                        "session_id": record.id.to_string(),
                        "peer": peer.to_string(),
                        "reason": e.to_string(),
                    }),
                );
                return;
            }
        };

        state = match state.transition(ServerEvent::HandshakeComplete) {
            Ok(next) => next,
            Err(e) => {
                warn!(session = %record.id, "state machine violation: {e}");
                return;
            }
        };
        let info = session.info().clone();
        self.sink.emit(
            events::TLS_HANDSHAKE_COMPLETE,
            json!({
                "session_id": record.id.to_string(),
                "peer": peer.to_string(),
                "cipher_suite": info.cipher_suite,
                "protocol": info.protocol,
                "psk_identity": info.psk_identity,
                "handshake_ms": info.handshake_duration.as_millis() as u64,
            }),
        );

        let outcome = self.drive(&mut session, &mut record, &mut state);
        let terminal_event = match &outcome {
            Ok(()) => ServerEvent::Completed,
            Err(SessionClose::Timeout) => ServerEvent::TimedOut,
            Err(_) => ServerEvent::Failed,
        };
        if !state.is_terminal() {
            if let Ok(next) = state.transition(terminal_event) {
                state = next;
            }
        }

        session.close();
        let reason = match outcome {
            Ok(()) => "completed".to_string(),
            Err(close) => close.to_string(),
        };
        debug!(
            session = %record.id,
            apdu_count = record.apdu_count(),
            %reason,
            "session ended"
        );
        self.sink.emit(
            events::SESSION_ENDED,
            json!({
                "session_id": record.id.to_string(),
                "peer": peer.to_string(),
                "apdu_count": record.apdu_count(),
                "last_ins": record.last_ins(),
                "reason": reason,
            }),
        );
        debug_assert!(state.is_terminal());
    }

    fn drive(
        &self,
        session: &mut tls::TlsSession,
        record: &mut SessionRecord,
        state: &mut ServerState,
    ) -> Result<(), SessionClose> {
        let mut driver = ScriptDriver::new(
            self.script.clone(),
            self.static_keys.clone(),
            self.config.key_version,
        );
        let mut outstanding: Option<bytes::Bytes> = None;

        loop {
            let request = match http::read_request(session) {
                Ok(Some(request)) => request,
                Ok(None) => {
                    // Clean close between exchanges
                    return if driver.is_complete() && outstanding.is_none() {
                        Ok(())
                    } else {
                        Err(SessionClose::Interrupted)
                    };
                }
                Err(ProtocolError::Io(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(SessionClose::Timeout);
                }
                Err(e @ ProtocolError::MethodNotAllowed(_)) => {
                    let _ =
                        http::write_error_response(session, 405, "Method Not Allowed", "POST only");
                    return Err(SessionClose::Protocol(e.to_string()));
                }
                Err(e @ ProtocolError::UnsupportedContentType(_)) => {
                    let _ = http::write_error_response(
                        session,
                        415,
                        "Unsupported Media Type",
                        "expected card-content-mgt-response",
                    );
                    return Err(SessionClose::Protocol(e.to_string()));
                }
                Err(e) => {
                    let _ = http::write_error_response(session, 400, "Bad Request", "bad framing");
                    return Err(SessionClose::Protocol(e.to_string()));
                }
            };

            *state = state
                .transition(ServerEvent::RequestReceived)
                .map_err(|e| SessionClose::Protocol(e.to_string()))?;
            record.touch();

            let response = if request.body.is_empty() {
                None
            } else {
                let response = Response::from_bytes(&request.body)
                    .map_err(|e| SessionClose::Protocol(e.to_string()))?;
                self.sink.emit(
                    events::APDU_RECEIVED,
                    json!({
                        "session_id": record.id.to_string(),
                        "status": format!("{:04X}", response.status.to_u16()),
                        "len": request.body.len(),
                    }),
                );
                if let Some(command) = outstanding.take() {
                    record.record_exchange(command, request.body.clone());
                }
                Some(response)
            };

            match driver.next_command(response.as_ref()) {
                Ok(Some(command)) => {
                    let wire = command.to_bytes();
                    http::write_response(session, Some(wire.as_ref()))
                        .map_err(|e| SessionClose::Protocol(e.to_string()))?;
                    self.sink.emit(
                        events::APDU_SENT,
                        json!({
                            "session_id": record.id.to_string(),
                            "ins": format!("{:02X}", command.ins),
                            "len": wire.len(),
                        }),
                    );
                    outstanding = Some(wire);
                }
                Ok(None) => {
                    http::write_response(session, None)
                        .map_err(|e| SessionClose::Protocol(e.to_string()))?;
                    return Ok(());
                }
                Err(e) => {
                    let _ = http::write_error_response(
                        session,
                        403,
                        "Forbidden",
                        "secure channel failure",
                    );
                    return Err(SessionClose::Fatal(e.to_string()));
                }
            }
        }
    }
}

/// Why a session stopped
#[derive(Debug, thiserror::Error)]
enum SessionClose {
    #[error("inactivity timeout")]
    Timeout,
    #[error("connection interrupted mid-session")]
    Interrupted,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("fatal session failure: {0}")]
    Fatal(String),
}
