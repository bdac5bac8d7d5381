//! One simulated device
//!
//! Each device is an independent sequential flow: connect, PSK handshake,
//! empty opening POST, respond to C-APDUs until the server signals 204,
//! close. Only retryable connect failures re-enter the loop, with
//! exponential backoff; authentication failures stop immediately.

use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use ramb_session::event::events;
use ramb_session::{
    AgentEvent, AgentState, EventSink, FailureClass, RetryPolicy, SessionError, SessionRecord,
};
use ramb_transport::http::AdminResponse;
use ramb_transport::{TransportError, http, tls};

use crate::card::CardModel;
use crate::config::DeviceConfig;
use crate::stats::Stats;

/// A single simulated device
pub struct Device {
    config: DeviceConfig,
    sink: Arc<dyn EventSink>,
    stats: Arc<Stats>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("identity", &self.config.identity)
            .finish_non_exhaustive()
    }
}

/// Retry loop shared by [`Device::run`] and its tests: retryable failures
/// re-run `op` after `pause(delay)`, everything else surfaces immediately.
pub(crate) fn with_retries<T>(
    policy: &RetryPolicy,
    mut pause: impl FnMut(Duration),
    mut on_retry: impl FnMut(),
    mut op: impl FnMut() -> Result<T, SessionError>,
) -> Result<T, SessionError> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.class() == FailureClass::Retryable && policy.allows(attempt) => {
                let delay = policy.delay(attempt);
                warn!(attempt, ?delay, "retryable failure: {e}");
                pause(delay);
                on_retry();
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

impl Device {
    /// Build a device over shared stats and an event sink
    pub fn new(config: DeviceConfig, sink: Arc<dyn EventSink>, stats: Arc<Stats>) -> Self {
        Self {
            config,
            sink,
            stats,
        }
    }

    /// Run one full admin session, reconnecting on retryable failures
    pub fn run(&self) -> Result<SessionRecord, SessionError> {
        let policy = self.config.retry.clone();
        let stats = Arc::clone(&self.stats);
        let result = with_retries(
            &policy,
            thread::sleep,
            || stats.record_reconnect(),
            || self.run_session(),
        );
        match &result {
            Ok(record) => debug!(session = %record.id, "device finished"),
            Err(e) => {
                self.stats.record_failed();
                warn!(identity = %self.config.identity, "device failed: {e}");
            }
        }
        result
    }

    /// One connection attempt, end to end
    fn run_session(&self) -> Result<SessionRecord, SessionError> {
        let mut state = AgentState::Idle;
        state = state.transition(AgentEvent::Connect)?;

        let tcp =
            match TcpStream::connect_timeout(&self.config.server, self.config.connect_timeout) {
                Ok(tcp) => tcp,
                Err(e) => {
                    let event = if e.kind() == std::io::ErrorKind::TimedOut {
                        AgentEvent::TimedOut
                    } else {
                        AgentEvent::Failed
                    };
                    let _ = state.transition(event).and_then(|s| {
                        s.transition(AgentEvent::Reset)
                    });
                    return Err(TransportError::Io(e).into());
                }
            };

        let mut session = match tls::handshake_as_client(
            tcp,
            &self.config.identity,
            &self.config.psk_key,
            &self.config.cipher_policy,
            Some(self.config.connect_timeout),
        ) {
            Ok(session) => session,
            Err(e) => {
                let _ = state
                    .transition(AgentEvent::Failed)
                    .and_then(|s| s.transition(AgentEvent::Reset));
                return Err(e.into());
            }
        };
        state = state.transition(AgentEvent::HandshakeComplete)?;

        let info = session.info().clone();
        let mut record = SessionRecord::new(self.config.server);
        self.sink.emit(
            events::TLS_HANDSHAKE_COMPLETE,
            json!({
                "session_id": record.id.to_string(),
                "identity": info.psk_identity,
                "cipher_suite": info.cipher_suite,
                "handshake_ms": info.handshake_duration.as_millis() as u64,
            }),
        );
        session
            .set_read_timeout(Some(self.config.exchange_timeout))
            .map_err(TransportError::Io)?;

        let mut card = CardModel::new(self.config.card.clone());
        let mut r_apdu: Option<bytes::Bytes> = None;

        let outcome = loop {
            state = state.transition(AgentEvent::Exchange)?;
            if let Err(e) = http::write_request(
                &mut session,
                &self.config.host_name,
                r_apdu.as_deref(),
            ) {
                break Err(SessionError::from(TransportError::Io(e)));
            }
            if let Some(sent) = r_apdu.take() {
                self.sink.emit(
                    events::APDU_SENT,
                    json!({ "session_id": record.id.to_string(), "len": sent.len() }),
                );
            }

            match http::read_response(&mut session) {
                Ok(AdminResponse::Next(c_apdu)) => {
                    self.sink.emit(
                        events::APDU_RECEIVED,
                        json!({ "session_id": record.id.to_string(), "len": c_apdu.len() }),
                    );
                    if let Some(delay) = self.config.response_delay {
                        thread::sleep(delay);
                    }
                    let response = card.process(&c_apdu).to_bytes();
                    record.record_exchange(c_apdu, response.clone());
                    r_apdu = Some(response);
                }
                Ok(AdminResponse::Complete) => {
                    state = state.transition(AgentEvent::Completed)?;
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            }
        };

        session.close();
        match outcome {
            Ok(()) => {
                state = state.transition(AgentEvent::Closed)?;
                debug_assert_eq!(state, AgentState::Idle);
                info!(
                    session = %record.id,
                    apdu_count = record.apdu_count(),
                    "session complete"
                );
                self.sink.emit(
                    events::SESSION_ENDED,
                    json!({
                        "session_id": record.id.to_string(),
                        "apdu_count": record.apdu_count(),
                        "reason": "completed",
                    }),
                );
                self.stats
                    .record_completed(record.apdu_count(), info.handshake_duration);
                Ok(record)
            }
            Err(e) => {
                let _ = state
                    .transition(AgentEvent::Failed)
                    .and_then(|s| s.transition(AgentEvent::Reset));
                self.sink.emit(
                    events::SESSION_ENDED,
                    json!({
                        "session_id": record.id.to_string(),
                        "apdu_count": record.apdu_count(),
                        "last_ins": record.last_ins(),
                        "reason": e.to_string(),
                    }),
                );
                Err(e)
            }
        }
    }
}
