//! Observability event sink
//!
//! Fire-and-forget events for dashboards and logs. Emission must never
//! block the protocol engine: the channel sink is bounded and drops (and
//! counts) events when the consumer falls behind.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use serde_json::Value;
use tracing::debug;

/// Well-known event types
pub mod events {
    /// PSK handshake finished; data carries the negotiated parameters
    pub const TLS_HANDSHAKE_COMPLETE: &str = "tls_handshake_complete";
    /// An APDU arrived from the peer
    pub const APDU_RECEIVED: &str = "apdu_received";
    /// An APDU was sent to the peer
    pub const APDU_SENT: &str = "apdu_sent";
    /// A session reached its terminal state
    pub const SESSION_ENDED: &str = "session_ended";
    /// A handshake failed on the presented identity or key
    pub const PSK_MISMATCH: &str = "psk_mismatch";
    /// The transport dropped mid-handshake
    pub const HANDSHAKE_INTERRUPTED: &str = "handshake_interrupted";
    /// Repeated PSK mismatches from one source address
    pub const POSSIBLE_MISCONFIGURATION: &str = "possible_misconfiguration";
}

/// One emitted event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event type, one of [`events`]
    pub event_type: String,
    /// Structured payload
    pub data: Value,
}

/// Write-only observability interface
pub trait EventSink: Send + Sync {
    /// Emit one event; must not block
    fn emit(&self, event_type: &str, data: Value);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event_type: &str, _data: Value) {}
}

/// Sink that routes events into the tracing stream
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event_type: &str, data: Value) {
        debug!(target: "ramb::events", event = event_type, %data);
    }
}

/// Bounded channel sink; full queue drops the event rather than blocking
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<Event>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and its consumer end
    pub fn bounded(capacity: usize) -> (Self, Receiver<Event>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event_type: &str, data: Value) {
        let event = Event {
            event_type: event_type.to_string(),
            data,
        };
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, rx) = ChannelSink::bounded(8);
        sink.emit(events::APDU_SENT, json!({"ins": "A4"}));
        sink.emit(events::APDU_RECEIVED, json!({"sw": "9000"}));

        assert_eq!(rx.recv().unwrap().event_type, events::APDU_SENT);
        assert_eq!(rx.recv().unwrap().event_type, events::APDU_RECEIVED);
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (sink, rx) = ChannelSink::bounded(2);
        for _ in 0..5 {
            sink.emit(events::APDU_SENT, json!({}));
        }
        assert_eq!(sink.dropped(), 3);
        drop(rx);
        // Receiver gone entirely: still no blocking, only counting
        sink.emit(events::SESSION_ENDED, json!({}));
        assert_eq!(sink.dropped(), 4);
    }
}
