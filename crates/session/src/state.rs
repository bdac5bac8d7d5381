//! Per-role lifecycle state machines
//!
//! Transitions are total functions of (state, event), driven exclusively by
//! transport and codec events. An event outside the table is a
//! [`StateError`], never a silent no-op: it signals a protocol or
//! programming bug that must surface.

use crate::error::StateError;

/// Server-role session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// TLS handshake in progress
    Handshaking,
    /// Handshake done, no request seen yet
    Connected,
    /// APDU exchanges in flight
    Active,
    /// Terminal; reachable from every state
    Closed,
}

/// Events driving the server-role machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// PSK handshake completed
    HandshakeComplete,
    /// An agent request arrived
    RequestReceived,
    /// Script finished; 204 sent
    Completed,
    /// Transport, protocol or authentication failure
    Failed,
    /// Inactivity timeout expired
    TimedOut,
    /// Server shutting down
    Shutdown,
}

impl ServerState {
    /// Apply one event; off-table combinations are errors
    pub fn transition(self, event: ServerEvent) -> Result<Self, StateError> {
        use ServerEvent::*;
        use ServerState::*;

        let next = match (self, event) {
            (Handshaking, HandshakeComplete) => Connected,
            (Connected | Active, RequestReceived) => Active,
            (Handshaking | Connected | Active, Completed | Failed | TimedOut | Shutdown) => Closed,
            (state, event) => {
                return Err(StateError::invalid(
                    format!("{state:?}"),
                    format!("{event:?}"),
                ));
            }
        };
        Ok(next)
    }

    /// True once the machine can never leave its state again
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Agent-role connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Not connected
    Idle,
    /// TCP connect plus TLS handshake in progress
    Connecting,
    /// Handshake done, opening request not yet sent
    Connected,
    /// APDU exchanges in flight
    Exchanging,
    /// 204 received, closing the transport
    Closing,
    /// Terminal failure while connecting or exchanging
    Error,
    /// Connect attempt timed out
    Timeout,
}

/// Events driving the agent-role machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    /// Start a connection attempt
    Connect,
    /// PSK handshake completed
    HandshakeComplete,
    /// A request/response round trip ran
    Exchange,
    /// Server signalled completion (204)
    Completed,
    /// Transport closed after completion
    Closed,
    /// Failure while connecting or mid-session
    Failed,
    /// Connect attempt timed out
    TimedOut,
    /// Begin a fresh attempt after a terminal state
    Reset,
}

impl AgentState {
    /// Apply one event; off-table combinations are errors
    pub fn transition(self, event: AgentEvent) -> Result<Self, StateError> {
        use AgentEvent::*;
        use AgentState::*;

        let next = match (self, event) {
            (Idle, Connect) => Connecting,
            (Connecting, HandshakeComplete) => Connected,
            (Connecting, TimedOut) => Timeout,
            (Connecting | Connected | Exchanging, Failed) => Error,
            (Connected | Exchanging, Exchange) => Exchanging,
            (Connected | Exchanging, Completed) => Closing,
            (Closing, Closed) => Idle,
            (Error | Timeout, Reset) => Idle,
            (state, event) => {
                return Err(StateError::invalid(
                    format!("{state:?}"),
                    format!("{event:?}"),
                ));
            }
        };
        Ok(next)
    }

    /// True for the two failure states the retry loop inspects
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Timeout)
    }
}
