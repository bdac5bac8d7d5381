//! Session-level error taxonomy
//!
//! Collects the typed errors of the layers below into one enum so the role
//! drivers can classify a failure (retryable vs. fatal) and report it with
//! session context attached.

use thiserror::Error;

use ramb_scp::AuthError;
use ramb_transport::{ProtocolError, TransportError};

use crate::retry::FailureClass;

/// An event arrived that the current lifecycle state does not accept
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid state transition: {event} in state {state}")]
pub struct StateError {
    /// State the machine was in
    pub state: String,
    /// Event that was applied
    pub event: String,
}

impl StateError {
    pub(crate) fn invalid(state: String, event: String) -> Self {
        Self { state, event }
    }
}

/// Any failure that can end a session
#[derive(Debug, Error)]
pub enum SessionError {
    /// TLS transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// HTTP admin framing failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Secure channel authentication failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// APDU could not be decoded
    #[error(transparent)]
    Apdu(#[from] ramb_apdu::ParseError),

    /// Lifecycle violation
    #[error(transparent)]
    State(#[from] StateError),
}

impl SessionError {
    /// Classify for the reconnection policy: only transient transport
    /// failures are retryable; authentication and malformed data are fatal.
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::Transport(e) => {
                if e.is_retryable() {
                    FailureClass::Retryable
                } else {
                    FailureClass::Fatal
                }
            }
            Self::Protocol(ProtocolError::Io(_)) => FailureClass::Retryable,
            Self::Protocol(_) | Self::Auth(_) | Self::Apdu(_) | Self::State(_) => {
                FailureClass::Fatal
            }
        }
    }
}
