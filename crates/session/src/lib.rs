//! Session layer shared by the two admin protocol roles
//!
//! Lifecycle state machines for the server and agent sides, per-session
//! exchange records, the non-blocking event sink, and the failure
//! classification driving reconnection policy.

pub mod error;
pub mod event;
pub mod record;
pub mod retry;
pub mod state;

pub use error::{SessionError, StateError};
pub use event::{ChannelSink, Event, EventSink, LogSink, NullSink};
pub use record::{ExchangeRecord, SessionRecord};
pub use retry::{FailureClass, RetryPolicy};
pub use state::{AgentEvent, AgentState, ServerEvent, ServerState};
