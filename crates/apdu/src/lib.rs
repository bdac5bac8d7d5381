//! ISO 7816-4 APDU model for the GP Amendment B admin protocol
//!
//! This crate provides the binary command/response representation shared by
//! the administration server and the card agent: the four ISO command cases,
//! the status-word codec, GlobalPlatform constants and command builders, and
//! TLV helpers for FCI and GET STATUS payloads.

pub mod command;
pub mod error;
pub mod gp;
pub mod response;
pub mod status;
pub mod tlv;

pub use command::Command;
pub use error::ParseError;
pub use response::Response;
pub use status::{StatusCategory, StatusWord};
