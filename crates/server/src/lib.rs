//! Administration server role
//!
//! Accepts PSK-TLS connections, drives each session end-to-end from one
//! worker, and turns a provisioning script into the C-APDU sequence the
//! connected card agent executes. PSK mismatches are tracked per source
//! address to surface repeated misconfiguration.

pub mod config;
pub mod mismatch;
pub mod script;
pub mod server;

pub use config::ServerConfig;
pub use mismatch::MismatchTracker;
pub use script::{ProvisioningScript, ScriptDriver, Step};
pub use server::AdminServer;
