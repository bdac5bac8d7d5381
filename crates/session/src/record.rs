//! Per-session records
//!
//! One record per TLS connection: identity, peer, lifecycle timestamps and
//! the ordered list of APDU exchanges. Nothing here survives reconnection —
//! a retried connection gets a fresh record with a fresh id.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use uuid::Uuid;

/// One APDU round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRecord {
    /// Command APDU bytes as sent on the wire
    pub command: Bytes,
    /// Response APDU bytes, including the status word
    pub response: Bytes,
    /// Instruction byte of the command
    pub ins: u8,
    /// Status word of the response
    pub status: u16,
}

/// Session bookkeeping for either role
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Session identity; never reused across connections
    pub id: Uuid,
    /// Peer socket address
    pub peer: SocketAddr,
    /// Creation instant
    pub created_at: Instant,
    /// Last transport activity
    pub last_activity: Instant,
    /// Ordered APDU exchanges
    pub exchanges: Vec<ExchangeRecord>,
}

impl SessionRecord {
    /// Start a record for a fresh connection
    pub fn new(peer: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            peer,
            created_at: now,
            last_activity: now,
            exchanges: Vec::new(),
        }
    }

    /// Append a completed round trip
    pub fn record_exchange(&mut self, command: Bytes, response: Bytes) {
        let ins = command.get(1).copied().unwrap_or_default();
        let status = match response.len() {
            n if n >= 2 => u16::from_be_bytes([response[n - 2], response[n - 1]]),
            _ => 0,
        };
        self.exchanges.push(ExchangeRecord {
            command,
            response,
            ins,
            status,
        });
        self.touch();
    }

    /// Number of completed APDU round trips
    pub fn apdu_count(&self) -> usize {
        self.exchanges.len()
    }

    /// Mark transport activity now
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since the last transport activity
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Instruction byte of the last command, for failure context
    pub fn last_ins(&self) -> Option<u8> {
        self.exchanges.last().map(|e| e.ins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn peer() -> SocketAddr {
        "127.0.0.1:9443".parse().unwrap()
    }

    #[test]
    fn records_accumulate_in_order() {
        let mut record = SessionRecord::new(peer());
        record.record_exchange(
            Bytes::copy_from_slice(&hex!("00A4040008A000000151000000")),
            Bytes::copy_from_slice(&hex!("9000")),
        );
        record.record_exchange(
            Bytes::copy_from_slice(&hex!("80F28002024F0000")),
            Bytes::copy_from_slice(&hex!("6A88")),
        );

        assert_eq!(record.apdu_count(), 2);
        assert_eq!(record.exchanges[0].ins, 0xA4);
        assert_eq!(record.exchanges[0].status, 0x9000);
        assert_eq!(record.exchanges[1].status, 0x6A88);
        assert_eq!(record.last_ins(), Some(0xF2));
    }

    #[test]
    fn ids_are_unique_per_record() {
        assert_ne!(SessionRecord::new(peer()).id, SessionRecord::new(peer()).id);
    }
}
