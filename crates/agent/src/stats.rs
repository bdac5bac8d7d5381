//! Aggregate fleet statistics
//!
//! The only state shared between concurrently running devices; accumulation
//! is synchronized and cheap (atomics plus one mutex for durations).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Shared accumulator
#[derive(Debug, Default)]
pub struct Stats {
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    apdus_exchanged: AtomicU64,
    reconnect_attempts: AtomicU64,
    handshake_micros: Mutex<Vec<u64>>,
}

/// Point-in-time view of the accumulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Sessions that reached 204
    pub sessions_completed: u64,
    /// Sessions that ended in a terminal failure
    pub sessions_failed: u64,
    /// Total APDU round trips across all sessions
    pub apdus_exchanged: u64,
    /// Reconnection attempts made by retry policies
    pub reconnect_attempts: u64,
    /// Mean TLS handshake time, when any completed
    pub mean_handshake: Option<Duration>,
}

impl Stats {
    /// Fresh accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session that completed cleanly
    pub fn record_completed(&self, apdu_count: usize, handshake: Duration) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        self.apdus_exchanged
            .fetch_add(apdu_count as u64, Ordering::Relaxed);
        self.handshake_micros
            .lock()
            .push(handshake.as_micros() as u64);
    }

    /// Record a terminal failure
    pub fn record_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one reconnection attempt
    pub fn record_reconnect(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let micros = self.handshake_micros.lock();
        let mean_handshake = if micros.is_empty() {
            None
        } else {
            Some(Duration::from_micros(
                micros.iter().sum::<u64>() / micros.len() as u64,
            ))
        };
        StatsSnapshot {
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            apdus_exchanged: self.apdus_exchanged.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            mean_handshake,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_sessions() {
        let stats = Stats::new();
        stats.record_completed(1, Duration::from_millis(10));
        stats.record_completed(3, Duration::from_millis(20));
        stats.record_failed();
        stats.record_reconnect();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sessions_completed, 2);
        assert_eq!(snapshot.sessions_failed, 1);
        assert_eq!(snapshot.apdus_exchanged, 4);
        assert_eq!(snapshot.reconnect_attempts, 1);
        assert_eq!(snapshot.mean_handshake, Some(Duration::from_millis(15)));
    }
}
