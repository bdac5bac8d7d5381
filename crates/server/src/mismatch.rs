//! PSK mismatch tracking
//!
//! Counts authentication failures per source address over a sliding window.
//! A single mismatch is an event; repeated mismatches from the same address
//! inside the window raise a distinct misconfiguration signal.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Sliding-window counter of handshake authentication failures
#[derive(Debug)]
pub struct MismatchTracker {
    window: Duration,
    threshold: usize,
    seen: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl MismatchTracker {
    /// Track mismatches over `window`, signalling at `threshold` per source
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record one mismatch; returns true when the source just crossed the
    /// threshold and a misconfiguration signal should be raised
    pub fn record(&self, source: IpAddr) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        let entries = seen.entry(source).or_default();

        while let Some(&front) = entries.front() {
            if now.duration_since(front) > self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        entries.push_back(now);
        entries.len() == self.threshold
    }

    /// Current in-window mismatch count for a source
    pub fn count(&self, source: IpAddr) -> usize {
        self.seen.lock().get(&source).map_or(0, VecDeque::len)
    }
}

impl Default for MismatchTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "192.0.2.7".parse().unwrap()
    }

    #[test]
    fn signals_once_at_threshold() {
        let tracker = MismatchTracker::new(Duration::from_secs(60), 3);
        assert!(!tracker.record(ip()));
        assert!(!tracker.record(ip()));
        assert!(tracker.record(ip()));
        // Past the threshold it keeps counting but does not re-signal
        assert!(!tracker.record(ip()));
        assert_eq!(tracker.count(ip()), 4);
    }

    #[test]
    fn window_expires_old_entries() {
        let tracker = MismatchTracker::new(Duration::from_millis(10), 2);
        assert!(!tracker.record(ip()));
        std::thread::sleep(Duration::from_millis(20));
        // The first entry has aged out; this one starts a fresh window
        assert!(!tracker.record(ip()));
        assert_eq!(tracker.count(ip()), 1);
    }

    #[test]
    fn sources_are_independent() {
        let tracker = MismatchTracker::new(Duration::from_secs(60), 2);
        let other: IpAddr = "198.51.100.9".parse().unwrap();
        assert!(!tracker.record(ip()));
        assert!(!tracker.record(other));
        assert!(tracker.record(ip()));
    }
}
