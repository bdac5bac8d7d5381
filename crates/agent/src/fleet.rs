//! Fleet runner
//!
//! Many simulated devices at once, each an independent sequential flow on
//! its own thread. The only shared mutable state is the aggregate
//! statistics accumulator.

use std::sync::Arc;
use std::thread;

use tracing::info;

use ramb_session::EventSink;

use crate::config::DeviceConfig;
use crate::device::Device;
use crate::stats::{Stats, StatsSnapshot};

/// A set of concurrently running devices
pub struct Fleet {
    devices: Vec<DeviceConfig>,
    sink: Arc<dyn EventSink>,
    stats: Arc<Stats>,
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("devices", &self.devices.len())
            .finish_non_exhaustive()
    }
}

impl Fleet {
    /// Build a fleet over one shared event sink
    pub fn new(devices: Vec<DeviceConfig>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            devices,
            sink,
            stats: Arc::new(Stats::new()),
        }
    }

    /// Shared statistics handle
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Run every device to completion and return the aggregate counters
    pub fn run(self) -> StatsSnapshot {
        let total = self.devices.len();
        info!(devices = total, "fleet starting");

        let mut handles = Vec::with_capacity(total);
        for (index, config) in self.devices.into_iter().enumerate() {
            let device = Device::new(config, Arc::clone(&self.sink), Arc::clone(&self.stats));
            let handle = thread::Builder::new()
                .name(format!("ramb-device-{index}"))
                .spawn(move || {
                    let _ = device.run();
                });
            if let Ok(handle) = handle {
                handles.push(handle);
            }
        }
        for handle in handles {
            let _ = handle.join();
        }

        let snapshot = self.stats.snapshot();
        info!(
            completed = snapshot.sessions_completed,
            failed = snapshot.sessions_failed,
            apdus = snapshot.apdus_exchanged,
            "fleet finished"
        );
        snapshot
    }
}
