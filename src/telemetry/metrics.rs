//! Driver counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters kept by the PPPoE driver.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Discovery requests seen on listen hooks.
    pub incoming_requests: Counter,
    /// Requests answered with a server offer.
    pub incoming_accepted: Counter,
    /// Requests dropped: policy, no eligible link, or plumbing failure.
    pub incoming_dropped: Counter,
    /// Connect timers that expired.
    pub connect_timeouts: Counter,
    /// Control messages dropped as misaddressed or foreign.
    pub ctrl_drops: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key/value export for the CLI and log dumps.
    pub fn export(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("incoming_requests", self.incoming_requests.get()),
            ("incoming_accepted", self.incoming_accepted.get()),
            ("incoming_dropped", self.incoming_dropped.get()),
            ("connect_timeouts", self.connect_timeouts.get()),
            ("ctrl_drops", self.ctrl_drops.get()),
        ]
    }
}
