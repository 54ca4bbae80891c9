//! Connected-node gauge — published on every session add/remove.
//!
//! The metrics backend lives outside this crate; it plugs in by
//! implementing `ConnectedNodesGauge`.

use std::sync::atomic::{AtomicUsize, Ordering};

pub trait ConnectedNodesGauge: Send + Sync {
    fn set(&self, connected: usize);
}

/// Emits the gauge as a debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogGauge;

impl ConnectedNodesGauge for LogGauge {
    fn set(&self, connected: usize) {
        tracing::debug!(connected, "connected nodes");
    }
}

/// Keeps the last published value.
#[derive(Debug, Default)]
pub struct AtomicGauge {
    value: AtomicUsize,
}

impl AtomicGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }
}

impl ConnectedNodesGauge for AtomicGauge {
    fn set(&self, connected: usize) {
        self.value.store(connected, Ordering::Relaxed);
    }
}
