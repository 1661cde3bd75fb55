use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by the dispatcher.
#[derive(Debug, Default)]
pub struct RelayStats {
    forwarded_to_worker: AtomicU64,
    relayed_to_client: AtomicU64,
    rejected: AtomicU64,
    worker_unavailable: AtomicU64,
    send_failures: AtomicU64,
    routing_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub forwarded_to_worker: u64,
    pub relayed_to_client: u64,
    /// Packets dropped for an unknown code or the wrong direction.
    pub rejected: u64,
    /// Client packets dropped because the worker was not connected.
    pub worker_unavailable: u64,
    pub send_failures: u64,
    /// Worker packets that found no active client.
    pub routing_failures: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded_to_worker.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_relayed(&self) {
        self.relayed_to_client.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_worker_unavailable(&self) {
        self.worker_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_routing_failure(&self) {
        self.routing_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            forwarded_to_worker: self.forwarded_to_worker.load(Ordering::Relaxed),
            relayed_to_client: self.relayed_to_client.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            worker_unavailable: self.worker_unavailable.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            routing_failures: self.routing_failures.load(Ordering::Relaxed),
        }
    }
}
