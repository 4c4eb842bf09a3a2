use serde::{Deserialize, Serialize};

/// Counters kept by one consumer run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    /// Subset of `requeued` caused by a handler panic.
    pub panicked: u64,
}

/// Snapshot of an in-memory source, by delivery state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub queued: usize,
    pub in_flight: usize,
    pub acked: usize,
    pub dead: usize,
    /// Total requeue calls accepted (a task may be requeued many times).
    pub requeues: u64,
    /// Settled records dropped by `prune_settled`; not in `acked`/`dead`.
    pub pruned: u64,
}

/// Point-in-time view of a source: labels plus whether it is delivering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub pipeline: String,
    pub driver: String,
    pub queue: String,
    /// Delivering tasks right now: neither paused nor closed.
    pub ready: bool,
    pub paused: bool,
    pub closed: bool,
    /// Records still held, including settled ones not yet pruned.
    pub records: usize,
    pub queued: usize,
}
