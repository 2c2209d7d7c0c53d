//! Relay counters.
//!
//! One [`RelayMetrics`] instance is shared (via `Arc`) by the sender, the admission
//! controller and the dispatcher. The server logs a snapshot periodically at debug level.
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RelayMetrics {
    frames_sent: AtomicU64,
    reliable_acked: AtomicU64,
    reliable_retries: AtomicU64,
    reliable_abandoned: AtomicU64,
    broadcast_send_failures: AtomicU64,
    admission_accepted: AtomicU64,
    admission_rejected: AtomicU64,
    packets_rejected: AtomicU64,
    upstream_failures: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub frames_sent: u64,
    pub reliable_acked: u64,
    pub reliable_retries: u64,
    pub reliable_abandoned: u64,
    pub broadcast_send_failures: u64,
    pub admission_accepted: u64,
    pub admission_rejected: u64,
    pub packets_rejected: u64,
    pub upstream_failures: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_frames_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_reliable_acked(&self) {
        self.reliable_acked.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_reliable_retries(&self) {
        self.reliable_retries.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_reliable_abandoned(&self) {
        self.reliable_abandoned.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_broadcast_send_failures(&self) {
        self.broadcast_send_failures.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_admission_accepted(&self) {
        self.admission_accepted.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_admission_rejected(&self) {
        self.admission_rejected.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_packets_rejected(&self) {
        self.packets_rejected.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_upstream_failures(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            reliable_acked: self.reliable_acked.load(Ordering::Relaxed),
            reliable_retries: self.reliable_retries.load(Ordering::Relaxed),
            reliable_abandoned: self.reliable_abandoned.load(Ordering::Relaxed),
            broadcast_send_failures: self.broadcast_send_failures.load(Ordering::Relaxed),
            admission_accepted: self.admission_accepted.load(Ordering::Relaxed),
            admission_rejected: self.admission_rejected.load(Ordering::Relaxed),
            packets_rejected: self.packets_rejected.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frames_sent={} acked={} retries={} abandoned={} bcast_fail={} accepted={} rejected={} bad_packets={} upstream_fail={}",
            self.frames_sent,
            self.reliable_acked,
            self.reliable_retries,
            self.reliable_abandoned,
            self.broadcast_send_failures,
            self.admission_accepted,
            self.admission_rejected,
            self.packets_rejected,
            self.upstream_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent() {
        let m = RelayMetrics::new();
        m.inc_frames_sent();
        m.inc_frames_sent();
        m.inc_reliable_abandoned();
        let s = m.snapshot();
        assert_eq!(s.frames_sent, 2);
        assert_eq!(s.reliable_abandoned, 1);
        assert_eq!(s.reliable_acked, 0);
        assert!(s.to_string().contains("frames_sent=2"));
    }
}
