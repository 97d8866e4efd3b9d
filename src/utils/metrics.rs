//! Observability counters.
//!
//! Uses atomic counters for thread-safe collection; one instance is
//! shared by a server and all of its connection workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for one running server.
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Total packets read from clients
    pub packets_received: AtomicU64,
    /// Total packets queued to clients
    pub packets_sent: AtomicU64,
    /// Total decrypted payload bytes read
    pub bytes_received: AtomicU64,
    /// Total payload bytes queued for send
    pub bytes_sent: AtomicU64,
    /// Payloads whose checksums disagreed with their header
    pub checksum_failures: AtomicU64,
    /// Desynchronized payloads recovered by the override-key brute force
    pub bruteforce_recoveries: AtomicU64,
    /// Stage broadcast fan-outs performed
    pub broadcasts_total: AtomicU64,
    /// Broadcast packets dropped by full send queues
    pub broadcast_drops: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            bruteforce_recoveries: AtomicU64::new(0),
            broadcasts_total: AtomicU64::new(0),
            broadcast_drops: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self, payload_len: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    pub fn packet_sent(&self, payload_len: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Log a one-line summary of every counter.
    pub fn log_summary(&self) {
        info!(
            uptime_secs = self.uptime_secs(),
            connections_total = self.connections_total.load(Ordering::Relaxed),
            connections_active = self.connections_active.load(Ordering::Relaxed),
            packets_received = self.packets_received.load(Ordering::Relaxed),
            packets_sent = self.packets_sent.load(Ordering::Relaxed),
            bytes_received = self.bytes_received.load(Ordering::Relaxed),
            bytes_sent = self.bytes_sent.load(Ordering::Relaxed),
            checksum_failures = self.checksum_failures.load(Ordering::Relaxed),
            bruteforce_recoveries = self.bruteforce_recoveries.load(Ordering::Relaxed),
            broadcasts_total = self.broadcasts_total.load(Ordering::Relaxed),
            broadcast_drops = self.broadcast_drops.load(Ordering::Relaxed),
            "server metrics"
        );
    }
}
