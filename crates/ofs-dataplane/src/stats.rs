//! Pipeline Statistics
//!
//! Lock-free counters for the packet path. Every event is also reported
//! through the `metrics` facade so an exporter installed by the embedding
//! process sees the same numbers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-pipeline counters (cache-line aligned)
#[repr(C, align(64))]
#[derive(Default)]
pub struct PipelineStats {
    /// Packets received
    pub rx_packets: AtomicU64,
    /// Bytes received
    pub rx_bytes: AtomicU64,
    /// Packets sent out of a port
    pub tx_packets: AtomicU64,
    /// Bytes sent out of a port
    pub tx_bytes: AtomicU64,
    /// Packets dropped
    pub dropped: AtomicU64,
    /// Packets sent to the controller
    pub packet_in: AtomicU64,
    /// Lookups that hit an entry
    pub table_hits: AtomicU64,
    /// Lookups that missed
    pub table_misses: AtomicU64,
    /// Packets cloned
    pub clones: AtomicU64,
    /// Tuples fed to the sketch
    pub sketch_records: AtomicU64,
    /// Sketch slots evicted
    pub sketch_evictions: AtomicU64,
    /// Destroyed packets whose buffer stayed parked
    pub buffers_retained: AtomicU64,
}

impl PipelineStats {
    /// Packet received
    #[inline(always)]
    pub fn record_rx(&self, bytes: u64) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
        metrics::counter!("ofs_pipeline_rx_packets").increment(1);
    }

    /// Packet sent out of a port
    #[inline(always)]
    pub fn record_tx(&self, bytes: u64) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
        metrics::counter!("ofs_pipeline_tx_packets").increment(1);
    }

    /// Packet dropped for `reason`
    #[inline(always)]
    pub fn record_drop(&self, reason: &'static str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ofs_pipeline_dropped", "reason" => reason).increment(1);
    }

    /// Packet sent to the controller for `reason`
    #[inline(always)]
    pub fn record_packet_in(&self, reason: &'static str) {
        self.packet_in.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ofs_pipeline_packet_in", "reason" => reason).increment(1);
    }

    /// Table lookup hit
    #[inline(always)]
    pub fn record_table_hit(&self) {
        self.table_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Table lookup miss
    #[inline(always)]
    pub fn record_table_miss(&self) {
        self.table_misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ofs_pipeline_table_misses").increment(1);
    }

    /// Packet cloned
    #[inline(always)]
    pub fn record_clone(&self) {
        self.clones.fetch_add(1, Ordering::Relaxed);
    }

    /// Tuple fed to the sketch
    #[inline(always)]
    pub fn record_sketch(&self, evicted: bool) {
        self.sketch_records.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.sketch_evictions.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ofs_sketch_evictions").increment(1);
        }
    }

    /// Buffer left parked on destroy
    #[inline(always)]
    pub fn record_retained(&self) {
        self.buffers_retained.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            packet_in: self.packet_in.load(Ordering::Relaxed),
            table_hits: self.table_hits.load(Ordering::Relaxed),
            table_misses: self.table_misses.load(Ordering::Relaxed),
            clones: self.clones.load(Ordering::Relaxed),
            sketch_records: self.sketch_records.load(Ordering::Relaxed),
            sketch_evictions: self.sketch_evictions.load(Ordering::Relaxed),
            buffers_retained: self.buffers_retained.load(Ordering::Relaxed),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    /// Packets received
    pub rx_packets: u64,
    /// Bytes received
    pub rx_bytes: u64,
    /// Packets sent out of a port
    pub tx_packets: u64,
    /// Bytes sent out of a port
    pub tx_bytes: u64,
    /// Packets dropped
    pub dropped: u64,
    /// Packets sent to the controller
    pub packet_in: u64,
    /// Lookups that hit an entry
    pub table_hits: u64,
    /// Lookups that missed
    pub table_misses: u64,
    /// Packets cloned
    pub clones: u64,
    /// Tuples fed to the sketch
    pub sketch_records: u64,
    /// Sketch slots evicted
    pub sketch_evictions: u64,
    /// Destroyed packets whose buffer stayed parked
    pub buffers_retained: u64,
}

impl PipelineStatsSnapshot {
    /// Hits over lookups, 0 without lookups
    pub fn table_hit_rate(&self) -> f64 {
        let total = self.table_hits + self.table_misses;
        if total == 0 { return 0.0; }
        self.table_hits as f64 / total as f64
    }

    /// Drops over received packets, 0 without traffic
    pub fn drop_rate(&self) -> f64 {
        if self.rx_packets == 0 { return 0.0; }
        self.dropped as f64 / self.rx_packets as f64
    }
}
