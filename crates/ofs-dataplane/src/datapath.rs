//! Datapath context shared by every packet and pipeline

use crate::buffer::{BufferPool, PacketBufferPool};
use crate::config::DatapathConfig;
use crate::packet::Packet;
use ofs_common::AtomicCounter;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Hooks into packet lifetime events
///
/// Installed by the embedding process (a simulator, a tracer) through the
/// datapath context. Both hooks run on the packet path and must not block.
pub trait PacketObserver: Send + Sync {
    /// `clone` was just created from `original`
    fn on_clone(&self, _original: &Packet, _clone: &Packet) {}

    /// `pkt` is about to release its resources
    fn on_destroy(&self, _pkt: &Packet) {}
}

/// Per-packet tracking state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingInfo {
    /// Datapath-unique packet id
    pub uid: u64,
    /// Header rewrites applied so far
    pub changes: u32,
    /// Packet is a clone
    pub clone: bool,
}

/// Observer that logs lifetime events and counts them
#[derive(Default)]
pub struct TracingObserver {
    clones: AtomicCounter,
    destroyed: AtomicCounter,
}

impl TracingObserver {
    /// Observer with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Clones observed
    pub fn clones(&self) -> u64 {
        self.clones.get()
    }

    /// Destructions observed
    pub fn destroyed(&self) -> u64 {
        self.destroyed.get()
    }
}

impl PacketObserver for TracingObserver {
    fn on_clone(&self, original: &Packet, clone: &Packet) {
        self.clones.inc();
        tracing::trace!(
            original = original.tracking().map_or(0, |t| t.uid),
            clone = clone.tracking().map_or(0, |t| t.uid),
            "packet cloned"
        );
    }

    fn on_destroy(&self, pkt: &Packet) {
        self.destroyed.inc();
        tracing::trace!(uid = pkt.tracking().map_or(0, |t| t.uid), "packet destroyed");
    }
}

/// State shared by the pipeline and the packets it processes
pub struct DatapathContext {
    config: DatapathConfig,
    buffers: Arc<dyn BufferPool>,
    observer: Option<Arc<dyn PacketObserver>>,
    next_uid: AtomicU64,
}

impl DatapathContext {
    /// Context with the ring buffer pool and, when tracking is configured,
    /// a [`TracingObserver`]
    pub fn new(config: DatapathConfig) -> Arc<Self> {
        let buffers = Arc::new(PacketBufferPool::new(Duration::from_millis(
            config.buffer_retention_ms,
        )));
        let observer: Option<Arc<dyn PacketObserver>> = if config.packet_tracking {
            Some(Arc::new(TracingObserver::new()))
        } else {
            None
        };
        Self::with_parts(config, buffers, observer)
    }

    /// Context with caller-supplied collaborators
    pub fn with_parts(
        config: DatapathConfig,
        buffers: Arc<dyn BufferPool>,
        observer: Option<Arc<dyn PacketObserver>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            buffers,
            observer,
            next_uid: AtomicU64::new(1),
        })
    }

    /// Datapath identifier
    pub fn id(&self) -> u64 {
        self.config.datapath_id
    }

    /// Configuration the datapath was built with
    pub fn config(&self) -> &DatapathConfig {
        &self.config
    }

    /// Pool holding packets awaiting packet-out
    pub fn buffers(&self) -> &dyn BufferPool {
        self.buffers.as_ref()
    }

    /// Installed lifetime observer
    pub fn observer(&self) -> Option<&dyn PacketObserver> {
        self.observer.as_deref()
    }

    /// Packets carry tracking info
    pub fn tracking_enabled(&self) -> bool {
        self.config.packet_tracking
    }

    pub(crate) fn next_uid(&self) -> u64 {
        self.next_uid.fetch_add(1, Ordering::Relaxed)
    }
}

impl fmt::Debug for DatapathContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatapathContext")
            .field("id", &self.id())
            .field("tracking", &self.tracking_enabled())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
