//! Packet Buffers and Buffer Retention
//!
//! Packet data lives in a [`PacketBuffer`], a reference-counted byte buffer.
//! A packet sent to the controller may be parked in the [`BufferPool`] so a
//! later packet-out or flow-mod can refer to it by [`BufferId`]. While parked,
//! the pool holds a second handle on the same buffer and marks it pinned.
//!
//! # Design
//!
//! - Ring of 256 slots, `id = cookie << 8 | slot`
//! - Cookies are 23 bits wide so no id collides with `OFP_NO_BUFFER`
//! - A slot inside its retention window is never overwritten
//! - Check-then-act ([`BufferPool::release`]) is a single critical section

use bytes::BytesMut;
use ofs_common::{ofp, BadRequestCode, OflError, OflResult, Timestamp};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Slots in the buffer ring
pub const BUFFER_POOL_SIZE: usize = 256;

/// Bits of the id that select the slot
const SLOT_BITS: u32 = 8;

/// Cookie mask, keeps ids below `OFP_NO_BUFFER`
const COOKIE_MASK: u32 = (1 << 23) - 1;

/// Cookie of a slot that was never saved into
const UNUSED_COOKIE: u32 = 0;

struct BufferInner {
    data: RwLock<BytesMut>,
    pinned: AtomicBool,
}

/// Shared packet data
///
/// Cloning is crate-private: only the pool takes a second handle. Everything
/// else that needs its own copy uses [`PacketBuffer::deep_copy`].
pub struct PacketBuffer {
    inner: Arc<BufferInner>,
}

impl PacketBuffer {
    /// Wrap owned bytes
    pub fn new(data: BytesMut) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                data: RwLock::new(data),
                pinned: AtomicBool::new(false),
            }),
        }
    }

    /// Copy a slice into a new buffer
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(BytesMut::from(data))
    }

    /// Independent copy of the current contents
    pub fn deep_copy(&self) -> Self {
        Self::from_slice(&self.inner.data.read())
    }

    /// Second handle on the same bytes
    pub(crate) fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Read access to the bytes
    #[inline(always)]
    pub fn read(&self) -> RwLockReadGuard<'_, BytesMut> {
        self.inner.data.read()
    }

    /// Write access to the bytes
    ///
    /// Packets hand this out through [`Packet::buffer_mut`] so their cached
    /// match fields are dropped first.
    ///
    /// [`Packet::buffer_mut`]: crate::packet::Packet::buffer_mut
    #[inline(always)]
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, BytesMut> {
        self.inner.data.write()
    }

    /// Contents as an owned vector
    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.data.read().to_vec()
    }

    /// Data length
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    /// Check if empty
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending packet-out
    pub fn is_pinned(&self) -> bool {
        self.inner.pinned.load(Ordering::Acquire)
    }

    fn set_pinned(&self, pinned: bool) {
        self.inner.pinned.store(pinned, Ordering::Release);
    }

    /// Live handles on these bytes
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Both handles refer to the same bytes
    pub fn same_buffer(&self, other: &PacketBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("len", &self.len())
            .field("pinned", &self.is_pinned())
            .finish()
    }
}

/// Identifier of a parked packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

impl BufferId {
    /// Parse a wire id; `OFP_NO_BUFFER` maps to `None`
    pub fn from_raw(raw: u32) -> Option<Self> {
        (raw != ofp::OFP_NO_BUFFER).then_some(Self(raw))
    }

    /// Wire value
    pub fn raw(&self) -> u32 {
        self.0
    }

    fn slot(&self) -> usize {
        (self.0 as usize) & (BUFFER_POOL_SIZE - 1)
    }

    fn cookie(&self) -> u32 {
        self.0 >> SLOT_BITS
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A packet retrieved from the pool
#[derive(Debug)]
pub struct RetainedPacket {
    /// Packet data
    pub buffer: PacketBuffer,
    /// Original ingress port
    pub in_port: u32,
    /// Original tunnel id
    pub tunnel_id: u64,
    /// When the packet was parked
    pub saved_at: Timestamp,
}

/// Result of asking the pool to release a packet's buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Pool still owns a live reference; the caller must not free the data
    Retained,
    /// Bookkeeping cleared; the caller owns the data
    Released,
}

/// Storage for packets awaiting packet-out
pub trait BufferPool: Send + Sync {
    /// Park a buffer, `None` when no slot is free
    fn save(&self, buffer: &PacketBuffer, in_port: u32, tunnel_id: u64) -> Option<BufferId>;

    /// Take a parked packet out of the pool
    fn retrieve(&self, id: BufferId) -> OflResult<RetainedPacket>;

    /// Cookie matches and the retention window is still open
    fn is_alive(&self, id: BufferId) -> bool;

    /// Drop bookkeeping for `id`; live entries only go when `forced`
    fn discard(&self, id: BufferId, forced: bool);

    /// Keep the buffer if it is alive, otherwise discard it
    ///
    /// Implementations shared between threads must override this so the
    /// check and the discard happen atomically.
    fn release(&self, id: BufferId) -> Retention {
        if self.is_alive(id) {
            Retention::Retained
        } else {
            self.discard(id, false);
            Retention::Released
        }
    }
}

struct Slot {
    packet: Option<RetainedPacket>,
    cookie: u32,
    expires: Timestamp,
}

impl Slot {
    fn is_live(&self, now: Timestamp) -> bool {
        self.packet.is_some() && now < self.expires
    }

    fn clear(&mut self) {
        if let Some(p) = self.packet.take() {
            p.buffer.set_pinned(false);
        }
    }
}

struct Ring {
    slots: Vec<Slot>,
    next: usize,
}

impl Ring {
    fn matching(&mut self, id: BufferId) -> Option<&mut Slot> {
        let slot = &mut self.slots[id.slot()];
        (slot.cookie != UNUSED_COOKIE && slot.cookie == id.cookie()).then_some(slot)
    }

    fn is_alive(&mut self, id: BufferId, now: Timestamp) -> bool {
        self.matching(id).map_or(false, |s| s.is_live(now))
    }

    fn discard(&mut self, id: BufferId, forced: bool, now: Timestamp) {
        if let Some(slot) = self.matching(id) {
            if forced || !slot.is_live(now) {
                slot.clear();
            }
        }
    }
}

/// Ring-backed [`BufferPool`]
pub struct PacketBufferPool {
    ring: Mutex<Ring>,
    retention: Duration,
}

impl PacketBufferPool {
    /// Create a pool keeping packets for `retention`
    pub fn new(retention: Duration) -> Self {
        let slots = (0..BUFFER_POOL_SIZE)
            .map(|_| Slot {
                packet: None,
                cookie: UNUSED_COOKIE,
                expires: Timestamp::default(),
            })
            .collect();
        Self {
            ring: Mutex::new(Ring { slots, next: 0 }),
            retention,
        }
    }

    /// Parked packets that are still live
    pub fn live_count(&self) -> usize {
        let now = Timestamp::now();
        self.ring.lock().slots.iter().filter(|s| s.is_live(now)).count()
    }
}

impl BufferPool for PacketBufferPool {
    fn save(&self, buffer: &PacketBuffer, in_port: u32, tunnel_id: u64) -> Option<BufferId> {
        let now = Timestamp::now();
        let mut ring = self.ring.lock();
        let index = ring.next;
        let slot = &mut ring.slots[index];

        if slot.is_live(now) {
            tracing::warn!("buffer pool exhausted, slot {} still live", index);
            return None;
        }
        slot.clear();

        slot.cookie = match (slot.cookie + 1) & COOKIE_MASK {
            UNUSED_COOKIE => 1,
            cookie => cookie,
        };
        slot.expires = now.add_millis(self.retention.as_millis() as u64);
        buffer.set_pinned(true);
        slot.packet = Some(RetainedPacket {
            buffer: buffer.share(),
            in_port,
            tunnel_id,
            saved_at: now,
        });
        let id = BufferId((slot.cookie << SLOT_BITS) | index as u32);

        ring.next = (index + 1) % BUFFER_POOL_SIZE;
        tracing::debug!("buffered packet as {}", id);
        Some(id)
    }

    fn retrieve(&self, id: BufferId) -> OflResult<RetainedPacket> {
        let mut ring = self.ring.lock();
        let slot = ring
            .matching(id)
            .ok_or(OflError::BadRequest(BadRequestCode::BufferUnknown))?;
        let packet = slot
            .packet
            .take()
            .ok_or(OflError::BadRequest(BadRequestCode::BufferEmpty))?;
        packet.buffer.set_pinned(false);
        Ok(packet)
    }

    fn is_alive(&self, id: BufferId) -> bool {
        self.ring.lock().is_alive(id, Timestamp::now())
    }

    fn discard(&self, id: BufferId, forced: bool) {
        self.ring.lock().discard(id, forced, Timestamp::now());
    }

    fn release(&self, id: BufferId) -> Retention {
        let now = Timestamp::now();
        let mut ring = self.ring.lock();
        if ring.is_alive(id, now) {
            Retention::Retained
        } else {
            ring.discard(id, false, now);
            Retention::Released
        }
    }
}
