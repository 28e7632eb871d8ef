//! Packet Object
//!
//! A [`Packet`] owns everything the pipeline needs while processing one
//! frame: the data, its action set, the output decision and cached match
//! fields. When a packet was handed to the controller with a buffer id, its
//! data may outlive the packet: destroying it then leaves the bytes with the
//! buffer pool.

use crate::action_set::{ActionSet, OutputDecision};
use crate::buffer::{BufferId, PacketBuffer, RetainedPacket, Retention};
use crate::datapath::{DatapathContext, TrackingInfo};
use crate::headers::{self, PacketFields};
use bytes::BytesMut;
use ofs_common::ofp::{BufferNo, GroupNo, PortNo};
use ofs_common::FourTuple;
use parking_lot::RwLockWriteGuard;
use std::fmt;
use std::sync::Arc;

/// How a packet entered the datapath
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Received on a port
    Ingress,
    /// Injected by a packet-out carrying inline data
    PacketOut,
    /// Copied from another packet
    Clone,
    /// Re-injected from the buffer pool
    Buffered,
}

impl Provenance {
    /// Seen by the pipeline for the first time
    pub fn is_top_level(&self) -> bool {
        matches!(self, Provenance::Ingress | Provenance::PacketOut)
    }
}

/// What happened to a destroyed packet's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Buffer pool still holds the data for a pending packet-out
    Retained,
    /// Everything was released
    Released,
}

/// A packet in flight through the pipeline
pub struct Packet {
    ctx: Arc<DatapathContext>,
    buffer: PacketBuffer,
    in_port: u32,
    action_set: ActionSet,
    output: OutputDecision,
    buffer_id: Option<BufferId>,
    table_id: u8,
    tunnel_id: u64,
    packet_out: bool,
    provenance: Provenance,
    fields: Option<PacketFields>,
    tracking: Option<TrackingInfo>,
    finalized: bool,
}

impl Packet {
    /// Wrap a received or injected frame
    pub fn create(
        ctx: Arc<DatapathContext>,
        in_port: u32,
        buffer: PacketBuffer,
        tunnel_id: u64,
        packet_out: bool,
    ) -> Self {
        let provenance = if packet_out {
            Provenance::PacketOut
        } else {
            Provenance::Ingress
        };
        Self::build(ctx, in_port, buffer, tunnel_id, packet_out, provenance)
    }

    /// Rebuild a packet taken out of the buffer pool
    pub fn from_retained(ctx: Arc<DatapathContext>, retained: RetainedPacket, packet_out: bool) -> Self {
        Self::build(
            ctx,
            retained.in_port,
            retained.buffer,
            retained.tunnel_id,
            packet_out,
            Provenance::Buffered,
        )
    }

    fn build(
        ctx: Arc<DatapathContext>,
        in_port: u32,
        buffer: PacketBuffer,
        tunnel_id: u64,
        packet_out: bool,
        provenance: Provenance,
    ) -> Self {
        let tracking = ctx.tracking_enabled().then(|| TrackingInfo {
            uid: ctx.next_uid(),
            ..Default::default()
        });
        Self {
            ctx,
            buffer,
            in_port,
            action_set: ActionSet::new(),
            output: OutputDecision::default(),
            buffer_id: None,
            table_id: 0,
            tunnel_id,
            packet_out,
            provenance,
            fields: None,
            tracking,
            finalized: false,
        }
    }

    /// Independent copy for separate processing
    ///
    /// The copy gets its own data and an empty action set; it is never
    /// associated with a buffer id.
    pub fn clone_packet(&self) -> Self {
        let tracking = self.tracking.map(|t| TrackingInfo { clone: true, ..t });
        let clone = Self {
            ctx: Arc::clone(&self.ctx),
            buffer: self.buffer.deep_copy(),
            in_port: self.in_port,
            action_set: ActionSet::new(),
            output: OutputDecision::default(),
            buffer_id: None,
            table_id: self.table_id,
            tunnel_id: self.tunnel_id,
            packet_out: self.packet_out,
            provenance: Provenance::Clone,
            fields: self.fields.clone(),
            tracking,
            finalized: false,
        };
        if let Some(observer) = self.ctx.observer() {
            observer.on_clone(self, &clone);
        }
        clone
    }

    /// End the packet's life
    pub fn destroy(mut self) -> Disposition {
        self.finalize()
    }

    fn finalize(&mut self) -> Disposition {
        if self.finalized {
            return Disposition::Released;
        }
        self.finalized = true;

        if let Some(id) = self.buffer_id {
            if self.ctx.buffers().release(id) == Retention::Retained {
                tracing::debug!("packet data retained by buffer {}", id);
                return Disposition::Retained;
            }
        }

        if let Some(observer) = self.ctx.observer() {
            observer.on_destroy(self);
        }
        self.action_set.clear();
        self.fields = None;
        Disposition::Released
    }

    /// Datapath the packet belongs to
    pub fn context(&self) -> &Arc<DatapathContext> {
        &self.ctx
    }

    /// Ingress port
    pub fn in_port(&self) -> u32 {
        self.in_port
    }

    /// Logical tunnel id, 0 when untunnelled
    pub fn tunnel_id(&self) -> u64 {
        self.tunnel_id
    }

    /// Injected by the controller
    pub fn is_packet_out(&self) -> bool {
        self.packet_out
    }

    /// How the packet entered the datapath
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Packet data
    pub fn buffer(&self) -> &PacketBuffer {
        &self.buffer
    }

    /// Write access to the packet data; drops the cached match fields
    pub fn buffer_mut(&mut self) -> RwLockWriteGuard<'_, BytesMut> {
        self.fields = None;
        self.buffer.write()
    }

    /// Data length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// No data
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Accumulated write-actions
    pub fn action_set(&self) -> &ActionSet {
        &self.action_set
    }

    /// Mutable action set
    pub fn action_set_mut(&mut self) -> &mut ActionSet {
        &mut self.action_set
    }

    /// Output decision taken so far
    pub fn output(&self) -> &OutputDecision {
        &self.output
    }

    pub(crate) fn output_mut(&mut self) -> &mut OutputDecision {
        &mut self.output
    }

    /// Buffer id given to the controller, if any
    pub fn buffer_id(&self) -> Option<BufferId> {
        self.buffer_id
    }

    pub(crate) fn set_buffer_id(&mut self, id: Option<BufferId>) {
        self.buffer_id = id;
    }

    /// Table currently (or last) processing the packet
    pub fn table_id(&self) -> u8 {
        self.table_id
    }

    pub(crate) fn set_table_id(&mut self, table_id: u8) {
        self.table_id = table_id;
    }

    /// Tracking state when tracking is enabled
    pub fn tracking(&self) -> Option<&TrackingInfo> {
        self.tracking.as_ref()
    }

    /// Match fields, parsed on first use
    pub fn fields(&mut self) -> &PacketFields {
        let fields = match self.fields.take() {
            Some(fields) => fields,
            None => self.parse_fields(),
        };
        self.fields.insert(fields)
    }

    fn parse_fields(&self) -> PacketFields {
        PacketFields::parse(&self.buffer.read(), self.in_port, self.tunnel_id)
    }

    /// IPv4/TCP-UDP 4-tuple of the packet
    pub fn four_tuple(&mut self) -> Option<FourTuple> {
        self.fields().four_tuple()
    }

    /// Decrement the IPv4 TTL
    pub fn dec_nw_ttl(&mut self) -> bool {
        let fields = self.fields().clone();
        let changed = headers::dec_ipv4_ttl(&mut self.buffer.write(), &fields);
        self.after_rewrite(changed)
    }

    /// Rewrite the IPv4 DSCP
    pub fn set_ip_dscp(&mut self, dscp: u8) -> bool {
        let fields = self.fields().clone();
        let changed = headers::set_ipv4_dscp(&mut self.buffer.write(), &fields, dscp);
        self.after_rewrite(changed)
    }

    fn after_rewrite(&mut self, changed: bool) -> bool {
        if changed {
            self.fields = None;
            if let Some(t) = self.tracking.as_mut() {
                t.changes += 1;
            }
        }
        changed
    }

    /// Run and empty the action set
    pub fn execute_action_set(&mut self) {
        let mut set = std::mem::take(&mut self.action_set);
        set.execute(self);
    }

    /// Deterministic one-line description
    pub fn to_display_string(&self) -> String {
        self.to_string()
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pkt{{in=\"{}\", actset={}, pktout=\"{}\", ogrp=\"{}\", oprt=\"{}\", buffer=\"{}\"",
            PortNo(self.in_port),
            self.action_set,
            self.packet_out as u8,
            GroupNo(self.output.group),
            PortNo(self.output.port),
            BufferNo(self.buffer_id.map(|id| id.raw())),
        )?;
        if let Some(t) = &self.tracking {
            write!(f, ", uid=\"{}\", changes=\"{}\", clone=\"{}\"", t.uid, t.changes, t.clone as u8)?;
        }
        match &self.fields {
            Some(fields) => write!(f, ", std={}}}", fields),
            None => write!(f, ", std={}}}", self.parse_fields()),
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
