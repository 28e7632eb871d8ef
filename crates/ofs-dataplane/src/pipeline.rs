//! Multi-table Pipeline
//!
//! Walks a packet through the flow tables as a small state machine:
//!
//! ```text
//!   Table(first) ──lookup──▶ miss ─────────────────────────▶ Terminal(Dropped)
//!        │
//!        ├── goto t (t > current) ──▶ Table(t)
//!        │
//!        └── no goto ──▶ action set ──▶ Terminal(Forwarded | SentToController | Dropped)
//! ```
//!
//! [`TableIndex`] can only move forward and never names a table outside the
//! pipeline, so the walk terminates after at most `num_tables` steps.

use crate::action_set::Action;
use crate::buffer::PacketBuffer;
use crate::config::ConfigError;
use crate::control::{ControlChannel, PortOutput, SenderId};
use crate::datapath::DatapathContext;
use crate::flow_table::{validate_instructions, FlowTable, InstructionOutcome, PriorityFlowTable};
use crate::messages::{
    AggregateStats, ControlReply, ExperimenterReply, FlowMod, FlowStatsRequest, PacketIn,
    PacketInReason, PacketOut, TableFeaturesRequest, TableMod, SKETCH_DATA_TYPE,
    SKETCH_EXPERIMENTER_ID,
};
use crate::packet::{Disposition, Packet};
use crate::sketch::{ElephantCandidate, ElephantSketch, RecordOutcome, SKETCH_CAPACITY};
use crate::stats::PipelineStats;
use crate::PIPELINE_NUM_TABLES;
use ofs_common::ofp;
use ofs_common::{
    BadRequestCode, FlowModFailedCode, FourTuple, OflError, OflResult, TableFeaturesFailedCode,
    TableModFailedCode, Timestamp,
};
use std::sync::Arc;

/// Table-mod configuration bits the pipeline accepts
const TABLE_CONFIG_MASK: u32 = 0x3;

/// Cookie of packet-ins not caused by a flow entry
const NO_COOKIE: u64 = u64::MAX;

/// Position in the pipeline; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableIndex(u8);

impl TableIndex {
    /// Starting table, `None` if outside the pipeline
    pub fn first(table_id: u8, num_tables: usize) -> Option<Self> {
        ((table_id as usize) < num_tables).then_some(Self(table_id))
    }

    /// Next table, `None` unless `target` is later and inside the pipeline
    pub fn goto(self, target: u8, num_tables: usize) -> Option<Self> {
        (target > self.0 && (target as usize) < num_tables).then_some(Self(target))
    }

    /// Raw table id
    pub fn get(self) -> u8 {
        self.0
    }
}

/// Why a packet was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No entry matched
    TableMiss,
    /// Walk ended with nothing to do
    EmptyActionSet,
    /// Group processing is not supported
    GroupUnsupported,
    /// Goto named a table behind or outside the pipeline
    InvalidGoto,
}

impl DropReason {
    fn as_str(&self) -> &'static str {
        match self {
            DropReason::TableMiss => "table_miss",
            DropReason::EmptyActionSet => "empty_action_set",
            DropReason::GroupUnsupported => "group_unsupported",
            DropReason::InvalidGoto => "invalid_goto",
        }
    }
}

fn packet_in_label(reason: PacketInReason) -> &'static str {
    match reason {
        PacketInReason::NoMatch => "no_match",
        PacketInReason::Action => "action",
        PacketInReason::InvalidTtl => "invalid_ttl",
    }
}

/// How processing ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Packet discarded
    Dropped(DropReason),
    /// Packet-in sent
    SentToController(PacketInReason),
    /// Handed to a port
    #[allow(missing_docs)]
    Forwarded { port: u32, queue: u32 },
}

/// Walk state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// About to look up this table
    Table(TableIndex),
    /// Walk finished
    Terminal(Outcome),
}

/// Summary of one [`Pipeline::process_packet`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessReport {
    /// How processing ended
    pub outcome: Outcome,
    /// Lookups performed
    pub tables_visited: u8,
    /// Last table looked at
    pub last_table: u8,
    /// What became of the packet's data
    pub disposition: Disposition,
}

/// OpenFlow processing pipeline
pub struct Pipeline {
    ctx: Arc<DatapathContext>,
    tables: Vec<Box<dyn FlowTable>>,
    first_table: u8,
    sketch: ElephantSketch,
    stats: PipelineStats,
    channel: Arc<dyn ControlChannel>,
    egress: Arc<dyn PortOutput>,
}

impl Pipeline {
    /// Pipeline of [`PriorityFlowTable`]s sized from the datapath config
    pub fn new(
        ctx: Arc<DatapathContext>,
        channel: Arc<dyn ControlChannel>,
        egress: Arc<dyn PortOutput>,
    ) -> Self {
        let config = ctx.config();
        let num_tables = (config.num_tables as usize).clamp(1, PIPELINE_NUM_TABLES);
        let max_entries = config.max_flow_entries;
        let tables = (0..num_tables)
            .map(|id| Box::new(PriorityFlowTable::new(id as u8, num_tables, max_entries)) as Box<dyn FlowTable>)
            .collect();
        Self::assemble(ctx, tables, channel, egress)
    }

    /// Pipeline over caller-supplied tables
    ///
    /// Table `i` of the vector must report table id `i`; between 1 and
    /// [`PIPELINE_NUM_TABLES`] tables are accepted.
    pub fn with_tables(
        ctx: Arc<DatapathContext>,
        tables: Vec<Box<dyn FlowTable>>,
        channel: Arc<dyn ControlChannel>,
        egress: Arc<dyn PortOutput>,
    ) -> Result<Self, ConfigError> {
        if tables.is_empty() || tables.len() > PIPELINE_NUM_TABLES {
            return Err(ConfigError::Invalid {
                field: "tables",
                reason: format!("expected 1..={} tables, got {}", PIPELINE_NUM_TABLES, tables.len()),
            });
        }
        if let Some((index, table)) = tables
            .iter()
            .enumerate()
            .find(|(index, table)| table.table_id() as usize != *index)
        {
            return Err(ConfigError::Invalid {
                field: "tables",
                reason: format!("table at index {} reports id {}", index, table.table_id()),
            });
        }
        Ok(Self::assemble(ctx, tables, channel, egress))
    }

    fn assemble(
        ctx: Arc<DatapathContext>,
        tables: Vec<Box<dyn FlowTable>>,
        channel: Arc<dyn ControlChannel>,
        egress: Arc<dyn PortOutput>,
    ) -> Self {
        let first_table = if (ctx.config().first_table as usize) < tables.len() {
            ctx.config().first_table
        } else {
            0
        };
        tracing::info!(
            datapath = ctx.id(),
            tables = tables.len(),
            first_table,
            "pipeline created"
        );
        Self {
            ctx,
            tables,
            first_table,
            sketch: ElephantSketch::new(),
            stats: PipelineStats::default(),
            channel,
            egress,
        }
    }

    /// Datapath the pipeline belongs to
    pub fn context(&self) -> &Arc<DatapathContext> {
        &self.ctx
    }

    /// Number of flow tables
    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    /// Table by id
    pub fn table(&self, table_id: u8) -> Option<&dyn FlowTable> {
        self.tables.get(table_id as usize).map(|t| t.as_ref())
    }

    /// Elephant flow sketch
    pub fn sketch(&self) -> &ElephantSketch {
        &self.sketch
    }

    /// Pipeline counters
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Read-only copy of the sketch slots
    pub fn elephant_array(&self) -> [ElephantCandidate; SKETCH_CAPACITY] {
        self.sketch.elephant_array()
    }

    /// 4-tuple of an IPv4 TCP/UDP packet
    pub fn get_four_tuple(pkt: &mut Packet) -> Option<FourTuple> {
        pkt.four_tuple()
    }

    /// Packet carries a 4-tuple
    pub fn packet_get_four_tuple(pkt: &mut Packet) -> bool {
        Self::get_four_tuple(pkt).is_some()
    }

    /// Run a packet through the tables; the packet is destroyed on return
    pub fn process_packet(&self, mut pkt: Packet) -> ProcessReport {
        self.stats.record_rx(pkt.len() as u64);

        if pkt.provenance().is_top_level() && self.ctx.config().elephant_detection {
            if let Some(ft) = pkt.four_tuple() {
                let outcome = self.sketch.record(&ft);
                self.stats.record_sketch(outcome == RecordOutcome::Evicted);
                tracing::trace!(tuple = %ft, ?outcome, "sketch record");
            }
        }

        if self.ctx.config().invalid_ttl_to_controller && !pkt.fields().is_ttl_valid() {
            pkt.set_table_id(self.first_table);
            let max_len = self.ctx.config().miss_send_len;
            self.packet_in(&mut pkt, PacketInReason::InvalidTtl, max_len, NO_COOKIE);
            return self.finish(pkt, Outcome::SentToController(PacketInReason::InvalidTtl), 0, self.first_table);
        }

        let mut state = match TableIndex::first(self.first_table, self.num_tables()) {
            Some(index) => PipelineState::Table(index),
            None => PipelineState::Terminal(Outcome::Dropped(DropReason::TableMiss)),
        };
        let mut tables_visited = 0u8;
        let mut last_table = self.first_table;

        let outcome = loop {
            match state {
                PipelineState::Table(index) => {
                    tables_visited += 1;
                    last_table = index.get();
                    state = self.step(&mut pkt, index);
                }
                PipelineState::Terminal(outcome) => break outcome,
            }
        };

        self.finish(pkt, outcome, tables_visited, last_table)
    }

    fn step(&self, pkt: &mut Packet, index: TableIndex) -> PipelineState {
        let table = &self.tables[index.get() as usize];
        pkt.set_table_id(index.get());
        let len = pkt.len();

        let Some(entry) = table.lookup(pkt.fields(), len) else {
            tracing::debug!(table = index.get(), "table miss");
            self.stats.record_table_miss();
            return PipelineState::Terminal(Outcome::Dropped(DropReason::TableMiss));
        };
        self.stats.record_table_hit();
        tracing::trace!(table = index.get(), priority = entry.priority, "table hit");

        let outcome = table.apply_instructions(&entry, pkt);
        let reason = if outcome.table_miss {
            PacketInReason::NoMatch
        } else {
            PacketInReason::Action
        };
        self.execute_immediate(pkt, &outcome, reason);

        match outcome.goto {
            Some(target) => match index.goto(target, self.num_tables()) {
                Some(next) => PipelineState::Table(next),
                None => {
                    tracing::warn!(table = index.get(), target, "goto outside the pipeline");
                    PipelineState::Terminal(Outcome::Dropped(DropReason::InvalidGoto))
                }
            },
            None => PipelineState::Terminal(self.execute_action_set(pkt, reason, outcome.cookie)),
        }
    }

    fn execute_immediate(&self, pkt: &mut Packet, outcome: &InstructionOutcome, reason: PacketInReason) {
        for action in &outcome.immediate {
            match *action {
                Action::Output { port, max_len } => self.output(pkt, port, max_len, reason, outcome.cookie),
                Action::Group(group) => {
                    tracing::debug!(group, "group action not supported, ignored");
                }
                _ => action.apply(pkt),
            }
        }
    }

    fn execute_action_set(&self, pkt: &mut Packet, reason: PacketInReason, cookie: u64) -> Outcome {
        if pkt.action_set().is_empty() {
            return Outcome::Dropped(DropReason::EmptyActionSet);
        }
        pkt.execute_action_set();

        let out = *pkt.output();
        if out.group != ofp::OFPG_ANY {
            tracing::warn!(group = out.group, "group processing not supported, dropping packet");
            return Outcome::Dropped(DropReason::GroupUnsupported);
        }
        match out.port {
            ofp::OFPP_ANY => Outcome::Dropped(DropReason::EmptyActionSet),
            ofp::OFPP_CONTROLLER => {
                self.packet_in(pkt, reason, out.port_max_len, cookie);
                Outcome::SentToController(reason)
            }
            port => {
                let port = self.send_to_port(pkt, port, out.queue);
                Outcome::Forwarded { port, queue: out.queue }
            }
        }
    }

    /// Output that leaves the packet in the pipeline
    fn output(&self, pkt: &mut Packet, port: u32, max_len: u16, reason: PacketInReason, cookie: u64) {
        match port {
            ofp::OFPP_CONTROLLER => {
                let mut clone = pkt.clone_packet();
                self.stats.record_clone();
                self.packet_in(&mut clone, reason, max_len, cookie);
                if clone.destroy() == Disposition::Retained {
                    self.stats.record_retained();
                }
            }
            ofp::OFPP_TABLE | ofp::OFPP_ANY => {
                tracing::debug!(port = %ofp::PortNo(port), "output ignored");
            }
            port => {
                let queue = pkt.output().queue;
                self.send_to_port(pkt, port, queue);
            }
        }
    }

    fn send_to_port(&self, pkt: &Packet, port: u32, queue: u32) -> u32 {
        let port = if port == ofp::OFPP_IN_PORT { pkt.in_port() } else { port };
        self.stats.record_tx(pkt.len() as u64);
        self.egress.output(pkt, port, queue);
        port
    }

    /// Hand a packet to the controller with the configured miss length
    pub fn send_packet_to_controller(&self, pkt: &mut Packet, table_id: u8, reason: PacketInReason) {
        pkt.set_table_id(table_id);
        let max_len = self.ctx.config().miss_send_len;
        self.packet_in(pkt, reason, max_len, NO_COOKIE);
    }

    fn packet_in(&self, pkt: &mut Packet, reason: PacketInReason, max_len: u16, cookie: u64) {
        let total_len = pkt.len();

        let buffer_id = if max_len == ofp::OFPCML_NO_BUFFER {
            None
        } else {
            match pkt.buffer_id() {
                Some(id) => Some(id),
                None => {
                    let id = self.ctx.buffers().save(pkt.buffer(), pkt.in_port(), pkt.tunnel_id());
                    pkt.set_buffer_id(id);
                    id
                }
            }
        };

        let data_len = match buffer_id {
            Some(_) => total_len.min(max_len as usize),
            None => total_len,
        };
        let data = pkt.buffer().read()[..data_len].to_vec();

        self.stats.record_packet_in(packet_in_label(reason));
        tracing::debug!(
            reason = packet_in_label(reason),
            table = pkt.table_id(),
            buffer = %ofp::BufferNo(buffer_id.map(|id| id.raw())),
            "packet in"
        );
        self.channel.send(
            ControlReply::PacketIn(PacketIn {
                buffer_id,
                total_len: total_len.min(u16::MAX as usize) as u16,
                reason,
                table_id: pkt.table_id(),
                cookie,
                in_port: pkt.in_port(),
                tunnel_id: pkt.tunnel_id(),
                data,
            }),
            None,
        );
    }

    fn finish(&self, pkt: Packet, outcome: Outcome, tables_visited: u8, last_table: u8) -> ProcessReport {
        if let Outcome::Dropped(reason) = outcome {
            self.stats.record_drop(reason.as_str());
        }
        let disposition = pkt.destroy();
        if disposition == Disposition::Retained {
            self.stats.record_retained();
        }
        ProcessReport {
            outcome,
            tables_visited,
            last_table,
            disposition,
        }
    }

    /// Send the sketch contents to the requester
    pub fn handle_sketch_data(&self, sender: Option<&SenderId>) {
        let data = match self.sketch.snapshot().to_json() {
            Ok(json) => json.into_bytes(),
            Err(e) => {
                tracing::warn!("failed to encode sketch: {}", e);
                return;
            }
        };
        self.channel.send(
            ControlReply::Experimenter(ExperimenterReply {
                experimenter: SKETCH_EXPERIMENTER_ID,
                exp_type: SKETCH_DATA_TYPE,
                data,
            }),
            sender,
        );
    }

    fn tables_for(&self, table_id: u8) -> OflResult<&[Box<dyn FlowTable>]> {
        if table_id == ofp::OFPTT_ALL {
            Ok(&self.tables)
        } else if (table_id as usize) < self.tables.len() {
            let i = table_id as usize;
            Ok(&self.tables[i..=i])
        } else {
            Err(OflError::BadRequest(BadRequestCode::BadTableId))
        }
    }

    /// Apply a flow-mod, then run the buffered packet it names
    pub fn handle_flow_mod(&self, msg: &FlowMod, sender: Option<&SenderId>) -> OflResult<()> {
        let is_delete = msg.command.is_delete();

        if msg.table_id == ofp::OFPTT_ALL {
            if !is_delete {
                return Err(OflError::FlowModFailed(FlowModFailedCode::BadTableId));
            }
        } else if msg.table_id as usize >= self.tables.len() {
            return Err(OflError::FlowModFailed(FlowModFailedCode::BadTableId));
        }

        if !is_delete {
            msg.match_fields.validate()?;
            validate_instructions(&msg.instructions, msg.table_id, self.tables.len())?;
        }

        let tables = self
            .tables_for(msg.table_id)
            .map_err(|_| OflError::FlowModFailed(FlowModFailedCode::BadTableId))?;
        let mut removed = Vec::new();
        for table in tables {
            removed.extend(table.flow_mod(msg)?);
        }
        tracing::debug!(
            command = ?msg.command,
            table = msg.table_id,
            sender = ?sender,
            removed = removed.len(),
            "flow mod"
        );
        for notice in removed {
            self.channel.send(ControlReply::FlowRemoved(notice), None);
        }

        if !is_delete {
            if let Some(id) = msg.buffer_id {
                match self.ctx.buffers().retrieve(id) {
                    Ok(retained) => {
                        let pkt = Packet::from_retained(Arc::clone(&self.ctx), retained, false);
                        self.process_packet(pkt);
                    }
                    Err(e) => {
                        tracing::warn!("flow mod references buffer {} with no packet: {}", id, e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Change the configuration of one table or all of them
    pub fn handle_table_mod(&self, msg: &TableMod, sender: Option<&SenderId>) -> OflResult<()> {
        if msg.config & !TABLE_CONFIG_MASK != 0 {
            return Err(OflError::TableModFailed(TableModFailedCode::BadConfig));
        }
        let tables = self
            .tables_for(msg.table_id)
            .map_err(|_| OflError::TableModFailed(TableModFailedCode::BadTable))?;
        for table in tables {
            table.table_mod(msg.config);
        }
        tracing::debug!(table = msg.table_id, config = msg.config, sender = ?sender, "table mod");
        Ok(())
    }

    /// Per-flow statistics
    pub fn handle_stats_request_flow(&self, req: &FlowStatsRequest, sender: Option<&SenderId>) -> OflResult<()> {
        let now = Timestamp::now();
        let stats = self
            .tables_for(req.table_id)?
            .iter()
            .flat_map(|t| t.flow_stats(req, now))
            .collect();
        self.channel.send(ControlReply::FlowStats(stats), sender);
        Ok(())
    }

    /// Aggregate flow statistics
    pub fn handle_stats_request_aggregate(&self, req: &FlowStatsRequest, sender: Option<&SenderId>) -> OflResult<()> {
        let mut total = AggregateStats::default();
        for table in self.tables_for(req.table_id)? {
            total.merge(table.aggregate_stats(req));
        }
        self.channel.send(ControlReply::AggregateStats(total), sender);
        Ok(())
    }

    /// Per-table statistics
    pub fn handle_stats_request_table(&self, sender: Option<&SenderId>) -> OflResult<()> {
        let stats = self.tables.iter().map(|t| t.table_stats()).collect();
        self.channel.send(ControlReply::TableStats(stats), sender);
        Ok(())
    }

    /// Describe the tables; reconfiguration requests are refused
    pub fn handle_stats_request_table_features(
        &self,
        req: &TableFeaturesRequest,
        sender: Option<&SenderId>,
    ) -> OflResult<()> {
        if !req.body.is_empty() {
            return Err(OflError::TableFeaturesFailed(TableFeaturesFailedCode::Eperm));
        }
        let features = self.tables.iter().map(|t| t.features()).collect();
        self.channel.send(ControlReply::TableFeatures(features), sender);
        Ok(())
    }

    /// Execute a controller packet-out
    pub fn handle_packet_out(&self, msg: &PacketOut, sender: Option<&SenderId>) -> OflResult<()> {
        let in_port_valid = (msg.in_port != 0 && msg.in_port <= ofp::OFPP_MAX)
            || msg.in_port == ofp::OFPP_CONTROLLER
            || msg.in_port == ofp::OFPP_LOCAL;
        if !in_port_valid {
            return Err(OflError::BadRequest(BadRequestCode::BadPort));
        }
        for action in &msg.actions {
            match action {
                Action::Output { port: ofp::OFPP_TABLE, .. } => {}
                other => other.validate()?,
            }
        }

        let mut pkt = match msg.buffer_id {
            Some(id) => {
                let mut retained = self.ctx.buffers().retrieve(id)?;
                retained.in_port = msg.in_port;
                Packet::from_retained(Arc::clone(&self.ctx), retained, true)
            }
            None => Packet::create(
                Arc::clone(&self.ctx),
                msg.in_port,
                PacketBuffer::from_slice(&msg.data),
                0,
                true,
            ),
        };
        tracing::debug!(sender = ?sender, actions = msg.actions.len(), "packet out");

        let last = msg.actions.len().saturating_sub(1);
        for (i, action) in msg.actions.iter().enumerate() {
            match *action {
                Action::Output { port: ofp::OFPP_TABLE, .. } if i == last => {
                    self.process_packet(pkt);
                    return Ok(());
                }
                Action::Output { port: ofp::OFPP_TABLE, .. } => {
                    let clone = pkt.clone_packet();
                    self.stats.record_clone();
                    self.process_packet(clone);
                }
                Action::Output { port, max_len } => {
                    self.output(&mut pkt, port, max_len, PacketInReason::Action, NO_COOKIE)
                }
                Action::Group(group) => {
                    tracing::debug!(group, "group action not supported, ignored");
                }
                _ => action.apply(&mut pkt),
            }
        }
        pkt.destroy();
        Ok(())
    }

    /// Expire timed-out flows and notify the controller
    pub fn timeout(&self) {
        let now = Timestamp::now();
        for table in &self.tables {
            for notice in table.expire(now) {
                self.channel.send(ControlReply::FlowRemoved(notice), None);
            }
        }
    }

    /// Release the tables
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        tracing::info!(datapath = self.ctx.id(), "pipeline destroyed");
    }
}
