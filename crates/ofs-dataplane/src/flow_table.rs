//! Flow Tables
//!
//! A [`FlowTable`] answers lookups on the packet path and applies
//! flow-mods from the control path. [`PriorityFlowTable`] keeps entries in
//! a vector ordered by descending priority behind a `parking_lot::RwLock`:
//! lookups share the read lock, modifications take the write lock.

use crate::action_set::Action;
use crate::headers::{PacketFields, ETH_TYPE_IPV4, IP_PROTO_TCP, IP_PROTO_UDP};
use crate::messages::{
    AggregateStats, FlowMod, FlowModCommand, FlowModFlags, FlowRemoved, FlowRemovedReason,
    FlowStats, FlowStatsRequest, TableFeatures, TableStats,
};
use crate::packet::Packet;
use ofs_common::ofp;
use ofs_common::{
    AtomicCounter, BadInstructionCode, BadMatchCode, FlowModFailedCode, OflError, OflResult,
    Timestamp,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Value/mask pair, the value is stored pre-masked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Masked {
    /// Pre-masked value
    pub value: u32,
    /// Bits that must match
    pub mask: u32,
}

impl Masked {
    /// Value/mask pair, `value` is masked on construction
    pub fn new(value: u32, mask: u32) -> Self {
        Self {
            value: value & mask,
            mask,
        }
    }

    /// Exact match
    pub fn exact(value: u32) -> Self {
        Self::new(value, u32::MAX)
    }

    #[inline(always)]
    fn matches(&self, v: u32) -> bool {
        v & self.mask == self.value
    }

    /// Every value `other` accepts, `self` accepts too
    fn covers(&self, other: &Masked) -> bool {
        other.mask & self.mask == self.mask && other.value & self.mask == self.value
    }

    fn intersects(&self, other: &Masked) -> bool {
        let common = self.mask & other.mask;
        self.value & common == other.value & common
    }
}

/// Flow match; `None` fields are wildcards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Match {
    /// Ingress port
    pub in_port: Option<u32>,
    /// Ethertype
    pub eth_type: Option<u16>,
    /// IP protocol, needs `eth_type` IPv4
    pub ip_proto: Option<u8>,
    pub ipv4_src: Option<Masked>,
    pub ipv4_dst: Option<Masked>,
    /// Transport source port
    pub tp_src: Option<u16>,
    /// Transport destination port
    pub tp_dst: Option<u16>,
    /// Logical tunnel id
    pub tunnel_id: Option<u64>,
}

fn exact_covers<T: PartialEq>(general: &Option<T>, specific: &Option<T>) -> bool {
    match (general, specific) {
        (None, _) => true,
        (Some(g), Some(s)) => g == s,
        (Some(_), None) => false,
    }
}

fn exact_intersects<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

impl Match {
    /// Match everything
    pub fn any() -> Self {
        Self::default()
    }

    /// Require an ingress port
    pub fn in_port(mut self, port: u32) -> Self {
        self.in_port = Some(port);
        self
    }

    /// Require an ethertype
    pub fn eth_type(mut self, eth_type: u16) -> Self {
        self.eth_type = Some(eth_type);
        self
    }

    /// Require an IP protocol
    pub fn ip_proto(mut self, proto: u8) -> Self {
        self.ip_proto = Some(proto);
        self
    }

    /// Require an IPv4 source prefix
    pub fn ipv4_src(mut self, addr: u32, mask: u32) -> Self {
        self.ipv4_src = Some(Masked::new(addr, mask));
        self
    }

    /// Require an IPv4 destination prefix
    pub fn ipv4_dst(mut self, addr: u32, mask: u32) -> Self {
        self.ipv4_dst = Some(Masked::new(addr, mask));
        self
    }

    /// Require a transport source port
    pub fn tp_src(mut self, port: u16) -> Self {
        self.tp_src = Some(port);
        self
    }

    /// Require a transport destination port
    pub fn tp_dst(mut self, port: u16) -> Self {
        self.tp_dst = Some(port);
        self
    }

    /// Require a tunnel id
    pub fn tunnel_id(mut self, id: u64) -> Self {
        self.tunnel_id = Some(id);
        self
    }

    /// Check field prerequisites and values
    pub fn validate(&self) -> OflResult<()> {
        let is_ipv4 = self.eth_type == Some(ETH_TYPE_IPV4);
        if (self.ip_proto.is_some() || self.ipv4_src.is_some() || self.ipv4_dst.is_some()) && !is_ipv4 {
            return Err(OflError::BadMatch(BadMatchCode::BadPrereq));
        }
        let is_l4 = matches!(self.ip_proto, Some(IP_PROTO_TCP) | Some(IP_PROTO_UDP));
        if (self.tp_src.is_some() || self.tp_dst.is_some()) && !is_l4 {
            return Err(OflError::BadMatch(BadMatchCode::BadPrereq));
        }
        if let Some(port) = self.in_port {
            let valid = (port != 0 && port <= ofp::OFPP_MAX)
                || port == ofp::OFPP_LOCAL
                || port == ofp::OFPP_CONTROLLER;
            if !valid {
                return Err(OflError::BadMatch(BadMatchCode::BadValue));
            }
        }
        Ok(())
    }

    /// Packet satisfies every constrained field
    pub fn matches(&self, fields: &PacketFields) -> bool {
        if self.in_port.map_or(false, |p| p != fields.in_port)
            || self.eth_type.map_or(false, |t| t != fields.eth_type)
            || self.tunnel_id.map_or(false, |t| t != fields.tunnel_id)
        {
            return false;
        }

        if self.ip_proto.is_some() || self.ipv4_src.is_some() || self.ipv4_dst.is_some() {
            let Some(ip) = fields.ipv4 else { return false };
            if self.ip_proto.map_or(false, |p| p != ip.proto)
                || self.ipv4_src.map_or(false, |m| !m.matches(ip.src))
                || self.ipv4_dst.map_or(false, |m| !m.matches(ip.dst))
            {
                return false;
            }
        }

        if self.tp_src.is_some() || self.tp_dst.is_some() {
            let Some(ports) = fields.l4 else { return false };
            if self.tp_src.map_or(false, |p| p != ports.src)
                || self.tp_dst.map_or(false, |p| p != ports.dst)
            {
                return false;
            }
        }
        true
    }

    /// `self` is at most as specific as `other`
    pub fn covers(&self, other: &Match) -> bool {
        let masked = |g: &Option<Masked>, s: &Option<Masked>| match (g, s) {
            (None, _) => true,
            (Some(g), Some(s)) => g.covers(s),
            (Some(_), None) => false,
        };
        exact_covers(&self.in_port, &other.in_port)
            && exact_covers(&self.eth_type, &other.eth_type)
            && exact_covers(&self.ip_proto, &other.ip_proto)
            && masked(&self.ipv4_src, &other.ipv4_src)
            && masked(&self.ipv4_dst, &other.ipv4_dst)
            && exact_covers(&self.tp_src, &other.tp_src)
            && exact_covers(&self.tp_dst, &other.tp_dst)
            && exact_covers(&self.tunnel_id, &other.tunnel_id)
    }

    /// Some packet could match both
    pub fn overlaps(&self, other: &Match) -> bool {
        let masked = |a: &Option<Masked>, b: &Option<Masked>| match (a, b) {
            (Some(a), Some(b)) => a.intersects(b),
            _ => true,
        };
        exact_intersects(&self.in_port, &other.in_port)
            && exact_intersects(&self.eth_type, &other.eth_type)
            && exact_intersects(&self.ip_proto, &other.ip_proto)
            && masked(&self.ipv4_src, &other.ipv4_src)
            && masked(&self.ipv4_dst, &other.ipv4_dst)
            && exact_intersects(&self.tp_src, &other.tp_src)
            && exact_intersects(&self.tp_dst, &other.tp_dst)
            && exact_intersects(&self.tunnel_id, &other.tunnel_id)
    }
}

/// Flow entry instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Continue in a later table
    GotoTable(u8),
    /// Merge into the action set
    WriteActions(Vec<Action>),
    /// Run immediately
    ApplyActions(Vec<Action>),
    /// Empty the action set
    ClearActions,
}

impl Instruction {
    /// Execution rank
    fn rank(&self) -> u8 {
        match self {
            Instruction::ApplyActions(_) => 0,
            Instruction::ClearActions => 1,
            Instruction::WriteActions(_) => 2,
            Instruction::GotoTable(_) => 3,
        }
    }

    fn actions(&self) -> &[Action] {
        match self {
            Instruction::WriteActions(a) | Instruction::ApplyActions(a) => a,
            _ => &[],
        }
    }
}

/// Check the instructions of a flow-mod for `table_id`
///
/// Each instruction may appear once, a goto must move strictly forward
/// inside the pipeline and every action must be valid.
pub fn validate_instructions(instructions: &[Instruction], table_id: u8, num_tables: usize) -> OflResult<()> {
    let mut seen = [false; 4];
    for inst in instructions {
        let rank = inst.rank() as usize;
        if seen[rank] {
            return Err(OflError::BadInstruction(BadInstructionCode::BadLen));
        }
        seen[rank] = true;

        if let Instruction::GotoTable(target) = *inst {
            if target <= table_id || target as usize >= num_tables {
                return Err(OflError::BadInstruction(BadInstructionCode::BadTableId));
            }
        }
        for action in inst.actions() {
            action.validate()?;
        }
    }
    Ok(())
}

/// An installed flow entry
#[derive(Debug)]
pub struct FlowEntry {
    /// Fields the entry matches
    pub match_fields: Match,
    /// Higher wins
    pub priority: u16,
    /// Controller-chosen opaque value
    pub cookie: u64,
    /// Seconds idle before removal, 0 for none
    pub idle_timeout: u16,
    /// Seconds before removal, 0 for none
    pub hard_timeout: u16,
    /// Flags the entry was added with
    pub flags: FlowModFlags,
    instructions: RwLock<Vec<Instruction>>,
    packet_count: AtomicU64,
    byte_count: AtomicU64,
    created: Timestamp,
    last_used: AtomicU64,
}

impl FlowEntry {
    /// Entry built from an add request
    pub fn from_flow_mod(msg: &FlowMod, now: Timestamp) -> Self {
        let mut instructions = msg.instructions.clone();
        instructions.sort_by_key(Instruction::rank);
        Self {
            match_fields: msg.match_fields.clone(),
            priority: msg.priority,
            cookie: msg.cookie,
            idle_timeout: msg.idle_timeout,
            hard_timeout: msg.hard_timeout,
            flags: msg.flags,
            instructions: RwLock::new(instructions),
            packet_count: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
            created: now,
            last_used: AtomicU64::new(now.as_nanos()),
        }
    }

    /// Priority 0 wildcard entry
    pub fn is_table_miss(&self) -> bool {
        self.priority == 0 && self.match_fields == Match::any()
    }

    /// Copy of the instructions in execution order
    pub fn instructions(&self) -> Vec<Instruction> {
        self.instructions.read().clone()
    }

    fn set_instructions(&self, mut instructions: Vec<Instruction>) {
        instructions.sort_by_key(Instruction::rank);
        *self.instructions.write() = instructions;
    }

    /// Packets matched
    pub fn packet_count(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    /// Bytes matched
    pub fn byte_count(&self) -> u64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn touch(&self, bytes: usize, now: Timestamp) {
        self.packet_count.fetch_add(1, Ordering::Relaxed);
        self.byte_count.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_used.store(now.as_nanos(), Ordering::Relaxed);
    }

    fn reset_counts(&self) {
        self.packet_count.store(0, Ordering::Relaxed);
        self.byte_count.store(0, Ordering::Relaxed);
    }

    fn copy_counts(&self, from: &FlowEntry) {
        self.packet_count.store(from.packet_count(), Ordering::Relaxed);
        self.byte_count.store(from.byte_count(), Ordering::Relaxed);
    }

    /// Some output action names `port`
    pub fn outputs_to(&self, port: u32) -> bool {
        self.instructions.read().iter().any(|inst| {
            inst.actions()
                .iter()
                .any(|a| matches!(*a, Action::Output { port: p, .. } if p == port))
        })
    }

    /// Some group action names `group`
    pub fn uses_group(&self, group: u32) -> bool {
        self.instructions.read().iter().any(|inst| {
            inst.actions()
                .iter()
                .any(|a| matches!(*a, Action::Group(g) if g == group))
        })
    }

    /// Timeout that has elapsed at `now`, hard before idle
    pub fn expiry(&self, now: Timestamp) -> Option<FlowRemovedReason> {
        if self.hard_timeout > 0 && now.nanos_since(self.created) >= self.hard_timeout as u64 * NANOS_PER_SEC {
            return Some(FlowRemovedReason::HardTimeout);
        }
        let last_used = Timestamp::from_nanos(self.last_used.load(Ordering::Relaxed));
        if self.idle_timeout > 0 && now.nanos_since(last_used) >= self.idle_timeout as u64 * NANOS_PER_SEC {
            return Some(FlowRemovedReason::IdleTimeout);
        }
        None
    }

    fn duration(&self, now: Timestamp) -> (u32, u32) {
        let nanos = now.nanos_since(self.created);
        ((nanos / NANOS_PER_SEC) as u32, (nanos % NANOS_PER_SEC) as u32)
    }

    /// Flow statistics as seen from table `table_id`
    pub fn stats(&self, table_id: u8, now: Timestamp) -> FlowStats {
        let (duration_sec, duration_nsec) = self.duration(now);
        FlowStats {
            table_id,
            duration_sec,
            duration_nsec,
            priority: self.priority,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            flags: self.flags,
            cookie: self.cookie,
            packet_count: self.packet_count(),
            byte_count: self.byte_count(),
            match_fields: self.match_fields.clone(),
            instructions: self.instructions(),
        }
    }

    /// Removal notice for this entry
    pub fn removed(&self, table_id: u8, reason: FlowRemovedReason, now: Timestamp) -> FlowRemoved {
        let (duration_sec, duration_nsec) = self.duration(now);
        FlowRemoved {
            cookie: self.cookie,
            priority: self.priority,
            reason,
            table_id,
            duration_sec,
            duration_nsec,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            packet_count: self.packet_count(),
            byte_count: self.byte_count(),
            match_fields: self.match_fields.clone(),
        }
    }
}

/// Effect of running an entry's instructions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionOutcome {
    /// Next table, `None` ends the walk
    pub goto: Option<u8>,
    /// Apply-actions to execute now
    pub immediate: Vec<Action>,
    /// Entry was the table-miss entry
    pub table_miss: bool,
    /// Cookie of the entry
    pub cookie: u64,
}

/// Flow table operations used by the pipeline
pub trait FlowTable: Send + Sync {
    /// Position in the pipeline
    fn table_id(&self) -> u8;

    /// Highest-priority entry matching `fields`; updates counters
    fn lookup(&self, fields: &PacketFields, len: usize) -> Option<Arc<FlowEntry>>;

    /// Run the entry's instructions against the packet's action set
    fn apply_instructions(&self, entry: &FlowEntry, pkt: &mut Packet) -> InstructionOutcome {
        let mut outcome = InstructionOutcome {
            table_miss: entry.is_table_miss(),
            cookie: entry.cookie,
            ..Default::default()
        };
        for inst in entry.instructions.read().iter() {
            match inst {
                Instruction::ApplyActions(actions) => outcome.immediate.extend_from_slice(actions),
                Instruction::ClearActions => pkt.action_set_mut().clear(),
                Instruction::WriteActions(actions) => pkt.action_set_mut().write(actions),
                Instruction::GotoTable(target) => outcome.goto = Some(*target),
            }
        }
        outcome
    }

    /// Apply a validated flow-mod; returns notices for deleted entries
    fn flow_mod(&self, msg: &FlowMod) -> OflResult<Vec<FlowRemoved>>;

    /// Replace the table configuration bits
    fn table_mod(&self, config: u32);

    /// Statistics of the entries `req` selects
    fn flow_stats(&self, req: &FlowStatsRequest, now: Timestamp) -> Vec<FlowStats>;

    /// Totals over the entries `req` selects
    fn aggregate_stats(&self, req: &FlowStatsRequest) -> AggregateStats;

    /// Lookup and match counters
    fn table_stats(&self) -> TableStats;

    /// Description of the table
    fn features(&self) -> TableFeatures;

    /// Remove timed-out entries; returns notices for those that asked for one
    fn expire(&self, now: Timestamp) -> Vec<FlowRemoved>;
}

fn cookie_matches(entry: &FlowEntry, cookie: u64, mask: u64) -> bool {
    entry.cookie & mask == cookie & mask
}

/// Priority-ordered flow table
pub struct PriorityFlowTable {
    table_id: u8,
    num_tables: usize,
    max_entries: usize,
    entries: RwLock<Vec<Arc<FlowEntry>>>,
    config: AtomicU32,
    lookup_count: AtomicCounter,
    matched_count: AtomicCounter,
}

impl PriorityFlowTable {
    /// Table `table_id` of a `num_tables` pipeline
    pub fn new(table_id: u8, num_tables: usize, max_entries: usize) -> Self {
        Self {
            table_id,
            num_tables,
            max_entries,
            entries: RwLock::new(Vec::new()),
            config: AtomicU32::new(0),
            lookup_count: AtomicCounter::new(0),
            matched_count: AtomicCounter::new(0),
        }
    }

    /// Installed entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// No entries installed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configuration bits
    pub fn config(&self) -> u32 {
        self.config.load(Ordering::Relaxed)
    }

    fn selects(entry: &FlowEntry, msg: &FlowMod) -> bool {
        let matched = if msg.command.is_strict() {
            entry.priority == msg.priority && entry.match_fields == msg.match_fields
        } else {
            msg.match_fields.covers(&entry.match_fields)
        };
        matched && cookie_matches(entry, msg.cookie, msg.cookie_mask)
    }

    fn stats_selects(entry: &FlowEntry, req: &FlowStatsRequest) -> bool {
        req.match_fields.covers(&entry.match_fields)
            && cookie_matches(entry, req.cookie, req.cookie_mask)
            && (req.out_port == ofp::OFPP_ANY || entry.outputs_to(req.out_port))
            && (req.out_group == ofp::OFPG_ANY || entry.uses_group(req.out_group))
    }

    fn add(&self, msg: &FlowMod) -> OflResult<()> {
        let mut entries = self.entries.write();

        if msg.flags.contains(FlowModFlags::CHECK_OVERLAP)
            && entries
                .iter()
                .any(|e| e.priority == msg.priority && e.match_fields.overlaps(&msg.match_fields))
        {
            return Err(OflError::FlowModFailed(FlowModFailedCode::Overlap));
        }

        let entry = Arc::new(FlowEntry::from_flow_mod(msg, Timestamp::now()));

        if let Some(pos) = entries
            .iter()
            .position(|e| e.priority == msg.priority && e.match_fields == msg.match_fields)
        {
            if !msg.flags.contains(FlowModFlags::RESET_COUNTS) {
                entry.copy_counts(&entries[pos]);
            }
            entries[pos] = entry;
            tracing::debug!(table = self.table_id, priority = msg.priority, "replaced flow entry");
            return Ok(());
        }

        if entries.len() >= self.max_entries {
            return Err(OflError::FlowModFailed(FlowModFailedCode::TableFull));
        }

        let pos = entries
            .iter()
            .position(|e| e.priority < msg.priority)
            .unwrap_or(entries.len());
        entries.insert(pos, entry);
        tracing::debug!(table = self.table_id, priority = msg.priority, "added flow entry");
        Ok(())
    }

    fn modify(&self, msg: &FlowMod) {
        let entries = self.entries.read();
        let mut modified = 0;
        for entry in entries.iter().filter(|e| Self::selects(e, msg)) {
            entry.set_instructions(msg.instructions.clone());
            if msg.flags.contains(FlowModFlags::RESET_COUNTS) {
                entry.reset_counts();
            }
            modified += 1;
        }
        tracing::debug!(table = self.table_id, modified, "modified flow entries");
    }

    fn delete(&self, msg: &FlowMod) -> Vec<FlowRemoved> {
        let now = Timestamp::now();
        let mut entries = self.entries.write();
        let mut removed = Vec::new();
        entries.retain(|e| {
            let selected = Self::selects(e, msg)
                && (msg.out_port == ofp::OFPP_ANY || e.outputs_to(msg.out_port))
                && (msg.out_group == ofp::OFPG_ANY || e.uses_group(msg.out_group));
            if selected && e.flags.contains(FlowModFlags::SEND_FLOW_REM) {
                removed.push(e.removed(self.table_id, FlowRemovedReason::Delete, now));
            }
            !selected
        });
        removed
    }
}

impl FlowTable for PriorityFlowTable {
    fn table_id(&self) -> u8 {
        self.table_id
    }

    fn lookup(&self, fields: &PacketFields, len: usize) -> Option<Arc<FlowEntry>> {
        self.lookup_count.inc();
        let entries = self.entries.read();
        let entry = entries.iter().find(|e| e.match_fields.matches(fields))?;
        entry.touch(len, Timestamp::now());
        self.matched_count.inc();
        Some(Arc::clone(entry))
    }

    fn flow_mod(&self, msg: &FlowMod) -> OflResult<Vec<FlowRemoved>> {
        match msg.command {
            FlowModCommand::Add => self.add(msg).map(|_| Vec::new()),
            FlowModCommand::Modify | FlowModCommand::ModifyStrict => {
                self.modify(msg);
                Ok(Vec::new())
            }
            FlowModCommand::Delete | FlowModCommand::DeleteStrict => Ok(self.delete(msg)),
        }
    }

    fn table_mod(&self, config: u32) {
        self.config.store(config, Ordering::Relaxed);
    }

    fn flow_stats(&self, req: &FlowStatsRequest, now: Timestamp) -> Vec<FlowStats> {
        self.entries
            .read()
            .iter()
            .filter(|e| Self::stats_selects(e, req))
            .map(|e| e.stats(self.table_id, now))
            .collect()
    }

    fn aggregate_stats(&self, req: &FlowStatsRequest) -> AggregateStats {
        self.entries
            .read()
            .iter()
            .filter(|e| Self::stats_selects(e, req))
            .fold(AggregateStats::default(), |mut acc, e| {
                acc.packet_count += e.packet_count();
                acc.byte_count += e.byte_count();
                acc.flow_count += 1;
                acc
            })
    }

    fn table_stats(&self) -> TableStats {
        TableStats {
            table_id: self.table_id,
            active_count: self.len() as u32,
            lookup_count: self.lookup_count.get(),
            matched_count: self.matched_count.get(),
        }
    }

    fn features(&self) -> TableFeatures {
        TableFeatures {
            table_id: self.table_id,
            name: format!("table_{}", self.table_id),
            config: self.config(),
            max_entries: self.max_entries as u32,
            next_tables: (self.table_id as usize + 1..self.num_tables)
                .map(|t| t as u8)
                .collect(),
        }
    }

    fn expire(&self, now: Timestamp) -> Vec<FlowRemoved> {
        let mut entries = self.entries.write();
        let before = entries.len();
        let mut notices = Vec::new();
        entries.retain(|e| match e.expiry(now) {
            Some(reason) => {
                if e.flags.contains(FlowModFlags::SEND_FLOW_REM) {
                    notices.push(e.removed(self.table_id, reason, now));
                }
                false
            }
            None => true,
        });
        let expired = before - entries.len();
        if expired > 0 {
            tracing::debug!(table = self.table_id, expired, "expired flow entries");
        }
        notices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::tests::ipv4_frame;

    fn tcp_fields(src: [u8; 4], dport: u16) -> PacketFields {
        PacketFields::parse(&ipv4_frame(src, [10, 0, 0, 2], IP_PROTO_TCP, 1000, dport), 1, 0)
    }

    fn output(port: u32) -> Vec<Instruction> {
        vec![Instruction::WriteActions(vec![Action::output(port)])]
    }

    fn ipv4() -> Match {
        Match::any().eth_type(ETH_TYPE_IPV4)
    }

    #[test]
    fn test_match_fields() {
        let fields = tcp_fields([192, 168, 1, 7], 443);

        assert!(Match::any().matches(&fields));
        assert!(Match::any().in_port(1).matches(&fields));
        assert!(!Match::any().in_port(2).matches(&fields));
        assert!(ipv4().ipv4_src(0xC0A80100, 0xFFFFFF00).matches(&fields));
        assert!(!ipv4().ipv4_src(0xC0A80200, 0xFFFFFF00).matches(&fields));
        assert!(ipv4().ip_proto(IP_PROTO_TCP).tp_dst(443).matches(&fields));
        assert!(!ipv4().ip_proto(IP_PROTO_UDP).matches(&fields));
    }

    #[test]
    fn test_match_prerequisites() {
        assert!(ipv4().ip_proto(IP_PROTO_TCP).tp_dst(80).validate().is_ok());
        assert_eq!(
            Match::any().ip_proto(IP_PROTO_TCP).validate(),
            Err(OflError::BadMatch(BadMatchCode::BadPrereq))
        );
        assert_eq!(
            ipv4().tp_dst(80).validate(),
            Err(OflError::BadMatch(BadMatchCode::BadPrereq))
        );
        assert_eq!(
            Match::any().in_port(0).validate(),
            Err(OflError::BadMatch(BadMatchCode::BadValue))
        );
    }

    #[test]
    fn test_covers_and_overlaps() {
        let wide = ipv4().ipv4_src(0x0A000000, 0xFF000000);
        let narrow = ipv4().ipv4_src(0x0A010000, 0xFFFF0000).tp_dst(80);
        assert!(wide.covers(&narrow));
        assert!(!narrow.covers(&wide));
        assert!(Match::any().covers(&narrow));
        assert!(wide.overlaps(&narrow));
        assert!(!ipv4().ipv4_src(0x0B000000, 0xFF000000).overlaps(&narrow));
    }

    #[test]
    fn test_validate_instructions() {
        assert!(validate_instructions(&[Instruction::GotoTable(2)], 1, 4).is_ok());
        assert_eq!(
            validate_instructions(&[Instruction::GotoTable(1)], 1, 4),
            Err(OflError::BadInstruction(BadInstructionCode::BadTableId))
        );
        assert_eq!(
            validate_instructions(&[Instruction::GotoTable(4)], 1, 4),
            Err(OflError::BadInstruction(BadInstructionCode::BadTableId))
        );
        assert_eq!(
            validate_instructions(&[Instruction::ClearActions, Instruction::ClearActions], 0, 4),
            Err(OflError::BadInstruction(BadInstructionCode::BadLen))
        );
        assert!(validate_instructions(&output(0), 0, 4).is_err());
    }

    #[test]
    fn test_priority_order_and_counters() {
        let table = PriorityFlowTable::new(0, 4, 16);
        table.flow_mod(&FlowMod::add(0, 0, Match::any(), output(9))).unwrap();
        table.flow_mod(&FlowMod::add(0, 100, ipv4().ip_proto(IP_PROTO_TCP), output(2))).unwrap();
        table.flow_mod(&FlowMod::add(0, 10, ipv4(), output(1))).unwrap();

        let entry = table.lookup(&tcp_fields([1, 1, 1, 1], 80), 54).unwrap();
        assert_eq!(entry.priority, 100);
        assert_eq!(entry.packet_count(), 1);
        assert_eq!(entry.byte_count(), 54);

        let mut arp = vec![0u8; 60];
        arp[12] = 0x08;
        arp[13] = 0x06;
        let entry = table.lookup(&PacketFields::parse(&arp, 1, 0), 60).unwrap();
        assert!(entry.is_table_miss());

        let stats = table.table_stats();
        assert_eq!((stats.active_count, stats.lookup_count, stats.matched_count), (3, 2, 2));
    }

    #[test]
    fn test_miss_counts_lookup_only() {
        let table = PriorityFlowTable::new(0, 4, 16);
        assert!(table.lookup(&tcp_fields([1, 1, 1, 1], 80), 54).is_none());
        assert_eq!(table.table_stats().lookup_count, 1);
        assert_eq!(table.table_stats().matched_count, 0);
    }

    #[test]
    fn test_add_replaces_identical_entry() {
        let table = PriorityFlowTable::new(0, 4, 16);
        table.flow_mod(&FlowMod::add(0, 5, ipv4(), output(1))).unwrap();
        table.lookup(&tcp_fields([1, 1, 1, 1], 80), 54);
        table.flow_mod(&FlowMod::add(0, 5, ipv4(), output(2))).unwrap();

        assert_eq!(table.len(), 1);
        let entry = table.lookup(&tcp_fields([1, 1, 1, 1], 80), 54).unwrap();
        assert!(entry.outputs_to(2));
        assert_eq!(entry.packet_count(), 2);

        let mut msg = FlowMod::add(0, 5, ipv4(), output(3));
        msg.flags = FlowModFlags::RESET_COUNTS;
        table.flow_mod(&msg).unwrap();
        let stats = table.flow_stats(&FlowStatsRequest::all(), Timestamp::now());
        assert_eq!(stats[0].packet_count, 0);
    }

    #[test]
    fn test_overlap_and_capacity() {
        let table = PriorityFlowTable::new(0, 4, 2);
        table.flow_mod(&FlowMod::add(0, 5, ipv4().ipv4_src(0x0A000000, 0xFF000000), output(1))).unwrap();

        let mut msg = FlowMod::add(0, 5, ipv4().ip_proto(IP_PROTO_TCP), output(2));
        msg.flags = FlowModFlags::CHECK_OVERLAP;
        assert_eq!(table.flow_mod(&msg), Err(OflError::FlowModFailed(FlowModFailedCode::Overlap)));

        // An identical match overlaps too and must not replace the entry
        let mut msg = FlowMod::add(0, 5, ipv4().ipv4_src(0x0A000000, 0xFF000000), output(4));
        msg.flags = FlowModFlags::CHECK_OVERLAP;
        assert_eq!(table.flow_mod(&msg), Err(OflError::FlowModFailed(FlowModFailedCode::Overlap)));
        assert_eq!(table.len(), 1);
        assert!(table.lookup(&tcp_fields([10, 1, 1, 1], 80), 54).unwrap().outputs_to(1));

        table.flow_mod(&FlowMod::add(0, 6, ipv4(), output(2))).unwrap();
        assert_eq!(
            table.flow_mod(&FlowMod::add(0, 7, ipv4(), output(3))),
            Err(OflError::FlowModFailed(FlowModFailedCode::TableFull))
        );
    }

    #[test]
    fn test_modify_strict_and_loose() {
        let table = PriorityFlowTable::new(0, 4, 16);
        table.flow_mod(&FlowMod::add(0, 5, ipv4().ip_proto(IP_PROTO_TCP), output(1))).unwrap();
        table.flow_mod(&FlowMod::add(0, 6, ipv4().ip_proto(IP_PROTO_UDP), output(1))).unwrap();

        let mut strict = FlowMod::add(0, 5, ipv4().ip_proto(IP_PROTO_TCP), output(7));
        strict.command = FlowModCommand::ModifyStrict;
        table.flow_mod(&strict).unwrap();
        let req = FlowStatsRequest { out_port: 7, ..FlowStatsRequest::all() };
        assert_eq!(table.flow_stats(&req, Timestamp::now()).len(), 1);

        let mut loose = FlowMod::add(0, 0, ipv4(), output(8));
        loose.command = FlowModCommand::Modify;
        table.flow_mod(&loose).unwrap();
        let req = FlowStatsRequest { out_port: 8, ..FlowStatsRequest::all() };
        assert_eq!(table.flow_stats(&req, Timestamp::now()).len(), 2);
    }

    #[test]
    fn test_delete_with_filters_and_notices() {
        let table = PriorityFlowTable::new(0, 4, 16);
        let mut a = FlowMod::add(0, 5, ipv4().ip_proto(IP_PROTO_TCP), output(1));
        a.flags = FlowModFlags::SEND_FLOW_REM;
        a.cookie = 0xAA;
        table.flow_mod(&a).unwrap();
        table.flow_mod(&FlowMod::add(0, 6, ipv4().ip_proto(IP_PROTO_UDP), output(2))).unwrap();

        let mut del = FlowMod::delete(0, Match::any());
        del.out_port = 3;
        assert!(table.flow_mod(&del).unwrap().is_empty());
        assert_eq!(table.len(), 2);

        let mut del = FlowMod::delete(0, Match::any());
        del.out_port = 1;
        let notices = table.flow_mod(&del).unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].reason, FlowRemovedReason::Delete);
        assert_eq!(notices[0].cookie, 0xAA);
        assert_eq!(table.len(), 1);

        // No notice without SEND_FLOW_REM
        assert!(table.flow_mod(&FlowMod::delete(0, Match::any())).unwrap().is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_aggregate_stats() {
        let table = PriorityFlowTable::new(0, 4, 16);
        table.flow_mod(&FlowMod::add(0, 5, ipv4().ip_proto(IP_PROTO_TCP), output(1))).unwrap();
        table.flow_mod(&FlowMod::add(0, 1, Match::any(), output(2))).unwrap();
        table.lookup(&tcp_fields([1, 1, 1, 1], 80), 54);
        table.lookup(&tcp_fields([1, 1, 1, 1], 80), 54);

        let agg = table.aggregate_stats(&FlowStatsRequest::all());
        assert_eq!(agg, AggregateStats { packet_count: 2, byte_count: 108, flow_count: 2 });
    }

    #[test]
    fn test_expiry() {
        let table = PriorityFlowTable::new(0, 4, 16);
        let mut hard = FlowMod::add(0, 5, ipv4(), output(1));
        hard.hard_timeout = 2;
        hard.flags = FlowModFlags::SEND_FLOW_REM;
        table.flow_mod(&hard).unwrap();
        let mut idle = FlowMod::add(0, 6, ipv4().ip_proto(IP_PROTO_TCP), output(1));
        idle.idle_timeout = 1;
        table.flow_mod(&idle).unwrap();
        table.flow_mod(&FlowMod::add(0, 0, Match::any(), output(1))).unwrap();

        let now = Timestamp::now();
        assert!(table.expire(now).is_empty());
        assert_eq!(table.len(), 3);

        // Idle entry goes silently
        assert!(table.expire(now.add_millis(1_500)).is_empty());
        assert_eq!(table.len(), 2);

        let notices = table.expire(now.add_millis(2_500));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].reason, FlowRemovedReason::HardTimeout);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_features_list_forward_tables() {
        let table = PriorityFlowTable::new(1, 4, 16);
        let features = table.features();
        assert_eq!(features.next_tables, vec![2, 3]);
        assert_eq!(features.name, "table_1");
        table.table_mod(3);
        assert_eq!(table.features().config, 3);
    }
}
