//! Control-plane messages
//!
//! Decoded forms of the requests the pipeline handles and the replies and
//! asynchronous notifications it emits. Encoding to and from the wire is the
//! control channel's business.

use crate::action_set::Action;
use crate::buffer::BufferId;
use crate::flow_table::{Instruction, Match};
use ofs_common::ofp;
use serde::Serialize;

/// Experimenter id carried by elephant sketch replies
pub const SKETCH_EXPERIMENTER_ID: u32 = 0x00ff_e1ef;

/// Experimenter message type of a sketch dump
pub const SKETCH_DATA_TYPE: u32 = 1;

/// Flow-mod command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowModCommand {
    /// Add an entry, replacing an identical one
    Add,
    /// Change the instructions of every covered entry
    Modify,
    /// Change the instructions of the identical entry
    ModifyStrict,
    /// Remove every covered entry
    Delete,
    /// Remove the identical entry
    DeleteStrict,
}

impl FlowModCommand {
    /// Removes entries
    pub fn is_delete(&self) -> bool {
        matches!(self, FlowModCommand::Delete | FlowModCommand::DeleteStrict)
    }

    /// Requires an identical match and priority
    pub fn is_strict(&self) -> bool {
        matches!(self, FlowModCommand::ModifyStrict | FlowModCommand::DeleteStrict)
    }
}

bitflags::bitflags! {
    /// Flow-mod flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct FlowModFlags: u16 {
        /// Notify the controller when the entry goes away
        const SEND_FLOW_REM = 0x0001;
        /// Refuse to add an entry that overlaps another of equal priority
        const CHECK_OVERLAP = 0x0002;
        /// Zero the counters of a replaced entry
        const RESET_COUNTS = 0x0004;
    }
}

/// Add, change or remove flow entries
#[derive(Debug, Clone)]
pub struct FlowMod {
    /// Opaque controller value
    pub cookie: u64,
    /// Restricts modify/delete to matching cookies
    pub cookie_mask: u64,
    /// Target table or `OFPTT_ALL` for deletes
    pub table_id: u8,
    /// What to do
    pub command: FlowModCommand,
    /// Seconds, 0 for none
    pub idle_timeout: u16,
    /// Seconds, 0 for none
    pub hard_timeout: u16,
    /// Entry priority
    pub priority: u16,
    /// Buffered packet to run through the pipeline once applied
    pub buffer_id: Option<BufferId>,
    /// Delete filter
    pub out_port: u32,
    /// Delete filter
    pub out_group: u32,
    /// Entry flags
    pub flags: FlowModFlags,
    /// Fields to match
    pub match_fields: Match,
    /// Instructions of the new or changed entries
    pub instructions: Vec<Instruction>,
}

impl FlowMod {
    /// Add request with neutral defaults
    pub fn add(table_id: u8, priority: u16, match_fields: Match, instructions: Vec<Instruction>) -> Self {
        Self {
            cookie: 0,
            cookie_mask: 0,
            table_id,
            command: FlowModCommand::Add,
            idle_timeout: 0,
            hard_timeout: 0,
            priority,
            buffer_id: None,
            out_port: ofp::OFPP_ANY,
            out_group: ofp::OFPG_ANY,
            flags: FlowModFlags::empty(),
            match_fields,
            instructions,
        }
    }

    /// Non-strict delete of everything `match_fields` covers
    pub fn delete(table_id: u8, match_fields: Match) -> Self {
        Self {
            command: FlowModCommand::Delete,
            ..Self::add(table_id, 0, match_fields, Vec::new())
        }
    }
}

/// Table configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMod {
    /// Table id or `OFPTT_ALL`
    pub table_id: u8,
    /// New configuration bits
    pub config: u32,
}

/// Selects flow entries for flow and aggregate statistics
#[derive(Debug, Clone)]
pub struct FlowStatsRequest {
    /// Table id or `OFPTT_ALL`
    pub table_id: u8,
    /// Only entries outputting to this port
    pub out_port: u32,
    /// Only entries outputting to this group
    pub out_group: u32,
    /// Cookie to match under `cookie_mask`
    pub cookie: u64,
    /// Cookie bits that must match
    pub cookie_mask: u64,
    /// Entries this match covers
    pub match_fields: Match,
}

impl FlowStatsRequest {
    /// Every entry of every table
    pub fn all() -> Self {
        Self {
            table_id: ofp::OFPTT_ALL,
            out_port: ofp::OFPP_ANY,
            out_group: ofp::OFPG_ANY,
            cookie: 0,
            cookie_mask: 0,
            match_fields: Match::any(),
        }
    }
}

/// Statistics of one flow entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStats {
    /// Table holding the entry
    pub table_id: u8,
    /// Seconds since installation
    pub duration_sec: u32,
    /// Nanoseconds beyond `duration_sec`
    pub duration_nsec: u32,
    /// Entry priority
    pub priority: u16,
    /// Idle timeout in seconds
    pub idle_timeout: u16,
    /// Hard timeout in seconds
    pub hard_timeout: u16,
    /// Entry flags
    pub flags: FlowModFlags,
    /// Entry cookie
    pub cookie: u64,
    /// Packets matched
    pub packet_count: u64,
    /// Bytes matched
    pub byte_count: u64,
    /// Entry match
    pub match_fields: Match,
    /// Entry instructions
    pub instructions: Vec<Instruction>,
}

/// Totals over the selected flow entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    /// Packets matched
    pub packet_count: u64,
    /// Bytes matched
    pub byte_count: u64,
    /// Entries counted
    pub flow_count: u32,
}

impl AggregateStats {
    pub(crate) fn merge(&mut self, other: AggregateStats) {
        self.packet_count += other.packet_count;
        self.byte_count += other.byte_count;
        self.flow_count += other.flow_count;
    }
}

/// Per-table counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableStats {
    /// Table id
    pub table_id: u8,
    /// Installed entries
    pub active_count: u32,
    /// Packets looked up
    pub lookup_count: u64,
    /// Packets that hit an entry
    pub matched_count: u64,
}

/// Table description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableFeatures {
    /// Table id
    pub table_id: u8,
    /// Human-readable name
    pub name: String,
    /// Configuration bits
    pub config: u32,
    /// Entry capacity
    pub max_entries: u32,
    /// Tables a goto-table instruction may name
    pub next_tables: Vec<u8>,
}

/// Table-features multipart request
#[derive(Debug, Clone, Default)]
pub struct TableFeaturesRequest {
    /// Requested configuration; a non-empty body asks to reconfigure
    pub body: Vec<TableFeatures>,
}

/// Why a packet went to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketInReason {
    /// Table-miss flow entry
    NoMatch = 0,
    /// Explicit output to the controller
    Action = 1,
    /// TTL would expire
    InvalidTtl = 2,
}

/// Packet handed to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    /// Where the full packet is parked, if it is
    pub buffer_id: Option<BufferId>,
    /// Length of the full packet
    pub total_len: u16,
    /// Why it was sent
    pub reason: PacketInReason,
    /// Table that sent it
    pub table_id: u8,
    /// Cookie of the entry that sent it, all ones when none did
    pub cookie: u64,
    /// Ingress port
    pub in_port: u32,
    /// Logical tunnel id
    pub tunnel_id: u64,
    /// Possibly truncated packet data
    pub data: Vec<u8>,
}

/// Why a flow entry went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowRemovedReason {
    /// Unused for `idle_timeout` seconds
    IdleTimeout = 0,
    /// Lived for `hard_timeout` seconds
    HardTimeout = 1,
    /// Removed by a delete flow-mod
    Delete = 2,
}

/// Flow entry removal notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRemoved {
    /// Entry cookie
    pub cookie: u64,
    /// Entry priority
    pub priority: u16,
    /// Why it went away
    pub reason: FlowRemovedReason,
    /// Table that held it
    pub table_id: u8,
    /// Seconds it was installed
    pub duration_sec: u32,
    /// Nanoseconds beyond `duration_sec`
    pub duration_nsec: u32,
    /// Idle timeout in seconds
    pub idle_timeout: u16,
    /// Hard timeout in seconds
    pub hard_timeout: u16,
    /// Packets matched
    pub packet_count: u64,
    /// Bytes matched
    pub byte_count: u64,
    /// Entry match
    pub match_fields: Match,
}

/// Packet injected by the controller
#[derive(Debug, Clone)]
pub struct PacketOut {
    /// Parked packet to send, `None` when `data` carries it
    pub buffer_id: Option<BufferId>,
    /// Port the packet is treated as received on
    pub in_port: u32,
    /// Actions to run
    pub actions: Vec<Action>,
    /// Inline packet data
    pub data: Vec<u8>,
}

/// Experimenter reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimenterReply {
    /// Experimenter id
    pub experimenter: u32,
    /// Experimenter message type
    pub exp_type: u32,
    /// Payload
    pub data: Vec<u8>,
}

/// Anything the pipeline sends towards the controller
#[derive(Debug, Clone)]
pub enum ControlReply {
    /// Packet sent to the controller
    PacketIn(PacketIn),
    /// Flow entry removed
    FlowRemoved(FlowRemoved),
    /// Flow statistics reply
    FlowStats(Vec<FlowStats>),
    /// Aggregate statistics reply
    AggregateStats(AggregateStats),
    /// Table statistics reply
    TableStats(Vec<TableStats>),
    /// Table features reply
    TableFeatures(Vec<TableFeatures>),
    /// Experimenter reply
    Experimenter(ExperimenterReply),
}

impl ControlReply {
    /// Short message name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ControlReply::PacketIn(_) => "packet_in",
            ControlReply::FlowRemoved(_) => "flow_removed",
            ControlReply::FlowStats(_) => "flow_stats",
            ControlReply::AggregateStats(_) => "aggregate_stats",
            ControlReply::TableStats(_) => "table_stats",
            ControlReply::TableFeatures(_) => "table_features",
            ControlReply::Experimenter(_) => "experimenter",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_classes() {
        assert!(FlowModCommand::Delete.is_delete());
        assert!(FlowModCommand::DeleteStrict.is_strict());
        assert!(!FlowModCommand::Modify.is_strict());
        assert!(!FlowModCommand::Add.is_delete());
    }

    #[test]
    fn test_delete_builder() {
        let msg = FlowMod::delete(ofp::OFPTT_ALL, Match::any());
        assert_eq!(msg.command, FlowModCommand::Delete);
        assert_eq!(msg.out_port, ofp::OFPP_ANY);
        assert!(msg.instructions.is_empty());
    }

    #[test]
    fn test_aggregate_merge() {
        let mut total = AggregateStats::default();
        total.merge(AggregateStats { packet_count: 2, byte_count: 120, flow_count: 1 });
        total.merge(AggregateStats { packet_count: 3, byte_count: 180, flow_count: 2 });
        assert_eq!(total, AggregateStats { packet_count: 5, byte_count: 300, flow_count: 3 });
    }
}
