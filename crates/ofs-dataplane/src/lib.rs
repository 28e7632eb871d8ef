//! OpenFlow Switch Dataplane
//!
//! Forwarding core of a multi-table OpenFlow 1.3 software switch.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            PIPELINE                                 │
//! │                                                                     │
//! │  ingress ──▶ ┌──────────────┐   top-level packets only              │
//! │  packet-out  │ elephant     │◀──────────────────────┐               │
//! │              │ sketch (K=10)│                       │               │
//! │              └──────────────┘                       │               │
//! │                                                     │               │
//! │   ┌─────────┐ goto ┌─────────┐ goto      ┌─────────┴─┐             │
//! │   │ table 0 │─────▶│ table 1 │── ... ───▶│ table N-1 │             │
//! │   └────┬────┘      └────┬────┘           └─────┬─────┘             │
//! │        │ miss           │                      │ no goto           │
//! │        ▼                ▼                      ▼                   │
//! │      drop         apply-actions          action set                │
//! │                   (clones out)     ┌─────────┼──────────┐          │
//! │                                    ▼         ▼          ▼          │
//! │                                  port   controller    drop         │
//! │                                          │                         │
//! │                                          ▼                         │
//! │                               ┌────────────────────┐               │
//! │                               │ buffer pool (256)  │◀── packet-out │
//! │                               │ retained packets   │◀── flow-mod   │
//! │                               └────────────────────┘               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Packet lifetime
//!
//! A [`Packet`] is destroyed at the end of every processing path. If it was
//! parked in the [`BufferPool`] for the controller and the retention window
//! is still open, its data stays with the pool until a packet-out or
//! flow-mod claims it.

#![warn(missing_docs)]

pub mod action_set;
pub mod buffer;
pub mod config;
pub mod control;
pub mod datapath;
pub mod flow_table;
pub mod headers;
pub mod messages;
pub mod packet;
pub mod pipeline;
pub mod scheduler;
pub mod sketch;
pub mod stats;

pub use action_set::{Action, ActionSet, OutputDecision, SetField};
pub use buffer::{BufferId, BufferPool, PacketBuffer, PacketBufferPool, Retention};
pub use config::{ConfigError, DatapathConfig};
pub use control::{ChannelSink, ControlChannel, EgressQueue, PortOutput, SenderId};
pub use datapath::{DatapathContext, PacketObserver, TracingObserver};
pub use flow_table::{FlowEntry, FlowTable, Instruction, Match, PriorityFlowTable};
pub use packet::{Disposition, Packet, Provenance};
pub use pipeline::{DropReason, Outcome, Pipeline, PipelineState, ProcessReport, TableIndex};
pub use scheduler::spawn_timeout_sweep;
pub use sketch::{ElephantCandidate, ElephantSketch, RecordOutcome, SketchSnapshot};
pub use stats::{PipelineStats, PipelineStatsSnapshot};

/// Maximum number of flow tables in a pipeline
pub const PIPELINE_NUM_TABLES: usize = 64;

// Table ids must stay below OFPTT_ALL
const _: () = assert!(PIPELINE_NUM_TABLES >= 1 && PIPELINE_NUM_TABLES <= ofs_common::ofp::OFPTT_MAX as usize + 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(PIPELINE_NUM_TABLES, 64);
        assert_eq!(buffer::BUFFER_POOL_SIZE, 256);
        assert_eq!(sketch::SKETCH_CAPACITY, 10);
    }
}
