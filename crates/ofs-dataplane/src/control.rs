//! Control channel and egress seams
//!
//! The pipeline never talks to sockets or NICs. Replies go through a
//! [`ControlChannel`], forwarded packets through a [`PortOutput`]. The
//! crossbeam-backed implementations here are enough to embed the pipeline in
//! a process that drains them on its own threads.

use crate::messages::ControlReply;
use crate::packet::Packet;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::fmt;

/// Origin of a request, replies are addressed to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId {
    /// Controller connection
    pub conn_id: u32,
    /// Transaction id of the request
    pub xid: u32,
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn={} xid={}", self.conn_id, self.xid)
    }
}

/// Delivery of replies and asynchronous messages
pub trait ControlChannel: Send + Sync {
    /// `None` broadcasts to every controller
    fn send(&self, reply: ControlReply, to: Option<&SenderId>);
}

/// Delivery of forwarded packets
pub trait PortOutput: Send + Sync {
    /// Send `pkt` out of `port` on `queue`
    fn output(&self, pkt: &Packet, port: u32, queue: u32);
}

/// A reply queued for the controller
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Connection to answer, `None` for every controller
    pub to: Option<SenderId>,
    /// Message to deliver
    pub reply: ControlReply,
}

/// [`ControlChannel`] over a crossbeam channel
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<Outbound>,
}

impl ChannelSink {
    /// Unbounded sink and its receiving end
    pub fn unbounded() -> (Self, Receiver<Outbound>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }

    /// Sink dropping replies once `capacity` are pending
    pub fn bounded(capacity: usize) -> (Self, Receiver<Outbound>) {
        let (tx, rx) = channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl ControlChannel for ChannelSink {
    fn send(&self, reply: ControlReply, to: Option<&SenderId>) {
        let kind = reply.kind();
        match self.tx.try_send(Outbound { to: to.copied(), reply }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("control channel full, dropping {}", kind);
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("control channel closed, dropping {}", kind);
            }
        }
    }
}

/// A packet leaving the switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Egress {
    /// Egress port
    pub port: u32,
    /// Queue on the port
    pub queue: u32,
    /// Packet data as sent
    pub data: Vec<u8>,
}

/// [`PortOutput`] over a crossbeam channel
#[derive(Clone)]
pub struct EgressQueue {
    tx: Sender<Egress>,
}

impl EgressQueue {
    /// Unbounded queue and its receiving end
    pub fn unbounded() -> (Self, Receiver<Egress>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }
}

impl PortOutput for EgressQueue {
    fn output(&self, pkt: &Packet, port: u32, queue: u32) {
        let egress = Egress {
            port,
            queue,
            data: pkt.buffer().to_vec(),
        };
        if self.tx.try_send(egress).is_err() {
            tracing::debug!("egress queue closed, dropping packet for port {}", port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AggregateStats, ControlReply};

    #[test]
    fn test_sink_delivers_with_address() {
        let (sink, rx) = ChannelSink::unbounded();
        let sender = SenderId { conn_id: 1, xid: 42 };
        sink.send(ControlReply::AggregateStats(AggregateStats::default()), Some(&sender));
        sink.send(ControlReply::TableStats(Vec::new()), None);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.to, Some(sender));
        assert!(matches!(first.reply, ControlReply::AggregateStats(_)));
        assert_eq!(rx.try_recv().unwrap().to, None);
    }

    #[test]
    fn test_full_sink_drops() {
        let (sink, rx) = ChannelSink::bounded(1);
        sink.send(ControlReply::TableStats(Vec::new()), None);
        sink.send(ControlReply::TableStats(Vec::new()), None);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_closed_sink_is_silent() {
        let (sink, rx) = ChannelSink::unbounded();
        drop(rx);
        sink.send(ControlReply::TableStats(Vec::new()), None);
    }
}
