//! Packet Pipeline Benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ofs_dataplane::headers::{PacketFields, ETH_TYPE_IPV4};
use ofs_dataplane::messages::{ControlReply, FlowMod};
use ofs_dataplane::{
    Action, ControlChannel, DatapathConfig, DatapathContext, Instruction, Match, Packet, PacketBuffer,
    Pipeline, PortOutput, SenderId,
};
use std::sync::Arc;

struct Discard;

impl ControlChannel for Discard {
    fn send(&self, reply: ControlReply, _to: Option<&SenderId>) {
        black_box(reply);
    }
}

impl PortOutput for Discard {
    fn output(&self, pkt: &Packet, port: u32, queue: u32) {
        black_box((pkt.len(), port, queue));
    }
}

fn tcp_frame(src_port: u16) -> Vec<u8> {
    let mut packet = vec![
        // Ethernet (14 bytes)
        0x00, 0x00, 0x00, 0x00, 0x00, 0x02, // dst mac
        0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // src mac
        0x08, 0x00, // IPv4
        // IPv4 (20 bytes)
        0x45, 0x00, 0x00, 0x28, // ver, ihl, tos, len
        0x00, 0x00, 0x40, 0x00, // id, flags, frag
        0x40, 0x06, 0x00, 0x00, // ttl, proto (TCP), checksum
        0xC0, 0xA8, 0x01, 0x01, // src ip: 192.168.1.1
        0x0A, 0x00, 0x00, 0x01, // dst ip: 10.0.0.1
        // TCP (20 bytes)
        0x00, 0x00, 0x01, 0xBB, // src port, dst port: 443
        0x00, 0x00, 0x00, 0x00, // seq
        0x00, 0x00, 0x00, 0x00, // ack
        0x50, 0x02, 0x00, 0x00, // offset, flags
        0x00, 0x00, 0x00, 0x00, // checksum, urgent
    ];
    packet[34..36].copy_from_slice(&src_port.to_be_bytes());
    packet
}

fn pipeline(num_tables: u8) -> Pipeline {
    let ctx = DatapathContext::new(DatapathConfig {
        num_tables,
        ..Default::default()
    });
    let sink = Arc::new(Discard);
    let pipeline = Pipeline::new(ctx, sink.clone(), sink);

    // Chain every table to the next, last one forwards
    let last = num_tables - 1;
    for table in 0..last {
        let msg = FlowMod::add(table, 1, Match::any(), vec![Instruction::GotoTable(table + 1)]);
        let _ = pipeline.handle_flow_mod(&msg, None);
    }
    let msg = FlowMod::add(
        last,
        10,
        Match::any().eth_type(ETH_TYPE_IPV4),
        vec![Instruction::WriteActions(vec![Action::DecNwTtl, Action::output(2)])],
    );
    let _ = pipeline.handle_flow_mod(&msg, None);
    pipeline
}

fn bench_parse(c: &mut Criterion) {
    let frame = tcp_frame(12345);

    c.bench_function("parse_packet_fields", |b| {
        b.iter(|| black_box(PacketFields::parse(black_box(&frame), 1, 0)))
    });
}

fn bench_single_table(c: &mut Criterion) {
    let pipeline = pipeline(1);
    let frame = tcp_frame(12345);

    c.bench_function("process_packet_1_table", |b| {
        b.iter(|| {
            let pkt = Packet::create(
                Arc::clone(pipeline.context()),
                1,
                PacketBuffer::from_slice(&frame),
                0,
                false,
            );
            black_box(pipeline.process_packet(pkt))
        })
    });
}

fn bench_pipeline_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_throughput");
    let pipeline = pipeline(8);
    let frames: Vec<_> = (0..64u16).map(|i| tcp_frame(10_000 + i)).collect();

    group.throughput(Throughput::Elements(frames.len() as u64));
    group.bench_function("64_packets_8_tables", |b| {
        b.iter(|| {
            for frame in &frames {
                let pkt = Packet::create(
                    Arc::clone(pipeline.context()),
                    1,
                    PacketBuffer::from_slice(frame),
                    0,
                    false,
                );
                black_box(pipeline.process_packet(pkt));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_single_table, bench_pipeline_throughput);
criterion_main!(benches);
