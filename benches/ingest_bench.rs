//! Performance benchmarks for the dralkit codec and tag store.
//!
//! Run with: `cargo bench`
//! Or for specific bench: `cargo bench --bench ingest_bench`

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use dralkit::codec::{DralDecoder, DralEncoder, WireVersion};
use dralkit::event::EventLog;
use dralkit::io::ByteSink;
use dralkit::item_heap::ItemTagHeap;
use dralkit::types::TagValueType;
use dralkit::{DbConfig, DralDb, DralEvent, TagValue};

// ============================================================================
// Trace Generation
// ============================================================================

/// A pipeline-shaped trace: every item gets three tags, enters a node and
/// crosses an edge.
fn synthetic_trace(items: u32) -> Vec<DralEvent> {
    let mut events = vec![
        DralEvent::NewNode {
            id: 1,
            name: "fetch".into(),
            parent_id: 0,
            instance: 0,
        },
        DralEvent::NewNode {
            id: 2,
            name: "decode".into(),
            parent_id: 0,
            instance: 0,
        },
        DralEvent::SetNodeLayout {
            node_id: 2,
            capacities: vec![8],
        },
        DralEvent::NewEdge {
            id: 1,
            src: 1,
            dst: 2,
            bandwidth: 4,
            latency: 1,
            name: "f2d".into(),
        },
    ];
    for i in 1..=items {
        events.push(DralEvent::Cycle(i as u64));
        events.push(DralEvent::NewItem(i));
        events.push(DralEvent::SetItemTag {
            item_id: i,
            tag: "pc".into(),
            value: TagValue::Integer(0x4000 + i as u64 * 4),
        });
        events.push(DralEvent::SetItemTag {
            item_id: i,
            tag: "opcode".into(),
            value: TagValue::from(["add", "ld", "st", "br"][i as usize % 4]),
        });
        events.push(DralEvent::SetItemTag {
            item_id: i,
            tag: "srcs".into(),
            value: TagValue::Set(vec![i as u64 % 32, (i as u64 + 1) % 32]),
        });
        events.push(DralEvent::MoveItems {
            edge_id: 1,
            items: vec![(i, i % 4)],
        });
        events.push(DralEvent::EnterNode {
            node_id: 2,
            item_id: i,
            position: vec![i % 8],
        });
    }
    events.push(DralEvent::EndSimulation);
    events
}

fn encode(version: WireVersion, events: &[DralEvent]) -> Vec<u8> {
    let sink = ByteSink::new(Vec::new(), false, 64 * 1024);
    let mut enc = match DralEncoder::new(sink, version) {
        Ok(enc) => enc,
        Err(e) => panic!("encoder setup failed: {}", e),
    };
    for event in events {
        if let Err(e) = enc.encode(event) {
            panic!("cannot encode {:?}: {}", event, e);
        }
    }
    match enc.finish() {
        Ok(bytes) => bytes,
        Err(e) => panic!("encoder finish failed: {}", e),
    }
}

// ============================================================================
// Codec Benchmarks
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let events = synthetic_trace(10_000);

    for version in [WireVersion::V2, WireVersion::V3, WireVersion::V4, WireVersion::Ascii] {
        let bytes = encode(version, &events);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("version", version), &bytes, |b, bytes| {
            b.iter(|| {
                let mut log = EventLog::new();
                let mut dec = DralDecoder::from_reader(Cursor::new(bytes.clone()), false);
                black_box(dec.run(&mut log));
            });
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let events = synthetic_trace(10_000);
    group.throughput(Throughput::Elements(events.len() as u64));

    for version in [WireVersion::V2, WireVersion::V4] {
        group.bench_with_input(BenchmarkId::new("version", version), &events, |b, events| {
            b.iter(|| black_box(encode(version, events)));
        });
    }

    group.finish();
}

// ============================================================================
// Store Benchmarks
// ============================================================================

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");

    for items in [1_000u32, 10_000, 50_000].iter() {
        let bytes = encode(WireVersion::V3, &synthetic_trace(*items));
        group.throughput(Throughput::Elements(*items as u64));
        group.bench_with_input(BenchmarkId::new("items", items), &bytes, |b, bytes| {
            b.iter(|| {
                let mut db = DralDb::new(DbConfig::default());
                let _ = db.track_move_item(1, 0);
                let stats = db.ingest(&mut DralDecoder::from_reader(Cursor::new(bytes.clone()), false));
                black_box(stats.events.total);
            });
        });
    }

    group.finish();
}

fn bench_item_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("item_lookup");

    for items in [1_000u32, 100_000].iter() {
        let mut heap = ItemTagHeap::new(4096);
        for id in 1..=*items {
            let cycle = id as u64;
            let _ = heap.new_item(id, cycle);
            let _ = heap.set_tag(id, 1, cycle * 3, TagValueType::Integer, true, cycle);
            let _ = heap.set_tag(id, 1, cycle * 5, TagValueType::Integer, true, cycle + 2);
        }

        group.throughput(Throughput::Elements(*items as u64));
        group.bench_with_input(BenchmarkId::new("items", items), items, |b, &items| {
            b.iter(|| {
                let mut hits = 0u64;
                for id in (1..=items).step_by(7) {
                    if heap.get_tag(id, 1, id as u64 + 1).is_ok() {
                        hits += 1;
                    }
                }
                black_box(hits);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Groups
// ============================================================================

criterion_group!(benches, bench_decode, bench_encode, bench_ingest, bench_item_lookup);

criterion_main!(benches);
