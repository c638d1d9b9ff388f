//! End-to-end acceptance scenarios.
//!
//! Each test drives a trace through an encoder, the decoder and the tag
//! store, then checks what a client querying the store observes.

use std::io::Cursor;

use dralkit::codec::{DralDecoder, DralEncoder, WireVersion};
use dralkit::event::{DralEvent, EventLog};
use dralkit::io::ByteSink;
use dralkit::tagvec::{TagVec, VecKind, VecLayout};
use dralkit::{DbConfig, DbConfigBuilder, DbError, DralDb, TagValue, TrackKind, TrackLookup};

fn encode(version: WireVersion, events: &[DralEvent]) -> Vec<u8> {
    let mut enc = DralEncoder::new(ByteSink::new(Vec::new(), false, 4096), version).unwrap();
    for event in events {
        enc.encode(event).unwrap();
    }
    enc.finish().unwrap()
}

fn ingest(db: &mut DralDb, bytes: Vec<u8>) {
    let stats = db.ingest(&mut DralDecoder::from_reader(Cursor::new(bytes), false));
    assert_eq!(stats.events.errors, 0, "{:?}", stats.events.last_error);
}

// ============================================================================
// Scenario A: item tag lookup from a v2 stream
// ============================================================================

#[test]
fn test_item_tag_from_v2_stream() {
    let bytes = encode(
        WireVersion::V2,
        &[
            DralEvent::Cycle(10),
            DralEvent::NewNode {
                id: 1,
                name: "L1".into(),
                parent_id: 0,
                instance: 0,
            },
            DralEvent::NewItem(7),
            DralEvent::SetItemTag {
                item_id: 7,
                tag: "age".into(),
                value: TagValue::Integer(5),
            },
        ],
    );

    let mut db = DralDb::new(DbConfig::default());
    ingest(&mut db, bytes);

    assert_eq!(db.graph().node(1).map(|n| n.name.as_str()), Some("L1"));
    assert_eq!(db.get_item_tag(7, "age", 10).unwrap(), TagValue::Integer(5));
    assert!(matches!(db.get_item_tag(7, "age", 9), Err(DbError::TagNotSet { .. })));
    assert!(db.is_ended());
}

// ============================================================================
// Scenario B: edge track observes a move
// ============================================================================

#[test]
fn test_edge_track_sees_moved_item() {
    let mut db = DralDb::new(DbConfig::default());
    let track = db
        .subscribe(TrackKind::MoveItem {
            edge: 2,
            position: 0,
        })
        .unwrap();
    assert_eq!(db.tracks().find("move:2@0"), None);

    ingest(
        &mut db,
        encode(
            WireVersion::V2,
            &[
                DralEvent::Cycle(100),
                DralEvent::NewNode {
                    id: 1,
                    name: "core".into(),
                    parent_id: 0,
                    instance: 0,
                },
                DralEvent::NewNode {
                    id: 3,
                    name: "l2".into(),
                    parent_id: 0,
                    instance: 0,
                },
                DralEvent::NewEdge {
                    id: 2,
                    src: 1,
                    dst: 3,
                    bandwidth: 2,
                    latency: 1,
                    name: "ring".into(),
                },
                DralEvent::NewItem(7),
                DralEvent::MoveItems {
                    edge_id: 2,
                    items: vec![(7, 0)],
                },
            ],
        ),
    );

    assert_eq!(db.tracks().find("move:2@0"), Some(track));
    assert_eq!(db.track_move_item(2, 0).unwrap(), track);
    assert_eq!(db.track_item(track, 100).unwrap(), TrackLookup::Value(7));
    assert_eq!(db.track_item(track, 101).unwrap(), TrackLookup::Absent);

    let lane1 = db.track_move_item(2, 1).unwrap();
    assert_ne!(lane1, track);
    assert_eq!(db.track_item(lane1, 100).unwrap(), TrackLookup::Absent);
}

#[test]
fn test_tracks_opened_after_ingest_see_nothing_earlier() {
    let mut db = DralDb::new(DbConfig::default());
    ingest(
        &mut db,
        encode(
            WireVersion::V3,
            &[
                DralEvent::Cycle(100),
                DralEvent::NewEdge {
                    id: 2,
                    src: 1,
                    dst: 3,
                    bandwidth: 2,
                    latency: 1,
                    name: "ring".into(),
                },
                DralEvent::NewItem(7),
                DralEvent::MoveItems {
                    edge_id: 2,
                    items: vec![(7, 0)],
                },
            ],
        ),
    );

    let late = db.track_move_item(2, 0).unwrap();
    assert_eq!(db.track_item(late, 100).unwrap(), TrackLookup::Absent);
}

// ============================================================================
// Scenario C: v3 and v4 agree
// ============================================================================

#[test]
fn test_v3_and_v4_decode_identically() {
    let events = vec![
        DralEvent::NewNode {
            id: 4,
            name: "issue_queue".into(),
            parent_id: 0,
            instance: 2,
        },
        DralEvent::Cycle(3),
        DralEvent::NewItem(11),
        DralEvent::SetItemTag {
            item_id: 11,
            tag: "opcode".into(),
            value: TagValue::from("mul"),
        },
        DralEvent::SetItemTag {
            item_id: 11,
            tag: "opcode_class".into(),
            value: TagValue::from("mul"),
        },
        DralEvent::Comment {
            magic: 3,
            text: "phase 1".into(),
        },
        DralEvent::Cycle(1 << 40),
        DralEvent::DeleteItem(11),
    ];

    let decode = |version| {
        let mut log = EventLog::new();
        DralDecoder::from_reader(Cursor::new(encode(version, &events)), false).run(&mut log);
        assert!(log.errors.is_empty());
        log
    };
    let v3 = decode(WireVersion::V3);
    let v4 = decode(WireVersion::V4);

    assert_eq!(v3.payload(), v4.payload());
    assert_eq!(v3.events.len(), v4.events.len());
    assert_eq!(&v3.events[1..], &v4.events[1..]);
    assert_eq!(v3.events[0], DralEvent::Version(3));
    assert_eq!(v4.events[0], DralEvent::Version(4));
}

// ============================================================================
// Scenario D: compression preserves answers
// ============================================================================

#[test]
fn test_dictionary_vector_compression_preserves_queries() {
    for layout in [VecLayout::new(20, 12), VecLayout::new(16, 16)] {
        let mut vec = TagVec::open(VecKind::Forward, 0);
        vec.add_key(&layout, 2, 7).unwrap();
        vec.add_key(&layout, 5, 9).unwrap();
        vec.add_key(&layout, 40, 7).unwrap();

        let cycles = [0, 2, 3, 5, 39, 40, 1000];
        let before: Vec<_> = cycles.iter().map(|&c| vec.get(&layout, c)).collect();

        assert!(vec.compress(&layout));
        assert!(vec.is_compressed());
        let after: Vec<_> = cycles.iter().map(|&c| vec.get(&layout, c)).collect();

        assert_eq!(before, after, "encoding {}", vec.encoding());
        assert_eq!(after[3], Some((5, 9)));
        assert_eq!(after[0], None);
    }
}

#[test]
fn test_finalized_track_answers_match_live_track() {
    let config = DbConfigBuilder::new()
        .track_window_bits(4)
        .auto_compress(true)
        .build()
        .unwrap();
    let mut db = DralDb::new(config);
    db.apply(&DralEvent::NewNode {
        id: 1,
        name: "alu".into(),
        parent_id: 0,
        instance: 0,
    })
    .unwrap();
    let track = db.track_node_tags(1, &[]).unwrap();

    let mut events = Vec::new();
    for cycle in 0..64u64 {
        events.push(DralEvent::Cycle(cycle));
        if cycle % 3 == 0 {
            events.push(DralEvent::SetNodeTag {
                node_id: 1,
                tag: "busy".into(),
                value: TagValue::Integer(cycle % 2),
                slot: vec![],
            });
        }
    }
    for event in &events {
        db.apply(event).unwrap();
    }

    let live: Vec<_> = (0..70).map(|c| db.track_value(track, "busy", c).unwrap()).collect();
    db.apply(&DralEvent::EndSimulation).unwrap();
    assert!(db.stats().store.compressions > 0);

    let finalized: Vec<_> = (0..70).map(|c| db.track_value(track, "busy", c).unwrap()).collect();
    assert_eq!(live, finalized);
    assert_eq!(finalized[4], TrackLookup::Value(TagValue::Integer(1)));
    assert_eq!(finalized[69], TrackLookup::Value(TagValue::Integer(1)));
}
