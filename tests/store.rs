//! Integration tests for the tag store session.
//!
//! These tests verify:
//! - Loading traces and configuration files from disk
//! - Item purging over a long trace
//! - Heap cursor traversal
//! - Statistics export
//! - Shared access from several threads

use std::thread;

use dralkit::codec::{DralEncoder, WireVersion};
use dralkit::config::ConfigError;
use dralkit::event::DralEvent;
use dralkit::io::ByteSink;
use dralkit::{DbConfig, DbConfigBuilder, DbError, DralDb, IngestStats, TagValue, TrackLookup};

// ============================================================================
// Helpers
// ============================================================================

fn write_trace(path: &std::path::Path, gzip: bool, version: WireVersion, events: &[DralEvent]) {
    let sink = ByteSink::create(path, gzip, 4096).unwrap();
    let mut enc = DralEncoder::new(sink, version).unwrap();
    for event in events {
        enc.encode(event).unwrap();
    }
    enc.finish().unwrap();
}

fn item_tag(item: u32, tag: &str, value: impl Into<TagValue>) -> DralEvent {
    DralEvent::SetItemTag {
        item_id: item,
        tag: tag.to_string(),
        value: value.into(),
    }
}

fn pipeline_trace() -> Vec<DralEvent> {
    let mut events = vec![
        DralEvent::NewNode {
            id: 1,
            name: "decode".into(),
            parent_id: 0,
            instance: 0,
        },
        DralEvent::SetNodeLayout {
            node_id: 1,
            capacities: vec![4],
        },
    ];
    for i in 1..=8u32 {
        events.push(DralEvent::Cycle(i as u64 * 2));
        events.push(DralEvent::NewItem(i));
        events.push(item_tag(i, "pc", 0x1000 + i as u64 * 4));
        events.push(item_tag(i, "opcode", if i % 2 == 0 { "add" } else { "ld" }));
        events.push(DralEvent::EnterNode {
            node_id: 1,
            item_id: i,
            position: vec![i % 4],
        });
    }
    events.push(DralEvent::EndSimulation);
    events
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_load_gzip_trace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.drl.gz");
    write_trace(&path, true, WireVersion::V4, &pipeline_trace());

    let mut db = DralDb::load(&path, DbConfig::default()).unwrap();
    assert_eq!(db.get_item_tag(3, "pc", 6).unwrap(), TagValue::Integer(0x100c));
    assert_eq!(db.get_item_tag(4, "opcode", 100).unwrap(), TagValue::from("add"));
    assert!(db.is_ended());

    let stats = db.stats();
    assert_eq!(stats.metadata.version.as_deref(), Some("v4"));
    assert!(stats.metadata.source.as_deref().unwrap().ends_with("run.drl.gz"));
    assert_eq!(stats.store.items_created, 8);
    assert_eq!(stats.store.item_facts, 16);
    assert_eq!(stats.store.nodes, 1);
    assert_eq!(stats.count_of("EnterNode"), 8);
    assert_eq!(stats.events.errors, 0);
    assert_eq!(stats.events.non_critical_errors, 0);
}

#[test]
fn test_load_truncated_trace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.drl");
    write_trace(&path, false, WireVersion::V2, &pipeline_trace());

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    let mut db = DralDb::load(&path, DbConfig::default()).unwrap();
    assert!(db.is_ended());
    assert_eq!(db.get_item_tag(1, "pc", 2).unwrap(), TagValue::Integer(0x1004));
    let stats = db.stats();
    assert_eq!(stats.events.errors, 0);
    assert_eq!(stats.events.non_critical_errors, 1);
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DralDb::load(dir.path().join("nope.drl"), DbConfig::default()).is_err());
}

#[test]
fn test_load_with_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("dral.yaml");
    std::fs::write(
        &config_path,
        "immutable_tags: [opcode]\ntag_bases:\n  pc: 16\ntrack_window_bits: 8\n",
    )
    .unwrap();
    let config = DbConfig::from_file(&config_path).unwrap();
    assert_eq!(config.track_window_bits, 8);
    assert!(!config.is_mutable("opcode"));

    let trace_path = dir.path().join("run.drl");
    let mut events = pipeline_trace();
    events.insert(events.len() - 1, item_tag(1, "opcode", "st"));
    write_trace(&trace_path, false, WireVersion::V3, &events);

    let mut db = DralDb::load(&trace_path, config).unwrap();
    assert_eq!(db.get_item_tag(1, "opcode", 0).unwrap(), TagValue::from("ld"));
    assert_eq!(db.format_tag_value("pc", &TagValue::Integer(4100)).unwrap(), "0x1004");
    assert_eq!(db.stats().events.non_critical_errors, 1);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfigBuilder::new()
        .max_item_age(5000)
        .backpropagate(true)
        .immutable_tag("DISASM")
        .tag_base("PC", 16)
        .build()
        .unwrap();

    let yaml = dir.path().join("db.yml");
    config.to_yaml_file(&yaml).unwrap();
    assert_eq!(DbConfig::from_file(&yaml).unwrap(), config);

    let json = dir.path().join("db.json");
    config.to_json_file(&json).unwrap();
    assert_eq!(DbConfig::from_file(&json).unwrap(), config);
}

#[test]
fn test_config_file_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let bad = dir.path().join("bad.yaml");
    std::fs::write(&bad, "track_window_bits: 30\n").unwrap();
    assert!(matches!(DbConfig::from_file(&bad), Err(ConfigError::Validation(_))));

    let toml = dir.path().join("db.toml");
    std::fs::write(&toml, "").unwrap();
    assert!(matches!(DbConfig::from_file(&toml), Err(ConfigError::UnknownFormat(_))));
}

// ============================================================================
// Purging
// ============================================================================

#[test]
fn test_purge_over_long_trace() {
    let config = DbConfigBuilder::new()
        .max_item_age(100)
        .purge_interval(10)
        .build()
        .unwrap();
    let mut db = DralDb::new(config);

    for i in 1..=20u32 {
        db.apply(&DralEvent::Cycle(i as u64 * 10)).unwrap();
        db.apply(&DralEvent::NewItem(i)).unwrap();
        db.apply(&item_tag(i, "pc", i as u64)).unwrap();
    }
    db.apply(&DralEvent::Cycle(300)).unwrap();

    assert_eq!(db.stats().store.items_purged, 19);
    assert_eq!(db.get_item_tag(1, "pc", 300), Err(DbError::ItemPurged(1)));
    assert_eq!(db.get_item_tag(20, "pc", 300).unwrap(), TagValue::Integer(20));
    assert!(!db.items().contains(19));
    assert!(db.items().contains(20));

    // Freed chunks are reused by later items
    let chunks = db.items().chunks_in_use();
    db.apply(&DralEvent::NewItem(21)).unwrap();
    db.apply(&item_tag(21, "pc", 21u64)).unwrap();
    assert!(db.items().chunks_in_use() <= chunks + 1);
}

// ============================================================================
// Cursor
// ============================================================================

#[test]
fn test_cursor_walks_every_fact() {
    let mut db = DralDb::new(DbConfig::default());
    db.apply(&DralEvent::Cycle(1)).unwrap();
    db.apply(&DralEvent::NewItem(1)).unwrap();
    for n in 0..6u64 {
        db.apply(&DralEvent::Cycle(1 + n)).unwrap();
        db.apply(&item_tag(1, "stage", n)).unwrap();
    }
    db.apply(&DralEvent::NewItem(2)).unwrap();
    db.apply(&DralEvent::NewItem(3)).unwrap();
    db.apply(&item_tag(3, "opcode", "nop")).unwrap();

    let mut seen = Vec::new();
    let mut cursor = db.items().cursor();
    loop {
        if let Some(item) = cursor.item() {
            let mut facts = 0;
            if cursor.fact().is_some() {
                facts += 1;
                while cursor.skip_to_next_tag() {
                    facts += 1;
                }
            }
            seen.push((item, facts));
        }
        if !cursor.skip_to_next_item() {
            break;
        }
    }
    assert_eq!(seen, vec![(1, 6), (2, 0), (3, 1)]);

    let facts = db.item_facts(1).unwrap();
    assert_eq!(facts.len(), 6);
    assert!(facts.iter().all(|f| f.tag == "stage"));
    assert_eq!(facts[5].value, TagValue::Integer(5));
    assert_eq!(facts[5].cycle, 6);
}

// ============================================================================
// Tracks
// ============================================================================

#[test]
fn test_exit_track_pending_until_exit() {
    let mut db = DralDb::new(DbConfig::default());
    db.apply(&DralEvent::NewNode {
        id: 1,
        name: "lsq".into(),
        parent_id: 0,
        instance: 0,
    })
    .unwrap();
    db.apply(&DralEvent::SetNodeLayout {
        node_id: 1,
        capacities: vec![2],
    })
    .unwrap();
    let enter = db.track_enter_node(1, &[1]).unwrap();
    let exit = db.track_exit_node(1, &[1]).unwrap();

    db.apply(&DralEvent::Cycle(10)).unwrap();
    db.apply(&DralEvent::NewItem(5)).unwrap();
    db.apply(&DralEvent::EnterNode {
        node_id: 1,
        item_id: 5,
        position: vec![1],
    })
    .unwrap();
    assert_eq!(db.track_item(enter, 10).unwrap(), TrackLookup::Value(5));
    assert_eq!(db.track_item(exit, 12).unwrap(), TrackLookup::Pending);
    assert_eq!(db.tracks().pending_writes(exit).unwrap(), 1);

    db.apply(&DralEvent::Cycle(14)).unwrap();
    db.apply(&DralEvent::ExitNode {
        node_id: 1,
        item_id: 5,
        position: vec![1],
    })
    .unwrap();
    assert_eq!(db.track_item(exit, 14).unwrap(), TrackLookup::Value(5));
    assert_eq!(db.tracks().pending_writes(exit).unwrap(), 0);

    assert!(db.track_enter_node(1, &[2]).is_err());
}

// ============================================================================
// Export and Sharing
// ============================================================================

#[test]
fn test_stats_export_files() {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("run.drl");
    write_trace(&trace, false, WireVersion::V2, &pipeline_trace());
    let mut db = DralDb::load(&trace, DbConfig::default()).unwrap();

    let json = dir.path().join("stats.json");
    db.stats().to_json_file(&json).unwrap();
    let back: IngestStats = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(back.store.items_created, 8);
    assert_eq!(back.count_of("NewItem"), 8);

    let csv = dir.path().join("stats.csv");
    db.stats().to_csv_file(&csv).unwrap();
    let text = std::fs::read_to_string(&csv).unwrap();
    assert!(text.contains("items_created,8"));
    assert!(text.contains("events.EnterNode,8"));

    assert!(db.stats().summary().contains("=== Ingestion Statistics ==="));
}

#[test]
fn test_shared_session_across_threads() {
    let shared = DralDb::new(DbConfig::default()).into_shared();

    let writer = {
        let db = shared.clone();
        thread::spawn(move || {
            for i in 1..=100u32 {
                let mut guard = db.write();
                guard.apply(&DralEvent::Cycle(i as u64)).unwrap();
                guard.apply(&DralEvent::NewItem(i)).unwrap();
                guard.apply(&item_tag(i, "seq", i as u64)).unwrap();
            }
        })
    };
    writer.join().unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let db = shared.clone();
            thread::spawn(move || {
                let guard = db.read();
                (1..=100u32)
                    .filter(|&i| guard.get_item_tag(i, "seq", 100) == Ok(TagValue::Integer(i as u64)))
                    .count()
            })
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), 100);
    }
}
