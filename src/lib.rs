//! # dralkit
//!
//! Reader, writer and temporal database for DRAL pipeline-activity traces
//! produced by cycle-level performance models.
//!
//! ## Design Principles
//!
//! - **One event vocabulary**: every wire generation (binary v0 to v4 and
//!   ASCII) decodes into the same [`DralEvent`] stream and is delivered to a
//!   [`DralListener`] in wire order.
//! - **Pull-based decoding**: [`DralDecoder::process_next_event`] blocks until
//!   one event is available; there is no background thread.
//! - **Compact temporal storage**: item tags live in packed chunks of an
//!   arena, track histories in windowed tag vectors that are finalized into
//!   dense encodings once the trace moves past them.
//! - **Explicit session**: [`DralDb`] owns every store of one trace; several
//!   traces can be open in the same process.
//!
//! ## Features
//!
//! - `parallel` - Finalize track windows in parallel using rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use dralkit::{DbConfig, DralDb, DralDecoder, DralEncoder, DralEvent, TagValue, WireVersion};
//! use dralkit::io::ByteSink;
//!
//! // Write a small v3 trace into memory
//! let mut enc = DralEncoder::new(ByteSink::new(Vec::new(), false, 4096), WireVersion::V3).unwrap();
//! enc.encode(&DralEvent::Cycle(1)).unwrap();
//! enc.encode(&DralEvent::NewItem(1)).unwrap();
//! enc.encode(&DralEvent::SetItemTag {
//!     item_id: 1,
//!     tag: "opcode".into(),
//!     value: TagValue::from("ld"),
//! }).unwrap();
//! let bytes = enc.finish().unwrap();
//!
//! // Ingest it and query
//! let mut db = DralDb::new(DbConfig::default());
//! let stats = db.ingest(&mut DralDecoder::from_reader(std::io::Cursor::new(bytes), false));
//! assert_eq!(stats.events.errors, 0);
//! assert_eq!(db.get_item_tag(1, "opcode", 1).unwrap(), TagValue::from("ld"));
//! ```
//!
//! ## Loading Files
//!
//! ```rust,ignore
//! use dralkit::{DbConfig, DralDb};
//!
//! let config = DbConfig::from_yaml_file("dral.yaml")?;
//! let mut db = DralDb::load("run.drl.gz", config)?;
//! println!("{}", db.stats().summary());
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod io;
pub mod strings;
pub mod dict;
pub mod segvec;
pub mod graph;
pub mod event;
pub mod codec;
pub mod tagdesc;
pub mod item_heap;
pub mod tagvec;
pub mod track;
pub mod db;
pub mod stats;

// Re-export commonly used types
pub use types::{Cycle, EdgeId, ItemId, NodeId, TagId, TagValue, TagValueType, TrackId};
pub use error::{DbError, DbResult, DralError, DralResult, GraphError};
pub use config::{ConfigError, DbConfig, DbConfigBuilder};
pub use event::{dispatch, DralEvent, DralListener, EventLog};
pub use codec::{DralDecoder, DralEncoder, WireVersion};
pub use graph::{DbEdge, DbGraph, DbNode};
pub use db::{DralDb, SharedDb};
pub use track::{TrackKind, TrackLookup};
pub use stats::{IngestStats, Timer};

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// dralkit::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
