//! Ingestion statistics and export.
//!
//! [`IngestStats`] is filled by the tag store while it consumes a trace and
//! can be exported as JSON, CSV or a human-readable summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::types::Cycle;

/// Aggregate statistics for one ingestion session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IngestStats {
    /// Where the trace came from
    pub metadata: IngestMetadata,

    /// Event and error counters
    pub events: EventStats,

    /// Store occupancy after ingestion
    pub store: StoreStats,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the ingested trace.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IngestMetadata {
    /// Trace path, if read from a file
    pub source: Option<String>,

    /// Detected wire version
    pub version: Option<String>,

    /// Bytes consumed from the (decompressed) stream
    pub bytes_read: u64,
}

/// Counters of delivered events and reported errors.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventStats {
    /// Total events delivered to the store
    pub total: u64,

    /// Events per kind name
    pub by_kind: BTreeMap<String, u64>,

    /// Fatal stream errors
    pub errors: u64,

    /// Recoverable errors (logical store errors included)
    pub non_critical_errors: u64,

    /// Message of the most recent error of either kind
    pub last_error: Option<String>,
}

/// Store occupancy counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Last cycle seen
    pub last_cycle: Cycle,

    pub items_created: u64,
    pub items_deleted: u64,
    pub items_purged: u64,

    /// Item tag facts stored
    pub item_facts: u64,

    pub nodes: usize,
    pub edges: usize,
    pub tags: usize,
    pub tracks: usize,

    /// Values recorded on tracks
    pub track_writes: u64,

    /// Tag-vector windows finalized
    pub compressions: u64,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Events ingested per second
    pub events_per_second: f64,

    /// Stream bytes consumed per second
    pub bytes_per_second: f64,
}

impl IngestStats {
    /// Creates a new empty statistics container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the trace source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Counts one delivered event.
    pub fn record_event(&mut self, kind: &str) {
        self.events.total += 1;
        *self.events.by_kind.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Counts a fatal stream error.
    pub fn record_error(&mut self, message: &str) {
        self.events.errors += 1;
        self.events.last_error = Some(message.to_string());
    }

    /// Counts a recoverable error.
    pub fn record_non_critical(&mut self, message: &str) {
        self.events.non_critical_errors += 1;
        self.events.last_error = Some(message.to_string());
    }

    /// Returns how many events of `kind` were delivered.
    pub fn count_of(&self, kind: &str) -> u64 {
        self.events.by_kind.get(kind).copied().unwrap_or(0)
    }

    /// Updates timing statistics based on wall clock time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;

        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.events_per_second = self.events.total as f64 / seconds;
            self.timing.bytes_per_second = self.metadata.bytes_read as f64 / seconds;
        }
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("metric,value\n");

        csv.push_str(&format!("events_total,{}\n", self.events.total));
        for (kind, count) in &self.events.by_kind {
            csv.push_str(&format!("events.{},{}\n", kind, count));
        }
        csv.push_str(&format!("errors,{}\n", self.events.errors));
        csv.push_str(&format!("non_critical_errors,{}\n", self.events.non_critical_errors));

        csv.push_str(&format!("last_cycle,{}\n", self.store.last_cycle));
        csv.push_str(&format!("items_created,{}\n", self.store.items_created));
        csv.push_str(&format!("items_deleted,{}\n", self.store.items_deleted));
        csv.push_str(&format!("items_purged,{}\n", self.store.items_purged));
        csv.push_str(&format!("item_facts,{}\n", self.store.item_facts));
        csv.push_str(&format!("nodes,{}\n", self.store.nodes));
        csv.push_str(&format!("edges,{}\n", self.store.edges));
        csv.push_str(&format!("tags,{}\n", self.store.tags));
        csv.push_str(&format!("tracks,{}\n", self.store.tracks));
        csv.push_str(&format!("track_writes,{}\n", self.store.track_writes));
        csv.push_str(&format!("compressions,{}\n", self.store.compressions));

        csv.push_str(&format!("bytes_read,{}\n", self.metadata.bytes_read));
        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));
        csv.push_str(&format!("events_per_second,{:.2}\n", self.timing.events_per_second));

        csv
    }

    /// Exports summary statistics to CSV file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Ingestion Statistics ===")?;
        writeln!(w)?;

        if let Some(ref source) = self.metadata.source {
            writeln!(w, "Source: {}", source)?;
        }
        if let Some(ref version) = self.metadata.version {
            writeln!(w, "Format: {}", version)?;
        }
        writeln!(w, "Bytes read: {}", self.metadata.bytes_read)?;
        writeln!(w)?;

        writeln!(w, "--- Events ---")?;
        writeln!(w, "Total: {}", self.events.total)?;
        for (kind, count) in &self.events.by_kind {
            writeln!(w, "  {}: {}", kind, count)?;
        }
        writeln!(w, "Errors: {}", self.events.errors)?;
        writeln!(w, "Non-critical errors: {}", self.events.non_critical_errors)?;
        if let Some(ref last) = self.events.last_error {
            writeln!(w, "Last error: {}", last)?;
        }
        writeln!(w)?;

        writeln!(w, "--- Store ---")?;
        writeln!(w, "Last cycle: {}", self.store.last_cycle)?;
        writeln!(
            w,
            "Items: {} created, {} deleted, {} purged",
            self.store.items_created, self.store.items_deleted, self.store.items_purged
        )?;
        writeln!(w, "Item facts: {}", self.store.item_facts)?;
        writeln!(w, "Nodes: {}, Edges: {}, Tags: {}", self.store.nodes, self.store.edges, self.store.tags)?;
        writeln!(w, "Tracks: {} ({} writes)", self.store.tracks, self.store.track_writes)?;
        writeln!(w, "Compressed windows: {}", self.store.compressions)?;
        writeln!(w)?;

        writeln!(w, "--- Timing ---")?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;
        writeln!(w, "Events/sec: {:.2}", self.timing.events_per_second)?;
        writeln!(w, "Bytes/sec: {:.2}", self.timing.bytes_per_second)?;

        Ok(())
    }

    /// Returns a summary string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        if self.write_summary(&mut buf).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_creation() {
        let stats = IngestStats::new().with_source("trace.drl.gz");
        assert_eq!(stats.metadata.source.as_deref(), Some("trace.drl.gz"));
        assert_eq!(stats.events.total, 0);
    }

    #[test]
    fn test_event_counting() {
        let mut stats = IngestStats::new();
        stats.record_event("Cycle");
        stats.record_event("Cycle");
        stats.record_event("NewItem");
        stats.record_non_critical("item 3 already exists");

        assert_eq!(stats.events.total, 3);
        assert_eq!(stats.count_of("Cycle"), 2);
        assert_eq!(stats.count_of("DeleteItem"), 0);
        assert_eq!(stats.events.non_critical_errors, 1);
        assert_eq!(stats.events.last_error.as_deref(), Some("item 3 already exists"));
    }

    #[test]
    fn test_stats_json_export() {
        let mut stats = IngestStats::new();
        stats.store.last_cycle = 1000;
        stats.store.items_created = 100;

        let json = stats.to_json().unwrap();
        assert!(json.contains("1000"));
        assert!(json.contains("items_created"));
    }

    #[test]
    fn test_stats_csv_export() {
        let mut stats = IngestStats::new();
        stats.record_event("NewItem");
        stats.store.last_cycle = 1000;

        let csv = stats.to_csv();
        assert!(csv.starts_with("metric,value\n"));
        assert!(csv.contains("last_cycle,1000"));
        assert!(csv.contains("events.NewItem,1"));
    }

    #[test]
    fn test_timing() {
        let mut stats = IngestStats::new();
        stats.events.total = 500;
        stats.metadata.bytes_read = 2000;
        stats.compute_timing(500.0);
        assert!((stats.timing.events_per_second - 1000.0).abs() < 1e-6);
        assert!((stats.timing.bytes_per_second - 4000.0).abs() < 1e-6);

        stats.compute_timing(0.0);
        assert_eq!(stats.timing.total_wall_time_ms, 0.0);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_ms();
        assert!(elapsed >= 10.0);
    }

    #[test]
    fn test_summary_output() {
        let mut stats = IngestStats::new().with_source("run.drl");
        stats.store.last_cycle = 1000;
        stats.metadata.version = Some("v3".to_string());

        let summary = stats.summary();
        assert!(summary.contains("run.drl"));
        assert!(summary.contains("Format: v3"));
        assert!(summary.contains("Last cycle: 1000"));
    }
}
