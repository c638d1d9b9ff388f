//! Configuration system for the tag store.
//!
//! This module provides YAML/JSON configuration file support for tuning a
//! [`DralDb`](crate::db::DralDb) session declaratively.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! max_item_age: 100000
//! purge_interval: 4096
//! backpropagate: false
//! immutable_tags: [DISASM, PC]
//! tag_bases:
//!   PC: 16
//! dictionary_bits: 20
//! track_window_bits: 12
//! auto_compress: true
//! log_level: info
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::types::Cycle;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Tunables of a tag store session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Items older than this many cycles are purged (None disables purging)
    #[serde(default)]
    pub max_item_age: Option<Cycle>,

    /// Cycles between two purge passes
    #[serde(default = "default_purge_interval")]
    pub purge_interval: Cycle,

    /// Mutable-tag lookups before the first assignment return that first value
    #[serde(default)]
    pub backpropagate: bool,

    /// Tags whose value is fixed once set on an item
    #[serde(default)]
    pub immutable_tags: Vec<String>,

    /// Display base per tag name (2, 8, 10 or 16)
    #[serde(default)]
    pub tag_bases: HashMap<String, u8>,

    /// Key width of the track dictionary
    #[serde(default = "default_dictionary_bits")]
    pub dictionary_bits: u8,

    /// log2 of the cycle window covered by one tag-vector chunk
    #[serde(default = "default_track_window_bits")]
    pub track_window_bits: u8,

    /// Finalize tag-vector windows as soon as the trace moves past them
    #[serde(default = "default_true")]
    pub auto_compress: bool,

    /// Entries kept in the item id recency cache
    #[serde(default = "default_item_cache_size")]
    pub item_cache_size: usize,

    /// Bound of the per-session wire tag/string maps used by the encoders
    #[serde(default = "default_wire_tag_cache")]
    pub wire_tag_cache: usize,

    /// Size of the buffered byte source/sink
    #[serde(default = "default_io_buffer_size")]
    pub io_buffer_size: usize,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_purge_interval() -> Cycle {
    4096
}

fn default_dictionary_bits() -> u8 {
    20
}

fn default_track_window_bits() -> u8 {
    12
}

fn default_true() -> bool {
    true
}

fn default_item_cache_size() -> usize {
    4096
}

fn default_wire_tag_cache() -> usize {
    65536
}

fn default_io_buffer_size() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            max_item_age: None,
            purge_interval: default_purge_interval(),
            backpropagate: false,
            immutable_tags: Vec::new(),
            tag_bases: HashMap::new(),
            dictionary_bits: default_dictionary_bits(),
            track_window_bits: default_track_window_bits(),
            auto_compress: true,
            item_cache_size: default_item_cache_size(),
            wire_tag_cache: default_wire_tag_cache(),
            io_buffer_size: default_io_buffer_size(),
            log_level: default_log_level(),
        }
    }
}

impl DbConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: DbConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: DbConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(8..=20).contains(&self.dictionary_bits) {
            return Err(ConfigError::Validation(format!(
                "dictionary_bits must be within 8..=20, got {}",
                self.dictionary_bits
            )));
        }
        if !(4..=16).contains(&self.track_window_bits) {
            return Err(ConfigError::Validation(format!(
                "track_window_bits must be within 4..=16, got {}",
                self.track_window_bits
            )));
        }
        if self.dictionary_bits as u32 + self.track_window_bits as u32 > 32 {
            return Err(ConfigError::Validation(format!(
                "dictionary_bits ({}) + track_window_bits ({}) exceed 32",
                self.dictionary_bits, self.track_window_bits
            )));
        }
        if self.purge_interval == 0 {
            return Err(ConfigError::Validation(
                "purge_interval must be positive".to_string(),
            ));
        }
        if self.item_cache_size == 0 || self.wire_tag_cache == 0 || self.io_buffer_size == 0 {
            return Err(ConfigError::Validation(
                "cache and buffer sizes must be positive".to_string(),
            ));
        }
        for (tag, base) in &self.tag_bases {
            if !matches!(base, 2 | 8 | 10 | 16) {
                return Err(ConfigError::Validation(format!(
                    "tag {} has unsupported base {}",
                    tag, base
                )));
            }
        }
        if self.max_item_age == Some(0) {
            tracing::warn!("max_item_age is 0; items are purged on the next purge pass");
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns true if the named tag may change value during an item's life.
    pub fn is_mutable(&self, tag: &str) -> bool {
        !self.immutable_tags.iter().any(|t| t == tag)
    }

    /// Returns the display base of the named tag.
    pub fn base_of(&self, tag: &str) -> u8 {
        self.tag_bases.get(tag).copied().unwrap_or(10)
    }
}

/// Builder for creating a [`DbConfig`] programmatically.
#[derive(Default)]
pub struct DbConfigBuilder {
    config: DbConfig,
}

impl DbConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum item age before purging.
    pub fn max_item_age(mut self, age: Cycle) -> Self {
        self.config.max_item_age = Some(age);
        self
    }

    /// Sets the number of cycles between purge passes.
    pub fn purge_interval(mut self, interval: Cycle) -> Self {
        self.config.purge_interval = interval;
        self
    }

    /// Enables or disables backpropagation of mutable tag values.
    pub fn backpropagate(mut self, enable: bool) -> Self {
        self.config.backpropagate = enable;
        self
    }

    /// Declares a tag as immutable.
    pub fn immutable_tag(mut self, tag: impl Into<String>) -> Self {
        self.config.immutable_tags.push(tag.into());
        self
    }

    /// Sets the display base of a tag.
    pub fn tag_base(mut self, tag: impl Into<String>, base: u8) -> Self {
        self.config.tag_bases.insert(tag.into(), base);
        self
    }

    /// Sets the track dictionary key width.
    pub fn dictionary_bits(mut self, bits: u8) -> Self {
        self.config.dictionary_bits = bits;
        self
    }

    /// Sets log2 of the tag-vector window size.
    pub fn track_window_bits(mut self, bits: u8) -> Self {
        self.config.track_window_bits = bits;
        self
    }

    /// Enables or disables automatic window compression.
    pub fn auto_compress(mut self, enable: bool) -> Self {
        self.config.auto_compress = enable;
        self
    }

    /// Sets the item recency cache size.
    pub fn item_cache_size(mut self, size: usize) -> Self {
        self.config.item_cache_size = size;
        self
    }

    /// Sets the bound of the wire tag/string maps.
    pub fn wire_tag_cache(mut self, size: usize) -> Self {
        self.config.wire_tag_cache = size;
        self
    }

    /// Sets the I/O buffer size.
    pub fn io_buffer_size(mut self, size: usize) -> Self {
        self.config.io_buffer_size = size;
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<DbConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
