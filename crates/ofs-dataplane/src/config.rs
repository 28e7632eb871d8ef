//! Datapath Configuration

use crate::PIPELINE_NUM_TABLES;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default bytes of a table-miss packet sent to the controller
pub const DEFAULT_MISS_SEND_LEN: u16 = 128;

/// Default per-table flow capacity
pub const DEFAULT_MAX_FLOW_ENTRIES: usize = 4096;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid JSON for the config
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Datapath configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatapathConfig {
    /// Datapath identifier
    pub datapath_id: u64,
    /// Number of flow tables in the pipeline
    pub num_tables: u8,
    /// Table where processing starts
    pub first_table: u8,
    /// Flow entries per table
    pub max_flow_entries: usize,
    /// Bytes of a packet-in sent for table misses
    pub miss_send_len: u16,
    /// How long a buffered packet stays available for packet-out
    pub buffer_retention_ms: u64,
    /// Install the tracking observer and per-packet tracking fields
    pub packet_tracking: bool,
    /// Feed the elephant-flow sketch
    pub elephant_detection: bool,
    /// Send packets whose TTL would expire to the controller before any
    /// table lookup
    pub invalid_ttl_to_controller: bool,
}

impl Default for DatapathConfig {
    fn default() -> Self {
        Self {
            datapath_id: 1,
            num_tables: PIPELINE_NUM_TABLES as u8,
            first_table: 0,
            max_flow_entries: DEFAULT_MAX_FLOW_ENTRIES,
            miss_send_len: DEFAULT_MISS_SEND_LEN,
            buffer_retention_ms: 1_000,
            packet_tracking: false,
            elephant_detection: true,
            invalid_ttl_to_controller: false,
        }
    }
}

impl DatapathConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_tables == 0 || self.num_tables as usize > PIPELINE_NUM_TABLES {
            return Err(ConfigError::Invalid {
                field: "num_tables",
                reason: format!("must be within 1..={}", PIPELINE_NUM_TABLES),
            });
        }
        if self.first_table >= self.num_tables {
            return Err(ConfigError::Invalid {
                field: "first_table",
                reason: format!("must be below num_tables ({})", self.num_tables),
            });
        }
        if self.max_flow_entries == 0 {
            return Err(ConfigError::Invalid {
                field: "max_flow_entries",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}
