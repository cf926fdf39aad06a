//! Codec configuration.

use std::path::Path;

use serde::Deserialize;

use tensorpack_core::{Error, Result};

/// Read/write behaviour of the codec.
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodecConfig {
    /// Shard budget in bytes used when no explicit budget is given.
    #[serde(default = "default_max_shard_bytes")]
    pub max_shard_bytes: u64,

    /// Write to a temporary file and rename into place.
    #[serde(default = "default_atomic_writes")]
    pub atomic_writes: bool,

    /// Memory-map files on read instead of loading them.
    #[serde(default = "default_memory_map")]
    pub memory_map: bool,

    /// Pretty-print index JSON.
    #[serde(default = "default_pretty_index")]
    pub pretty_index: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_shard_bytes: default_max_shard_bytes(),
            atomic_writes: default_atomic_writes(),
            memory_map: default_memory_map(),
            pretty_index: default_pretty_index(),
        }
    }
}

impl CodecConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&bytes)
    }

    /// Parses a configuration from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the codec cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_shard_bytes == 0 {
            return Err(Error::Config("max_shard_bytes must be positive".into()));
        }
        Ok(())
    }
}

fn default_max_shard_bytes() -> u64 {
    5_000_000_000 // 5GB
}

fn default_atomic_writes() -> bool {
    true
}

fn default_memory_map() -> bool {
    true
}

fn default_pretty_index() -> bool {
    true
}
