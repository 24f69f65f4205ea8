//! Engine configuration.
//!
//! Every field has a default, so a config file only needs the options it
//! overrides:
//!
//! ```json
//! { "db_directory": "/var/lib/atlas", "max_resident": 8, "indexing": true }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Number of shards a database is partitioned into.
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Number of shards kept in memory at once.
pub const DEFAULT_MAX_RESIDENT: usize = 4;

pub const DEFAULT_DB_DIRECTORY: &str = "atlas_db";
pub const DEFAULT_KEY_FILE: &str = "atlas.key";
pub const WAL_FILE_NAME: &str = "global.wal";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed fan-out. Changing it for an existing database re-routes ids,
    /// so it must stay the same for the lifetime of the data directory.
    pub shard_count: usize,
    pub max_resident: usize,
    pub db_directory: PathBuf,
    /// Raw 32-byte key. Lives outside the data directory.
    pub key_file: PathBuf,
    /// Start with the inverted index enabled.
    pub indexing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            max_resident: DEFAULT_MAX_RESIDENT,
            db_directory: PathBuf::from(DEFAULT_DB_DIRECTORY),
            key_file: PathBuf::from(DEFAULT_KEY_FILE),
            indexing: false,
        }
    }
}

impl EngineConfig {
    /// Defaults rooted at `db_directory`.
    pub fn new<P: AsRef<Path>>(db_directory: P) -> Self {
        Self {
            db_directory: db_directory.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn shard_count(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    pub fn max_resident(mut self, count: usize) -> Self {
        self.max_resident = count;
        self
    }

    pub fn key_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.key_file = path.as_ref().to_path_buf();
        self
    }

    pub fn indexing(mut self, enabled: bool) -> Self {
        self.indexing = enabled;
        self
    }

    /// Read a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn write_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(GraphError::InvalidConfig("shard_count must be positive".into()));
        }
        if self.max_resident == 0 {
            return Err(GraphError::InvalidConfig("max_resident must be positive".into()));
        }
        if self.max_resident > self.shard_count {
            return Err(GraphError::InvalidConfig(format!(
                "max_resident ({}) exceeds shard_count ({})",
                self.max_resident, self.shard_count
            )));
        }
        if self.db_directory.as_os_str().is_empty() {
            return Err(GraphError::InvalidConfig("db_directory must not be empty".into()));
        }
        if self.key_file.as_os_str().is_empty() {
            return Err(GraphError::InvalidConfig("key_file must not be empty".into()));
        }
        Ok(())
    }

    /// `<db>/part_<i>.dat`
    pub fn shard_path(&self, shard: usize) -> PathBuf {
        self.db_directory.join(format!("part_{}.dat", shard))
    }

    /// `<db>/global.wal`
    pub fn wal_path(&self) -> PathBuf {
        self.db_directory.join(WAL_FILE_NAME)
    }
}
