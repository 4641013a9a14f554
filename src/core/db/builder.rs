use std::path::Path;

use crate::constants::*;
use crate::error::Result;

use super::Db;

/// Engine open flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Refuse write transactions and table creation.
    pub read_only: bool,
    /// Commit with eventual durability; `Db::sync(true)` forces a flush.
    pub no_sync: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn no_sync() -> Self {
        Self {
            no_sync: true,
            ..Self::default()
        }
    }
}

/// Configuration options for Db.
///
/// Use `DbBuilder` for a more ergonomic way to configure the database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub map_size: usize,
    pub max_tables: u32,
    pub version: u32,
    pub flags: OpenFlags,
    pub cache_size: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
            max_tables: DEFAULT_MAX_TABLES,
            version: schema_version(DEFAULT_VERSION_MAJOR, DEFAULT_VERSION_MINOR),
            flags: OpenFlags::default(),
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Builder for opening a Db with custom configuration.
///
/// # Example
///
/// ```no_run
/// use wtree::Db;
///
/// # fn main() -> wtree::Result<()> {
/// let db = Db::builder()
///     .map_size(256 * 1024 * 1024)
///     .max_tables(32)
///     .version(2, 1)
///     .open("/var/lib/app")?;
/// # Ok(())
/// # }
/// ```
pub struct DbBuilder {
    config: DbConfig,
}

impl DbBuilder {
    pub fn new() -> Self {
        Self {
            config: DbConfig::default(),
        }
    }

    /// Set the map size limit (in bytes).
    ///
    /// Commits that would grow the file past this limit fail with `MapFull`.
    /// Default: 1GB
    pub fn map_size(mut self, bytes: usize) -> Self {
        self.config.map_size = bytes;
        self
    }

    /// Set the maximum number of named tables (trees, indexes and the
    /// index metadata table all count).
    /// Default: 128
    pub fn max_tables(mut self, count: u32) -> Self {
        self.config.max_tables = count;
        self
    }

    /// Set the schema version embedded in extractor ids.
    /// Default: 1.0
    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.config.version = schema_version(major, minor);
        self
    }

    pub fn read_only(mut self, enable: bool) -> Self {
        self.config.flags.read_only = enable;
        self
    }

    pub fn no_sync(mut self, enable: bool) -> Self {
        self.config.flags.no_sync = enable;
        self
    }

    /// Set the engine page cache size (in bytes).
    /// Default: 64MB
    pub fn cache_size(mut self, bytes: usize) -> Self {
        self.config.cache_size = bytes;
        self
    }

    /// Open the database in directory `path`
    pub fn open(self, path: impl AsRef<Path>) -> Result<Db> {
        Db::with_config(path.as_ref(), self.config)
    }
}

impl Default for DbBuilder {
    fn default() -> Self {
        Self::new()
    }
}
