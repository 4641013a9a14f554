use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use redb::{TableHandle, WriteTransaction};

use crate::constants::*;
use crate::core::registry::{ExtractorRegistry, KeyExtractor};
use crate::error::{Error, Result};
use crate::stats::{Statistics, StatsSnapshot};

// Re-export public types
pub use self::builder::{DbBuilder, DbConfig, OpenFlags};
pub use self::memopt::{Advice, MapInfo, MLOCK_CURRENT, MLOCK_FUTURE};

pub mod builder;
pub mod memopt;

/// Handle to one on-disk database directory.
///
/// The handle is cheap to clone; trees, transactions and iterators keep their
/// own clone, and the engine is closed when the last one is dropped.
///
/// Write transactions are serialized by the engine itself (single writer,
/// many readers). No additional lock is taken around it.
#[derive(Clone)]
pub struct Db {
    pub(crate) inner: Arc<DbInner>,
}

pub(crate) struct DbInner {
    pub(crate) path: PathBuf,
    pub(crate) file_path: PathBuf,
    pub(crate) env: redb::Database,
    pub(crate) map_size: AtomicUsize,
    pub(crate) max_tables: u32,
    pub(crate) version: u32,
    pub(crate) flags: OpenFlags,
    pub(crate) registry: ExtractorRegistry,
    pub(crate) stats: Statistics,
    pub(crate) mapping: Mutex<Option<memopt::FileMap>>,
}

/// Engine statistics plus the configured map size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    pub tree_height: u32,
    pub allocated_pages: u64,
    pub leaf_pages: u64,
    pub branch_pages: u64,
    pub stored_bytes: u64,
    pub metadata_bytes: u64,
    pub fragmented_bytes: u64,
    pub page_size: usize,
    pub map_size: usize,
}

impl DbStats {
    /// Bytes currently charged against the map size.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_pages * self.page_size as u64
    }
}

impl Db {
    /// Open (or create) the database stored in directory `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Existing directory that holds the data file
    /// * `map_size` - Maximum database size in bytes (0 = 1 GiB)
    /// * `max_tables` - Maximum number of named tables (0 = 128)
    /// * `version` - Packed schema version, see [`schema_version`]
    /// * `flags` - Open flags
    ///
    /// # Errors
    ///
    /// Returns `InvalidArg` if `path` is not a directory.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use wtree::{schema_version, Db, OpenFlags};
    ///
    /// # fn main() -> wtree::Result<()> {
    /// let db = Db::open("/var/lib/app", 0, 0, schema_version(1, 0), OpenFlags::default())?;
    /// assert_eq!(db.get_mapsize(), 1 << 30);
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(
        path: impl AsRef<Path>,
        map_size: usize,
        max_tables: u32,
        version: u32,
        flags: OpenFlags,
    ) -> Result<Self> {
        let config = DbConfig {
            map_size,
            max_tables,
            version,
            flags,
            ..DbConfig::default()
        };
        Self::with_config(path.as_ref(), config)
    }

    /// Create a builder for configuring a database.
    pub fn builder() -> DbBuilder {
        DbBuilder::new()
    }

    pub(crate) fn with_config(path: &Path, config: DbConfig) -> Result<Self> {
        let is_dir = std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            return Err(Error::invalid_arg(format!(
                "Path is not a directory: {}",
                path.display()
            )));
        }

        let map_size = if config.map_size == 0 {
            DEFAULT_MAP_SIZE
        } else {
            config.map_size
        };
        let max_tables = if config.max_tables == 0 {
            DEFAULT_MAX_TABLES
        } else {
            config.max_tables
        };

        let file_path = path.join(DB_FILE_NAME);
        if config.flags.read_only && !file_path.exists() {
            return Err(Error::not_found(format!(
                "No database in {}",
                path.display()
            )));
        }

        let env = redb::Database::builder()
            .set_cache_size(config.cache_size)
            .create(&file_path)?;

        tracing::debug!(
            path = %path.display(),
            map_size,
            max_tables,
            version = config.version,
            "database opened"
        );

        Ok(Self {
            inner: Arc::new(DbInner {
                path: path.to_path_buf(),
                file_path,
                env,
                map_size: AtomicUsize::new(map_size),
                max_tables,
                version: config.version,
                flags: config.flags,
                registry: ExtractorRegistry::new(),
                stats: Statistics::new(),
                mapping: Mutex::new(None),
            }),
        })
    }

    /// Release this handle.
    ///
    /// The engine closes once every tree, transaction and iterator that
    /// shares it is gone as well.
    pub fn close(self) {
        tracing::debug!(
            path = %self.inner.path.display(),
            handles = Arc::strong_count(&self.inner),
            "database handle closed"
        );
    }

    /// Flush committed data to stable storage.
    ///
    /// Without `no_sync` every commit is already durable and this is a no-op.
    /// With `no_sync`, `force = true` commits an empty transaction with
    /// immediate durability, which persists everything committed before it.
    pub fn sync(&self, force: bool) -> Result<()> {
        if self.inner.flags.read_only || !self.inner.flags.no_sync || !force {
            return Ok(());
        }

        let mut txn = self.inner.env.begin_write()?;
        txn.set_durability(redb::Durability::Immediate);
        txn.commit()?;
        Ok(())
    }

    /// Change the map size limit.
    ///
    /// Raising it is how callers recover from `MapFull`.
    pub fn resize(&self, new_mapsize: usize) -> Result<()> {
        if new_mapsize == 0 {
            return Err(Error::invalid_arg("Map size must be greater than zero"));
        }
        let old = self.inner.map_size.swap(new_mapsize, Ordering::AcqRel);
        tracing::debug!(old, new = new_mapsize, "map size changed");
        Ok(())
    }

    /// Engine statistics.
    ///
    /// Briefly takes the writer slot, so it must not be called while the
    /// calling thread holds a write transaction.
    pub fn stats(&self) -> Result<DbStats> {
        let txn = self.inner.env.begin_write()?;
        let stats = txn.stats()?;
        let out = DbStats {
            tree_height: stats.tree_height(),
            allocated_pages: stats.allocated_pages(),
            leaf_pages: stats.leaf_pages(),
            branch_pages: stats.branch_pages(),
            stored_bytes: stats.stored_bytes(),
            metadata_bytes: stats.metadata_bytes(),
            fragmented_bytes: stats.fragmented_bytes(),
            page_size: stats.page_size(),
            map_size: self.get_mapsize(),
        };
        txn.abort()?;
        Ok(out)
    }

    pub fn get_mapsize(&self) -> usize {
        self.inner.map_size.load(Ordering::Acquire)
    }

    pub fn max_tables(&self) -> u32 {
        self.inner.max_tables
    }

    /// Packed schema version (`major << 16 | minor`).
    pub fn version(&self) -> u32 {
        self.inner.version
    }

    pub fn flags(&self) -> OpenFlags {
        self.inner.flags
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Underlying engine handle.
    pub fn get_env(&self) -> &redb::Database {
        &self.inner.env
    }

    /// Register a key extractor for `(version, flags)` and return its id.
    ///
    /// Indexes created with the same flags on a database opened at `version`
    /// resolve to this function, including indexes reloaded from disk.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use wtree::{schema_version, Db, OpenFlags, INDEX_FLAG_UNIQUE};
    ///
    /// # fn main() -> wtree::Result<()> {
    /// let db = Db::open("/var/lib/app", 0, 0, schema_version(1, 0), OpenFlags::default())?;
    /// let id = db.register_key_extractor(schema_version(1, 0), INDEX_FLAG_UNIQUE, |value, _| {
    ///     value.split(|b| *b == b'|').next().map(|field| field.to_vec())
    /// });
    /// assert_eq!(id >> 32, schema_version(1, 0) as u64);
    /// # Ok(())
    /// # }
    /// ```
    pub fn register_key_extractor<F>(&self, version: u32, flags: u32, extractor: F) -> u64
    where
        F: Fn(&[u8], Option<&[u8]>) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.inner
            .registry
            .register(version, flags, Arc::new(extractor))
    }

    pub fn lookup_extractor(&self, extractor_id: u64) -> Option<KeyExtractor> {
        self.inner.registry.lookup(extractor_id)
    }

    /// Get statistics snapshot
    pub fn statistics(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub(crate) fn stats_hub(&self) -> &Statistics {
        &self.inner.stats
    }

    pub(crate) fn same_as(&self, other: &Db) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.inner.flags.read_only {
            return Err(Error::invalid_arg("Database is opened read-only"));
        }
        Ok(())
    }

    /// Fail if creating one more named table would exceed `max_tables`.
    pub(crate) fn ensure_table_slot(&self, txn: &WriteTransaction) -> Result<()> {
        let used = txn.list_tables()?.count() + txn.list_multimap_tables()?.count();
        if used >= self.inner.max_tables as usize {
            return Err(Error::generic(format!(
                "Maximum number of named tables ({}) reached",
                self.inner.max_tables
            )));
        }
        Ok(())
    }

    pub(crate) fn table_exists(txn: &WriteTransaction, name: &str) -> Result<bool> {
        Ok(txn.list_tables()?.any(|t| t.name() == name))
    }

    /// Commit-time map size check.
    pub(crate) fn check_map_size(&self, txn: &WriteTransaction) -> Result<()> {
        let stats = txn.stats()?;
        let used = stats.allocated_pages() * stats.page_size() as u64;
        let limit = self.get_mapsize() as u64;
        if used > limit {
            return Err(Error::map_full(format!(
                "Database map is full ({} bytes allocated, limit {} bytes)",
                used, limit
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.inner.path)
            .field("map_size", &self.get_mapsize())
            .field("max_tables", &self.inner.max_tables)
            .field("version", &self.inner.version)
            .field("flags", &self.inner.flags)
            .field("registry", &self.inner.registry)
            .finish()
    }
}
