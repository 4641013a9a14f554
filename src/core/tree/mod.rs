use std::cmp::Ordering as KeyOrdering;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::constants::{INDEX_META_TABLE, INDEX_TABLE_PREFIX};
use crate::core::db::Db;
use crate::core::txn::{IndexTableDef, MainTableDef, Txn};
use crate::error::{Error, Result};

// Re-export public types
pub use self::index::{Index, IndexConfig};
pub use self::persistence::IndexMetadata;

pub mod bulk;
pub mod index;
pub mod operations;
pub mod persistence;
pub mod scan;

/// Custom key ordering for range bounds and exact matches.
pub type CompareFn = Arc<dyn Fn(&[u8], &[u8]) -> KeyOrdering + Send + Sync>;

/// Upsert merge callback: `(old, new) -> merged`.
///
/// Returning `None` fails the upsert.
pub type MergeFn = Arc<dyn Fn(&[u8], &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Options for [`Tree::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeFlags {
    /// Create the main table when it does not exist yet.
    pub create: bool,
}

impl TreeFlags {
    pub fn open_existing() -> Self {
        Self { create: false }
    }
}

impl Default for TreeFlags {
    fn default() -> Self {
        Self { create: true }
    }
}

/// A named ordered collection plus its secondary indexes.
///
/// Index descriptors are owned by the handle and maintained, in the order
/// they were attached, by every mutating operation.
pub struct Tree {
    pub(crate) db: Db,
    pub(crate) name: String,
    pub(crate) indexes: Vec<Index>,
    pub(crate) merge_fn: Option<MergeFn>,
    pub(crate) compare: Option<CompareFn>,
    pub(crate) entry_count: AtomicI64,
}

pub(crate) fn index_table_name(tree: &str, index: &str) -> String {
    format!("{}{}:{}", INDEX_TABLE_PREFIX, tree, index)
}

pub(crate) fn validate_tree_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_arg("Tree name cannot be empty"));
    }
    if name == INDEX_META_TABLE || name.starts_with(INDEX_TABLE_PREFIX) {
        return Err(Error::invalid_arg(format!(
            "Tree name '{}' is reserved",
            name
        )));
    }
    // Index tables and metadata keys are found by the `<tree>:` prefix.
    if name.contains(':') {
        return Err(Error::invalid_arg(format!(
            "Tree name '{}' cannot contain ':'",
            name
        )));
    }
    Ok(())
}

impl Tree {
    /// Open a tree, creating its table unless `flags.create` is false.
    ///
    /// Persisted indexes are reattached; an index whose extractor is not
    /// registered on `db` is skipped with a warning. `entry_count_hint`
    /// seeds [`Tree::count`].
    ///
    /// # Errors
    ///
    /// * `InvalidArg` - Reserved or empty name, or a name containing `:`
    /// * `NotFound` - Table missing and `flags.create` is false (or the
    ///   database is read-only)
    ///
    /// # Example
    ///
    /// ```no_run
    /// use wtree::{Db, DbBuilder, Tree, TreeFlags};
    ///
    /// # fn main() -> wtree::Result<()> {
    /// let db = DbBuilder::new().open("/var/lib/app")?;
    /// let tree = Tree::open(&db, "users", TreeFlags::default(), 0)?;
    /// tree.insert_one(b"user:1", b"alice")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(db: &Db, name: &str, flags: TreeFlags, entry_count_hint: u64) -> Result<Self> {
        validate_tree_name(name)?;

        if !Self::exists(db, name) {
            if !flags.create || db.flags().read_only {
                return Err(Error::not_found(format!("Tree '{}' does not exist", name)));
            }
            db.with_write_txn(|txn| {
                let w = txn.write_txn()?;
                if !Db::table_exists(w, name)? {
                    db.ensure_table_slot(w)?;
                    w.open_table(MainTableDef::new(name))?;
                }
                Ok(())
            })?;
            tracing::debug!(tree = name, "tree created");
        }

        let mut tree = Self {
            db: db.clone(),
            name: name.to_string(),
            indexes: Vec::new(),
            merge_fn: None,
            compare: None,
            entry_count: AtomicI64::new(entry_count_hint.min(i64::MAX as u64) as i64),
        };
        tree.auto_load_indexes();

        tracing::debug!(
            tree = name,
            indexes = tree.indexes.len(),
            "tree opened"
        );
        Ok(tree)
    }

    /// Release the handle. Tables stay on disk.
    pub fn close(self) {
        tracing::debug!(tree = %self.name, "tree closed");
    }

    /// Delete a tree, its index tables and its index metadata in one
    /// write transaction.
    pub fn delete(db: &Db, name: &str) -> Result<()> {
        validate_tree_name(name)?;
        let index_prefix = format!("{}{}:", INDEX_TABLE_PREFIX, name);
        let meta_prefix = format!("{}:", name);

        let dropped = db.with_write_txn(|txn| {
            let w = txn.write_txn()?;
            if !Db::table_exists(w, name)? {
                return Err(Error::not_found(format!("Tree '{}' does not exist", name)));
            }

            let index_tables: Vec<String> = txn
                .multimap_names()?
                .into_iter()
                .filter(|t| t.starts_with(&index_prefix))
                .collect();
            for table in &index_tables {
                w.delete_multimap_table(IndexTableDef::new(table))?;
            }

            if Db::table_exists(w, INDEX_META_TABLE)? {
                let mut meta = w.open_table(MainTableDef::new(INDEX_META_TABLE))?;
                let mut stale = Vec::new();
                crate::core::table::walk(
                    &meta,
                    (
                        std::ops::Bound::Included(meta_prefix.as_bytes()),
                        std::ops::Bound::Unbounded,
                    ),
                    false,
                    |k, _| {
                        if !k.starts_with(meta_prefix.as_bytes()) {
                            return Ok(false);
                        }
                        stale.push(k.to_vec());
                        Ok(true)
                    },
                )?;
                for key in &stale {
                    meta.remove(key.as_slice())?;
                }
            }

            w.delete_table(MainTableDef::new(name))?;
            Ok(index_tables.len())
        })?;

        tracing::debug!(tree = name, indexes = dropped, "tree deleted");
        Ok(())
    }

    /// Whether a tree named `name` exists. Errors read as `false`.
    pub fn exists(db: &Db, name: &str) -> bool {
        db.with_read_txn(|txn| Ok(txn.table_names()?.iter().any(|t| t == name)))
            .unwrap_or(false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entries observed by this handle since open, seeded by the open hint.
    ///
    /// Advisory only; scan the tree when an exact figure is needed.
    pub fn count(&self) -> u64 {
        self.entry_count.load(Ordering::Relaxed).max(0) as u64
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Install a key comparator.
    ///
    /// Physical order stays bytewise; the comparator decides where range
    /// scans stop and what counts as an exact match when seeking. Set it
    /// before the tree is used.
    pub fn set_compare<F>(&mut self, compare: F)
    where
        F: Fn(&[u8], &[u8]) -> KeyOrdering + Send + Sync + 'static,
    {
        self.compare = Some(Arc::new(compare));
    }

    /// Install the merge callback used by upserts on existing keys.
    pub fn set_merge_fn<F>(&mut self, merge: F)
    where
        F: Fn(&[u8], &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.merge_fn = Some(Arc::new(merge));
    }

    /// Names of attached indexes in maintenance order.
    pub fn indexes(&self) -> Vec<&str> {
        self.indexes.iter().map(|i| i.name()).collect()
    }

    pub(crate) fn compare_keys(&self, a: &[u8], b: &[u8]) -> KeyOrdering {
        match &self.compare {
            Some(cmp) => cmp(a, b),
            None => a.cmp(b),
        }
    }

    pub(crate) fn check_txn(&self, txn: &Txn) -> Result<()> {
        txn.ensure_db(&self.db)
    }

    pub(crate) fn find_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name() == name)
    }

    pub(crate) fn bump_count(&self, delta: i64) {
        self.entry_count.fetch_add(delta, Ordering::Relaxed);
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("name", &self.name)
            .field("indexes", &self.indexes())
            .field("merge_fn", &self.merge_fn.is_some())
            .field("compare", &self.compare.is_some())
            .field("entry_count", &self.count())
            .finish()
    }
}
