use std::fmt;
use std::sync::Arc;

use crate::constants::{build_extractor_id, index_flags, INDEX_META_TABLE};
use crate::core::db::Db;
use crate::core::registry::KeyExtractor;
use crate::core::table::{self, TableRef};
use crate::core::txn::{IndexTableDef, Txn};
use crate::error::{Error, Result};

use super::persistence::{self, IndexMetadata};
use super::{index_table_name, CompareFn, Tree};

/// Settings for a new secondary index.
///
/// The key extractor is not part of the configuration: it is resolved from
/// the database registry by `(db.version(), flags)`.
#[derive(Clone, Default)]
pub struct IndexConfig {
    pub name: String,
    /// Opaque blob handed to the extractor on every call.
    pub user_data: Option<Vec<u8>>,
    pub unique: bool,
    pub sparse: bool,
    pub compare: Option<CompareFn>,
}

impl IndexConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn user_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.user_data = Some(data.into());
        self
    }

    pub fn unique(mut self, enable: bool) -> Self {
        self.unique = enable;
        self
    }

    pub fn sparse(mut self, enable: bool) -> Self {
        self.sparse = enable;
        self
    }

    /// Comparator for exact matches when seeking the index.
    ///
    /// Only the extractor id, flags and user data are persisted. After a
    /// reopen the index seeks bytewise until the comparator is installed
    /// again with [`Tree::set_index_compare`].
    pub fn compare<F>(mut self, compare: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> std::cmp::Ordering + Send + Sync + 'static,
    {
        self.compare = Some(Arc::new(compare));
        self
    }

    pub fn flags(&self) -> u32 {
        index_flags(self.unique, self.sparse)
    }
}

impl fmt::Debug for IndexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexConfig")
            .field("name", &self.name)
            .field("user_data", &self.user_data)
            .field("unique", &self.unique)
            .field("sparse", &self.sparse)
            .field("compare", &self.compare.is_some())
            .finish()
    }
}

/// Attached secondary index.
pub struct Index {
    pub(crate) name: String,
    pub(crate) table_name: String,
    pub(crate) extractor_id: u64,
    pub(crate) extractor: KeyExtractor,
    pub(crate) user_data: Option<Vec<u8>>,
    pub(crate) unique: bool,
    pub(crate) sparse: bool,
    pub(crate) compare: Option<CompareFn>,
}

impl Index {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine table holding `(index_key, primary_key)` pairs.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn extractor_id(&self) -> u64 {
        self.extractor_id
    }

    pub fn user_data(&self) -> Option<&[u8]> {
        self.user_data.as_deref()
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// Index key for `value`, or `None` when the value is not indexed.
    pub fn extract(&self, value: &[u8]) -> Option<Vec<u8>> {
        (self.extractor)(value, self.user_data.as_deref())
    }

    pub(crate) fn metadata(&self) -> IndexMetadata {
        IndexMetadata {
            extractor_id: self.extractor_id,
            flags: index_flags(self.unique, self.sparse),
            user_data: self.user_data.clone(),
        }
    }

    fn duplicate_error(&self) -> Error {
        Error::index_error(format!("Duplicate key for unique index '{}'", self.name))
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("table_name", &self.table_name)
            .field("extractor_id", &format_args!("{:#018x}", self.extractor_id))
            .field("unique", &self.unique)
            .field("sparse", &self.sparse)
            .finish()
    }
}

pub(crate) fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(':') {
        return Err(Error::invalid_arg(format!(
            "Invalid index name '{}': must be non-empty and contain no ':'",
            name
        )));
    }
    Ok(())
}

impl Tree {
    /// Extract index keys for `value` and check unique constraints.
    ///
    /// Nothing is written, so a violation leaves the transaction untouched.
    /// Existing pairs that already point at `key` do not count as conflicts.
    pub(crate) fn prepare_index_keys(
        &self,
        txn: &Txn,
        key: &[u8],
        value: &[u8],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        let mut keys = Vec::with_capacity(self.indexes.len());
        for index in &self.indexes {
            let extracted = index.extract(value);
            if let (true, Some(ek)) = (index.unique, extracted.as_deref()) {
                let table = txn.open_multimap(&index.table_name)?;
                if table.primary_keys(ek)?.iter().any(|pk| pk.as_slice() != key) {
                    return Err(index.duplicate_error());
                }
            }
            keys.push(extracted);
        }
        Ok(keys)
    }

    /// Insert prepared `(index_key, key)` pairs. Existing pairs are left as is.
    pub(crate) fn apply_index_keys(
        &self,
        txn: &Txn,
        key: &[u8],
        keys: &[Option<Vec<u8>>],
    ) -> Result<()> {
        for (index, ek) in self.indexes.iter().zip(keys) {
            if let Some(ek) = ek {
                let mut table = txn.open_multimap_mut(&index.table_name)?;
                table.insert(ek.as_slice(), key)?;
            }
        }
        Ok(())
    }

    /// Add index pairs for a new `(key, value)`.
    pub(crate) fn indexes_insert(&self, txn: &Txn, key: &[u8], value: &[u8]) -> Result<()> {
        if self.indexes.is_empty() {
            return Ok(());
        }
        let keys = self.prepare_index_keys(txn, key, value)?;
        self.apply_index_keys(txn, key, &keys)
    }

    /// Remove the index pairs derived from the stored `value` of `key`.
    /// Missing pairs are ignored.
    pub(crate) fn indexes_delete(&self, txn: &Txn, key: &[u8], value: &[u8]) -> Result<()> {
        for index in &self.indexes {
            if let Some(ek) = index.extract(value) {
                let mut table = txn.open_multimap_mut(&index.table_name)?;
                table.remove(ek.as_slice(), key)?;
            }
        }
        Ok(())
    }

    /// Attach a new secondary index and persist its metadata.
    ///
    /// The index table, its metadata record and the table-limit check all
    /// happen in one write transaction; the descriptor is attached only
    /// after that commits. Existing entries are not indexed until
    /// [`Tree::populate_index`] runs.
    ///
    /// # Errors
    ///
    /// * `InvalidArg` - Bad name, or no extractor registered for the
    ///   resulting extractor id
    /// * `KeyExists` - An index with this name is already attached
    ///
    /// # Example
    ///
    /// ```no_run
    /// use wtree::{schema_version, Db, IndexConfig, Tree, TreeFlags, INDEX_FLAG_UNIQUE};
    ///
    /// # fn main() -> wtree::Result<()> {
    /// let db = Db::builder().open("/var/lib/app")?;
    /// db.register_key_extractor(schema_version(1, 0), INDEX_FLAG_UNIQUE, |value, _| {
    ///     Some(value.to_vec())
    /// });
    /// let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0)?;
    /// tree.add_index(IndexConfig::new("email").unique(true))?;
    /// tree.populate_index("email")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn add_index(&mut self, config: IndexConfig) -> Result<()> {
        validate_index_name(&config.name)?;
        if self.find_index(&config.name).is_some() {
            return Err(Error::key_exists(format!(
                "Index '{}' already exists",
                config.name
            )));
        }

        let flags = config.flags();
        let extractor_id = build_extractor_id(self.db.version(), flags);
        let extractor = self.db.lookup_extractor(extractor_id).ok_or_else(|| {
            Error::invalid_arg(format!(
                "No key extractor registered for id {:#018x} (index '{}')",
                extractor_id, config.name
            ))
        })?;

        let index = Index {
            table_name: index_table_name(&self.name, &config.name),
            name: config.name,
            extractor_id,
            extractor,
            user_data: config.user_data,
            unique: config.unique,
            sparse: config.sparse,
            compare: config.compare,
        };

        let db = &self.db;
        let tree_name = &self.name;
        db.with_write_txn(|txn| {
            let w = txn.write_txn()?;
            if !txn.multimap_names()?.contains(&index.table_name) {
                db.ensure_table_slot(w)?;
                w.open_multimap_table(IndexTableDef::new(&index.table_name))?;
            }
            if !Db::table_exists(w, INDEX_META_TABLE)? {
                db.ensure_table_slot(w)?;
            }
            persistence::save_metadata(txn, tree_name, &index.name, &index.metadata())
        })?;

        tracing::debug!(
            tree = %self.name,
            index = %index.name,
            extractor_id,
            unique = index.unique,
            sparse = index.sparse,
            "index added"
        );
        self.indexes.push(index);
        Ok(())
    }

    /// Index every existing entry of the tree under `index_name`.
    ///
    /// Runs in a single write transaction; a unique violation aborts it.
    pub fn populate_index(&self, index_name: &str) -> Result<()> {
        let index = self.find_index(index_name).ok_or_else(|| {
            Error::not_found(format!("Index '{}' not found", index_name))
        })?;

        let indexed = self.db.with_write_txn(|txn| {
            let main = txn.open_table(&self.name)?;
            let mut idx = txn.open_multimap_mut(&index.table_name)?;
            let mut indexed = 0u64;
            main.walk(
                (std::ops::Bound::Unbounded, std::ops::Bound::Unbounded),
                false,
                |key, value| {
                    let Some(ek) = index.extract(value) else {
                        return Ok(true);
                    };
                    if index.unique
                        && table::primary_keys(&idx, &ek)?
                            .iter()
                            .any(|pk| pk.as_slice() != key)
                    {
                        return Err(index.duplicate_error());
                    }
                    idx.insert(ek.as_slice(), key)?;
                    indexed += 1;
                    Ok(true)
                },
            )?;
            Ok(indexed)
        })?;

        tracing::debug!(tree = %self.name, index = index_name, indexed, "index populated");
        Ok(())
    }

    /// Drop an attached index: its table, its metadata record and the
    /// descriptor.
    pub fn drop_index(&mut self, index_name: &str) -> Result<()> {
        let pos = self
            .indexes
            .iter()
            .position(|i| i.name() == index_name)
            .ok_or_else(|| Error::not_found(format!("Index '{}' not found", index_name)))?;

        let table_name = self.indexes[pos].table_name.clone();
        let tree_name = &self.name;
        self.db.with_write_txn(|txn| {
            let w = txn.write_txn()?;
            w.delete_multimap_table(IndexTableDef::new(&table_name))?;
            persistence::delete_metadata(txn, tree_name, index_name)?;
            Ok(())
        })?;

        self.indexes.remove(pos);
        tracing::debug!(tree = %self.name, index = index_name, "index dropped");
        Ok(())
    }

    /// Install the seek comparator of an attached index.
    ///
    /// Used to restore a comparator on an index reattached from disk.
    ///
    /// # Errors
    ///
    /// * `NotFound` - No attached index named `index_name`
    pub fn set_index_compare<F>(&mut self, index_name: &str, compare: F) -> Result<()>
    where
        F: Fn(&[u8], &[u8]) -> std::cmp::Ordering + Send + Sync + 'static,
    {
        let index = self
            .indexes
            .iter_mut()
            .find(|i| i.name == index_name)
            .ok_or_else(|| Error::not_found(format!("Index '{}' not found", index_name)))?;
        index.compare = Some(Arc::new(compare));
        Ok(())
    }

    pub fn has_index(&self, index_name: &str) -> bool {
        self.find_index(index_name).is_some()
    }

    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// Check that main table and index tables agree.
    ///
    /// Every indexed entry must have its pair, every pair must point at a
    /// live entry whose value still extracts to that index key, and unique
    /// indexes must hold at most one primary key per index key. The first
    /// inconsistency is reported as `IndexError`.
    pub fn verify_indexes(&self) -> Result<()> {
        if self.indexes.is_empty() {
            return Ok(());
        }

        self.db.with_read_txn(|txn| {
            let main = txn.open_table(&self.name)?;
            for index in &self.indexes {
                let idx = txn.open_multimap(&index.table_name)?;

                main.walk(
                    (std::ops::Bound::Unbounded, std::ops::Bound::Unbounded),
                    false,
                    |key, value| {
                        if let Some(ek) = index.extract(value) {
                            if !idx.contains_pair(&ek, key)? {
                                return Err(Error::index_error(format!(
                                    "Index '{}': missing entry for main tree key",
                                    index.name
                                )));
                            }
                        }
                        Ok(true)
                    },
                )?;

                let mut previous: Option<Vec<u8>> = None;
                idx.walk_pairs(|ek, pk| {
                    verify_pair(index, &main, ek, pk)?;
                    if index.unique && previous.as_deref() == Some(ek) {
                        return Err(Error::index_error(format!(
                            "Index '{}': duplicate entries for a unique key",
                            index.name
                        )));
                    }
                    previous = Some(ek.to_vec());
                    Ok(true)
                })?;
            }
            Ok(())
        })
    }
}

fn verify_pair(index: &Index, main: &TableRef<'_>, ek: &[u8], pk: &[u8]) -> Result<()> {
    let Some(value) = main.get(pk)? else {
        return Err(Error::index_error(format!(
            "Index '{}': orphaned entry points to a missing primary key",
            index.name
        )));
    };
    if index.extract(&value).as_deref() != Some(ek) {
        return Err(Error::index_error(format!(
            "Index '{}': stale entry does not match the stored value",
            index.name
        )));
    }
    Ok(())
}
