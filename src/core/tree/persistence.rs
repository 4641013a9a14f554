//! Index metadata records.
//!
//! Each attached index has one record in the reserved meta table, keyed by
//! `"<tree>:<index>"`. Layout, all integers little-endian:
//!
//! ```text
//! offset  size  field
//!   0      8    extractor_id
//!   8      4    flags (bit 0 unique, bit 1 sparse)
//!  12      4    user_data_len
//!  16      N    user_data
//! ```

use std::ops::Bound;

use crate::constants::{
    INDEX_FLAG_SPARSE, INDEX_FLAG_UNIQUE, INDEX_META_HEADER_SIZE, INDEX_META_TABLE,
};
use crate::core::db::Db;
use crate::core::txn::Txn;
use crate::error::{Error, Result};

use super::index::{validate_index_name, Index};
use super::{index_table_name, Tree};

/// Decoded index metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    pub extractor_id: u64,
    pub flags: u32,
    /// `None` when the stored blob is empty.
    pub user_data: Option<Vec<u8>>,
}

impl IndexMetadata {
    pub fn is_unique(&self) -> bool {
        self.flags & INDEX_FLAG_UNIQUE != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.flags & INDEX_FLAG_SPARSE != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let data = self.user_data.as_deref().unwrap_or_default();
        let mut buf = Vec::with_capacity(INDEX_META_HEADER_SIZE + data.len());
        buf.extend_from_slice(&self.extractor_id.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
        buf
    }

    /// Decode a record, rejecting short headers and truncated blobs.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < INDEX_META_HEADER_SIZE {
            return Err(Error::invalid_arg(format!(
                "Index metadata too short: {} bytes",
                data.len()
            )));
        }

        let mut id = [0u8; 8];
        id.copy_from_slice(&data[0..8]);
        let mut flags = [0u8; 4];
        flags.copy_from_slice(&data[8..12]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&data[12..16]);
        let len = u32::from_le_bytes(len) as usize;

        let body = &data[INDEX_META_HEADER_SIZE..];
        if body.len() < len {
            return Err(Error::invalid_arg(format!(
                "Index metadata truncated: user_data needs {} bytes, {} present",
                len,
                body.len()
            )));
        }

        Ok(Self {
            extractor_id: u64::from_le_bytes(id),
            flags: u32::from_le_bytes(flags),
            user_data: (len > 0).then(|| body[..len].to_vec()),
        })
    }
}

fn meta_key(tree: &str, index: &str) -> String {
    format!("{}:{}", tree, index)
}

fn meta_table_exists(txn: &Txn) -> Result<bool> {
    Ok(txn.table_names()?.iter().any(|t| t == INDEX_META_TABLE))
}

/// Store the record for `tree:index` inside a write transaction.
pub(crate) fn save_metadata(
    txn: &Txn,
    tree: &str,
    index: &str,
    meta: &IndexMetadata,
) -> Result<()> {
    let mut table = txn.create_table_mut(INDEX_META_TABLE)?;
    let key = meta_key(tree, index);
    table.insert(key.as_bytes(), meta.encode().as_slice())?;
    Ok(())
}

/// Remove the record for `tree:index`. A missing record is not an error.
pub(crate) fn delete_metadata(txn: &Txn, tree: &str, index: &str) -> Result<()> {
    if !meta_table_exists(txn)? {
        return Ok(());
    }
    let mut table = txn.open_table_mut(INDEX_META_TABLE)?;
    let key = meta_key(tree, index);
    table.remove(key.as_bytes())?;
    Ok(())
}

fn read_metadata(txn: &Txn, tree: &str, index: &str) -> Result<Option<IndexMetadata>> {
    if !meta_table_exists(txn)? {
        return Ok(None);
    }
    let table = txn.open_table(INDEX_META_TABLE)?;
    match table.get(meta_key(tree, index).as_bytes())? {
        Some(raw) => IndexMetadata::decode(&raw).map(Some),
        None => Ok(None),
    }
}

fn persisted_names(txn: &Txn, tree: &str) -> Result<Vec<String>> {
    if !meta_table_exists(txn)? {
        return Ok(Vec::new());
    }
    let prefix = format!("{}:", tree);
    let table = txn.open_table(INDEX_META_TABLE)?;
    let mut names = Vec::new();
    table.walk(
        (Bound::Included(prefix.as_bytes()), Bound::Unbounded),
        false,
        |key, _| {
            let Some(rest) = key.strip_prefix(prefix.as_bytes()) else {
                return Ok(false);
            };
            names.push(String::from_utf8_lossy(rest).into_owned());
            Ok(true)
        },
    )?;
    Ok(names)
}

impl Tree {
    /// Rewrite the metadata record of an attached index.
    pub fn save_index(&self, index_name: &str) -> Result<()> {
        let index = self.find_index(index_name).ok_or_else(|| {
            Error::not_found(format!("Index '{}' not found", index_name))
        })?;
        self.db
            .with_write_txn(|txn| save_metadata(txn, &self.name, index_name, &index.metadata()))
    }

    /// Attach a persisted index by name.
    ///
    /// Returns `Ok(false)` without attaching when no extractor is registered
    /// for the stored extractor id; the index table is left untouched.
    ///
    /// # Errors
    ///
    /// * `NotFound` - No metadata record, or its index table is missing
    /// * `KeyExists` - The index is already attached
    /// * `InvalidArg` - The record does not decode
    pub fn load_index(&mut self, index_name: &str) -> Result<bool> {
        validate_index_name(index_name)?;
        if self.find_index(index_name).is_some() {
            return Err(Error::key_exists(format!(
                "Index '{}' already loaded",
                index_name
            )));
        }

        let table_name = index_table_name(&self.name, index_name);
        let (meta, has_table) = self.db.with_read_txn(|txn| {
            let meta = read_metadata(txn, &self.name, index_name)?;
            let has_table = txn.multimap_names()?.contains(&table_name);
            Ok((meta, has_table))
        })?;

        let meta = meta.ok_or_else(|| {
            Error::not_found(format!("No metadata for index '{}'", index_name))
        })?;

        let Some(extractor) = self.db.lookup_extractor(meta.extractor_id) else {
            tracing::warn!(
                tree = %self.name,
                index = index_name,
                extractor_id = meta.extractor_id,
                "no key extractor registered, index skipped"
            );
            return Ok(false);
        };

        if !has_table {
            return Err(Error::not_found(format!(
                "Index table '{}' does not exist",
                table_name
            )));
        }

        self.indexes.push(Index {
            name: index_name.to_string(),
            table_name,
            extractor_id: meta.extractor_id,
            extractor,
            unique: meta.is_unique(),
            sparse: meta.is_sparse(),
            user_data: meta.user_data,
            compare: None,
        });
        Ok(true)
    }

    /// Attach every persisted index of this tree. Failures are logged and
    /// skipped.
    pub(crate) fn auto_load_indexes(&mut self) {
        let names = match self.list_persisted() {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(tree = %self.name, error = %e, "failed to list persisted indexes");
                return;
            }
        };

        for name in names {
            if let Err(e) = self.load_index(&name) {
                tracing::warn!(
                    tree = %self.name,
                    index = %name,
                    error = %e,
                    "failed to load persisted index"
                );
            }
        }
    }

    /// Names of indexes persisted for this tree, attached or not.
    pub fn list_persisted(&self) -> Result<Vec<String>> {
        self.db.with_read_txn(|txn| persisted_names(txn, &self.name))
    }

    /// Extractor id stored for `index_name`.
    pub fn get_extractor_id(&self, index_name: &str) -> Result<u64> {
        if let Some(index) = self.find_index(index_name) {
            return Ok(index.extractor_id);
        }
        let meta = self
            .db
            .with_read_txn(|txn| read_metadata(txn, &self.name, index_name))?;
        meta.map(|m| m.extractor_id)
            .ok_or_else(|| Error::not_found(format!("Index '{}' not found", index_name)))
    }
}

/// Persisted metadata for `tree:index`, read in its own transaction.
pub fn read_index_metadata(db: &Db, tree: &str, index: &str) -> Result<Option<IndexMetadata>> {
    db.with_read_txn(|txn| read_metadata(txn, tree, index))
}

