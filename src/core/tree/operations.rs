use crate::core::table;
use crate::core::txn::Txn;
use crate::error::{Error, Result};

use super::Tree;

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_arg("Key cannot be empty"));
    }
    Ok(())
}

impl Tree {
    /// Get the value stored under `key`.
    ///
    /// Works in read and write transactions. The value is copied out because
    /// engine guards do not outlive the lookup.
    ///
    /// # Errors
    ///
    /// * `NotFound` - Key does not exist
    pub fn get_txn(&self, txn: &Txn, key: &[u8]) -> Result<Vec<u8>> {
        let start = std::time::Instant::now();
        let result = self.check_txn(txn).and_then(|_| {
            txn.open_table(&self.name)?
                .get(key)?
                .ok_or_else(|| Error::not_found("Key not found"))
        });
        if result.is_ok() {
            self.db
                .stats_hub()
                .record_get(start.elapsed().as_nanos() as u64);
        }
        self.observe(result)
    }

    /// Insert a new key.
    ///
    /// Index pairs are written before the main entry, so a unique violation
    /// fails the call before the main table changes.
    ///
    /// # Errors
    ///
    /// * `KeyExists` - Key already present
    /// * `IndexError` - A unique index already maps the extracted key to
    ///   another primary key
    /// * `InvalidArg` - Empty key, or `txn` is read-only
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use wtree::{Db, Tree, TreeFlags};
    /// # fn main() -> wtree::Result<()> {
    /// # let db = Db::builder().open("/var/lib/app")?;
    /// let tree = Tree::open(&db, "orders", TreeFlags::default(), 0)?;
    /// let txn = db.begin_write()?;
    /// tree.insert_one_txn(&txn, b"order:1", b"pending")?;
    /// tree.insert_one_txn(&txn, b"order:2", b"shipped")?;
    /// txn.commit()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn insert_one_txn(&self, txn: &Txn, key: &[u8], value: &[u8]) -> Result<()> {
        let start = std::time::Instant::now();
        let result = self
            .check_txn(txn)
            .and_then(|_| self.insert_inner(txn, key, value));
        if result.is_ok() {
            self.db
                .stats_hub()
                .record_insert(start.elapsed().as_nanos() as u64, false);
        }
        self.observe(result)
    }

    /// Replace the value of `key`, inserting it when absent.
    ///
    /// Unique constraints for the new value are checked before the old
    /// index pairs are removed, so a violation leaves the transaction as it
    /// was.
    pub fn update_txn(&self, txn: &Txn, key: &[u8], value: &[u8]) -> Result<()> {
        let start = std::time::Instant::now();
        let result = self
            .check_txn(txn)
            .and_then(|_| self.update_inner(txn, key, value));
        if let Ok(replaced) = result {
            self.db
                .stats_hub()
                .record_insert(start.elapsed().as_nanos() as u64, replaced);
        }
        self.observe(result).map(|_| ())
    }

    /// Insert or update `key`.
    ///
    /// When the key exists and the tree has a merge callback, the stored
    /// value becomes `merge(old, value)`; otherwise `value` overwrites it.
    pub fn upsert_txn(&self, txn: &Txn, key: &[u8], value: &[u8]) -> Result<()> {
        let start = std::time::Instant::now();
        let result = self
            .check_txn(txn)
            .and_then(|_| self.upsert_inner(txn, key, value));
        if let Ok(replaced) = result {
            let stats = self.db.stats_hub();
            stats.record_upsert();
            stats.record_insert(start.elapsed().as_nanos() as u64, replaced);
        }
        self.observe(result).map(|_| ())
    }

    /// Delete `key` and its index pairs.
    ///
    /// Returns `false` when the key was not present; that is not an error.
    pub fn delete_one_txn(&self, txn: &Txn, key: &[u8]) -> Result<bool> {
        let start = std::time::Instant::now();
        let result = self
            .check_txn(txn)
            .and_then(|_| self.delete_inner(txn, key));
        if let Ok(true) = result {
            self.db
                .stats_hub()
                .record_delete(start.elapsed().as_nanos() as u64);
        }
        self.observe(result)
    }

    /// Whether `key` exists. Any failure reads as `false`.
    pub fn exists_txn(&self, txn: &Txn, key: &[u8]) -> bool {
        self.check_txn(txn)
            .and_then(|_| txn.open_table(&self.name)?.get(key))
            .map(|v| v.is_some())
            .unwrap_or(false)
    }

    /// Insert every pair in order, stopping at the first error.
    pub fn insert_many_txn<K, V>(&self, txn: &Txn, items: &[(K, V)]) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        for (key, value) in items {
            self.insert_one_txn(txn, key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    /// Upsert every pair in order, stopping at the first error.
    pub fn upsert_many_txn<K, V>(&self, txn: &Txn, items: &[(K, V)]) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        for (key, value) in items {
            self.upsert_txn(txn, key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    /// Get a copy of the value stored under `key` in its own read transaction.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.db.with_read_txn(|txn| self.get_txn(txn, key))
    }

    /// Insert a new key in its own write transaction.
    pub fn insert_one(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .with_write_txn(|txn| self.insert_one_txn(txn, key, value))
    }

    pub fn update(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.with_write_txn(|txn| self.update_txn(txn, key, value))
    }

    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.with_write_txn(|txn| self.upsert_txn(txn, key, value))
    }

    pub fn delete_one(&self, key: &[u8]) -> Result<bool> {
        self.db.with_write_txn(|txn| self.delete_one_txn(txn, key))
    }

    /// Whether `key` exists, checked in its own read transaction.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.db
            .with_read_txn(|txn| Ok(self.exists_txn(txn, key)))
            .unwrap_or(false)
    }

    fn insert_inner(&self, txn: &Txn, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        let mut main = txn.open_table_mut(&self.name)?;
        if table::get(&main, key)?.is_some() {
            return Err(Error::key_exists("Key already exists"));
        }

        self.indexes_insert(txn, key, value)?;
        main.insert(key, value)?;
        self.bump_count(1);
        Ok(())
    }

    /// Returns whether an existing value was replaced.
    pub(crate) fn update_inner(&self, txn: &Txn, key: &[u8], value: &[u8]) -> Result<bool> {
        validate_key(key)?;
        let mut main = txn.open_table_mut(&self.name)?;
        let old = table::get(&main, key)?;

        let new_keys = self.prepare_index_keys(txn, key, value)?;
        if let Some(old) = &old {
            self.indexes_delete(txn, key, old)?;
        }
        self.apply_index_keys(txn, key, &new_keys)?;

        main.insert(key, value)?;
        if old.is_none() {
            self.bump_count(1);
        }
        Ok(old.is_some())
    }

    fn upsert_inner(&self, txn: &Txn, key: &[u8], value: &[u8]) -> Result<bool> {
        let merge = match &self.merge_fn {
            Some(merge) => merge,
            None => return self.update_inner(txn, key, value),
        };

        let existing = txn.open_table(&self.name)?.get(key)?;
        match existing {
            Some(old) => {
                let merged = merge(&old, value)
                    .ok_or_else(|| Error::generic("Merge callback returned no value"))?;
                self.update_inner(txn, key, &merged)
            }
            None => self.update_inner(txn, key, value),
        }
    }

    pub(crate) fn delete_inner(&self, txn: &Txn, key: &[u8]) -> Result<bool> {
        let mut main = txn.open_table_mut(&self.name)?;
        let Some(old) = table::get(&main, key)? else {
            return Ok(false);
        };

        self.indexes_delete(txn, key, &old)?;
        main.remove(key)?;
        self.bump_count(-1);
        Ok(true)
    }

    pub(crate) fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.db.stats_hub().record_error(e);
        }
        result
    }
}
