use std::cmp::Ordering;
use std::ops::Bound;

use crate::core::txn::Txn;
use crate::error::Result;

use super::Tree;

impl Tree {
    /// Visit entries from `start` (inclusive, or the first key) up to `end`
    /// (inclusive, or the last key) in ascending order.
    ///
    /// `visit` returns `false` to stop early. The borrowed key and value are
    /// only valid for the duration of the call.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use wtree::{Db, Tree, TreeFlags};
    /// # fn main() -> wtree::Result<()> {
    /// # let db = Db::builder().open("/var/lib/app")?;
    /// # let tree = Tree::open(&db, "events", TreeFlags::default(), 0)?;
    /// let txn = db.begin_read()?;
    /// let mut seen = Vec::new();
    /// tree.scan_range_txn(&txn, Some(&b"2024-01"[..]), Some(&b"2024-12"[..]), |k, _| {
    ///     seen.push(k.to_vec());
    ///     seen.len() < 100
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn scan_range_txn<F>(
        &self,
        txn: &Txn,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.check_txn(txn)?;
        let lower = start.map_or(Bound::Unbounded, Bound::Included);
        let result = txn.open_table(&self.name).and_then(|table| {
            table.walk((lower, Bound::Unbounded), false, |k, v| {
                if let Some(end) = end {
                    if self.compare_keys(k, end) == Ordering::Greater {
                        return Ok(false);
                    }
                }
                Ok(visit(k, v))
            })
        });
        self.db.stats_hub().record_scan();
        self.observe(result)
    }

    /// Visit entries from `high` down to `low`, both inclusive, in
    /// descending order.
    pub fn scan_reverse_txn<F>(
        &self,
        txn: &Txn,
        high: Option<&[u8]>,
        low: Option<&[u8]>,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.check_txn(txn)?;
        let upper = high.map_or(Bound::Unbounded, Bound::Included);
        let result = txn.open_table(&self.name).and_then(|table| {
            table.walk((Bound::Unbounded, upper), true, |k, v| {
                if let Some(high) = high {
                    if self.compare_keys(k, high) == Ordering::Greater {
                        return Ok(true);
                    }
                }
                if let Some(low) = low {
                    if self.compare_keys(k, low) == Ordering::Less {
                        return Ok(false);
                    }
                }
                Ok(visit(k, v))
            })
        });
        self.db.stats_hub().record_scan();
        self.observe(result)
    }

    /// Visit every entry whose key starts with `prefix`, in ascending order.
    pub fn scan_prefix_txn<F>(&self, txn: &Txn, prefix: &[u8], mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.check_txn(txn)?;
        let result = txn.open_table(&self.name).and_then(|table| {
            table.walk(
                (Bound::Included(prefix), Bound::Unbounded),
                false,
                |k, v| {
                    if !k.starts_with(prefix) {
                        return Ok(false);
                    }
                    Ok(visit(k, v))
                },
            )
        });
        self.db.stats_hub().record_scan();
        self.observe(result)
    }

    /// Read-modify-write a single key.
    ///
    /// `modify` sees the current value (or `None`) and returns the new one.
    /// Returning `None` deletes an existing key and does nothing for a
    /// missing one. Index maintenance applies as for [`Tree::update_txn`].
    pub fn modify_txn<F>(&self, txn: &Txn, key: &[u8], modify: F) -> Result<()>
    where
        F: FnOnce(Option<&[u8]>) -> Option<Vec<u8>>,
    {
        self.check_txn(txn)?;
        txn.write_txn()?;

        let current = txn.open_table(&self.name)?.get(key)?;
        match (modify(current.as_deref()), current.is_some()) {
            (Some(value), _) => self.update_txn(txn, key, &value),
            (None, true) => self.delete_one_txn(txn, key).map(|_| ()),
            (None, false) => Ok(()),
        }
    }

    /// Look up several keys; missing keys yield `None`.
    ///
    /// The first engine error aborts the whole lookup.
    pub fn get_many_txn<K>(&self, txn: &Txn, keys: &[K]) -> Result<Vec<Option<Vec<u8>>>>
    where
        K: AsRef<[u8]>,
    {
        self.check_txn(txn)?;
        let table = txn.open_table(&self.name)?;
        keys.iter()
            .map(|key| table.get(key.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| {
                self.db.stats_hub().record_error(&e);
                e
            })
    }
}
