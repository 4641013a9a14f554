use std::cmp::Ordering;
use std::ops::Bound;

use crate::core::table::Entry;
use crate::core::txn::Txn;
use crate::error::Result;

use super::Tree;

/// Predicate over a borrowed `(key, value)` pair.
pub type Predicate<'p> = &'p mut dyn FnMut(&[u8], &[u8]) -> bool;

impl Tree {
    /// Delete every entry in `[start, end]` for which `predicate` holds,
    /// together with its index pairs. Returns the number deleted.
    pub fn delete_if_txn<F>(
        &self,
        txn: &Txn,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        mut predicate: F,
    ) -> Result<usize>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.check_txn(txn)?;
        let result = self.delete_matching(txn, start, end, &mut predicate);
        self.db.stats_hub().record_scan();
        self.observe(result)
    }

    fn delete_matching(
        &self,
        txn: &Txn,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        predicate: Predicate<'_>,
    ) -> Result<usize> {
        txn.write_txn()?;

        // Values are copied out first; the index pairs are derived from them.
        let matched = self.collect_matching(txn, start, end, Some(predicate), 0)?;

        let mut main = txn.open_table_mut(&self.name)?;
        for (key, value) in &matched {
            let begin = std::time::Instant::now();
            self.indexes_delete(txn, key, value)?;
            main.remove(key.as_slice())?;
            self.bump_count(-1);
            self.db
                .stats_hub()
                .record_delete(begin.elapsed().as_nanos() as u64);
        }
        Ok(matched.len())
    }

    /// Copy out entries in `[start, end]`, optionally filtered.
    ///
    /// Stops after `max_count` entries when it is non-zero.
    pub fn collect_range_txn(
        &self,
        txn: &Txn,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        predicate: Option<Predicate<'_>>,
        max_count: usize,
    ) -> Result<Vec<Entry>> {
        self.check_txn(txn)?;
        let result = self.collect_matching(txn, start, end, predicate, max_count);
        self.db.stats_hub().record_scan();
        self.observe(result)
    }

    fn collect_matching(
        &self,
        txn: &Txn,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        mut predicate: Option<Predicate<'_>>,
        max_count: usize,
    ) -> Result<Vec<Entry>> {
        let lower = start.map_or(Bound::Unbounded, Bound::Included);
        let table = txn.open_table(&self.name)?;
        let mut out = Vec::new();
        table.walk((lower, Bound::Unbounded), false, |k, v| {
            if let Some(end) = end {
                if self.compare_keys(k, end) == Ordering::Greater {
                    return Ok(false);
                }
            }
            let keep = match predicate.as_mut() {
                Some(pred) => pred(k, v),
                None => true,
            };
            if keep {
                out.push((k.to_vec(), v.to_vec()));
            }
            Ok(max_count == 0 || out.len() < max_count)
        })?;
        Ok(out)
    }

    /// Existence flag for each key, in order.
    pub fn exists_many_txn<K>(&self, txn: &Txn, keys: &[K]) -> Result<Vec<bool>>
    where
        K: AsRef<[u8]>,
    {
        self.check_txn(txn)?;
        let table = txn.open_table(&self.name)?;
        keys.iter()
            .map(|key| table.get(key.as_ref()).map(|v| v.is_some()))
            .collect()
    }
}
