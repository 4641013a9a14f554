use std::cmp::Ordering;
use std::fmt;

use crate::core::table::{CursorOp, Entry};
use crate::core::tree::{CompareFn, Index, Tree};
use crate::core::txn::Txn;
use crate::error::{Error, Result};

/// Seek targets carry no primary key.
const NO_PK: &[u8] = &[];

enum TxnSlot<'t> {
    Owned(Txn),
    Borrowed(&'t Txn),
}

impl TxnSlot<'_> {
    fn get(&self) -> &Txn {
        match self {
            TxnSlot::Owned(txn) => txn,
            TxnSlot::Borrowed(txn) => txn,
        }
    }
}

/// Bidirectional cursor over a tree or one of its indexes.
///
/// A main-table iterator yields `(key, value)`. An index iterator yields
/// `(index_key, primary_key)` pairs ordered by index key, then primary key.
/// Positioning calls return `Ok(false)` and leave the iterator invalid when
/// there is no entry to land on.
///
/// # Example
///
/// ```no_run
/// # use wtree::{Db, Tree, TreeFlags, TreeIterator};
/// # fn main() -> wtree::Result<()> {
/// # let db = Db::builder().open("/var/lib/app")?;
/// # let tree = Tree::open(&db, "events", TreeFlags::default(), 0)?;
/// let mut iter = TreeIterator::create(&tree)?;
/// let mut ok = iter.first()?;
/// while ok {
///     println!("{:?} => {:?}", iter.key(), iter.value());
///     ok = iter.next()?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct TreeIterator<'t> {
    tree: &'t Tree,
    txn: TxnSlot<'t>,
    index: Option<&'t Index>,
    current: Option<Entry>,
}

impl<'t> TreeIterator<'t> {
    /// Iterator over `tree` in its own read transaction.
    pub fn create(tree: &'t Tree) -> Result<Self> {
        let txn = tree.db().begin_read()?;
        Ok(Self {
            tree,
            txn: TxnSlot::Owned(txn),
            index: None,
            current: None,
        })
    }

    /// Iterator over `tree` inside a caller transaction.
    ///
    /// With a write transaction the iterator can [`delete`](Self::delete).
    pub fn create_with_txn(tree: &'t Tree, txn: &'t Txn) -> Result<Self> {
        tree.check_txn(txn)?;
        Ok(Self {
            tree,
            txn: TxnSlot::Borrowed(txn),
            index: None,
            current: None,
        })
    }

    /// Unpositioned iterator over index `index_name` inside a caller
    /// transaction.
    pub fn create_index_with_txn(tree: &'t Tree, txn: &'t Txn, index_name: &str) -> Result<Self> {
        tree.check_txn(txn)?;
        let index = lookup_index(tree, index_name)?;
        Ok(Self {
            tree,
            txn: TxnSlot::Borrowed(txn),
            index: Some(index),
            current: None,
        })
    }

    pub fn first(&mut self) -> Result<bool> {
        self.move_to(CursorOp::First, None)
    }

    pub fn last(&mut self) -> Result<bool> {
        self.move_to(CursorOp::Last, None)
    }

    pub fn next(&mut self) -> Result<bool> {
        self.step(CursorOp::Next)
    }

    pub fn prev(&mut self) -> Result<bool> {
        self.step(CursorOp::Prev)
    }

    /// Position on exactly `key` (an index key for index iterators).
    pub fn seek(&mut self, key: &[u8]) -> Result<bool> {
        self.move_to(CursorOp::Set, Some((key, NO_PK)))
    }

    /// Position on the first key greater than or equal to `key`.
    pub fn seek_range(&mut self, key: &[u8]) -> Result<bool> {
        self.move_to(CursorOp::SetRange, Some((key, NO_PK)))
    }

    /// Current key; borrowed until the iterator moves.
    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    /// Current value; for index iterators this is the primary key.
    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }

    pub fn key_copy(&self) -> Option<Vec<u8>> {
        self.key().map(<[u8]>::to_vec)
    }

    pub fn value_copy(&self) -> Option<Vec<u8>> {
        self.value().map(<[u8]>::to_vec)
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_index(&self) -> bool {
        self.index.is_some()
    }

    /// Primary key behind the current index entry.
    ///
    /// `None` for main-table iterators and when not positioned.
    pub fn main_key(&self) -> Option<&[u8]> {
        self.index.and(self.value())
    }

    /// Transaction the iterator reads through.
    pub fn txn(&self) -> &Txn {
        self.txn.get()
    }

    /// Delete the current entry and move to the one after it.
    ///
    /// Main-table deletes also remove the entry's index pairs. Index
    /// iterator deletes remove only the index pair.
    ///
    /// # Errors
    ///
    /// * `InvalidArg` - Not positioned, or the transaction is read-only
    pub fn delete(&mut self) -> Result<()> {
        let Some((key, value)) = self.current.clone() else {
            return Err(Error::invalid_arg(
                "Iterator not positioned on valid entry",
            ));
        };
        let txn = self.txn.get();
        if txn.is_readonly() {
            return Err(Error::invalid_arg(
                "Delete requires write transaction; create the iterator with a write transaction",
            ));
        }

        match self.index {
            Some(index) => {
                let mut table = txn.open_multimap_mut(&index.table_name)?;
                table.remove(key.as_slice(), value.as_slice())?;
            }
            None => {
                self.tree.indexes_delete(txn, &key, &value)?;
                let mut table = txn.open_table_mut(&self.tree.name)?;
                table.remove(key.as_slice())?;
                self.tree.bump_count(-1);
            }
        }

        self.move_to(CursorOp::Next, Some((key.as_slice(), value.as_slice())))?;
        Ok(())
    }

    /// Release the iterator and any transaction it owns.
    pub fn close(self) {}

    fn step(&mut self, op: CursorOp) -> Result<bool> {
        match self.current.take() {
            Some((key, value)) => self.move_to(op, Some((key.as_slice(), value.as_slice()))),
            None => Ok(false),
        }
    }

    fn compare(&self) -> Option<&CompareFn> {
        match self.index {
            Some(index) => index.compare.as_ref(),
            None => self.tree.compare.as_ref(),
        }
    }

    fn move_to(&mut self, op: CursorOp, at: Option<(&[u8], &[u8])>) -> Result<bool> {
        self.current = None;

        // A custom comparator decides exact matches; the engine only knows
        // bytewise equality.
        let (lookup, exact) = match (op, self.compare()) {
            (CursorOp::Set, Some(cmp)) => (CursorOp::SetRange, Some(cmp.clone())),
            _ => (op, None),
        };

        let txn = self.txn.get();
        let found = match self.index {
            Some(index) => txn.open_multimap(&index.table_name)?.position(lookup, at)?,
            None => txn
                .open_table(&self.tree.name)?
                .position(lookup, at.map(|(k, _)| k))?,
        };

        self.current = match (found, exact, at) {
            (Some(entry), Some(cmp), Some((target, _))) => {
                (cmp(&entry.0, target) == Ordering::Equal).then_some(entry)
            }
            (found, _, _) => found,
        };
        Ok(self.current.is_some())
    }
}

fn lookup_index<'t>(tree: &'t Tree, index_name: &str) -> Result<&'t Index> {
    tree.find_index(index_name)
        .ok_or_else(|| Error::not_found(format!("Index '{}' not found", index_name)))
}

impl Tree {
    /// Index iterator positioned on the first pair whose index key equals
    /// `key`, in its own read transaction.
    ///
    /// # Errors
    ///
    /// * `NotFound` - No attached index named `index_name`
    pub fn index_seek(&self, index_name: &str, key: &[u8]) -> Result<TreeIterator<'_>> {
        self.index_iterator(index_name, key, CursorOp::Set)
    }

    /// Index iterator positioned on the first pair whose index key is
    /// greater than or equal to `key`.
    pub fn index_seek_range(&self, index_name: &str, key: &[u8]) -> Result<TreeIterator<'_>> {
        self.index_iterator(index_name, key, CursorOp::SetRange)
    }

    fn index_iterator(&self, index_name: &str, key: &[u8], op: CursorOp) -> Result<TreeIterator<'_>> {
        let index = lookup_index(self, index_name)?;
        let mut iter = TreeIterator {
            tree: self,
            txn: TxnSlot::Owned(self.db.begin_read()?),
            index: Some(index),
            current: None,
        };
        if !key.is_empty() {
            iter.move_to(op, Some((key, NO_PK)))?;
        }
        Ok(iter)
    }
}

impl fmt::Debug for TreeIterator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeIterator")
            .field("tree", &self.tree.name)
            .field("index", &self.index.map(|i| i.name.as_str()))
            .field("owns_txn", &matches!(self.txn, TxnSlot::Owned(_)))
            .field("valid", &self.valid())
            .finish()
    }
}
