use std::fmt;

use redb::{
    MultimapTable, MultimapTableDefinition, ReadTransaction, Table, TableDefinition,
    WriteTransaction,
};

use crate::core::db::Db;
use crate::core::table::{MultimapRef, TableRef};
use crate::error::{Error, Result};

pub(crate) type MainTableDef<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;
pub(crate) type IndexTableDef<'a> = MultimapTableDefinition<'a, &'static [u8], &'static [u8]>;

enum TxnKind {
    /// `None` after `reset`, until `renew`.
    Read(Option<ReadTransaction>),
    Write(WriteTransaction),
}

/// One engine transaction, read-only or read-write.
///
/// Dropping a transaction without committing aborts it.
pub struct Txn {
    db: Db,
    kind: TxnKind,
}

impl Db {
    /// Begin a transaction.
    ///
    /// Write transactions are exclusive across the database; `begin(true)`
    /// blocks until the current writer finishes.
    pub fn begin(&self, write: bool) -> Result<Txn> {
        if write {
            self.begin_write()
        } else {
            self.begin_read()
        }
    }

    pub fn begin_read(&self) -> Result<Txn> {
        let txn = self.inner.env.begin_read()?;
        Ok(Txn {
            db: self.clone(),
            kind: TxnKind::Read(Some(txn)),
        })
    }

    pub fn begin_write(&self) -> Result<Txn> {
        self.ensure_writable()?;
        let mut txn = self.inner.env.begin_write()?;
        if self.inner.flags.no_sync {
            txn.set_durability(redb::Durability::Eventual);
        }
        Ok(Txn {
            db: self.clone(),
            kind: TxnKind::Write(txn),
        })
    }

    /// Run `f` inside a write transaction.
    ///
    /// Commits when `f` succeeds and aborts on every error path.
    pub fn with_write_txn<R>(&self, f: impl FnOnce(&Txn) -> Result<R>) -> Result<R> {
        let txn = self.begin_write()?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort();
                Err(e)
            }
        }
    }

    /// Run `f` inside a read transaction.
    pub fn with_read_txn<R>(&self, f: impl FnOnce(&Txn) -> Result<R>) -> Result<R> {
        let txn = self.begin_read()?;
        let result = f(&txn);
        txn.abort();
        result
    }
}

impl Txn {
    /// Commit and consume the transaction.
    ///
    /// For write transactions the map size limit is checked first; a
    /// transaction that would exceed it is aborted with `MapFull`.
    pub fn commit(self) -> Result<()> {
        let Txn { db, kind } = self;
        match kind {
            TxnKind::Read(_) => Ok(()),
            TxnKind::Write(txn) => {
                if let Err(e) = db.check_map_size(&txn) {
                    db.stats_hub().record_error(&e);
                    db.stats_hub().record_abort();
                    let _ = txn.abort();
                    return Err(e);
                }
                txn.commit()?;
                db.stats_hub().record_commit();
                Ok(())
            }
        }
    }

    /// Abort and consume the transaction.
    pub fn abort(self) {
        let Txn { db, kind } = self;
        if let TxnKind::Write(txn) = kind {
            let _ = txn.abort();
            db.stats_hub().record_abort();
        }
    }

    /// Release the read snapshot while keeping the handle for `renew`.
    pub fn reset(&mut self) -> Result<()> {
        match &mut self.kind {
            TxnKind::Read(slot) => {
                slot.take();
                Ok(())
            }
            TxnKind::Write(_) => Err(Error::invalid_arg(
                "Only read-only transactions can be reset",
            )),
        }
    }

    /// Acquire a fresh read snapshot after `reset`.
    pub fn renew(&mut self) -> Result<()> {
        match &mut self.kind {
            TxnKind::Read(slot) => {
                *slot = Some(self.db.inner.env.begin_read()?);
                Ok(())
            }
            TxnKind::Write(_) => Err(Error::invalid_arg(
                "Only read-only transactions can be renewed",
            )),
        }
    }

    pub fn is_readonly(&self) -> bool {
        matches!(self.kind, TxnKind::Read(_))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub(crate) fn ensure_db(&self, db: &Db) -> Result<()> {
        if !self.db.same_as(db) {
            return Err(Error::invalid_arg(
                "Transaction belongs to a different database",
            ));
        }
        Ok(())
    }

    pub(crate) fn write_txn(&self) -> Result<&WriteTransaction> {
        match &self.kind {
            TxnKind::Write(txn) => Ok(txn),
            TxnKind::Read(_) => Err(Error::invalid_arg(
                "Write operation requires write transaction",
            )),
        }
    }

    fn read_txn(&self) -> Result<&ReadTransaction> {
        match &self.kind {
            TxnKind::Read(Some(txn)) => Ok(txn),
            TxnKind::Read(None) => Err(Error::invalid_arg(
                "Transaction has been reset; renew it before use",
            )),
            TxnKind::Write(_) => Err(Error::invalid_arg("Read transaction expected")),
        }
    }

    /// Open a main table for reading.
    ///
    /// A missing table is `NotFound` in both transaction kinds.
    pub(crate) fn open_table(&self, name: &str) -> Result<TableRef<'_>> {
        let def = MainTableDef::new(name);
        match &self.kind {
            TxnKind::Write(txn) => {
                ensure_table(txn, name)?;
                Ok(TableRef::Write(txn.open_table(def)?))
            }
            TxnKind::Read(_) => Ok(TableRef::Read(self.read_txn()?.open_table(def)?)),
        }
    }

    /// Open an existing main table for writing.
    ///
    /// Fails with `NotFound` once the table has been deleted, so a stale
    /// tree handle cannot bring it back.
    pub(crate) fn open_table_mut(&self, name: &str) -> Result<Table<'_, &'static [u8], &'static [u8]>> {
        let txn = self.write_txn()?;
        ensure_table(txn, name)?;
        Ok(txn.open_table(MainTableDef::new(name))?)
    }

    /// Open a main table for writing, creating it when missing.
    pub(crate) fn create_table_mut(
        &self,
        name: &str,
    ) -> Result<Table<'_, &'static [u8], &'static [u8]>> {
        Ok(self.write_txn()?.open_table(MainTableDef::new(name))?)
    }

    pub(crate) fn open_multimap(&self, name: &str) -> Result<MultimapRef<'_>> {
        let def = IndexTableDef::new(name);
        match &self.kind {
            TxnKind::Write(txn) => Ok(MultimapRef::Write(txn.open_multimap_table(def)?)),
            TxnKind::Read(_) => Ok(MultimapRef::Read(
                self.read_txn()?.open_multimap_table(def)?,
            )),
        }
    }

    pub(crate) fn open_multimap_mut(
        &self,
        name: &str,
    ) -> Result<MultimapTable<'_, &'static [u8], &'static [u8]>> {
        Ok(self
            .write_txn()?
            .open_multimap_table(IndexTableDef::new(name))?)
    }

    /// Names of all regular tables visible to this transaction.
    pub(crate) fn table_names(&self) -> Result<Vec<String>> {
        use redb::TableHandle;
        let names = match &self.kind {
            TxnKind::Write(txn) => txn.list_tables()?.map(|t| t.name().to_string()).collect(),
            TxnKind::Read(_) => self
                .read_txn()?
                .list_tables()?
                .map(|t| t.name().to_string())
                .collect(),
        };
        Ok(names)
    }

    pub(crate) fn multimap_names(&self) -> Result<Vec<String>> {
        use redb::MultimapTableHandle;
        let names = match &self.kind {
            TxnKind::Write(txn) => txn
                .list_multimap_tables()?
                .map(|t| t.name().to_string())
                .collect(),
            TxnKind::Read(_) => self
                .read_txn()?
                .list_multimap_tables()?
                .map(|t| t.name().to_string())
                .collect(),
        };
        Ok(names)
    }
}

// Write transactions create tables on open.
fn ensure_table(txn: &WriteTransaction, name: &str) -> Result<()> {
    if !Db::table_exists(txn, name)? {
        return Err(Error::not_found(format!("Table '{}' does not exist", name)));
    }
    Ok(())
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.kind {
            TxnKind::Read(Some(_)) => "read",
            TxnKind::Read(None) => "read (reset)",
            TxnKind::Write(_) => "write",
        };
        f.debug_struct("Txn")
            .field("db", &self.db.path())
            .field("state", &state)
            .finish()
    }
}
