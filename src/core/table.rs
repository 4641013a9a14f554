//! Cursor-style access to engine tables.
//!
//! The engine exposes ordered ranges rather than cursors, so every cursor
//! move is a bounded range lookup that returns an owned copy of the entry it
//! lands on. Index tables are multimaps ordered by `(index_key, primary_key)`.

use std::ops::Bound;

use redb::{
    MultimapTable, ReadOnlyMultimapTable, ReadOnlyTable, ReadableMultimapTable, ReadableTable,
    Table,
};

use crate::error::Result;

/// Owned `(key, value)` pair.
pub(crate) type Entry = (Vec<u8>, Vec<u8>);

type Bounds<'k> = (Bound<&'k [u8]>, Bound<&'k [u8]>);

/// Cursor positioning operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CursorOp {
    First,
    Last,
    Next,
    Prev,
    /// Exact key.
    Set,
    /// First key greater than or equal to the target.
    SetRange,
}

/// Main table opened for reading in either kind of transaction.
pub(crate) enum TableRef<'t> {
    Read(ReadOnlyTable<&'static [u8], &'static [u8]>),
    Write(Table<'t, &'static [u8], &'static [u8]>),
}

/// Index table opened for reading in either kind of transaction.
pub(crate) enum MultimapRef<'t> {
    Read(ReadOnlyMultimapTable<&'static [u8], &'static [u8]>),
    Write(MultimapTable<'t, &'static [u8], &'static [u8]>),
}

macro_rules! dispatch {
    ($table:expr, $name:ident => $body:expr) => {
        match $table {
            Self::Read($name) => $body,
            Self::Write($name) => $body,
        }
    };
}

impl TableRef<'_> {
    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        dispatch!(self, t => get(t, key))
    }

    pub(crate) fn position(&self, op: CursorOp, key: Option<&[u8]>) -> Result<Option<Entry>> {
        dispatch!(self, t => position(t, op, key))
    }

    pub(crate) fn walk<F>(&self, bounds: Bounds<'_>, reverse: bool, visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        dispatch!(self, t => walk(t, bounds, reverse, visit))
    }
}

impl MultimapRef<'_> {
    pub(crate) fn primary_keys(&self, index_key: &[u8]) -> Result<Vec<Vec<u8>>> {
        dispatch!(self, t => primary_keys(t, index_key))
    }

    pub(crate) fn contains_pair(&self, index_key: &[u8], primary_key: &[u8]) -> Result<bool> {
        dispatch!(self, t => contains_pair(t, index_key, primary_key))
    }

    pub(crate) fn position(
        &self,
        op: CursorOp,
        at: Option<(&[u8], &[u8])>,
    ) -> Result<Option<Entry>> {
        dispatch!(self, t => index_position(t, op, at))
    }

    pub(crate) fn walk_pairs<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        dispatch!(self, t => walk_pairs(t, visit))
    }
}

pub(crate) fn get<T>(table: &T, key: &[u8]) -> Result<Option<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
}

fn first_from<T>(table: &T, lower: Bound<&[u8]>) -> Result<Option<Entry>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let bounds: Bounds<'_> = (lower, Bound::Unbounded);
    match table.range::<&[u8]>(bounds)?.next() {
        Some(item) => {
            let (k, v) = item?;
            Ok(Some((k.value().to_vec(), v.value().to_vec())))
        }
        None => Ok(None),
    }
}

fn last_until<T>(table: &T, upper: Bound<&[u8]>) -> Result<Option<Entry>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let bounds: Bounds<'_> = (Bound::Unbounded, upper);
    match table.range::<&[u8]>(bounds)?.next_back() {
        Some(item) => {
            let (k, v) = item?;
            Ok(Some((k.value().to_vec(), v.value().to_vec())))
        }
        None => Ok(None),
    }
}

/// Move a main-table cursor. `key` is the current key for `Next`/`Prev`
/// and the target for `Set`/`SetRange`.
pub(crate) fn position<T>(table: &T, op: CursorOp, key: Option<&[u8]>) -> Result<Option<Entry>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    match (op, key) {
        (CursorOp::First, _) => first_from(table, Bound::Unbounded),
        (CursorOp::Last, _) => last_until(table, Bound::Unbounded),
        (CursorOp::Next, Some(k)) => first_from(table, Bound::Excluded(k)),
        (CursorOp::Prev, Some(k)) => last_until(table, Bound::Excluded(k)),
        (CursorOp::Set, Some(k)) => Ok(get(table, k)?.map(|v| (k.to_vec(), v))),
        (CursorOp::SetRange, Some(k)) => first_from(table, Bound::Included(k)),
        (_, None) => Ok(None),
    }
}

/// Visit entries inside `bounds` until `visit` returns `false`.
pub(crate) fn walk<T, F>(table: &T, bounds: Bounds<'_>, reverse: bool, mut visit: F) -> Result<()>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
    F: FnMut(&[u8], &[u8]) -> Result<bool>,
{
    let mut range = table.range::<&[u8]>(bounds)?;
    loop {
        let item = if reverse {
            range.next_back()
        } else {
            range.next()
        };
        let Some(item) = item else {
            return Ok(());
        };
        let (k, v) = item?;
        if !visit(k.value(), v.value())? {
            return Ok(());
        }
    }
}

pub(crate) fn primary_keys<T>(table: &T, index_key: &[u8]) -> Result<Vec<Vec<u8>>>
where
    T: ReadableMultimapTable<&'static [u8], &'static [u8]>,
{
    let mut out = Vec::new();
    for pk in table.get(index_key)? {
        out.push(pk?.value().to_vec());
    }
    Ok(out)
}

pub(crate) fn contains_pair<T>(table: &T, index_key: &[u8], primary_key: &[u8]) -> Result<bool>
where
    T: ReadableMultimapTable<&'static [u8], &'static [u8]>,
{
    for pk in table.get(index_key)? {
        if pk?.value() == primary_key {
            return Ok(true);
        }
    }
    Ok(false)
}

fn first_pair_from<T>(table: &T, lower: Bound<&[u8]>) -> Result<Option<Entry>>
where
    T: ReadableMultimapTable<&'static [u8], &'static [u8]>,
{
    let bounds: Bounds<'_> = (lower, Bound::Unbounded);
    for item in table.range::<&[u8]>(bounds)? {
        let (ek, mut pks) = item?;
        if let Some(pk) = pks.next() {
            return Ok(Some((ek.value().to_vec(), pk?.value().to_vec())));
        }
    }
    Ok(None)
}

fn last_pair_until<T>(table: &T, upper: Bound<&[u8]>) -> Result<Option<Entry>>
where
    T: ReadableMultimapTable<&'static [u8], &'static [u8]>,
{
    let bounds: Bounds<'_> = (Bound::Unbounded, upper);
    for item in table.range::<&[u8]>(bounds)?.rev() {
        let (ek, mut pks) = item?;
        if let Some(pk) = pks.next_back() {
            return Ok(Some((ek.value().to_vec(), pk?.value().to_vec())));
        }
    }
    Ok(None)
}

/// Move an index cursor over `(index_key, primary_key)` pairs.
///
/// `at` is the current pair for `Next`/`Prev`; for `Set`/`SetRange` only its
/// index key is used.
pub(crate) fn index_position<T>(
    table: &T,
    op: CursorOp,
    at: Option<(&[u8], &[u8])>,
) -> Result<Option<Entry>>
where
    T: ReadableMultimapTable<&'static [u8], &'static [u8]>,
{
    match (op, at) {
        (CursorOp::First, _) => first_pair_from(table, Bound::Unbounded),
        (CursorOp::Last, _) => last_pair_until(table, Bound::Unbounded),
        (CursorOp::Next, Some((ek, pk))) => {
            for candidate in table.get(ek)? {
                let candidate = candidate?;
                if candidate.value() > pk {
                    return Ok(Some((ek.to_vec(), candidate.value().to_vec())));
                }
            }
            first_pair_from(table, Bound::Excluded(ek))
        }
        (CursorOp::Prev, Some((ek, pk))) => {
            for candidate in table.get(ek)?.rev() {
                let candidate = candidate?;
                if candidate.value() < pk {
                    return Ok(Some((ek.to_vec(), candidate.value().to_vec())));
                }
            }
            last_pair_until(table, Bound::Excluded(ek))
        }
        (CursorOp::Set, Some((ek, _))) => match table.get(ek)?.next() {
            Some(pk) => Ok(Some((ek.to_vec(), pk?.value().to_vec()))),
            None => Ok(None),
        },
        (CursorOp::SetRange, Some((ek, _))) => first_pair_from(table, Bound::Included(ek)),
        (_, None) => Ok(None),
    }
}

/// Visit every `(index_key, primary_key)` pair in order.
pub(crate) fn walk_pairs<T, F>(table: &T, mut visit: F) -> Result<()>
where
    T: ReadableMultimapTable<&'static [u8], &'static [u8]>,
    F: FnMut(&[u8], &[u8]) -> Result<bool>,
{
    let bounds: Bounds<'_> = (Bound::Unbounded, Bound::Unbounded);
    for item in table.range::<&[u8]>(bounds)? {
        let (ek, pks) = item?;
        for pk in pks {
            if !visit(ek.value(), pk?.value())? {
                return Ok(());
            }
        }
    }
    Ok(())
}
