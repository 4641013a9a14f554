// Test modules for wtree

use tempfile::TempDir;

use crate::constants::schema_version;
use crate::core::db::Db;



#[cfg(test)]
pub mod db_tests;




#[cfg(test)]
pub mod persistence_tests;

#[cfg(test)]
pub mod iterator_tests;

#[cfg(test)]
pub mod scan_tests;





pub(crate) const V1: u32 = schema_version(1, 0);

/// Fresh database in its own temporary directory.
pub(crate) fn temp_db() -> (TempDir, Db) {
    let dir = TempDir::new().unwrap();
    let db = Db::builder().open(dir.path()).unwrap();
    (dir, db)
}

/// Value of `name` in a `k1=v1;k2=v2` record.
pub(crate) fn field<'a>(value: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    value.split(|b| *b == b';').find_map(|part| {
        let mut kv = part.splitn(2, |b| *b == b'=');
        let key = kv.next()?;
        let val = kv.next()?;
        (key == name).then_some(val)
    })
}

/// Extracts the field named by `user_data` (default `email`).
pub(crate) fn field_extractor(value: &[u8], user_data: Option<&[u8]>) -> Option<Vec<u8>> {
    let name = user_data.unwrap_or(b"email");
    field(value, name).map(<[u8]>::to_vec)
}

/// Like [`field_extractor`] but skips records whose field is empty.
pub(crate) fn sparse_extractor(value: &[u8], user_data: Option<&[u8]>) -> Option<Vec<u8>> {
    field_extractor(value, user_data).filter(|v| !v.is_empty())
}
