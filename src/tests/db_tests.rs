use tempfile::TempDir;

use crate::constants::{schema_version, DEFAULT_MAP_SIZE, DEFAULT_MAX_TABLES, MB};
use crate::core::db::{Db, OpenFlags};
use crate::core::tree::{Tree, TreeFlags};
use crate::error::ErrorCode;

use super::temp_db;

// ============ Open / Close Tests ============

#[test]
fn test_open_with_defaults() {
    let dir = TempDir::new().unwrap();
    let db = Db::open(dir.path(), 0, 0, schema_version(1, 0), OpenFlags::default()).unwrap();

    assert_eq!(db.get_mapsize(), DEFAULT_MAP_SIZE);
    assert_eq!(db.max_tables(), DEFAULT_MAX_TABLES);
    assert_eq!(db.version(), schema_version(1, 0));
    assert_eq!(db.path(), dir.path());
    assert!(!db.flags().read_only);
    db.close();
}

#[test]
fn test_builder_options() {
    let dir = TempDir::new().unwrap();
    let db = Db::builder()
        .map_size(64 * MB)
        .max_tables(8)
        .version(2, 3)
        .no_sync(true)
        .open(dir.path())
        .unwrap();

    assert_eq!(db.get_mapsize(), 64 * MB);
    assert_eq!(db.max_tables(), 8);
    assert_eq!(db.version(), schema_version(2, 3));
    assert!(db.flags().no_sync);
}

#[test]
fn test_open_requires_existing_directory() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing");

    let err = Db::builder().open(&missing).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);

    // A regular file is not a directory either
    let file = dir.path().join("plain");
    std::fs::write(&file, b"x").unwrap();
    let err = Db::builder().open(&file).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);
}

#[test]
fn test_read_only_needs_existing_database() {
    let dir = TempDir::new().unwrap();
    let err = Db::builder().read_only(true).open(dir.path()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[test]
fn test_read_only_rejects_writes() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::builder().open(dir.path()).unwrap();
        let tree = Tree::open(&db, "t", TreeFlags::default(), 0).unwrap();
        tree.insert_one(b"k", b"v").unwrap();
    }

    let db = Db::builder().read_only(true).open(dir.path()).unwrap();
    let tree = Tree::open(&db, "t", TreeFlags::default(), 0).unwrap();
    assert_eq!(tree.get(b"k").unwrap(), b"v");

    let err = tree.insert_one(b"k2", b"v2").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);
    let err = db.begin_write().unwrap_err();
    assert_eq!(err.message(), "Database is opened read-only");

    // Missing trees cannot be created
    let err = Tree::open(&db, "other", TreeFlags::default(), 0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::builder().open(dir.path()).unwrap();
        let tree = Tree::open(&db, "t", TreeFlags::default(), 0).unwrap();
        tree.insert_one(b"persist", b"me").unwrap();
        tree.close();
        db.close();
    }

    let db = Db::builder().open(dir.path()).unwrap();
    let tree = Tree::open(&db, "t", TreeFlags::open_existing(), 0).unwrap();
    assert_eq!(tree.get(b"persist").unwrap(), b"me");
}

// ============ Map Size Tests ============

#[test]
fn test_resize_rejects_zero() {
    let (_dir, db) = temp_db();
    let err = db.resize(0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);
}

#[test]
fn test_map_full_is_recoverable() {
    let (_dir, db) = temp_db();
    let tree = Tree::open(&db, "t", TreeFlags::default(), 0).unwrap();
    let big = vec![0xABu8; MB];

    db.resize(4096).unwrap();
    let err = tree.insert_one(b"big", &big).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MapFull);
    assert!(err.is_recoverable());
    assert!(!tree.contains_key(b"big"));

    db.resize(DEFAULT_MAP_SIZE).unwrap();
    tree.insert_one(b"big", &big).unwrap();
    assert_eq!(tree.get(b"big").unwrap().len(), MB);
    assert!(db.statistics().map_full_errors >= 1);
}

#[test]
fn test_stats_reports_map_size() {
    let (_dir, db) = temp_db();
    let tree = Tree::open(&db, "t", TreeFlags::default(), 0).unwrap();
    for i in 0..100u32 {
        tree.insert_one(format!("key{:03}", i).as_bytes(), b"value")
            .unwrap();
    }

    let stats = db.stats().unwrap();
    assert_eq!(stats.map_size, db.get_mapsize());
    assert!(stats.page_size > 0);
    assert!(stats.allocated_pages > 0);
    assert_eq!(
        stats.allocated_bytes(),
        stats.allocated_pages * stats.page_size as u64
    );
    assert!(stats.stored_bytes > 0);
}

// ============ Table Limit Tests ============

#[test]
fn test_max_tables_enforced() {
    let dir = TempDir::new().unwrap();
    let db = Db::builder().max_tables(2).open(dir.path()).unwrap();

    Tree::open(&db, "a", TreeFlags::default(), 0).unwrap();
    Tree::open(&db, "b", TreeFlags::default(), 0).unwrap();
    let err = Tree::open(&db, "c", TreeFlags::default(), 0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Generic);
    assert!(!Tree::exists(&db, "c"));

    // Reopening an existing tree needs no new slot
    Tree::open(&db, "a", TreeFlags::default(), 0).unwrap();
}

// ============ Sync Tests ============

#[test]
fn test_sync_modes() {
    let (_dir, db) = temp_db();
    db.sync(false).unwrap();
    db.sync(true).unwrap();

    let dir = TempDir::new().unwrap();
    let db = Db::builder().no_sync(true).open(dir.path()).unwrap();
    let tree = Tree::open(&db, "t", TreeFlags::default(), 0).unwrap();
    tree.insert_one(b"k", b"v").unwrap();
    db.sync(true).unwrap();
    assert_eq!(tree.get(b"k").unwrap(), b"v");
}

#[test]
fn test_handles_share_engine() {
    let (_dir, db) = temp_db();
    let clone = db.clone();
    let tree = Tree::open(&db, "t", TreeFlags::default(), 0).unwrap();
    tree.insert_one(b"k", b"v").unwrap();

    // The clone sees the same data and shares its registry
    let other = Tree::open(&clone, "t", TreeFlags::open_existing(), 0).unwrap();
    assert_eq!(other.get(b"k").unwrap(), b"v");
    let id = db.register_key_extractor(schema_version(1, 0), 0, |v, _| Some(v.to_vec()));
    assert!(clone.lookup_extractor(id).is_some());
}
