use tempfile::TempDir;

use crate::constants::{build_extractor_id, INDEX_FLAG_SPARSE, INDEX_FLAG_UNIQUE};
use crate::core::db::Db;
use crate::core::tree::persistence::read_index_metadata;
use crate::core::tree::{IndexConfig, IndexMetadata, Tree, TreeFlags};
use crate::error::ErrorCode;

use super::{field_extractor, temp_db, V1};

// ============ Record Layout ============

#[test]
fn test_metadata_layout() {
    let meta = IndexMetadata {
        extractor_id: 0x0001_0000_0000_0003,
        flags: INDEX_FLAG_UNIQUE | INDEX_FLAG_SPARSE,
        user_data: Some(b"abc".to_vec()),
    };
    let raw = meta.encode();

    assert_eq!(raw.len(), 16 + 3);
    assert_eq!(&raw[0..8], &0x0001_0000_0000_0003u64.to_le_bytes());
    assert_eq!(&raw[8..12], &3u32.to_le_bytes());
    assert_eq!(&raw[12..16], &3u32.to_le_bytes());
    assert_eq!(&raw[16..], b"abc");

    let decoded = IndexMetadata::decode(&raw).unwrap();
    assert_eq!(decoded, meta);
    assert!(decoded.is_unique());
    assert!(decoded.is_sparse());
}

#[test]
fn test_metadata_without_user_data() {
    let meta = IndexMetadata {
        extractor_id: 7,
        flags: 0,
        user_data: None,
    };
    let raw = meta.encode();
    assert_eq!(raw.len(), 16);

    let decoded = IndexMetadata::decode(&raw).unwrap();
    assert_eq!(decoded.user_data, None);
    assert!(!decoded.is_unique());
}

#[test]
fn test_metadata_decode_rejects_bad_input() {
    let err = IndexMetadata::decode(&[0u8; 10]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);

    let mut raw = IndexMetadata {
        extractor_id: 1,
        flags: 0,
        user_data: Some(b"long user data".to_vec()),
    }
    .encode();
    raw.truncate(20);
    let err = IndexMetadata::decode(&raw).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);
}

// ============ Stored Records ============

#[test]
fn test_add_index_persists_metadata() {
    let (_dir, db) = temp_db();
    db.register_key_extractor(V1, INDEX_FLAG_UNIQUE, field_extractor);
    let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
    tree.add_index(
        IndexConfig::new("email")
            .unique(true)
            .user_data(b"email".to_vec()),
    )
    .unwrap();

    let meta = read_index_metadata(&db, "users", "email").unwrap().unwrap();
    assert_eq!(meta.extractor_id, build_extractor_id(V1, INDEX_FLAG_UNIQUE));
    assert!(meta.is_unique());
    assert!(!meta.is_sparse());
    assert_eq!(meta.user_data.as_deref(), Some(&b"email"[..]));

    assert_eq!(tree.list_persisted().unwrap(), vec!["email".to_string()]);
    assert_eq!(
        tree.get_extractor_id("email").unwrap(),
        build_extractor_id(V1, INDEX_FLAG_UNIQUE)
    );
    assert!(read_index_metadata(&db, "users", "other").unwrap().is_none());
    tree.save_index("email").unwrap();
}

#[test]
fn test_list_persisted_is_per_tree() {
    let (_dir, db) = temp_db();
    db.register_key_extractor(V1, 0, field_extractor);
    let mut users = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
    let mut orders = Tree::open(&db, "orders", TreeFlags::default(), 0).unwrap();

    users.add_index(IndexConfig::new("email")).unwrap();
    users.add_index(IndexConfig::new("city")).unwrap();
    orders.add_index(IndexConfig::new("status")).unwrap();

    assert_eq!(users.list_persisted().unwrap(), vec!["city", "email"]);
    assert_eq!(orders.list_persisted().unwrap(), vec!["status"]);
}

#[test]
fn test_missing_extractor_skips_index() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::builder().open(dir.path()).unwrap();
        db.register_key_extractor(V1, INDEX_FLAG_UNIQUE, field_extractor);
        let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
        tree.add_index(IndexConfig::new("email").unique(true)).unwrap();
        tree.insert_one(b"1", b"email=a@x").unwrap();
    }

    let db = Db::builder().open(dir.path()).unwrap();
    let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
    assert!(!tree.has_index("email"));
    assert_eq!(tree.list_persisted().unwrap(), vec!["email"]);
    assert!(!tree.load_index("email").unwrap());

    // Registering the extractor later makes the index loadable
    db.register_key_extractor(V1, INDEX_FLAG_UNIQUE, field_extractor);
    assert!(tree.load_index("email").unwrap());
    assert!(tree.has_index("email"));
    tree.verify_indexes().unwrap();

    let err = tree.load_index("email").unwrap_err();
    assert_eq!(err.code(), ErrorCode::KeyExists);
}

#[test]
fn test_load_unknown_index() {
    let (_dir, db) = temp_db();
    let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();

    let err = tree.load_index("nothing").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(
        tree.get_extractor_id("nothing").unwrap_err().code(),
        ErrorCode::NotFound
    );
    assert!(tree.list_persisted().unwrap().is_empty());
}

#[test]
fn test_version_selects_extractor() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::builder().version(2, 0).open(dir.path()).unwrap();
        db.register_key_extractor(db.version(), 0, field_extractor);
        let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
        tree.add_index(IndexConfig::new("email")).unwrap();
    }

    // Only an extractor registered under the stored version resolves
    let db = Db::builder().version(2, 0).open(dir.path()).unwrap();
    db.register_key_extractor(V1, 0, field_extractor);
    let tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
    assert!(!tree.has_index("email"));
    drop(tree);

    db.register_key_extractor(db.version(), 0, field_extractor);
    let tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
    assert!(tree.has_index("email"));
}

#[test]
fn test_tree_delete_removes_indexes() {
    let (_dir, db) = temp_db();
    db.register_key_extractor(V1, INDEX_FLAG_UNIQUE, field_extractor);
    {
        let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
        tree.add_index(IndexConfig::new("email").unique(true)).unwrap();
        tree.insert_one(b"1", b"email=a@x").unwrap();
    }

    Tree::delete(&db, "users").unwrap();
    assert!(read_index_metadata(&db, "users", "email").unwrap().is_none());

    // A recreated tree neither reattaches nor conflicts with old entries
    let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
    assert!(!tree.has_index("email"));
    tree.add_index(IndexConfig::new("email").unique(true)).unwrap();
    tree.insert_one(b"2", b"email=a@x").unwrap();
    tree.verify_indexes().unwrap();
}

#[test]
fn test_tree_delete_spares_other_trees() {
    let (_dir, db) = temp_db();
    db.register_key_extractor(V1, 0, field_extractor);
    let mut a = Tree::open(&db, "a", TreeFlags::default(), 0).unwrap();
    let mut ab = Tree::open(&db, "ab", TreeFlags::default(), 0).unwrap();
    a.add_index(IndexConfig::new("email")).unwrap();
    ab.add_index(IndexConfig::new("email")).unwrap();
    ab.insert_one(b"1", b"email=a@x").unwrap();
    drop(a);
    drop(ab);

    // Index tables and metadata are keyed by `<tree>:`, so ':' is refused
    for name in ["a:b", "a:"] {
        let err = Tree::open(&db, name, TreeFlags::default(), 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArg, "name {:?}", name);
        assert_eq!(Tree::delete(&db, name).unwrap_err().code(), ErrorCode::InvalidArg);
    }

    Tree::delete(&db, "a").unwrap();
    assert!(read_index_metadata(&db, "a", "email").unwrap().is_none());

    let ab = Tree::open(&db, "ab", TreeFlags::default(), 0).unwrap();
    assert!(ab.has_index("email"));
    assert_eq!(ab.list_persisted().unwrap(), vec!["email"]);
    let iter = ab.index_seek("email", b"a@x").unwrap();
    assert_eq!(iter.main_key(), Some(&b"1"[..]));
    drop(iter);
    ab.verify_indexes().unwrap();
}

#[test]
fn test_index_compare_reinstalled_after_reopen() {
    let dir = TempDir::new().unwrap();
    let lowercase = |a: &[u8], b: &[u8]| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase());
    {
        let db = Db::builder().open(dir.path()).unwrap();
        db.register_key_extractor(V1, 0, field_extractor);
        let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
        tree.add_index(IndexConfig::new("email").compare(lowercase))
            .unwrap();
        tree.insert_one(b"1", b"email=alice@x").unwrap();
        assert!(tree.index_seek("email", b"ALICE@X").unwrap().valid());
    }

    let db = Db::builder().open(dir.path()).unwrap();
    db.register_key_extractor(V1, 0, field_extractor);
    let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0).unwrap();
    assert!(tree.has_index("email"));
    // Comparators are not stored; exact matches are bytewise until reinstalled
    assert!(!tree.index_seek("email", b"ALICE@X").unwrap().valid());

    tree.set_index_compare("email", lowercase).unwrap();
    let iter = tree.index_seek("email", b"ALICE@X").unwrap();
    assert!(iter.valid());
    assert_eq!(iter.main_key(), Some(&b"1"[..]));
    drop(iter);

    let err = tree.set_index_compare("missing", lowercase).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}
