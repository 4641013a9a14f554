use crate::core::db::Db;
use crate::core::iterator::TreeIterator;
use crate::core::tree::{IndexConfig, Tree, TreeFlags};
use crate::error::ErrorCode;

use super::{field_extractor, temp_db, V1};

fn filled_tree(db: &Db, keys: &[&str]) -> Tree {
    let tree = Tree::open(db, "t", TreeFlags::default(), 0).unwrap();
    for key in keys {
        tree.insert_one(key.as_bytes(), format!("v-{}", key).as_bytes())
            .unwrap();
    }
    tree
}

fn forward_keys(iter: &mut TreeIterator<'_>) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();
    let mut ok = iter.first().unwrap();
    while ok {
        keys.push(iter.key_copy().unwrap());
        ok = iter.next().unwrap();
    }
    keys
}

// ============ Positioning ============

#[test]
fn test_empty_tree() {
    let (_dir, db) = temp_db();
    let tree = filled_tree(&db, &[]);
    let mut iter = TreeIterator::create(&tree).unwrap();

    assert!(!iter.valid());
    assert!(!iter.first().unwrap());
    assert!(!iter.last().unwrap());
    assert!(!iter.next().unwrap());
    assert!(iter.key().is_none());
    assert!(iter.value().is_none());
}

#[test]
fn test_forward_and_backward() {
    let (_dir, db) = temp_db();
    let tree = filled_tree(&db, &["b", "c", "a"]);
    let mut iter = TreeIterator::create(&tree).unwrap();

    assert_eq!(forward_keys(&mut iter), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert!(!iter.valid());

    let mut backward = Vec::new();
    let mut ok = iter.last().unwrap();
    while ok {
        backward.push(iter.key_copy().unwrap());
        ok = iter.prev().unwrap();
    }
    assert_eq!(backward, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn test_single_entry_boundaries() {
    let (_dir, db) = temp_db();
    let tree = filled_tree(&db, &["only"]);
    let mut iter = TreeIterator::create(&tree).unwrap();

    assert!(iter.first().unwrap());
    assert_eq!(iter.key(), Some(&b"only"[..]));
    assert_eq!(iter.value(), Some(&b"v-only"[..]));
    assert!(!iter.prev().unwrap());
    assert!(!iter.valid());

    assert!(iter.last().unwrap());
    assert!(!iter.next().unwrap());
    // Stepping an invalid iterator stays invalid
    assert!(!iter.next().unwrap());
}

#[test]
fn test_seek_and_seek_range() {
    let (_dir, db) = temp_db();
    let tree = filled_tree(&db, &["apple", "banana", "cherry"]);
    let mut iter = TreeIterator::create(&tree).unwrap();

    assert!(iter.seek(b"banana").unwrap());
    assert_eq!(iter.value_copy(), Some(b"v-banana".to_vec()));
    assert!(!iter.seek(b"blueberry").unwrap());
    assert!(!iter.valid());

    assert!(iter.seek_range(b"blueberry").unwrap());
    assert_eq!(iter.key(), Some(&b"cherry"[..]));
    assert!(iter.seek_range(b"a").unwrap());
    assert_eq!(iter.key(), Some(&b"apple"[..]));
    assert!(!iter.seek_range(b"zebra").unwrap());

    // Moving on from a seek continues in key order
    assert!(iter.seek(b"apple").unwrap());
    assert!(iter.next().unwrap());
    assert_eq!(iter.key(), Some(&b"banana"[..]));
}

#[test]
fn test_seek_with_tree_comparator() {
    let (_dir, db) = temp_db();
    let mut tree = filled_tree(&db, &["apple"]);

    let mut iter = TreeIterator::create(&tree).unwrap();
    assert!(!iter.seek(b"APPLE").unwrap());
    drop(iter);

    tree.set_compare(|a, b| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()));
    let mut iter = TreeIterator::create(&tree).unwrap();
    assert!(iter.seek(b"APPLE").unwrap());
    assert_eq!(iter.key(), Some(&b"apple"[..]));
}

#[test]
fn test_iterator_sees_own_snapshot() {
    let (_dir, db) = temp_db();
    let tree = filled_tree(&db, &["a", "b"]);
    let mut iter = TreeIterator::create(&tree).unwrap();
    assert!(iter.txn().is_readonly());

    tree.insert_one(b"c", b"late").unwrap();
    assert_eq!(forward_keys(&mut iter).len(), 2);
    iter.close();

    let mut iter = TreeIterator::create(&tree).unwrap();
    assert_eq!(forward_keys(&mut iter).len(), 3);
}

// ============ Delete Through Iterator ============

#[test]
fn test_delete_moves_to_next() {
    let (_dir, db) = temp_db();
    let tree = filled_tree(&db, &["a", "b", "c"]);

    let txn = db.begin_write().unwrap();
    let mut iter = TreeIterator::create_with_txn(&tree, &txn).unwrap();
    assert!(iter.seek(b"b").unwrap());
    iter.delete().unwrap();
    assert!(iter.valid());
    assert_eq!(iter.key(), Some(&b"c"[..]));

    // Deleting the last entry leaves the iterator invalid
    iter.delete().unwrap();
    assert!(!iter.valid());
    drop(iter);
    txn.commit().unwrap();

    let mut iter = TreeIterator::create(&tree).unwrap();
    assert_eq!(forward_keys(&mut iter), vec![b"a".to_vec()]);
    assert_eq!(tree.count(), 1);
}

#[test]
fn test_delete_all_while_iterating() {
    let (_dir, db) = temp_db();
    let keys: Vec<String> = (0..20).map(|i| format!("k{:02}", i)).collect();
    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let tree = filled_tree(&db, &refs);

    let txn = db.begin_write().unwrap();
    let mut iter = TreeIterator::create_with_txn(&tree, &txn).unwrap();
    let mut deleted = 0;
    let mut ok = iter.first().unwrap();
    while ok {
        iter.delete().unwrap();
        deleted += 1;
        ok = iter.valid();
    }
    drop(iter);
    txn.commit().unwrap();

    assert_eq!(deleted, 20);
    assert!(!tree.contains_key(b"k00"));
}

#[test]
fn test_delete_requires_position_and_write_txn() {
    let (_dir, db) = temp_db();
    let tree = filled_tree(&db, &["a"]);

    let mut iter = TreeIterator::create(&tree).unwrap();
    let err = iter.delete().unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);
    assert_eq!(err.message(), "Iterator not positioned on valid entry");

    assert!(iter.first().unwrap());
    let err = iter.delete().unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);
    assert!(tree.contains_key(b"a"));
}

#[test]
fn test_delete_maintains_indexes() {
    let (_dir, db) = temp_db();
    db.register_key_extractor(V1, 0, field_extractor);
    let mut tree = Tree::open(&db, "t", TreeFlags::default(), 0).unwrap();
    tree.add_index(IndexConfig::new("email")).unwrap();
    tree.insert_one(b"1", b"email=a@x").unwrap();
    tree.insert_one(b"2", b"email=b@x").unwrap();

    let txn = db.begin_write().unwrap();
    let mut iter = TreeIterator::create_with_txn(&tree, &txn).unwrap();
    assert!(iter.first().unwrap());
    iter.delete().unwrap();
    drop(iter);
    txn.commit().unwrap();

    tree.verify_indexes().unwrap();
    assert!(!tree.index_seek("email", b"a@x").unwrap().valid());
}

// ============ Index Iterators ============

fn city_tree(db: &Db) -> Tree {
    db.register_key_extractor(V1, 0, field_extractor);
    let mut tree = Tree::open(db, "people", TreeFlags::default(), 0).unwrap();
    tree.add_index(IndexConfig::new("city").user_data(b"city".to_vec()))
        .unwrap();
    tree.insert_one(b"p1", b"city=oslo").unwrap();
    tree.insert_one(b"p2", b"city=rome").unwrap();
    tree.insert_one(b"p3", b"city=oslo").unwrap();
    tree.insert_one(b"p4", b"city=paris").unwrap();
    tree
}

#[test]
fn test_index_seek_walks_duplicates() {
    let (_dir, db) = temp_db();
    let tree = city_tree(&db);

    let mut iter = tree.index_seek("city", b"oslo").unwrap();
    assert!(iter.is_index());
    assert_eq!(iter.key(), Some(&b"oslo"[..]));
    assert_eq!(iter.main_key(), Some(&b"p1"[..]));
    assert!(iter.next().unwrap());
    assert_eq!(iter.main_key(), Some(&b"p3"[..]));
    assert!(iter.next().unwrap());
    assert_eq!(iter.key(), Some(&b"paris"[..]));

    assert!(iter.prev().unwrap());
    assert_eq!(iter.main_key(), Some(&b"p3"[..]));
    assert!(iter.prev().unwrap());
    assert_eq!(iter.main_key(), Some(&b"p1"[..]));
    assert!(!iter.prev().unwrap());
}

#[test]
fn test_index_seek_range_and_misses() {
    let (_dir, db) = temp_db();
    let tree = city_tree(&db);

    let iter = tree.index_seek_range("city", b"p").unwrap();
    assert_eq!(iter.key(), Some(&b"paris"[..]));
    assert_eq!(iter.main_key(), Some(&b"p4"[..]));

    assert!(!tree.index_seek("city", b"lima").unwrap().valid());
    assert!(!tree.index_seek_range("city", b"zurich").unwrap().valid());
    // Empty key leaves the iterator unpositioned
    let mut iter = tree.index_seek("city", b"").unwrap();
    assert!(!iter.valid());
    assert!(iter.first().unwrap());
    assert_eq!(iter.key(), Some(&b"oslo"[..]));

    let err = tree.index_seek("country", b"no").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[test]
fn test_main_iterator_has_no_main_key() {
    let (_dir, db) = temp_db();
    let tree = city_tree(&db);
    let mut iter = TreeIterator::create(&tree).unwrap();
    assert!(iter.first().unwrap());
    assert!(!iter.is_index());
    assert_eq!(iter.main_key(), None);
}

#[test]
fn test_index_iterator_delete_removes_only_pair() {
    let (_dir, db) = temp_db();
    let tree = city_tree(&db);

    let txn = db.begin_write().unwrap();
    let mut iter = TreeIterator::create_index_with_txn(&tree, &txn, "city").unwrap();
    assert!(iter.seek(b"rome").unwrap());
    iter.delete().unwrap();
    assert!(!iter.valid());
    drop(iter);
    txn.commit().unwrap();

    // Main entry is still there, so the index is now missing a pair
    assert!(tree.contains_key(b"p2"));
    let err = tree.verify_indexes().unwrap_err();
    assert_eq!(err.code(), ErrorCode::IndexError);
}

#[test]
fn test_create_index_iterator_errors() {
    let (_dir, db) = temp_db();
    let tree = city_tree(&db);
    let txn = db.begin_read().unwrap();
    let err = TreeIterator::create_index_with_txn(&tree, &txn, "missing").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    let (_other_dir, other) = temp_db();
    let foreign = other.begin_read().unwrap();
    let err = TreeIterator::create_with_txn(&tree, &foreign).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);
}
