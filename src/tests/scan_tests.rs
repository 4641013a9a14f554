use crate::core::db::Db;
use crate::core::tree::bulk::Predicate;
use crate::core::tree::{IndexConfig, Tree, TreeFlags};
use crate::error::ErrorCode;

use super::{field_extractor, temp_db, V1};

fn numbered_tree(db: &Db, count: u32) -> Tree {
    let tree = Tree::open(db, "t", TreeFlags::default(), 0).unwrap();
    db.with_write_txn(|txn| {
        for i in 0..count {
            let key = format!("key{:03}", i);
            tree.insert_one_txn(txn, key.as_bytes(), &i.to_be_bytes())?;
        }
        Ok(())
    })
    .unwrap();
    tree
}

fn key(i: u32) -> Vec<u8> {
    format!("key{:03}", i).into_bytes()
}

// ============ Range Scans ============

#[test]
fn test_scan_range_inclusive_bounds() {
    let (_dir, db) = temp_db();
    let tree = numbered_tree(&db, 20);
    let txn = db.begin_read().unwrap();

    let mut seen = Vec::new();
    tree.scan_range_txn(&txn, Some(key(5).as_slice()), Some(key(9).as_slice()), |k, _| {
        seen.push(k.to_vec());
        true
    })
    .unwrap();
    assert_eq!(seen, (5..=9).map(key).collect::<Vec<_>>());
}

#[test]
fn test_scan_range_open_ends_and_early_stop() {
    let (_dir, db) = temp_db();
    let tree = numbered_tree(&db, 20);
    let txn = db.begin_read().unwrap();

    let mut all = 0;
    tree.scan_range_txn(&txn, None, None, |_, _| {
        all += 1;
        true
    })
    .unwrap();
    assert_eq!(all, 20);

    let mut first_three = Vec::new();
    tree.scan_range_txn(&txn, None, None, |k, _| {
        first_three.push(k.to_vec());
        first_three.len() < 3
    })
    .unwrap();
    assert_eq!(first_three, vec![key(0), key(1), key(2)]);

    // Bounds between stored keys
    let mut between = Vec::new();
    tree.scan_range_txn(&txn, Some(b"key0045".as_slice()), Some(b"key0075".as_slice()), |k, _| {
        between.push(k.to_vec());
        true
    })
    .unwrap();
    assert_eq!(between, vec![key(5), key(6), key(7)]);
}

#[test]
fn test_scan_reverse() {
    let (_dir, db) = temp_db();
    let tree = numbered_tree(&db, 10);
    let txn = db.begin_read().unwrap();

    let mut seen = Vec::new();
    tree.scan_reverse_txn(&txn, Some(key(7).as_slice()), Some(key(4).as_slice()), |k, v| {
        assert_eq!(v.len(), 4);
        seen.push(k.to_vec());
        true
    })
    .unwrap();
    assert_eq!(seen, vec![key(7), key(6), key(5), key(4)]);

    let mut tail = Vec::new();
    tree.scan_reverse_txn(&txn, None, None, |k, _| {
        tail.push(k.to_vec());
        tail.len() < 2
    })
    .unwrap();
    assert_eq!(tail, vec![key(9), key(8)]);
}

#[test]
fn test_scan_prefix() {
    let (_dir, db) = temp_db();
    let tree = Tree::open(&db, "t", TreeFlags::default(), 0).unwrap();
    for k in ["user:1", "user:2", "users", "order:1", "user:3"] {
        tree.insert_one(k.as_bytes(), b"v").unwrap();
    }

    let txn = db.begin_read().unwrap();
    let mut seen = Vec::new();
    tree.scan_prefix_txn(&txn, b"user:", |k, _| {
        seen.push(String::from_utf8(k.to_vec()).unwrap());
        true
    })
    .unwrap();
    assert_eq!(seen, vec!["user:1", "user:2", "user:3"]);

    let mut none = 0;
    tree.scan_prefix_txn(&txn, b"zzz", |_, _| {
        none += 1;
        true
    })
    .unwrap();
    assert_eq!(none, 0);
    assert!(db.statistics().total_scans >= 2);
}

#[test]
fn test_scan_range_uses_comparator_for_end() {
    let (_dir, db) = temp_db();
    let mut tree = numbered_tree(&db, 10);
    // Treat every key as equal: the end bound never stops the scan
    tree.set_compare(|_, _| std::cmp::Ordering::Equal);

    let txn = db.begin_read().unwrap();
    let mut count = 0;
    tree.scan_range_txn(&txn, Some(key(2).as_slice()), Some(key(3).as_slice()), |_, _| {
        count += 1;
        true
    })
    .unwrap();
    assert_eq!(count, 8);
}

// ============ Read-Modify-Write ============

#[test]
fn test_modify_txn() {
    let (_dir, db) = temp_db();
    let tree = Tree::open(&db, "counters", TreeFlags::default(), 0).unwrap();

    let bump = |current: Option<&[u8]>| {
        let n = current.map_or(0, |v| u64::from_be_bytes(v.try_into().unwrap()));
        Some((n + 1).to_be_bytes().to_vec())
    };

    for _ in 0..3 {
        db.with_write_txn(|txn| tree.modify_txn(txn, b"hits", bump))
            .unwrap();
    }
    assert_eq!(tree.get(b"hits").unwrap(), 3u64.to_be_bytes());

    // None deletes an existing key and is a no-op for a missing one
    db.with_write_txn(|txn| tree.modify_txn(txn, b"hits", |_| None))
        .unwrap();
    assert!(!tree.contains_key(b"hits"));
    db.with_write_txn(|txn| tree.modify_txn(txn, b"ghost", |_| None))
        .unwrap();
    assert!(!tree.contains_key(b"ghost"));

    let reader = db.begin_read().unwrap();
    let err = tree.modify_txn(&reader, b"hits", bump).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);
}

#[test]
fn test_get_many_and_exists_many() {
    let (_dir, db) = temp_db();
    let tree = numbered_tree(&db, 5);
    let txn = db.begin_read().unwrap();

    let keys = [key(1), b"missing".to_vec(), key(4)];
    let values = tree.get_many_txn(&txn, &keys).unwrap();
    assert_eq!(
        values,
        vec![
            Some(1u32.to_be_bytes().to_vec()),
            None,
            Some(4u32.to_be_bytes().to_vec()),
        ]
    );

    let flags = tree.exists_many_txn(&txn, &keys).unwrap();
    assert_eq!(flags, vec![true, false, true]);
}

// ============ Bulk Operations ============

#[test]
fn test_delete_if() {
    let (_dir, db) = temp_db();
    let tree = numbered_tree(&db, 20);

    let deleted = db
        .with_write_txn(|txn| {
            tree.delete_if_txn(txn, Some(key(5).as_slice()), Some(key(14).as_slice()), |_, v| {
                u32::from_be_bytes(v.try_into().unwrap()) % 2 == 0
            })
        })
        .unwrap();
    assert_eq!(deleted, 5);
    assert_eq!(tree.count(), 15);

    assert!(tree.contains_key(&key(5)));
    assert!(!tree.contains_key(&key(6)));
    assert!(tree.contains_key(&key(16)));
    assert_eq!(db.statistics().total_deletes, 5);

    let reader = db.begin_read().unwrap();
    let err = tree
        .delete_if_txn(&reader, None, None, |_, _| true)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArg);
}

#[test]
fn test_delete_if_maintains_indexes() {
    let (_dir, db) = temp_db();
    db.register_key_extractor(V1, 0, field_extractor);
    let mut tree = Tree::open(&db, "t", TreeFlags::default(), 0).unwrap();
    tree.add_index(IndexConfig::new("email")).unwrap();
    for i in 0..6u32 {
        let value = format!("email=u{}@x;tier={}", i, i % 2);
        tree.insert_one(&key(i), value.as_bytes()).unwrap();
    }

    let deleted = db
        .with_write_txn(|txn| {
            tree.delete_if_txn(txn, None, None, |_, v| v.ends_with(b"tier=1"))
        })
        .unwrap();
    assert_eq!(deleted, 3);
    tree.verify_indexes().unwrap();
    assert!(!tree.index_seek("email", b"u1@x").unwrap().valid());
    assert!(tree.index_seek("email", b"u2@x").unwrap().valid());
}

#[test]
fn test_collect_range() {
    let (_dir, db) = temp_db();
    let tree = numbered_tree(&db, 20);
    let txn = db.begin_read().unwrap();

    let entries = tree
        .collect_range_txn(&txn, Some(key(10).as_slice()), None, None, 0)
        .unwrap();
    assert_eq!(entries.len(), 10);
    assert_eq!(entries[0].0, key(10));
    assert_eq!(entries[0].1, 10u32.to_be_bytes());

    let limited = tree
        .collect_range_txn(&txn, None, None, None, 4)
        .unwrap();
    assert_eq!(limited.len(), 4);

    let mut odd = |_: &[u8], v: &[u8]| u32::from_be_bytes(v.try_into().unwrap()) % 2 == 1;
    let predicate: Predicate<'_> = &mut odd;
    let filtered = tree
        .collect_range_txn(&txn, None, Some(key(9).as_slice()), Some(predicate), 3)
        .unwrap();
    let keys: Vec<Vec<u8>> = filtered.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![key(1), key(3), key(5)]);
}
