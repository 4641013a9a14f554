//! # wtree - Transactional Ordered Key-Value Store with Secondary Indexes
//!
// Copyright 2025 Mehran Toosi
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! wtree stores named, ordered byte-key trees in one embedded database file
//! and keeps secondary indexes consistent with them inside the same
//! transaction. A bounded MPSC queue plus a batching consumer let many
//! producer threads feed one tree at high rates.
//!
//! ## Features
//!
//! - **Transactions**: Single writer, many readers; every tree operation has
//!   a `_txn` form that joins a caller transaction and an auto-commit form
//! - **Secondary Indexes**: Unique and sparse indexes driven by registered key
//!   extractors, persisted and reattached automatically on reopen
//! - **Cursors**: Bidirectional iterators over trees and indexes, with
//!   in-place delete inside write transactions
//! - **Scans and Bulk Operations**: Range, reverse and prefix scans,
//!   read-modify-write, conditional delete and range collection
//! - **Swap-Buffer Ingestion**: Producers enqueue into a ring; the consumer
//!   takes the whole ring in O(1) and commits it as one batch
//! - **Statistics**: Operation counters per database and consumer metrics
//!   with P95 batch latency
//!
//! ## Durability
//!
//! Commits are durable by default. With `no_sync` they become eventually
//! durable and [`Db::sync`] with `force = true` persists everything committed
//! so far.
//!
//! ## Quick Start
//!
//! ```no_run
//! use wtree::{Db, Tree, TreeFlags};
//!
//! # fn main() -> wtree::Result<()> {
//! let db = Db::builder().open("/var/lib/app")?;
//! let tree = Tree::open(&db, "users", TreeFlags::default(), 0)?;
//!
//! tree.insert_one(b"user:1", b"alice")?;
//! assert_eq!(tree.get(b"user:1")?, b"alice");
//!
//! // Several writes in one transaction
//! let txn = db.begin_write()?;
//! tree.upsert_txn(&txn, b"user:2", b"bob")?;
//! tree.delete_one_txn(&txn, b"user:1")?;
//! txn.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Secondary Indexes
//!
//! ```no_run
//! use wtree::{schema_version, Db, IndexConfig, Tree, TreeFlags, INDEX_FLAG_UNIQUE};
//!
//! # fn main() -> wtree::Result<()> {
//! let db = Db::builder().version(1, 0).open("/var/lib/app")?;
//! // Values look like "<email>|<name>"
//! db.register_key_extractor(schema_version(1, 0), INDEX_FLAG_UNIQUE, |value, _| {
//!     value.split(|b| *b == b'|').next().map(<[u8]>::to_vec)
//! });
//!
//! let mut tree = Tree::open(&db, "users", TreeFlags::default(), 0)?;
//! tree.add_index(IndexConfig::new("email").unique(true))?;
//! tree.insert_one(b"1", b"a@x|alice")?;
//!
//! let iter = tree.index_seek("email", b"a@x")?;
//! assert_eq!(iter.main_key(), Some(&b"1"[..]));
//! # Ok(())
//! # }
//! ```
//!
//! ### Ingestion Pipeline
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use wtree::{Consumer, ConsumerConfig, Db, QueueCallbacks, Tree, TreeFlags, WriteQueue};
//!
//! # fn main() -> wtree::Result<()> {
//! let db = Db::builder().open("/var/lib/app")?;
//! let tree = Arc::new(Tree::open(&db, "events", TreeFlags::default(), 0)?);
//! let queue: Arc<WriteQueue> = Arc::new(WriteQueue::new(1000, QueueCallbacks::new())?);
//!
//! let mut consumer = Consumer::new(queue.clone(), tree, ConsumerConfig::default());
//! consumer.start()?;
//!
//! for i in 0..100u32 {
//!     let key = Bytes::from(format!("event:{:04}", i));
//!     if let Err(rejected) = queue.enqueue(key, Bytes::from_static(b"payload")) {
//!         // Full queue: back off and retry, or drop
//!         let _ = rejected.into_inner();
//!     }
//! }
//!
//! queue.drain();
//! consumer.stop();
//! println!("{:?}", consumer.metrics());
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod stats;

pub use constants::{
    build_extractor_id, index_flags, schema_version, INDEX_FLAG_SPARSE, INDEX_FLAG_UNIQUE,
};
pub use core::db::{
    Advice, Db, DbBuilder, DbConfig, DbStats, MapInfo, OpenFlags, MLOCK_CURRENT, MLOCK_FUTURE,
};
pub use core::iterator::TreeIterator;
pub use core::registry::{ExtractorRegistry, KeyExtractor};
pub use core::tree::{
    persistence::read_index_metadata, CompareFn, Index, IndexConfig, IndexMetadata, MergeFn,
    Tree, TreeFlags,
};
pub use core::txn::Txn;
pub use error::{is_recoverable, strerror, Error, ErrorCode, Result};
pub use pipeline::{
    Consumer, ConsumerConfig, ConsumerMetrics, ConsumerState, DeadLetter, EnqueueError,
    ErrorStrategy, LogLevel, QueueCallbacks, SwappedBuffer, WriteQueue,
};
pub use stats::{Statistics, StatsSnapshot};

#[cfg(test)]
mod tests;
