pub mod db;
pub mod iterator;
pub mod registry;
pub(crate) mod table;
pub mod tree;
pub mod txn;
