//! Storage backends and collaborator adapters implementing the domain ports.

pub mod in_memory;
pub mod proof;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod unit_of_work;
