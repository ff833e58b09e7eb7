//! Storage engine for filesystem usage aggregates
//!
//! Two record families are persisted per snapshot, each in its own RocksDB
//! database with one Column Family per bucket:
//!
//! - Directory usage (`dguta`): per-directory breakdown rows plus a children
//!   index, written by a batching producer and read through [`dguta::Tree`]
//! - Base directory usage (`basedirs`): per-owner usage, sub-directory
//!   breakdowns and an append-only quota history, written in transactional
//!   write cycles and read through the [`traits::BaseDirReader`] interface
//!
//! Any number of snapshots can be read together: [`dguta::Database`] and
//! [`basedirs::MultiReader`] merge results across stores.

pub mod basedirs;
pub mod dguta;
pub mod owners;
pub mod rocksdb;
pub mod traits;

// Re-export commonly used types
pub use basedirs::{BaseDirsReader, BaseDirsWriter, MultiReader};
pub use dguta::{Database, DirInfo, DirUsageStore, DirUsageWriter, Tree};
pub use owners::Owners;
pub use traits::{
    BaseDirReader, NameLookup, PartialError, PartialResult, StaticNames, StoreError, StoreResult,
};
