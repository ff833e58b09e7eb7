//! Base directory usage record family
//!
//! ## Buckets
//!
//! All keys are owner-scoped (see `rocksdb::key_encoding`):
//! - `groupUsage`: (gid, base dir, age) -> bincode `Usage`
//! - `userUsage`: (uid, base dir, age) -> bincode `Usage`
//! - `groupSubDirs`: (gid, base dir, age) -> bincode `Vec<SubDir>`
//! - `userSubDirs`: (uid, base dir, age) -> bincode `Vec<SubDir>`
//! - `groupHistorical`: (gid, mount path) -> bincode `Vec<HistoryPoint>`
//!
//! Every write cycle recreates the usage and sub-directory buckets; the
//! history bucket survives so growth curves accumulate across re-scans.
//!
//! ## Module Structure
//!
//! - `writer.rs`: transactional write cycle and quota date finalization
//! - `reader.rs`: read-only view of one snapshot
//! - `multi.rs`: aggregation across many snapshots

mod multi;
mod reader;
mod writer;

pub use multi::MultiReader;
pub use reader::BaseDirsReader;
pub use writer::BaseDirsWriter;

pub const GROUP_USAGE_BUCKET: &str = "groupUsage";
pub const USER_USAGE_BUCKET: &str = "userUsage";
pub const GROUP_SUB_DIRS_BUCKET: &str = "groupSubDirs";
pub const USER_SUB_DIRS_BUCKET: &str = "userSubDirs";
pub const GROUP_HISTORICAL_BUCKET: &str = "groupHistorical";

/// Buckets recreated by every write cycle
pub(crate) const RESET_BUCKETS: [&str; 4] = [
    GROUP_USAGE_BUCKET,
    USER_USAGE_BUCKET,
    GROUP_SUB_DIRS_BUCKET,
    USER_SUB_DIRS_BUCKET,
];

pub(crate) const BUCKETS: [&str; 5] = [
    GROUP_USAGE_BUCKET,
    USER_USAGE_BUCKET,
    GROUP_SUB_DIRS_BUCKET,
    USER_SUB_DIRS_BUCKET,
    GROUP_HISTORICAL_BUCKET,
];
