//! Core types for filesystem usage aggregates
//!
//! Shared by the storage engine and the serving node:
//! - Age buckets and file types used to partition aggregates
//! - Directory usage rows (`DirUsage`, `Guta`)
//! - Base directory usage, sub-directory breakdowns and quota history
//! - Mount point prefix resolution

pub mod age;
pub mod basedirs;
pub mod dguta;
pub mod filetype;
pub mod mounts;
pub mod quota;

// Re-export commonly used types
pub use age::Age;
pub use basedirs::{BaseDirsInfo, HistoryPoint, SubDir, Usage};
pub use dguta::{DirSummary, DirUsage, DirUsageInfo, Filter, Guta};
pub use filetype::FileType;
pub use mounts::{mount_key, mount_path_from_key, MountPoints};
