//! Storage error taxonomy and reader trait definitions
//!
//! Errors fall into five groups:
//! - Configuration: an empty or invalid required setting
//! - Precondition: an operation called before its required setup
//! - Soft miss: no data for an owner/path (`OwnerNotFound`, `NoHistory`);
//!   multi-source readers treat these as empty results
//! - Structural: missing buckets, undecodable values, RocksDB/IO failures
//! - Joined: errors collected from several sources

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use usage_core::{Age, BaseDirsInfo, HistoryPoint, SubDir, Usage};

// ============================================================================
// Error Types
// ============================================================================

/// Storage error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A required path or setting was empty
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Mount path and updated-at must be set before a write cycle
    #[error("mount path and updated-at must be set before reset")]
    MetadataNotSet,
    /// Mount paths must start and end with `/`
    #[error("invalid mount path: {0}")]
    InvalidMountPath(String),
    /// A write was attempted outside of an open write cycle
    #[error("write cycle not started: call reset first")]
    NotReset,
    /// No usage recorded for this owner and base directory
    #[error("no usage found for owner")]
    OwnerNotFound,
    /// No history recorded for this group and mount
    #[error("no base directory history found")]
    NoHistory,
    /// Path lies under no known mount point
    #[error("invalid base path: {0}")]
    InvalidBasePath(String),
    /// The store lacks one of the buckets it must contain
    #[error("required buckets missing: {0}")]
    RequiredBucketsMissing(String),
    /// A stored key or value could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
    /// A value could not be encoded
    #[error("encode error: {0}")]
    Encode(String),
    /// RocksDB failure
    #[error("rocksdb error: {0}")]
    RocksDb(String),
    /// Filesystem failure
    #[error("io error: {0}")]
    Io(String),
    /// The store was used after close
    #[error("store is closed")]
    Closed,
    /// Errors from several sources
    #[error("{}", join_messages(.0))]
    Joined(Vec<StoreError>),
}

fn join_messages(errors: &[StoreError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StoreError {
    /// Soft misses mean "nothing here", not a failure
    pub fn is_soft_miss(&self) -> bool {
        matches!(self, StoreError::OwnerNotFound | StoreError::NoHistory)
    }

    /// Combine collected errors: none is `Ok`, one is returned as-is,
    /// several become `Joined`.
    pub fn join(mut errors: Vec<StoreError>) -> StoreResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(StoreError::Joined(errors)),
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::RocksDb(e.into_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(e: bincode::error::EncodeError) -> Self {
        StoreError::Encode(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(e: bincode::error::DecodeError) -> Self {
        StoreError::Decode(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// An error that still carries whatever could be gathered before (or
/// despite) the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialError<T> {
    pub partial: T,
    pub error: StoreError,
}

impl<T: Default> PartialError<T> {
    /// A failure with nothing gathered
    pub fn empty(error: StoreError) -> Self {
        Self {
            partial: T::default(),
            error,
        }
    }
}

impl<T> fmt::Display for PartialError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<T: fmt::Debug> std::error::Error for PartialError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<PartialError<T>> for StoreError {
    fn from(e: PartialError<T>) -> Self {
        e.error
    }
}

impl<T> PartialError<T> {
    /// `Ok(value)` when nothing failed, otherwise `value` carrying the
    /// joined errors
    pub fn collect(value: T, errors: Vec<StoreError>) -> PartialResult<T> {
        match StoreError::join(errors) {
            Ok(()) => Ok(value),
            Err(error) => Err(PartialError {
                partial: value,
                error,
            }),
        }
    }
}

/// Result of a best-effort read
pub type PartialResult<T> = Result<T, PartialError<T>>;

/// Record `error` in `errors`, flattening joined errors and skipping ones
/// already recorded.
pub fn record_error(errors: &mut Vec<StoreError>, error: StoreError) {
    match error {
        StoreError::Joined(inner) => {
            for error in inner {
                record_error(errors, error);
            }
        }
        error => {
            if !errors.contains(&error) {
                errors.push(error);
            }
        }
    }
}

/// Unwrap a best-effort read, moving its error (if any) into `errors`
pub fn gather<T>(result: PartialResult<T>, errors: &mut Vec<StoreError>) -> T {
    match result {
        Ok(value) => value,
        Err(PartialError { partial, error }) => {
            record_error(errors, error);
            partial
        }
    }
}

// ============================================================================
// Name Lookup
// ============================================================================

/// Resolves numeric group or user ids to names
pub trait NameLookup: Send + Sync {
    fn name(&self, id: u32) -> Option<String>;

    /// Name for `id`, falling back to the id itself
    fn name_or_id(&self, id: u32) -> String {
        self.name(id).unwrap_or_else(|| id.to_string())
    }
}

/// Fixed id to name table
#[derive(Debug, Clone, Default)]
pub struct StaticNames {
    names: HashMap<u32, String>,
}

impl StaticNames {
    pub fn new(names: HashMap<u32, String>) -> Self {
        Self { names }
    }

    pub fn insert(&mut self, id: u32, name: impl Into<String>) {
        self.names.insert(id, name.into());
    }
}

impl NameLookup for StaticNames {
    fn name(&self, id: u32) -> Option<String> {
        self.names.get(&id).cloned()
    }
}

// ============================================================================
// Base Directory Reader Trait
// ============================================================================

/// Read operations over base directory usage.
///
/// Implemented by a single snapshot reader and by the multi-snapshot
/// aggregator, so callers never special-case how many snapshots are served.
pub trait BaseDirReader: Send + Sync {
    /// Usage of every (group, base directory) in the given age bucket
    fn group_usage(&self, age: Age) -> PartialResult<Vec<Usage>>;

    /// Usage of every (user, base directory) in the given age bucket
    fn user_usage(&self, age: Age) -> PartialResult<Vec<Usage>>;

    /// Sub-directory breakdown of a group's base directory.
    /// Fails with `OwnerNotFound` when nothing is recorded.
    fn group_sub_dirs(&self, gid: u32, base_dir: &str, age: Age) -> StoreResult<Vec<SubDir>>;

    /// Sub-directory breakdown of a user's base directory.
    /// Fails with `OwnerNotFound` when nothing is recorded.
    fn user_sub_dirs(&self, uid: u32, base_dir: &str, age: Age) -> StoreResult<Vec<SubDir>>;

    /// Usage history of a group on the mount containing `path`.
    /// Fails with `NoHistory` when nothing is recorded.
    fn history(&self, gid: u32, path: &str) -> StoreResult<Vec<HistoryPoint>>;

    /// Last update time of each mount, keyed by escaped mount key
    fn mount_timestamps(&self) -> StoreResult<HashMap<String, DateTime<Utc>>>;

    /// Record counts
    fn info(&self) -> PartialResult<BaseDirsInfo>;

    /// Release the underlying store(s)
    fn close(&self) -> StoreResult<()>;
}
