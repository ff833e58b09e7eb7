//! RocksDB plumbing shared by both record families
//!
//! ## Layout
//!
//! Each snapshot store is one RocksDB database. Every logical bucket is a
//! Column Family; the `meta` Column Family holds:
//! - `mountPath`: raw UTF-8 mount path
//! - `updatedAt`: 8-byte little-endian unix seconds
//!
//! ## Module Structure
//!
//! - `key_encoding.rs`: owner-scoped and directory key codecs
//! - `txn.rs`: staged write transaction with atomic commit

pub mod key_encoding;
pub mod txn;

use crate::traits::{StoreError, StoreResult};
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

pub use txn::StagedTxn;

/// Column Family holding snapshot metadata
pub const META_BUCKET: &str = "meta";

const MOUNT_PATH_KEY: &[u8] = b"mountPath";
const UPDATED_AT_KEY: &[u8] = b"updatedAt";

fn base_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    opts.set_write_buffer_size(64 * 1024 * 1024);
    opts.set_max_write_buffer_number(4);
    opts.set_target_file_size_base(64 * 1024 * 1024);
    opts.set_max_background_jobs(4);
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    opts
}

fn descriptors(buckets: &[&str]) -> Vec<ColumnFamilyDescriptor> {
    std::iter::once(META_BUCKET)
        .chain(buckets.iter().copied())
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect()
}

/// Open (creating if needed) a store with the meta bucket plus `buckets`
pub fn open_read_write<P: AsRef<Path>>(path: P, buckets: &[&str]) -> StoreResult<DB> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(StoreError::Config("store path is empty".to_string()));
    }

    let db = DB::open_cf_descriptors(&base_options(), path, descriptors(buckets))?;
    info!("RocksDB opened read-write at: {:?}", path);
    Ok(db)
}

/// Open an existing store read-only. Missing buckets are a structural
/// error.
pub fn open_read_only<P: AsRef<Path>>(path: P, buckets: &[&str]) -> StoreResult<DB> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(StoreError::Config("store path is empty".to_string()));
    }

    let mut opts = Options::default();
    opts.create_if_missing(false);

    let existing = DB::list_cf(&opts, path)?;
    let missing: Vec<&str> = buckets
        .iter()
        .copied()
        .filter(|name| !existing.iter().any(|cf| cf == name))
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::RequiredBucketsMissing(missing.join(", ")));
    }

    // Legacy stores may lack the meta bucket; open whatever exists
    let names: Vec<&str> = existing.iter().map(String::as_str).collect();
    let db = DB::open_cf_for_read_only(&opts, path, names, false)?;
    debug!("RocksDB opened read-only at: {:?}", path);
    Ok(db)
}

/// Persist mount path and update time
pub fn write_metadata(db: &DB, mount_path: &str, updated_at: i64) -> StoreResult<()> {
    let cf = db
        .cf_handle(META_BUCKET)
        .ok_or_else(|| StoreError::RequiredBucketsMissing(META_BUCKET.to_string()))?;
    db.put_cf(cf, MOUNT_PATH_KEY, mount_path.as_bytes())?;
    db.put_cf(cf, UPDATED_AT_KEY, updated_at.to_le_bytes())?;
    Ok(())
}

/// Read persisted (mount path, update time). Either is `None` for stores
/// written without metadata.
pub fn read_metadata(db: &DB) -> StoreResult<(Option<String>, Option<i64>)> {
    let Some(cf) = db.cf_handle(META_BUCKET) else {
        return Ok((None, None));
    };

    let mount_path = match db.get_cf(cf, MOUNT_PATH_KEY)? {
        Some(bytes) => Some(
            String::from_utf8(bytes).map_err(|e| StoreError::Decode(e.to_string()))?,
        ),
        None => None,
    };

    let updated_at = match db.get_cf(cf, UPDATED_AT_KEY)? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::Decode("updatedAt is not 8 bytes".to_string()))?;
            Some(i64::from_le_bytes(raw))
        }
        None => None,
    };

    Ok((mount_path, updated_at))
}

/// Serialize a stored value
pub fn encode_value<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

/// Deserialize a stored value
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}
