//! Read-only view of one directory usage snapshot

use super::{clean_dir, join_child, BUCKETS, CHILDREN_BUCKET, GUT_BUCKET};
use crate::rocksdb::key_encoding::dir_key;
use crate::rocksdb::{decode_value, open_read_only, read_metadata};
use crate::traits::{StoreError, StoreResult};
use parking_lot::RwLock;
use rocksdb::{IteratorMode, DB};
use std::path::{Path, PathBuf};
use tracing::info;
use usage_core::{DirUsage, DirUsageInfo, Guta};

pub struct DirUsageStore {
    /// `None` once closed
    db: RwLock<Option<DB>>,
    path: PathBuf,
    mount_path: Option<String>,
    updated_at: Option<i64>,
}

impl DirUsageStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = open_read_only(&path, &BUCKETS)?;
        let (mount_path, updated_at) = read_metadata(&db)?;

        Ok(Self {
            db: RwLock::new(Some(db)),
            path: path.as_ref().to_path_buf(),
            mount_path,
            updated_at,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mount_path(&self) -> Option<&str> {
        self.mount_path.as_deref()
    }

    /// Unix seconds of the write that produced this snapshot
    pub fn updated_at(&self) -> Option<i64> {
        self.updated_at
    }

    fn with_db<T>(&self, f: impl FnOnce(&DB) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        f(db)
    }

    /// Usage rows of one directory, `None` if it has no recorded usage
    pub fn dir_usage(&self, dir: &str) -> StoreResult<Option<DirUsage>> {
        let dir = clean_dir(dir);
        self.with_db(|db| {
            let cf = bucket(db, GUT_BUCKET)?;
            match db.get_cf(cf, dir_key(dir))? {
                Some(bytes) => {
                    let gutas: Vec<Guta> = decode_value(&bytes)?;
                    Ok(Some(DirUsage::new(dir, gutas)))
                }
                None => Ok(None),
            }
        })
    }

    /// Full paths of the immediate children of `dir`, sorted
    pub fn children(&self, dir: &str) -> StoreResult<Vec<String>> {
        let dir = clean_dir(dir);
        self.with_db(|db| {
            let cf = bucket(db, CHILDREN_BUCKET)?;
            match db.get_cf(cf, dir_key(dir))? {
                Some(bytes) => {
                    let names: Vec<String> = decode_value(&bytes)?;
                    Ok(names.iter().map(|name| join_child(dir, name)).collect())
                }
                None => Ok(Vec::new()),
            }
        })
    }

    /// Count records in both buckets
    pub fn info(&self) -> StoreResult<DirUsageInfo> {
        self.with_db(|db| {
            let mut info = DirUsageInfo::default();

            let cf = bucket(db, GUT_BUCKET)?;
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (_, v) = item?;
                let gutas: Vec<Guta> = decode_value(&v)?;
                info.num_dirs += 1;
                info.num_gutas += gutas.len() as u64;
            }

            let cf = bucket(db, CHILDREN_BUCKET)?;
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (_, v) = item?;
                let names: Vec<String> = decode_value(&v)?;
                info.num_parents += 1;
                info.num_children += names.len() as u64;
            }

            Ok(info)
        })
    }

    /// Release the database. Idempotent; later reads fail with `Closed`.
    pub fn close(&self) -> StoreResult<()> {
        if self.db.write().take().is_some() {
            info!("Directory usage store closed: {:?}", self.path);
        }
        Ok(())
    }
}

fn bucket<'a>(db: &'a DB, name: &str) -> StoreResult<&'a rocksdb::ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::RequiredBucketsMissing(name.to_string()))
}
