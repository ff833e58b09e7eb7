//! Transactional write cycle for one base directory snapshot
//!
//! `Created -> (set_mount_path, set_updated_at) -> reset -> put* -> finalize`
//! or `close` at any point to abandon. Nothing written between `reset` and
//! `finalize` is visible to readers until `finalize` commits.

use super::{
    BUCKETS, GROUP_HISTORICAL_BUCKET, GROUP_SUB_DIRS_BUCKET, GROUP_USAGE_BUCKET, RESET_BUCKETS,
    USER_SUB_DIRS_BUCKET, USER_USAGE_BUCKET,
};
use crate::rocksdb::key_encoding::{decode_usage_key, is_all_ages_key, usage_key};
use crate::rocksdb::{decode_value, encode_value, open_read_write, write_metadata, StagedTxn};
use crate::traits::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rocksdb::{WriteOptions, DB};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use usage_core::quota::date_quota_full;
use usage_core::{Age, HistoryPoint, MountPoints, SubDir, Usage};

pub struct BaseDirsWriter {
    db: Option<DB>,
    path: PathBuf,
    mount_path: Option<String>,
    updated_at: Option<i64>,
    /// Open write cycle, between `reset` and `finalize`
    txn: Option<StagedTxn>,
    write_opts: WriteOptions,
}

impl BaseDirsWriter {
    /// Open (creating if needed) the store at `path` for writing
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = open_read_write(&path, &BUCKETS)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);

        Ok(Self {
            db: Some(db),
            path: path.as_ref().to_path_buf(),
            mount_path: None,
            updated_at: None,
            txn: None,
            write_opts,
        })
    }

    pub fn set_mount_path(&mut self, mount_path: impl Into<String>) {
        self.mount_path = Some(mount_path.into());
    }

    pub fn set_updated_at(&mut self, updated_at: DateTime<Utc>) {
        self.updated_at = Some(updated_at.timestamp());
    }

    fn db(&self) -> StoreResult<&DB> {
        self.db.as_ref().ok_or(StoreError::Closed)
    }

    /// Persist metadata and start a write cycle with the usage and
    /// sub-directory buckets emptied. Any cycle already open is discarded.
    pub fn reset(&mut self) -> StoreResult<()> {
        let (Some(mount_path), Some(updated_at)) = (self.mount_path.as_deref(), self.updated_at)
        else {
            return Err(StoreError::MetadataNotSet);
        };
        if !is_valid_mount_path(mount_path) {
            return Err(StoreError::InvalidMountPath(mount_path.to_string()));
        }

        write_metadata(self.db()?, mount_path, updated_at)?;

        if self.txn.take().is_some() {
            warn!("Discarding unfinished write cycle for {:?}", self.path);
        }

        let mut txn = StagedTxn::new();
        for bucket in RESET_BUCKETS {
            txn.clear(bucket);
        }
        self.txn = Some(txn);

        info!("Write cycle started for {:?} (mount {})", self.path, mount_path);
        Ok(())
    }

    /// Stage a write. Outside a write cycle (before `reset`, after
    /// `finalize` or `close`) this is `NotReset`.
    fn put(&mut self, bucket: &'static str, key: Vec<u8>, value: Vec<u8>) -> StoreResult<()> {
        let txn = self.txn.as_mut().ok_or(StoreError::NotReset)?;
        txn.put(bucket, key, value);
        Ok(())
    }

    pub fn put_group_usage(&mut self, usage: &Usage) -> StoreResult<()> {
        let key = usage_key(usage.gid, &usage.base_dir, usage.age);
        self.put(GROUP_USAGE_BUCKET, key, encode_value(usage)?)
    }

    pub fn put_user_usage(&mut self, usage: &Usage) -> StoreResult<()> {
        let key = usage_key(usage.uid, &usage.base_dir, usage.age);
        self.put(USER_USAGE_BUCKET, key, encode_value(usage)?)
    }

    pub fn put_group_sub_dirs(
        &mut self,
        gid: u32,
        base_dir: &str,
        age: Age,
        sub_dirs: &[SubDir],
    ) -> StoreResult<()> {
        let key = usage_key(gid, base_dir, age);
        self.put(GROUP_SUB_DIRS_BUCKET, key, encode_value(&sub_dirs)?)
    }

    pub fn put_user_sub_dirs(
        &mut self,
        uid: u32,
        base_dir: &str,
        age: Age,
        sub_dirs: &[SubDir],
    ) -> StoreResult<()> {
        let key = usage_key(uid, base_dir, age);
        self.put(USER_SUB_DIRS_BUCKET, key, encode_value(&sub_dirs)?)
    }

    /// Append a point to the (gid, mount path) history. A point not
    /// strictly after the last stored date is dropped. The mount path must
    /// start and end with `/`.
    pub fn append_group_history(
        &mut self,
        gid: u32,
        mount_path: &str,
        point: HistoryPoint,
    ) -> StoreResult<()> {
        if !is_valid_mount_path(mount_path) {
            return Err(StoreError::InvalidMountPath(mount_path.to_string()));
        }

        let key = usage_key(gid, mount_path, Age::All);
        let txn = self.txn.as_mut().ok_or(StoreError::NotReset)?;
        let db = self.db.as_ref().ok_or(StoreError::Closed)?;

        let mut history: Vec<HistoryPoint> = match txn.get(db, GROUP_HISTORICAL_BUCKET, &key)? {
            Some(bytes) => decode_value(&bytes)?,
            None => Vec::new(),
        };

        if let Some(last) = history.last() {
            if point.date <= last.date {
                debug!(
                    "Dropping history point for gid {} on {}: {} is not after {}",
                    gid, mount_path, point.date, last.date
                );
                return Ok(());
            }
        }

        history.push(point);
        txn.put(GROUP_HISTORICAL_BUCKET, key, encode_value(&history)?);
        Ok(())
    }

    /// Fill quota breach dates on every all-ages group usage row and commit
    /// the write cycle. Any failure rolls the whole cycle back.
    pub fn finalize(&mut self) -> StoreResult<()> {
        let mut txn = self.txn.take().ok_or(StoreError::NotReset)?;
        let db = self.db.as_ref().ok_or(StoreError::Closed)?;

        // `txn` is dropped (rolled back) on every early return below
        let missing: Vec<&str> = BUCKETS
            .iter()
            .copied()
            .chain(std::iter::once(crate::rocksdb::META_BUCKET))
            .filter(|bucket| db.cf_handle(bucket).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::RequiredBucketsMissing(missing.join(", ")));
        }

        let histories = load_histories(db, &txn)?;
        let mounts = MountPoints::new(histories.keys().map(|(_, mount)| mount.clone()));

        let mut filled = 0usize;
        for (key, value) in txn.scan(db, GROUP_USAGE_BUCKET)? {
            if !is_all_ages_key(&key) {
                continue;
            }

            let mut usage: Usage = decode_value(&value)?;
            let (date_no_space, date_no_files) = mounts
                .prefix_of(&usage.base_dir)
                .and_then(|mount| histories.get(&(usage.gid, mount.to_string())))
                .map(|history| date_quota_full(history))
                .unwrap_or((0, 0));

            usage.date_no_space = date_no_space;
            usage.date_no_files = date_no_files;
            if date_no_space != 0 || date_no_files != 0 {
                filled += 1;
            }
            txn.put(GROUP_USAGE_BUCKET, key, encode_value(&usage)?);
        }

        txn.commit(db, &self.write_opts)?;
        info!(
            "Write cycle committed for {:?}: {} usage rows with quota dates",
            self.path, filled
        );
        Ok(())
    }

    /// Abandon any open write cycle and close the store. Idempotent.
    pub fn close(&mut self) -> StoreResult<()> {
        let mut errors = Vec::new();

        if self.txn.take().is_some() {
            debug!("Rolled back open write cycle for {:?}", self.path);
        }

        if let Some(db) = self.db.take() {
            if let Err(e) = db.flush() {
                errors.push(StoreError::from(e));
            }
            drop(db);
            info!("Base directory store closed: {:?}", self.path);
        }

        StoreError::join(errors)
    }
}

impl Drop for BaseDirsWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn is_valid_mount_path(path: &str) -> bool {
    path.starts_with('/') && path.ends_with('/')
}

/// All history sequences visible in the transaction, by (gid, mount path)
fn load_histories(
    db: &DB,
    txn: &StagedTxn,
) -> StoreResult<HashMap<(u32, String), Vec<HistoryPoint>>> {
    let mut histories = HashMap::new();
    for (key, value) in txn.scan(db, GROUP_HISTORICAL_BUCKET)? {
        let (gid, mount, _) = decode_usage_key(&key)
            .ok_or_else(|| StoreError::Decode("invalid history key".to_string()))?;
        let history: Vec<HistoryPoint> = decode_value(&value)?;
        histories.insert((gid, mount), history);
    }
    Ok(histories)
}
