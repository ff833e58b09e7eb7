//! Batching producer for directory usage records
//!
//! Records are buffered and written every `batch_size` additions (and on
//! close) as one `WriteBatch` holding both the usage rows and the merged
//! children index. The first failure latches: every later call returns it.

use super::{clean_dir, split_parent, BUCKETS, CHILDREN_BUCKET, GUT_BUCKET};
use crate::rocksdb::key_encoding::dir_key;
use crate::rocksdb::{decode_value, encode_value, open_read_write, write_metadata};
use crate::traits::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rocksdb::{WriteBatch, WriteOptions, DB};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use usage_core::DirUsage;

/// Default number of records per flush
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

pub struct DirUsageWriter {
    db: Option<DB>,
    path: PathBuf,
    batch: Vec<DirUsage>,
    batch_size: usize,
    mount_path: Option<String>,
    updated_at: Option<i64>,
    /// First fatal error, returned by every later call
    error: Option<StoreError>,
    write_opts: WriteOptions,
    written: u64,
}

impl DirUsageWriter {
    /// Create a writer for a new snapshot store at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::with_batch_size(path, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size<P: AsRef<Path>>(path: P, batch_size: usize) -> StoreResult<Self> {
        let db = open_read_write(&path, &BUCKETS)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false);

        Ok(Self {
            db: Some(db),
            path: path.as_ref().to_path_buf(),
            batch: Vec::new(),
            batch_size: batch_size.max(1),
            mount_path: None,
            updated_at: None,
            error: None,
            write_opts,
            written: 0,
        })
    }

    pub fn set_mount_path(&mut self, mount_path: impl Into<String>) {
        self.mount_path = Some(mount_path.into());
    }

    pub fn set_updated_at(&mut self, updated_at: DateTime<Utc>) {
        self.updated_at = Some(updated_at.timestamp());
    }

    /// Queue a record, flushing when the batch is full
    pub fn add(&mut self, record: DirUsage) -> StoreResult<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.db.is_none() {
            return Err(StoreError::Closed);
        }

        self.batch.push(record);
        if self.batch.len() >= self.batch_size {
            self.flush_latched()?;
        }
        Ok(())
    }

    /// Flush pending records, persist metadata and close the store
    pub fn close(&mut self) -> StoreResult<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.db.is_none() {
            return Ok(());
        }

        self.flush_latched()?;

        let result = self.finish();
        self.db = None;
        if let Err(err) = &result {
            self.error = Some(err.clone());
        } else {
            info!(
                "Directory usage store closed at {:?}: {} records written",
                self.path, self.written
            );
        }
        result
    }

    fn finish(&self) -> StoreResult<()> {
        let db = self.db.as_ref().ok_or(StoreError::Closed)?;
        if let (Some(mount_path), Some(updated_at)) = (&self.mount_path, self.updated_at) {
            write_metadata(db, mount_path, updated_at)?;
        }
        db.flush()?;
        Ok(())
    }

    fn flush_latched(&mut self) -> StoreResult<()> {
        let result = self.flush();
        if let Err(err) = &result {
            self.error = Some(err.clone());
        }
        result
    }

    fn flush(&mut self) -> StoreResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let db = self.db.as_ref().ok_or(StoreError::Closed)?;
        let gut_cf = db
            .cf_handle(GUT_BUCKET)
            .ok_or_else(|| StoreError::RequiredBucketsMissing(GUT_BUCKET.to_string()))?;
        let children_cf = db
            .cf_handle(CHILDREN_BUCKET)
            .ok_or_else(|| StoreError::RequiredBucketsMissing(CHILDREN_BUCKET.to_string()))?;

        let mut batch = WriteBatch::default();
        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for record in &self.batch {
            let dir = clean_dir(&record.dir);
            batch.put_cf(gut_cf, dir_key(dir), encode_value(&record.gutas)?);

            if let Some((parent, name)) = split_parent(dir) {
                children
                    .entry(parent.to_string())
                    .or_default()
                    .push(name.to_string());
            }
        }

        // Merge with children recorded by earlier flushes
        for (parent, mut names) in children {
            let key = dir_key(&parent);
            if let Some(existing) = db.get_cf(children_cf, &key)? {
                let existing: Vec<String> = decode_value(&existing)?;
                names.extend(existing);
            }
            names.sort();
            names.dedup();
            batch.put_cf(children_cf, key, encode_value(&names)?);
        }

        db.write_opt(batch, &self.write_opts)?;
        self.written += self.batch.len() as u64;
        debug!("Flushed {} directory usage records", self.batch.len());
        self.batch.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(dir: &str) -> DirUsage {
        DirUsage::new(dir.to_string(), Vec::new())
    }

    #[test]
    fn test_flush_error_latches() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer =
            DirUsageWriter::with_batch_size(temp_dir.path().join("dguta.db"), 1).unwrap();
        writer.db.as_mut().unwrap().drop_cf(GUT_BUCKET).unwrap();

        let err = writer.add(record("/lustre/a")).unwrap_err();
        assert_eq!(
            err,
            StoreError::RequiredBucketsMissing(GUT_BUCKET.to_string())
        );

        assert_eq!(writer.add(record("/lustre/b")).unwrap_err(), err);
        assert_eq!(writer.close().unwrap_err(), err);
        assert_eq!(writer.close().unwrap_err(), err);
    }
}
