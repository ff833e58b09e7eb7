//! Staged write transaction over Column Families
//!
//! Writes are buffered in memory per bucket and read back through the
//! staging layer. Commit turns the staged state into one atomic
//! `WriteBatch`; dropping an uncommitted transaction discards it.

use crate::traits::{StoreError, StoreResult};
use rocksdb::{IteratorMode, WriteBatch, WriteOptions, DB};
use std::collections::{BTreeMap, HashMap, HashSet};

/// An open write cycle
#[derive(Debug, Default)]
pub struct StagedTxn {
    /// Buckets recreated empty in this transaction
    cleared: HashSet<&'static str>,
    /// bucket -> key -> value
    staged: HashMap<&'static str, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl StagedTxn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recreate a bucket empty: committed contents are hidden now and
    /// deleted on commit.
    pub fn clear(&mut self, bucket: &'static str) {
        self.cleared.insert(bucket);
        self.staged.remove(bucket);
    }

    pub fn put(&mut self, bucket: &'static str, key: Vec<u8>, value: Vec<u8>) {
        self.staged.entry(bucket).or_default().insert(key, value);
    }

    /// Read a key, preferring staged writes over committed data
    pub fn get(&self, db: &DB, bucket: &'static str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        if let Some(value) = self.staged.get(bucket).and_then(|b| b.get(key)) {
            return Ok(Some(value.clone()));
        }
        if self.cleared.contains(bucket) {
            return Ok(None);
        }

        let cf = cf_handle(db, bucket)?;
        Ok(db.get_cf(cf, key)?)
    }

    /// Every visible (key, value) of a bucket in key order
    pub fn scan(&self, db: &DB, bucket: &'static str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        if !self.cleared.contains(bucket) {
            let cf = cf_handle(db, bucket)?;
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (k, v) = item?;
                merged.insert(k.to_vec(), v.to_vec());
            }
        }

        if let Some(staged) = self.staged.get(bucket) {
            for (k, v) in staged {
                merged.insert(k.clone(), v.clone());
            }
        }

        Ok(merged.into_iter().collect())
    }

    /// Apply everything atomically
    pub fn commit(self, db: &DB, write_opts: &WriteOptions) -> StoreResult<()> {
        let mut batch = WriteBatch::default();

        // Clear recreated buckets before applying staged puts
        for bucket in &self.cleared {
            let cf = cf_handle(db, bucket)?;
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (k, _) = item?;
                batch.delete_cf(cf, &k);
            }
        }

        for (bucket, entries) in &self.staged {
            let cf = cf_handle(db, bucket)?;
            for (k, v) in entries {
                batch.put_cf(cf, k, v);
            }
        }

        db.write_opt(batch, write_opts)?;
        Ok(())
    }
}

fn cf_handle<'a>(db: &'a DB, bucket: &str) -> StoreResult<&'a rocksdb::ColumnFamily> {
    db.cf_handle(bucket)
        .ok_or_else(|| StoreError::RequiredBucketsMissing(bucket.to_string()))
}
