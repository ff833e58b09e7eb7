//! Merged view over many directory usage snapshots

use super::store::DirUsageStore;
use crate::traits::{record_error, PartialError, PartialResult, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{error, info};
use usage_core::{mount_key, DirUsage, DirUsageInfo};

pub struct Database {
    stores: Vec<DirUsageStore>,
}

impl Database {
    pub fn new(stores: Vec<DirUsageStore>) -> Self {
        Self { stores }
    }

    /// Open one store per path. Stores opened before a failure are closed.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> StoreResult<Self> {
        if paths.is_empty() {
            return Err(StoreError::Config("no directory usage stores given".to_string()));
        }

        let mut stores = Vec::with_capacity(paths.len());
        for path in paths {
            match DirUsageStore::open(path) {
                Ok(store) => stores.push(store),
                Err(e) => {
                    error!("Failed to open directory usage store {:?}: {}", path.as_ref(), e);
                    let opened = Self { stores };
                    return match opened.close() {
                        Ok(()) => Err(e),
                        Err(StoreError::Joined(mut close_errors)) => {
                            close_errors.insert(0, e);
                            Err(StoreError::Joined(close_errors))
                        }
                        Err(close_err) => Err(StoreError::Joined(vec![e, close_err])),
                    };
                }
            }
        }

        info!("Opened {} directory usage stores", stores.len());
        Ok(Self { stores })
    }

    pub fn stores(&self) -> &[DirUsageStore] {
        &self.stores
    }

    /// Usage of `dir` merged across every store holding it, with the newest
    /// update time among those stores. A failing store is skipped and its
    /// error returned alongside what the others hold.
    pub fn dir_usage(&self, dir: &str) -> PartialResult<Option<(DirUsage, i64)>> {
        let mut merged: Option<(DirUsage, i64)> = None;
        let mut errors = Vec::new();

        for store in &self.stores {
            let usage = match store.dir_usage(dir) {
                Ok(Some(usage)) => usage,
                Ok(None) => continue,
                Err(e) => {
                    record_error(&mut errors, e);
                    continue;
                }
            };
            let updated_at = store.updated_at().unwrap_or_default();

            match merged.as_mut() {
                Some((existing, modtime)) => {
                    existing.merge(&usage);
                    *modtime = (*modtime).max(updated_at);
                }
                None => merged = Some((usage, updated_at)),
            }
        }

        PartialError::collect(merged, errors)
    }

    /// Union of the children of `dir` across stores, sorted
    pub fn children(&self, dir: &str) -> PartialResult<Vec<String>> {
        let mut children = BTreeSet::new();
        let mut errors = Vec::new();

        for store in &self.stores {
            match store.children(dir) {
                Ok(names) => children.extend(names),
                Err(e) => record_error(&mut errors, e),
            }
        }

        PartialError::collect(children.into_iter().collect(), errors)
    }

    /// Summed record counts; per-store failures are joined
    pub fn info(&self) -> PartialResult<DirUsageInfo> {
        let mut total = DirUsageInfo::default();
        let mut errors = Vec::new();

        for store in &self.stores {
            match store.info() {
                Ok(info) => total.add(&info),
                Err(e) => errors.push(e),
            }
        }

        PartialError::collect(total, errors)
    }

    /// Newest update time per mount key
    pub fn mount_timestamps(&self) -> HashMap<String, DateTime<Utc>> {
        let mut timestamps: HashMap<String, DateTime<Utc>> = HashMap::new();

        for store in &self.stores {
            let (Some(mount_path), Some(updated_at)) = (store.mount_path(), store.updated_at())
            else {
                continue;
            };
            let Some(updated_at) = DateTime::from_timestamp(updated_at, 0) else {
                continue;
            };

            timestamps
                .entry(mount_key(mount_path))
                .and_modify(|t| *t = (*t).max(updated_at))
                .or_insert(updated_at);
        }

        timestamps
    }

    /// Close every store, joining failures
    pub fn close(&self) -> StoreResult<()> {
        let errors = self
            .stores
            .iter()
            .filter_map(|store| store.close().err())
            .collect();
        StoreError::join(errors)
    }
}
