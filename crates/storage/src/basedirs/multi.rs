//! Aggregation of base directory reads across many snapshots
//!
//! - usage scans concatenate every source, keeping partial results
//! - sub-directory lookups take the first source that has the owner
//! - history lookups take the first source that has a history
//! - mount timestamps keep the newest per mount
//! - info sums every source

use super::BaseDirsReader;
use crate::owners::Owners;
use crate::traits::{BaseDirReader, PartialError, PartialResult, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use usage_core::{Age, BaseDirsInfo, HistoryPoint, MountPoints, SubDir, Usage};

pub struct MultiReader {
    readers: Vec<Arc<dyn BaseDirReader>>,
}

impl MultiReader {
    pub fn new(readers: Vec<Arc<dyn BaseDirReader>>) -> Self {
        Self { readers }
    }

    /// Open a reader per path. If any fails, the ones already opened are
    /// closed again.
    pub fn open<P: AsRef<Path>>(paths: &[P], owners_path: Option<&Path>) -> StoreResult<Self> {
        Self::open_with_mount_points(paths, owners_path, &MountPoints::default())
    }

    /// Like [`MultiReader::open`], overriding every reader's mount points
    /// unless `mount_points` is empty.
    pub fn open_with_mount_points<P: AsRef<Path>>(
        paths: &[P],
        owners_path: Option<&Path>,
        mount_points: &MountPoints,
    ) -> StoreResult<Self> {
        let owners = match owners_path {
            Some(owners_path) => Owners::load(owners_path)?,
            None => Owners::default(),
        };
        let mut readers: Vec<Arc<dyn BaseDirReader>> = Vec::with_capacity(paths.len());

        for path in paths {
            match BaseDirsReader::open_with_owners(path, owners.clone()) {
                Ok(reader) => {
                    if !mount_points.is_empty() {
                        reader.set_mount_points(mount_points.clone());
                    }
                    readers.push(Arc::new(reader));
                }
                Err(e) => {
                    let close_errors: Vec<StoreError> =
                        readers.iter().filter_map(|r| r.close().err()).collect();
                    if close_errors.is_empty() {
                        return Err(e);
                    }
                    let mut errors = vec![e];
                    errors.extend(close_errors);
                    return Err(StoreError::Joined(errors));
                }
            }
        }

        debug!("Opened {} base directory stores", readers.len());
        Ok(Self { readers })
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    fn concat_usage(
        &self,
        query: impl Fn(&dyn BaseDirReader) -> PartialResult<Vec<Usage>>,
    ) -> PartialResult<Vec<Usage>> {
        let mut rows = Vec::new();
        let mut errors = Vec::new();

        for reader in &self.readers {
            match query(reader.as_ref()) {
                Ok(mut found) => rows.append(&mut found),
                Err(PartialError { mut partial, error }) => {
                    rows.append(&mut partial);
                    errors.push(error);
                }
            }
        }

        match StoreError::join(errors) {
            Ok(()) => Ok(rows),
            Err(error) => {
                warn!("Usage query partially failed: {}", error);
                Err(PartialError {
                    partial: rows,
                    error,
                })
            }
        }
    }

    fn first_sub_dirs(
        &self,
        query: impl Fn(&dyn BaseDirReader) -> StoreResult<Vec<SubDir>>,
    ) -> StoreResult<Vec<SubDir>> {
        for reader in &self.readers {
            match query(reader.as_ref()) {
                Ok(sub_dirs) => return Ok(sub_dirs),
                Err(StoreError::OwnerNotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Vec::new())
    }
}

impl BaseDirReader for MultiReader {
    fn group_usage(&self, age: Age) -> PartialResult<Vec<Usage>> {
        self.concat_usage(|reader| reader.group_usage(age))
    }

    fn user_usage(&self, age: Age) -> PartialResult<Vec<Usage>> {
        self.concat_usage(|reader| reader.user_usage(age))
    }

    fn group_sub_dirs(&self, gid: u32, base_dir: &str, age: Age) -> StoreResult<Vec<SubDir>> {
        self.first_sub_dirs(|reader| reader.group_sub_dirs(gid, base_dir, age))
    }

    fn user_sub_dirs(&self, uid: u32, base_dir: &str, age: Age) -> StoreResult<Vec<SubDir>> {
        self.first_sub_dirs(|reader| reader.user_sub_dirs(uid, base_dir, age))
    }

    /// A source whose mounts do not cover `path` is a miss like a source
    /// without history.
    fn history(&self, gid: u32, path: &str) -> StoreResult<Vec<HistoryPoint>> {
        for reader in &self.readers {
            match reader.history(gid, path) {
                Ok(history) => return Ok(history),
                Err(StoreError::NoHistory) | Err(StoreError::InvalidBasePath(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::NoHistory)
    }

    fn mount_timestamps(&self) -> StoreResult<HashMap<String, DateTime<Utc>>> {
        let mut timestamps: HashMap<String, DateTime<Utc>> = HashMap::new();

        for reader in &self.readers {
            for (mount, updated_at) in reader.mount_timestamps()? {
                timestamps
                    .entry(mount)
                    .and_modify(|t| *t = (*t).max(updated_at))
                    .or_insert(updated_at);
            }
        }

        Ok(timestamps)
    }

    fn info(&self) -> PartialResult<BaseDirsInfo> {
        let mut total = BaseDirsInfo::default();
        let mut errors = Vec::new();

        for reader in &self.readers {
            match reader.info() {
                Ok(info) => total.add(&info),
                Err(PartialError { partial, error }) => {
                    total.add(&partial);
                    errors.push(error);
                }
            }
        }

        PartialError::collect(total, errors)
    }

    fn close(&self) -> StoreResult<()> {
        let errors = self
            .readers
            .iter()
            .filter_map(|reader| reader.close().err())
            .collect();
        StoreError::join(errors)
    }
}
