//! Read-only view of one base directory snapshot

use super::{
    BUCKETS, GROUP_HISTORICAL_BUCKET, GROUP_SUB_DIRS_BUCKET, GROUP_USAGE_BUCKET,
    USER_SUB_DIRS_BUCKET, USER_USAGE_BUCKET,
};
use crate::owners::Owners;
use crate::rocksdb::key_encoding::{decode_usage_key, is_all_ages_key, usage_key};
use crate::rocksdb::{decode_value, open_read_only, read_metadata};
use crate::traits::{
    BaseDirReader, NameLookup, PartialError, PartialResult, StaticNames, StoreError, StoreResult,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rocksdb::{IteratorMode, DB};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use usage_core::{mount_key, Age, BaseDirsInfo, HistoryPoint, MountPoints, SubDir, Usage};

pub struct BaseDirsReader {
    /// `None` once closed
    db: RwLock<Option<DB>>,
    path: PathBuf,
    owners: Owners,
    group_names: Arc<dyn NameLookup>,
    user_names: Arc<dyn NameLookup>,
    mount_points: RwLock<MountPoints>,
    mount_path: Option<String>,
    updated_at: Option<i64>,
}

impl BaseDirsReader {
    /// Open the store at `path`, loading the owners table from
    /// `owners_path` when given.
    pub fn open<P: AsRef<Path>>(path: P, owners_path: Option<&Path>) -> StoreResult<Self> {
        let owners = match owners_path {
            Some(owners_path) => Owners::load(owners_path)?,
            None => Owners::default(),
        };
        Self::open_with_owners(path, owners)
    }

    pub fn open_with_owners<P: AsRef<Path>>(path: P, owners: Owners) -> StoreResult<Self> {
        let db = open_read_only(&path, &BUCKETS)?;
        let (mount_path, updated_at) = read_metadata(&db)?;
        let mount_points = MountPoints::new(
            history_mounts(&db)?
                .into_iter()
                .chain(mount_path.iter().cloned()),
        );

        info!(
            "Base directory store opened: {:?} (mount {:?})",
            path.as_ref(),
            mount_path
        );

        Ok(Self {
            db: RwLock::new(Some(db)),
            path: path.as_ref().to_path_buf(),
            owners,
            group_names: Arc::new(StaticNames::default()),
            user_names: Arc::new(StaticNames::default()),
            mount_points: RwLock::new(mount_points),
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

    /// Replace the mount points used to resolve history paths, for stores
    /// written without persisted metadata.
    pub fn set_mount_points(&self, mount_points: MountPoints) {
        *self.mount_points.write() = mount_points;
    }

    pub fn set_group_names(&mut self, names: Arc<dyn NameLookup>) {
        self.group_names = names;
    }

    pub fn set_user_names(&mut self, names: Arc<dyn NameLookup>) {
        self.user_names = names;
    }

    fn with_db<T>(&self, f: impl FnOnce(&DB) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        f(db)
    }

    /// Decode every usage row of `bucket` in the `age` bucket. Bucket scans
    /// return rows of every age, so rows are filtered by their key.
    fn usage(&self, bucket: &str, age: Age) -> StoreResult<Vec<Usage>> {
        self.with_db(|db| {
            let cf = bucket_handle(db, bucket)?;
            let mut rows = Vec::new();

            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (key, value) = item?;
                let matches = if age.is_all() {
                    is_all_ages_key(&key)
                } else {
                    matches!(decode_usage_key(&key), Some((_, _, key_age)) if key_age == age)
                };
                if matches {
                    rows.push(decode_value::<Usage>(&value)?);
                }
            }

            Ok(rows)
        })
    }

    fn sub_dirs(&self, bucket: &str, id: u32, base_dir: &str, age: Age) -> StoreResult<Vec<SubDir>> {
        self.with_db(|db| {
            let cf = bucket_handle(db, bucket)?;
            match db.get_cf(cf, usage_key(id, base_dir, age))? {
                Some(bytes) => decode_value(&bytes),
                None => Err(StoreError::OwnerNotFound),
            }
        })
    }

    /// Count all-ages keys and the entries stored under them
    fn count_combos(&self, bucket: &str) -> StoreResult<(u64, u64)> {
        self.with_db(|db| {
            let cf = bucket_handle(db, bucket)?;
            let (mut combos, mut entries) = (0u64, 0u64);

            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (key, value) = item?;
                if !is_all_ages_key(&key) {
                    continue;
                }
                combos += 1;
                if bucket == GROUP_SUB_DIRS_BUCKET || bucket == USER_SUB_DIRS_BUCKET {
                    entries += decode_value::<Vec<SubDir>>(&value)?.len() as u64;
                } else if bucket == GROUP_HISTORICAL_BUCKET {
                    entries += decode_value::<Vec<HistoryPoint>>(&value)?.len() as u64;
                }
            }

            Ok((combos, entries))
        })
    }

    fn info_inner(&self) -> StoreResult<BaseDirsInfo> {
        let (group_dir_combos, _) = self.count_combos(GROUP_USAGE_BUCKET)?;
        let (group_mount_combos, group_histories) = self.count_combos(GROUP_HISTORICAL_BUCKET)?;
        let (group_sub_dir_combos, group_sub_dirs) = self.count_combos(GROUP_SUB_DIRS_BUCKET)?;
        let (user_dir_combos, _) = self.count_combos(USER_USAGE_BUCKET)?;
        let (user_sub_dir_combos, user_sub_dirs) = self.count_combos(USER_SUB_DIRS_BUCKET)?;

        Ok(BaseDirsInfo {
            group_dir_combos,
            group_mount_combos,
            group_histories,
            group_sub_dir_combos,
            group_sub_dirs,
            user_dir_combos,
            user_sub_dir_combos,
            user_sub_dirs,
        })
    }
}

impl BaseDirReader for BaseDirsReader {
    fn group_usage(&self, age: Age) -> PartialResult<Vec<Usage>> {
        let mut rows = self
            .usage(GROUP_USAGE_BUCKET, age)
            .map_err(PartialError::empty)?;

        for usage in &mut rows {
            usage.name = self.group_names.name_or_id(usage.gid);
            usage.owner = self.owners.get(usage.gid).unwrap_or_default().to_string();
        }

        Ok(rows)
    }

    fn user_usage(&self, age: Age) -> PartialResult<Vec<Usage>> {
        let mut rows = self
            .usage(USER_USAGE_BUCKET, age)
            .map_err(PartialError::empty)?;

        for usage in &mut rows {
            usage.name = self.user_names.name_or_id(usage.uid);
        }

        Ok(rows)
    }

    fn group_sub_dirs(&self, gid: u32, base_dir: &str, age: Age) -> StoreResult<Vec<SubDir>> {
        self.sub_dirs(GROUP_SUB_DIRS_BUCKET, gid, base_dir, age)
    }

    fn user_sub_dirs(&self, uid: u32, base_dir: &str, age: Age) -> StoreResult<Vec<SubDir>> {
        self.sub_dirs(USER_SUB_DIRS_BUCKET, uid, base_dir, age)
    }

    fn history(&self, gid: u32, path: &str) -> StoreResult<Vec<HistoryPoint>> {
        let mount = self
            .mount_points
            .read()
            .prefix_of(path)
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidBasePath(path.to_string()))?;

        self.with_db(|db| {
            let cf = bucket_handle(db, GROUP_HISTORICAL_BUCKET)?;
            match db.get_cf(cf, usage_key(gid, &mount, Age::All))? {
                Some(bytes) => decode_value(&bytes),
                None => Err(StoreError::NoHistory),
            }
        })
    }

    fn mount_timestamps(&self) -> StoreResult<HashMap<String, DateTime<Utc>>> {
        let mut timestamps = HashMap::new();
        if let (Some(mount_path), Some(updated_at)) = (&self.mount_path, self.updated_at) {
            if let Some(updated_at) = DateTime::from_timestamp(updated_at, 0) {
                timestamps.insert(mount_key(mount_path), updated_at);
            }
        }
        Ok(timestamps)
    }

    fn info(&self) -> PartialResult<BaseDirsInfo> {
        self.info_inner().map_err(PartialError::empty)
    }

    fn close(&self) -> StoreResult<()> {
        if self.db.write().take().is_some() {
            info!("Base directory store closed: {:?}", self.path);
        }
        Ok(())
    }
}

/// Mount paths that have at least one group history
fn history_mounts(db: &DB) -> StoreResult<Vec<String>> {
    let cf = bucket_handle(db, GROUP_HISTORICAL_BUCKET)?;
    let mut mounts = Vec::new();
    for item in db.iterator_cf(cf, IteratorMode::Start) {
        let (key, _) = item?;
        if let Some((_, mount, _)) = decode_usage_key(&key) {
            mounts.push(mount);
        }
    }
    Ok(mounts)
}

fn bucket_handle<'a>(db: &'a DB, name: &str) -> StoreResult<&'a rocksdb::ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::RequiredBucketsMissing(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basedirs::BaseDirsWriter;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use usage_core::FileType;

    const MOUNT: &str = "/lustre/scratch1/";

    fn usage(gid: u32, uid: u32, base_dir: &str, age: Age, size: u64) -> Usage {
        Usage {
            gid,
            uid,
            base_dir: base_dir.to_string(),
            usage_size: size,
            quota_size: 100,
            usage_inodes: 1,
            quota_inodes: 10,
            mtime: 1_700_000_000,
            age,
            ..Default::default()
        }
    }

    fn point(date: i64, size: u64) -> HistoryPoint {
        HistoryPoint {
            date,
            usage_size: size,
            quota_size: 100,
            usage_inodes: 1,
            quota_inodes: 10,
        }
    }

    fn new_writer(path: &Path) -> BaseDirsWriter {
        let mut writer = BaseDirsWriter::new(path).unwrap();
        writer.set_mount_path(MOUNT);
        writer.set_updated_at(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        writer
    }

    #[test]
    fn test_history_drops_points_not_after_last() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("basedirs.db");

        let mut writer = new_writer(&path);
        writer.reset().unwrap();
        for date in [10, 20, 10, 30] {
            writer.append_group_history(1, MOUNT, point(date, 1)).unwrap();
        }
        writer.finalize().unwrap();
        writer.close().unwrap();

        let reader = BaseDirsReader::open(&path, None).unwrap();
        let dates: Vec<i64> = reader
            .history(1, "/lustre/scratch1/team/project")
            .unwrap()
            .iter()
            .map(|p| p.date)
            .collect();
        assert_eq!(dates, vec![10, 20, 30]);
    }

    #[test]
    fn test_reset_discards_previous_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("basedirs.db");

        let mut writer = new_writer(&path);
        writer.reset().unwrap();
        writer.append_group_history(1, MOUNT, point(10, 1)).unwrap();
        writer.finalize().unwrap();

        writer.reset().unwrap();
        writer
            .put_group_usage(&usage(1, 0, "/lustre/scratch1/a", Age::All, 5))
            .unwrap();
        writer.reset().unwrap();
        writer
            .put_group_usage(&usage(2, 0, "/lustre/scratch1/b", Age::All, 7))
            .unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        let reader = BaseDirsReader::open(&path, None).unwrap();
        let rows = reader.group_usage(Age::All).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].gid, 2);
        assert_eq!(reader.history(1, "/lustre/scratch1/a").unwrap().len(), 1);
    }

    #[test]
    fn test_finalize_sets_quota_dates() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("basedirs.db");

        let mut writer = new_writer(&path);
        writer.reset().unwrap();
        writer.append_group_history(1, MOUNT, point(10, 50)).unwrap();
        writer.append_group_history(1, MOUNT, point(20, 150)).unwrap();
        writer
            .put_group_usage(&usage(1, 0, "/lustre/scratch1/team", Age::All, 150))
            .unwrap();
        writer
            .put_group_usage(&usage(1, 0, "/nfs/elsewhere/team", Age::All, 150))
            .unwrap();
        writer
            .put_group_usage(&usage(1, 0, "/lustre/scratch1/team", Age::A1Y, 150))
            .unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        let reader = BaseDirsReader::open(&path, None).unwrap();
        let rows = reader.group_usage(Age::All).unwrap();
        assert_eq!(rows.len(), 2);

        let matched = rows
            .iter()
            .find(|u| u.base_dir == "/lustre/scratch1/team")
            .unwrap();
        assert_eq!(matched.date_no_space, 20);
        assert_eq!(matched.date_no_files, 0);

        let unmatched = rows
            .iter()
            .find(|u| u.base_dir == "/nfs/elsewhere/team")
            .unwrap();
        assert_eq!(unmatched.date_no_space, 0);
        assert_eq!(unmatched.date_no_files, 0);

        let aged = reader.group_usage(Age::A1Y).unwrap();
        assert_eq!(aged.len(), 1);
        assert_eq!(aged[0].date_no_space, 0);
    }

    #[test]
    fn test_put_requires_reset() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = new_writer(&temp_dir.path().join("basedirs.db"));

        let err = writer
            .put_user_usage(&usage(1, 2, "/lustre/scratch1/a", Age::All, 1))
            .unwrap_err();
        assert_eq!(err, StoreError::NotReset);
        assert_eq!(writer.finalize().unwrap_err(), StoreError::NotReset);

        writer.reset().unwrap();
        writer.finalize().unwrap();
        let err = writer
            .put_group_sub_dirs(1, "/lustre/scratch1/a", Age::All, &[])
            .unwrap_err();
        assert_eq!(err, StoreError::NotReset);

        writer.reset().unwrap();
        writer.close().unwrap();
        let err = writer
            .put_group_usage(&usage(1, 2, "/lustre/scratch1/a", Age::All, 1))
            .unwrap_err();
        assert_eq!(err, StoreError::NotReset);
        let err = writer
            .append_group_history(1, MOUNT, point(10, 1))
            .unwrap_err();
        assert_eq!(err, StoreError::NotReset);
        assert_eq!(writer.finalize().unwrap_err(), StoreError::NotReset);
    }

    #[test]
    fn test_finalize_decode_error_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("basedirs.db");

        let mut writer = new_writer(&path);
        writer.reset().unwrap();
        writer
            .put_group_usage(&usage(1, 0, "/lustre/scratch1/a", Age::All, 5))
            .unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        {
            let db = crate::rocksdb::open_read_write(&path, &BUCKETS).unwrap();
            let cf = db.cf_handle(GROUP_HISTORICAL_BUCKET).unwrap();
            db.put_cf(cf, usage_key(1, MOUNT, Age::All), [0xFD]).unwrap();
        }

        let mut writer = new_writer(&path);
        writer.reset().unwrap();
        writer
            .put_group_usage(&usage(2, 0, "/lustre/scratch1/b", Age::All, 7))
            .unwrap();
        assert!(matches!(
            writer.finalize().unwrap_err(),
            StoreError::Decode(_)
        ));
        writer.close().unwrap();

        let reader = BaseDirsReader::open(&path, None).unwrap();
        let rows = reader.group_usage(Age::All).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].gid, 1);
        assert_eq!(rows[0].usage_size, 5);
    }

    #[test]
    fn test_reset_requires_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = BaseDirsWriter::new(temp_dir.path().join("basedirs.db")).unwrap();
        assert_eq!(writer.reset().unwrap_err(), StoreError::MetadataNotSet);

        writer.set_updated_at(Utc.timestamp_opt(1, 0).unwrap());
        writer.set_mount_path("/lustre/scratch1");
        assert!(matches!(
            writer.reset().unwrap_err(),
            StoreError::InvalidMountPath(_)
        ));
    }

    #[test]
    fn test_empty_path_is_config_error() {
        assert!(matches!(
            BaseDirsWriter::new("").err(),
            Some(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_open_missing_buckets() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("other.db");
        {
            let _db = crate::rocksdb::open_read_write(&path, &[GROUP_USAGE_BUCKET]).unwrap();
        }

        assert!(matches!(
            BaseDirsReader::open(&path, None).err(),
            Some(StoreError::RequiredBucketsMissing(_))
        ));
    }

    #[test]
    fn test_sub_dirs_names_and_info() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("basedirs.db");
        let sub_dirs = vec![SubDir {
            sub_dir: "data".to_string(),
            num_files: 3,
            size_files: 30,
            last_modified: 1_700_000_000,
            file_usage: BTreeMap::from([(FileType::Bam, 30)]),
        }];

        let mut writer = new_writer(&path);
        writer.reset().unwrap();
        writer
            .put_group_usage(&usage(7, 0, "/lustre/scratch1/team", Age::All, 30))
            .unwrap();
        writer
            .put_user_usage(&usage(0, 9, "/lustre/scratch1/team", Age::All, 30))
            .unwrap();
        writer
            .put_group_sub_dirs(7, "/lustre/scratch1/team", Age::All, &sub_dirs)
            .unwrap();
        writer
            .put_user_sub_dirs(9, "/lustre/scratch1/team", Age::All, &sub_dirs)
            .unwrap();
        writer.append_group_history(7, MOUNT, point(10, 30)).unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        let owners_path = temp_dir.path().join("owners.csv");
        std::fs::write(&owners_path, "7,alice\n").unwrap();

        let mut reader = BaseDirsReader::open(&path, Some(&owners_path)).unwrap();
        let mut groups = StaticNames::default();
        groups.insert(7, "team");
        reader.set_group_names(Arc::new(groups));

        let rows = reader.group_usage(Age::All).unwrap();
        assert_eq!(rows[0].name, "team");
        assert_eq!(rows[0].owner, "alice");
        assert_eq!(reader.user_usage(Age::All).unwrap()[0].name, "9");

        assert_eq!(
            reader
                .group_sub_dirs(7, "/lustre/scratch1/team", Age::All)
                .unwrap(),
            sub_dirs
        );
        assert_eq!(
            reader
                .user_sub_dirs(8, "/lustre/scratch1/team", Age::All)
                .unwrap_err(),
            StoreError::OwnerNotFound
        );
        assert_eq!(
            reader.history(8, "/lustre/scratch1/team").unwrap_err(),
            StoreError::NoHistory
        );
        assert!(matches!(
            reader.history(7, "/nfs/team").unwrap_err(),
            StoreError::InvalidBasePath(_)
        ));

        let info = reader.info().unwrap();
        assert_eq!(info.group_dir_combos, 1);
        assert_eq!(info.group_mount_combos, 1);
        assert_eq!(info.group_histories, 1);
        assert_eq!(info.group_sub_dir_combos, 1);
        assert_eq!(info.group_sub_dirs, 1);
        assert_eq!(info.user_dir_combos, 1);
        assert_eq!(info.user_sub_dir_combos, 1);
        assert_eq!(info.user_sub_dirs, 1);

        let timestamps = reader.mount_timestamps().unwrap();
        assert_eq!(
            timestamps.get(&mount_key(MOUNT)).map(|t| t.timestamp()),
            Some(1_700_000_000)
        );

        reader.close().unwrap();
        assert_eq!(
            reader.group_usage(Age::All).unwrap_err().error,
            StoreError::Closed
        );
    }
}
