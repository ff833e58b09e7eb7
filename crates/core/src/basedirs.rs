//! Base directory usage, sub-directory breakdowns and quota history

use crate::age::Age;
use crate::filetype::FileType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Usage of one base directory by one group or user in one age bucket.
///
/// `name` and `owner` are resolved when reading and are not meaningful in
/// the stored record. `date_no_space`/`date_no_files` are unix seconds, zero
/// when unknown, and only populated for the `Age::All` bucket of groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub gid: u32,
    pub uid: u32,
    pub name: String,
    pub owner: String,
    pub base_dir: String,
    pub usage_size: u64,
    pub quota_size: u64,
    pub usage_inodes: u64,
    pub quota_inodes: u64,
    pub mtime: i64,
    pub date_no_space: i64,
    pub date_no_files: i64,
    pub age: Age,
}

/// Usage summary of one directory directly beneath a base directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubDir {
    pub sub_dir: String,
    pub num_files: u64,
    pub size_files: u64,
    pub last_modified: i64,
    pub file_usage: BTreeMap<FileType, u64>,
}

/// One point of a group's usage growth curve on a mount
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// Unix seconds
    pub date: i64,
    pub usage_size: u64,
    pub quota_size: u64,
    pub usage_inodes: u64,
    pub quota_inodes: u64,
}

impl HistoryPoint {
    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date, 0)
    }
}

/// Record counts of a base directory store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseDirsInfo {
    pub group_dir_combos: u64,
    pub group_mount_combos: u64,
    pub group_histories: u64,
    pub group_sub_dir_combos: u64,
    pub group_sub_dirs: u64,
    pub user_dir_combos: u64,
    pub user_sub_dir_combos: u64,
    pub user_sub_dirs: u64,
}

impl BaseDirsInfo {
    pub fn add(&mut self, other: &BaseDirsInfo) {
        self.group_dir_combos += other.group_dir_combos;
        self.group_mount_combos += other.group_mount_combos;
        self.group_histories += other.group_histories;
        self.group_sub_dir_combos += other.group_sub_dir_combos;
        self.group_sub_dirs += other.group_sub_dirs;
        self.user_dir_combos += other.user_dir_combos;
        self.user_sub_dir_combos += other.user_sub_dir_combos;
        self.user_sub_dirs += other.user_sub_dirs;
    }
}
