//! Directory usage records
//!
//! A `DirUsage` holds, for one directory, every (group, user, file type, age)
//! breakdown row observed beneath it in a snapshot.

use crate::age::Age;
use crate::filetype::FileType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One breakdown row of a directory's usage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guta {
    pub gid: u32,
    pub uid: u32,
    pub file_type: FileType,
    pub age: Age,
    /// Number of files
    pub count: u64,
    /// Total size in bytes
    pub size: u64,
    /// Oldest access time (unix seconds)
    pub atime: i64,
    /// Newest modification time (unix seconds)
    pub mtime: i64,
}

impl Guta {
    /// Identity of the row within a directory
    pub fn key(&self) -> (u32, u32, FileType, Age) {
        (self.gid, self.uid, self.file_type, self.age)
    }

    /// Fold another row with the same key into this one
    pub fn merge(&mut self, other: &Guta) {
        self.count += other.count;
        self.size += other.size;
        self.atime = self.atime.min(other.atime);
        self.mtime = self.mtime.max(other.mtime);
    }
}

/// Usage aggregates for one directory (the "DGUTA" record)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirUsage {
    pub dir: String,
    pub gutas: Vec<Guta>,
}

impl DirUsage {
    pub fn new(dir: impl Into<String>, gutas: Vec<Guta>) -> Self {
        Self {
            dir: dir.into(),
            gutas,
        }
    }

    /// Merge rows of the same directory coming from another snapshot.
    /// Rows sharing (gid, uid, type, age) are summed.
    pub fn merge(&mut self, other: &DirUsage) {
        let mut rows: BTreeMap<(u32, u32, FileType, Age), Guta> = self
            .gutas
            .drain(..)
            .map(|guta| (guta.key(), guta))
            .collect();

        for guta in &other.gutas {
            rows.entry(guta.key())
                .and_modify(|existing| existing.merge(guta))
                .or_insert_with(|| guta.clone());
        }

        self.gutas = rows.into_values().collect();
    }

    /// Summarise the rows that pass `filter`. Returns `None` when no row
    /// matches.
    pub fn summarise(&self, filter: &Filter) -> Option<DirSummary> {
        let mut summary = DirSummary {
            dir: self.dir.clone(),
            atime: i64::MAX,
            mtime: i64::MIN,
            age: filter.age,
            ..Default::default()
        };
        let mut uids = BTreeSet::new();
        let mut gids = BTreeSet::new();
        let mut file_types = BTreeSet::new();
        let mut matched = false;

        for guta in self.gutas.iter().filter(|guta| filter.matches(guta)) {
            matched = true;
            summary.count += guta.count;
            summary.size += guta.size;
            summary.atime = summary.atime.min(guta.atime);
            summary.mtime = summary.mtime.max(guta.mtime);
            uids.insert(guta.uid);
            gids.insert(guta.gid);
            file_types.insert(guta.file_type);
        }

        if !matched {
            return None;
        }

        summary.uids = uids.into_iter().collect();
        summary.gids = gids.into_iter().collect();
        summary.file_types = file_types.into_iter().collect();
        Some(summary)
    }
}

/// Restricts which breakdown rows contribute to a summary.
/// `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub gids: Option<Vec<u32>>,
    pub uids: Option<Vec<u32>>,
    pub file_types: Option<Vec<FileType>>,
    pub age: Age,
}

impl Filter {
    pub fn matches(&self, guta: &Guta) -> bool {
        guta.age == self.age
            && self.gids.as_ref().map_or(true, |gids| gids.contains(&guta.gid))
            && self.uids.as_ref().map_or(true, |uids| uids.contains(&guta.uid))
            && self
                .file_types
                .as_ref()
                .map_or(true, |fts| fts.contains(&guta.file_type))
    }
}

/// Filtered totals for one directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirSummary {
    pub dir: String,
    pub count: u64,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub uids: Vec<u32>,
    pub gids: Vec<u32>,
    pub file_types: Vec<FileType>,
    pub age: Age,
    /// When the snapshot holding this directory was last updated
    pub modtime: i64,
}

/// Record counts of a directory usage store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirUsageInfo {
    pub num_dirs: u64,
    pub num_gutas: u64,
    pub num_parents: u64,
    pub num_children: u64,
}

impl DirUsageInfo {
    pub fn add(&mut self, other: &DirUsageInfo) {
        self.num_dirs += other.num_dirs;
        self.num_gutas += other.num_gutas;
        self.num_parents += other.num_parents;
        self.num_children += other.num_children;
    }
}
