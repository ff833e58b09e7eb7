//! Filtered directory summaries over a [`Database`]

use super::database::Database;
use crate::traits::{gather, PartialError, PartialResult, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use usage_core::{DirSummary, DirUsageInfo, Filter};

/// Summary of a directory and of each child holding matching data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirInfo {
    pub current: DirSummary,
    pub children: Vec<DirSummary>,
}

pub struct Tree {
    db: Database,
}

impl Tree {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn summary(
        &self,
        dir: &str,
        filter: &Filter,
        errors: &mut Vec<StoreError>,
    ) -> Option<DirSummary> {
        let (usage, modtime) = gather(self.db.dir_usage(dir), errors)?;
        usage.summarise(filter).map(|mut summary| {
            summary.modtime = modtime;
            summary
        })
    }

    /// Summarise `dir` and its children under `filter`. `None` when `dir`
    /// holds no matching data. Snapshots that fail to read are left out of
    /// the partial result.
    pub fn dir_info(&self, dir: &str, filter: &Filter) -> PartialResult<Option<DirInfo>> {
        let mut errors = Vec::new();

        let info = self.summary(dir, filter, &mut errors).map(|current| {
            let mut children = Vec::new();
            for child in gather(self.db.children(dir), &mut errors) {
                if let Some(summary) = self.summary(&child, filter, &mut errors) {
                    children.push(summary);
                }
            }
            DirInfo { current, children }
        });

        PartialError::collect(info, errors)
    }

    /// Check whether `dir` has any children with recorded usage
    pub fn dir_has_children(&self, dir: &str) -> PartialResult<bool> {
        match self.db.children(dir) {
            Ok(children) => Ok(!children.is_empty()),
            Err(e) => Err(PartialError {
                partial: !e.partial.is_empty(),
                error: e.error,
            }),
        }
    }

    /// Directories at most `depth` levels below `dir` (inclusive of `dir`)
    /// holding matching data, largest first.
    pub fn where_(&self, dir: &str, filter: &Filter, depth: usize) -> PartialResult<Vec<DirSummary>> {
        let mut found = Vec::new();
        let mut errors = Vec::new();
        let mut queue = VecDeque::from([(dir.to_string(), 0usize)]);

        while let Some((current, level)) = queue.pop_front() {
            let Some(summary) = self.summary(&current, filter, &mut errors) else {
                continue;
            };
            found.push(summary);

            if level < depth {
                for child in gather(self.db.children(&current), &mut errors) {
                    queue.push_back((child, level + 1));
                }
            }
        }

        found.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.dir.cmp(&b.dir)));
        PartialError::collect(found, errors)
    }

    pub fn info(&self) -> PartialResult<DirUsageInfo> {
        self.db.info()
    }

    pub fn mount_timestamps(&self) -> HashMap<String, DateTime<Utc>> {
        self.db.mount_timestamps()
    }

    pub fn close(&self) -> StoreResult<()> {
        self.db.close()
    }
}
