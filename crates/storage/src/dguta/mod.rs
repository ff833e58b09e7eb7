//! Directory usage ("dguta") record family
//!
//! ## Buckets
//!
//! - `gut`: `{dir}{TERMINATOR}` -> bincode `Vec<Guta>`
//! - `children`: `{parent}{TERMINATOR}` -> bincode sorted `Vec<String>` of
//!   immediate child names
//!
//! Directory paths have no trailing `/` except the root `/`.
//!
//! ## Module Structure
//!
//! - `writer.rs`: batching producer for one snapshot
//! - `store.rs`: read-only view of one snapshot
//! - `database.rs`: merged view over many snapshots
//! - `tree.rs`: filtered directory summaries on top of a database

mod database;
mod store;
mod tree;
mod writer;

pub use database::Database;
pub use store::DirUsageStore;
pub use tree::{DirInfo, Tree};
pub use writer::DirUsageWriter;

/// Directory usage bucket
pub const GUT_BUCKET: &str = "gut";
/// Children index bucket
pub const CHILDREN_BUCKET: &str = "children";

pub(crate) const BUCKETS: [&str; 2] = [GUT_BUCKET, CHILDREN_BUCKET];

/// Normalise a directory path: no trailing `/` except for the root
pub(crate) fn clean_dir(dir: &str) -> &str {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Split a directory into (parent, child name). The root has no parent.
pub(crate) fn split_parent(dir: &str) -> Option<(&str, &str)> {
    let dir = clean_dir(dir);
    if dir == "/" {
        return None;
    }

    let idx = dir.rfind('/')?;
    let parent = if idx == 0 { "/" } else { &dir[..idx] };
    Some((parent, &dir[idx + 1..]))
}

/// Full path of a child of `dir`
pub(crate) fn join_child(dir: &str, name: &str) -> String {
    let dir = clean_dir(dir);
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}
