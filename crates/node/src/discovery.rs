//! Dataset discovery
//!
//! Snapshot directories are named `<version>_<key>`. For every key only the
//! highest version is served; the rest are reported as removable.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    /// Newest directory per key, sorted by path
    pub latest: Vec<PathBuf>,
    /// Superseded directories, sorted by path
    pub removable: Vec<PathBuf>,
}

/// Version part of a directory name. Any numeric version sorts above any
/// non-numeric one.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Version {
    Text(String),
    Numeric(u128),
}

impl Version {
    fn parse(raw: &str) -> Self {
        match raw.parse::<u128>() {
            Ok(n) if raw.bytes().all(|b| b.is_ascii_digit()) => Version::Numeric(n),
            _ => Version::Text(raw.to_string()),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Version::Numeric(a), Version::Numeric(b)) => a.cmp(b),
            (Version::Numeric(_), Version::Text(_)) => Ordering::Greater,
            (Version::Text(_), Version::Numeric(_)) => Ordering::Less,
            (Version::Text(a), Version::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split `<version>_<key>` at the first underscore. Both parts must be
/// non-empty.
fn split_name(name: &str) -> Option<(&str, &str)> {
    if name.starts_with('.') {
        return None;
    }
    let (version, key) = name.split_once('_')?;
    if version.is_empty() || key.is_empty() {
        return None;
    }
    Some((version, key))
}

/// Marker written next to a directory that is being removed
pub fn removal_marker(dir: &Path) -> Option<PathBuf> {
    let name = dir.file_name()?.to_str()?;
    Some(dir.with_file_name(format!(".{}", name)))
}

/// Find the newest complete snapshot directory per key under `base_dir`.
///
/// A candidate must contain every file in `required`. Directories with a
/// removal marker are ignored.
pub fn find_latest_dirs<S: AsRef<str>>(base_dir: &Path, required: &[S]) -> io::Result<Discovered> {
    let mut candidates: Vec<(String, PathBuf)> = Vec::new();

    for entry in fs::read_dir(base_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if split_name(&name).is_none() {
            continue;
        }

        let path = entry.path();
        if !required.iter().all(|file| path.join(file.as_ref()).exists()) {
            debug!("Skipping incomplete dataset directory {:?}", path);
            continue;
        }
        if base_dir.join(format!(".{}", name)).exists() {
            debug!("Skipping dataset directory marked for removal {:?}", path);
            continue;
        }

        candidates.push((name, path));
    }

    // Deterministic winner among equal versions
    candidates.sort();

    let mut best: HashMap<String, (Version, PathBuf)> = HashMap::new();
    let mut removable = Vec::new();

    for (name, path) in candidates {
        let Some((version, key)) = split_name(&name) else {
            continue;
        };
        let version = Version::parse(version);

        match best.get_mut(key) {
            Some((current, current_path)) if version > *current => {
                removable.push(std::mem::replace(current_path, path));
                *current = version;
            }
            Some(_) => removable.push(path),
            None => {
                best.insert(key.to_string(), (version, path));
            }
        }
    }

    let mut latest: Vec<PathBuf> = best.into_values().map(|(_, path)| path).collect();
    latest.sort();
    removable.sort();

    Ok(Discovered { latest, removable })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REQUIRED: [&str; 2] = ["dguta.db", "basedirs.db"];

    fn dataset(base: &Path, name: &str) -> PathBuf {
        let dir = base.join(name);
        for file in REQUIRED {
            fs::create_dir_all(dir.join(file)).unwrap();
        }
        dir
    }

    #[test]
    fn test_numeric_versions_compare_by_value() {
        let temp_dir = TempDir::new().unwrap();
        let nine = dataset(temp_dir.path(), "9_x");
        let ten = dataset(temp_dir.path(), "10_x");

        let found = find_latest_dirs(temp_dir.path(), &REQUIRED).unwrap();
        assert_eq!(found.latest, vec![ten]);
        assert_eq!(found.removable, vec![nine]);
    }

    #[test]
    fn test_numeric_beats_text() {
        let temp_dir = TempDir::new().unwrap();
        let text = dataset(temp_dir.path(), "zzz_x");
        let numeric = dataset(temp_dir.path(), "1_x");
        let older_text = dataset(temp_dir.path(), "aaa_y");
        let newer_text = dataset(temp_dir.path(), "bbb_y");

        let found = find_latest_dirs(temp_dir.path(), &REQUIRED).unwrap();
        assert_eq!(found.latest, vec![numeric, newer_text]);
        assert_eq!(found.removable, vec![older_text, text]);
    }

    #[test]
    fn test_skips_invalid_and_incomplete() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        dataset(base, ".1_hidden");
        dataset(base, "_nokey");
        dataset(base, "1_");
        dataset(base, "noversion");
        fs::create_dir_all(base.join("2_partial").join("dguta.db")).unwrap();
        fs::write(base.join("3_file"), b"").unwrap();
        let keep = dataset(base, "1_／lustre／scratch_1／");

        let found = find_latest_dirs(base, &REQUIRED).unwrap();
        assert_eq!(found.latest, vec![keep]);
        assert!(found.removable.is_empty());
    }

    #[test]
    fn test_skips_marked_directories() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        let old = dataset(base, "1_x");
        let marked = dataset(base, "2_x");
        fs::write(removal_marker(&marked).unwrap(), b"").unwrap();

        let found = find_latest_dirs(base, &REQUIRED).unwrap();
        assert_eq!(found.latest, vec![old]);
    }

    #[test]
    fn test_missing_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(find_latest_dirs(&temp_dir.path().join("missing"), &REQUIRED).is_err());
    }
}
