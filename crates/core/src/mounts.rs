//! Mount point prefix table and mount key escaping
//!
//! Snapshot directories are named `<version>_<mountKey>` where the mount
//! key is the mount path with every `/` replaced by `／` (U+FF0F) so that it
//! is a valid single path component.

const ESCAPED_SEPARATOR: char = '／';

/// Escape a mount path for use in a directory name
pub fn mount_key(mount_path: &str) -> String {
    mount_path.replace('/', &ESCAPED_SEPARATOR.to_string())
}

/// Inverse of [`mount_key`]
pub fn mount_path_from_key(key: &str) -> String {
    key.replace(ESCAPED_SEPARATOR, "/")
}

/// Known mount paths, resolved by longest matching prefix.
///
/// Every stored mount path ends with `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPoints {
    paths: Vec<String>,
}

impl MountPoints {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut paths: Vec<String> = paths
            .into_iter()
            .filter_map(|p| {
                let mut p: String = p.into();
                if p.is_empty() {
                    return None;
                }
                if !p.ends_with('/') {
                    p.push('/');
                }
                Some(p)
            })
            .collect();

        paths.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        paths.dedup();
        Self { paths }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// The longest known mount path that is a prefix of `path`
    pub fn prefix_of(&self, path: &str) -> Option<&str> {
        self.paths
            .iter()
            .find(|mount| path.starts_with(mount.as_str()) || format!("{}/", path) == **mount)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_key_roundtrip() {
        let key = mount_key("/lustre/scratch123/");
        assert!(!key.contains('/'));
        assert_eq!(mount_path_from_key(&key), "/lustre/scratch123/");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mounts = MountPoints::new(["/", "/lustre/", "/lustre/scratch123"]);
        assert_eq!(
            mounts.prefix_of("/lustre/scratch123/team/proj"),
            Some("/lustre/scratch123/")
        );
        assert_eq!(mounts.prefix_of("/lustre/other"), Some("/lustre/"));
        assert_eq!(mounts.prefix_of("/home/user"), Some("/"));
        assert_eq!(mounts.prefix_of("/lustre/scratch123"), Some("/lustre/scratch123/"));
    }

    #[test]
    fn test_no_prefix() {
        let mounts = MountPoints::new(["/lustre/"]);
        assert_eq!(mounts.prefix_of("/nfs/home"), None);
        assert!(MountPoints::default().prefix_of("/x").is_none());
    }
}
