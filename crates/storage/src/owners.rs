//! Group owner table loaded from a headerless `gid,owner` CSV

use crate::traits::{StoreError, StoreResult};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct Owners {
    owners: HashMap<u32, String>,
}

impl Owners {
    pub fn new(owners: HashMap<u32, String>) -> Self {
        Self { owners }
    }

    /// Load `gid,owner` rows. Rows with an unparseable gid are skipped.
    pub fn load<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?;

        let mut owners = HashMap::new();
        for record in reader.records() {
            let record = record.map_err(|e| StoreError::Decode(e.to_string()))?;
            let (Some(gid), Some(owner)) = (record.get(0), record.get(1)) else {
                continue;
            };

            match gid.trim().parse::<u32>() {
                Ok(gid) => {
                    owners.insert(gid, owner.trim().to_string());
                }
                Err(_) => warn!("Skipping owners row with invalid gid: {:?}", gid),
            }
        }

        debug!("Loaded {} group owners from {:?}", owners.len(), path);
        Ok(Self { owners })
    }

    pub fn get(&self, gid: u32) -> Option<&str> {
        self.owners.get(&gid).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_owners() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("owners.csv");
        std::fs::write(&path, "1,alice\n2, bob\nbad,carol\n3\n").unwrap();

        let owners = Owners::load(&path).unwrap();
        assert_eq!(owners.len(), 2);
        assert_eq!(owners.get(1), Some("alice"));
        assert_eq!(owners.get(2), Some("bob"));
        assert_eq!(owners.get(3), None);
    }

    #[test]
    fn test_missing_file() {
        assert!(Owners::load("/nonexistent/owners.csv").is_err());
    }
}
