//! File type classification used in usage breakdowns

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileType {
    Other,
    Temp,
    Vcs,
    Cram,
    Bam,
    Index,
    Compressed,
    Uncompressed,
    Checkpoint,
    Log,
    Dir,
}

impl FileType {
    pub const ALL: [FileType; 11] = [
        FileType::Other,
        FileType::Temp,
        FileType::Vcs,
        FileType::Cram,
        FileType::Bam,
        FileType::Index,
        FileType::Compressed,
        FileType::Uncompressed,
        FileType::Checkpoint,
        FileType::Log,
        FileType::Dir,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FileType::Other => "other",
            FileType::Temp => "temp",
            FileType::Vcs => "vcs",
            FileType::Cram => "cram",
            FileType::Bam => "bam",
            FileType::Index => "index",
            FileType::Compressed => "compressed",
            FileType::Uncompressed => "uncompressed",
            FileType::Checkpoint => "checkpoint",
            FileType::Log => "log",
            FileType::Dir => "dir",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|ft| ft.name() == lower)
            .ok_or_else(|| format!("invalid file type: {}", s))
    }
}
