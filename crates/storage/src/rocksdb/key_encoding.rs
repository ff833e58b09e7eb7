//! Key encoding and decoding utilities for RocksDB storage
//!
//! Owner-scoped keys (usage, sub-directories, history):
//! - All ages: `{id:4 LE}{SEP}{path}`
//! - One age bucket: `{id:4 LE}{SEP}{path}{SEP}{age:2 LE}`
//!
//! Directory keys (directory usage, children index): `{path}{TERMINATOR}`
//!
//! The separator is `0xFF`, which never occurs in UTF-8 text, so a path can
//! not introduce extra separators. Age codes are below 0xFF, so after the
//! fixed-width id exactly one separator means "all ages". An all-ages key is
//! a byte prefix of every per-age key sharing its (id, path).

use usage_core::Age;

/// Separator between key fields
pub const KEY_SEPARATOR: u8 = 0xFF;

/// Suffix of directory keys
pub const DIR_TERMINATOR: u8 = 0xFF;

const ID_LEN: usize = 4;
const AGE_LEN: usize = 2;

/// Build an owner-scoped key
pub fn usage_key(id: u32, path: &str, age: Age) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + 1 + path.len() + 1 + AGE_LEN);
    key.extend_from_slice(&id.to_le_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(path.as_bytes());
    if !age.is_all() {
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(&age.code().to_le_bytes());
    }
    key
}

/// Number of separators after the id
pub fn separator_count(key: &[u8]) -> usize {
    key.get(ID_LEN..)
        .map(|rest| rest.iter().filter(|&&b| b == KEY_SEPARATOR).count())
        .unwrap_or(0)
}

/// Check whether an owner-scoped key is for the all-ages bucket
pub fn is_all_ages_key(key: &[u8]) -> bool {
    separator_count(key) == 1
}

/// Decode an owner-scoped key into (id, path, age)
pub fn decode_usage_key(key: &[u8]) -> Option<(u32, String, Age)> {
    if key.len() < ID_LEN + 1 || key[ID_LEN] != KEY_SEPARATOR {
        return None;
    }

    let id = u32::from_le_bytes([key[0], key[1], key[2], key[3]]);
    let rest = &key[ID_LEN + 1..];

    match rest.iter().position(|&b| b == KEY_SEPARATOR) {
        None => {
            let path = std::str::from_utf8(rest).ok()?;
            Some((id, path.to_string(), Age::All))
        }
        Some(pos) => {
            let path = std::str::from_utf8(&rest[..pos]).ok()?;
            let code = rest.get(pos + 1..)?;
            if code.len() != AGE_LEN {
                return None;
            }
            let age = Age::from_code(u16::from_le_bytes([code[0], code[1]]))?;
            Some((id, path.to_string(), age))
        }
    }
}

/// Build a directory key: `{path}{TERMINATOR}`
pub fn dir_key(path: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(path.len() + 1);
    key.extend_from_slice(path.as_bytes());
    key.push(DIR_TERMINATOR);
    key
}

/// Extract the path from a directory key
pub fn decode_dir_key(key: &[u8]) -> Option<&str> {
    let path = key.strip_suffix(&[DIR_TERMINATOR])?;
    std::str::from_utf8(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_ages_signature() {
        for id in [0u32, 1, 255, 0xFFFF_FFFF] {
            for path in ["", "/", "/lustre/scratch/team-a/", "/ünïcödé/"] {
                for age in Age::ALL_BUCKETS {
                    let key = usage_key(id, path, age);
                    if age.is_all() {
                        assert_eq!(separator_count(&key), 1);
                        assert!(is_all_ages_key(&key));
                    } else {
                        assert_ne!(separator_count(&key), 1);
                        assert!(!is_all_ages_key(&key));
                    }
                    assert_eq!(decode_usage_key(&key), Some((id, path.to_string(), age)));
                }
            }
        }
    }

    #[test]
    fn test_all_ages_key_is_prefix() {
        let all = usage_key(7, "/a/b/", Age::All);
        let aged = usage_key(7, "/a/b/", Age::M2Y);
        assert!(aged.starts_with(&all));
        assert!(all < aged);
    }

    #[test]
    fn test_distinct_triples_do_not_collide() {
        let mut keys = std::collections::HashSet::new();
        for id in [1u32, 2, 256] {
            for path in ["/a", "/a/", "/ab"] {
                for age in Age::ALL_BUCKETS {
                    assert!(keys.insert(usage_key(id, path, age)));
                }
            }
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode_usage_key(b"ab"), None);
        assert_eq!(decode_usage_key(&[1, 0, 0, 0, b'x']), None);
        let mut bad_age = usage_key(1, "/a", Age::A1M);
        bad_age.push(0);
        assert_eq!(decode_usage_key(&bad_age), None);
    }

    #[test]
    fn test_dir_key() {
        let key = dir_key("/a/b");
        assert_eq!(decode_dir_key(&key), Some("/a/b"));
        assert_eq!(decode_dir_key(b"/a/b"), None);
    }
}
