//! Quota breach detection over a history curve

use crate::basedirs::HistoryPoint;

/// Find the earliest dates at which recorded usage reached the size quota
/// and the inode quota respectively. A quota of zero is unlimited. Returns
/// zero for a quota that was never reached.
pub fn date_quota_full(history: &[HistoryPoint]) -> (i64, i64) {
    let mut date_no_space = 0;
    let mut date_no_files = 0;

    for point in history {
        if date_no_space == 0 && point.quota_size > 0 && point.usage_size >= point.quota_size {
            date_no_space = point.date;
        }
        if date_no_files == 0
            && point.quota_inodes > 0
            && point.usage_inodes >= point.quota_inodes
        {
            date_no_files = point.date;
        }
        if date_no_space != 0 && date_no_files != 0 {
            break;
        }
    }

    (date_no_space, date_no_files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(date: i64, size: u64, quota_size: u64, inodes: u64, quota_inodes: u64) -> HistoryPoint {
        HistoryPoint {
            date,
            usage_size: size,
            quota_size,
            usage_inodes: inodes,
            quota_inodes,
        }
    }

    #[test]
    fn test_no_breach() {
        let history = vec![point(10, 1, 100, 1, 100), point(20, 50, 100, 2, 100)];
        assert_eq!(date_quota_full(&history), (0, 0));
    }

    #[test]
    fn test_first_breach_wins() {
        let history = vec![
            point(10, 1, 100, 1, 100),
            point(20, 150, 100, 2, 100),
            point(30, 200, 100, 100, 100),
            point(40, 300, 100, 500, 100),
        ];
        assert_eq!(date_quota_full(&history), (20, 30));
    }

    #[test]
    fn test_zero_quota_is_unlimited() {
        let history = vec![point(10, 1_000, 0, 1_000, 0)];
        assert_eq!(date_quota_full(&history), (0, 0));
    }
}
