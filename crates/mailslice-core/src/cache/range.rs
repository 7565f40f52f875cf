//! Lookups over date-sorted directories.
//!
//! Every directory the cache keeps (header blocks, body blocks, accuracy
//! ranges) is a list sorted descending by `youngest` whose spans never
//! overlap. The helpers here work on any such list.

use chrono::{DateTime, Utc};

use super::model::{AccuracyRange, FolderBlockInfo};

/// Something covering the inclusive span `[oldest, youngest]`.
pub trait DateSpan {
    /// Youngest date covered.
    fn youngest(&self) -> DateTime<Utc>;
    /// Oldest date covered.
    fn oldest(&self) -> DateTime<Utc>;
}

impl DateSpan for FolderBlockInfo {
    fn youngest(&self) -> DateTime<Utc> {
        self.youngest
    }

    fn oldest(&self) -> DateTime<Utc> {
        self.oldest
    }
}

impl DateSpan for AccuracyRange {
    fn youngest(&self) -> DateTime<Utc> {
        self.youngest
    }

    fn oldest(&self) -> DateTime<Utc> {
        self.oldest
    }
}

/// Where a date lands in a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeIndex {
    /// The entry at this index covers the date.
    Within(usize),
    /// No entry covers the date; it sorts before the entry at this index.
    InsertAt(usize),
}

impl RangeIndex {
    /// The index regardless of whether it matched.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Within(i) | Self::InsertAt(i) => i,
        }
    }
}

/// Finds the entry covering `date`, or where it would be inserted.
///
/// A linear scan; directories stay small enough that a binary search has not
/// been worth it.
pub fn find_range_index_for_date<T: DateSpan>(list: &[T], date: DateTime<Utc>) -> RangeIndex {
    for (i, entry) in list.iter().enumerate() {
        if date > entry.youngest() {
            return RangeIndex::InsertAt(i);
        }
        if date >= entry.oldest() {
            return RangeIndex::Within(i);
        }
    }
    RangeIndex::InsertAt(list.len())
}

/// Finds the first entry intersecting `[older, younger]`.
pub fn find_first_overlap_index<T: DateSpan>(
    list: &[T],
    younger: DateTime<Utc>,
    older: DateTime<Utc>,
) -> Option<usize> {
    for (i, entry) in list.iter().enumerate() {
        if entry.oldest() > younger {
            continue;
        }
        // Entries from here on are at least partly older than `younger`;
        // the first one that still reaches `older` overlaps.
        return (entry.youngest() >= older).then_some(i);
    }
    None
}

/// Checks a directory is sorted descending and free of overlaps.
pub fn is_well_formed<T: DateSpan>(list: &[T]) -> bool {
    list.iter().all(|e| e.oldest() <= e.youngest())
        && list.windows(2).all(|w| w[1].youngest() < w[0].oldest())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::cache::model::BlockId;

    fn at(hours: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + TimeDelta::hours(hours)
    }

    fn block(id: u64, youngest: i64, oldest: i64) -> FolderBlockInfo {
        FolderBlockInfo {
            block_id: BlockId(id),
            youngest: at(youngest),
            oldest: at(oldest),
            count: 1,
            est_size: 200,
        }
    }

    fn directory() -> Vec<FolderBlockInfo> {
        vec![block(1, 100, 90), block(2, 80, 70), block(3, 60, 50)]
    }

    #[test]
    fn date_lookup() {
        let dir = directory();
        assert_eq!(find_range_index_for_date(&dir, at(200)), RangeIndex::InsertAt(0));
        assert_eq!(find_range_index_for_date(&dir, at(95)), RangeIndex::Within(0));
        assert_eq!(find_range_index_for_date(&dir, at(90)), RangeIndex::Within(0));
        assert_eq!(find_range_index_for_date(&dir, at(85)), RangeIndex::InsertAt(1));
        assert_eq!(find_range_index_for_date(&dir, at(70)), RangeIndex::Within(1));
        assert_eq!(find_range_index_for_date(&dir, at(10)), RangeIndex::InsertAt(3));
        assert_eq!(
            find_range_index_for_date::<FolderBlockInfo>(&[], at(1)),
            RangeIndex::InsertAt(0)
        );
    }

    #[test]
    fn overlap_lookup() {
        let dir = directory();
        assert_eq!(find_first_overlap_index(&dir, at(200), at(150)), None);
        assert_eq!(find_first_overlap_index(&dir, at(200), at(95)), Some(0));
        assert_eq!(find_first_overlap_index(&dir, at(85), at(75)), Some(1));
        assert_eq!(find_first_overlap_index(&dir, at(89), at(81)), None);
        assert_eq!(find_first_overlap_index(&dir, at(65), at(0)), Some(2));
        assert_eq!(find_first_overlap_index(&dir, at(40), at(0)), None);
        assert_eq!(find_first_overlap_index(&dir, at(200), at(0)), Some(0));
    }

    #[test]
    fn well_formed() {
        assert!(is_well_formed(&directory()));
        assert!(!is_well_formed(&[block(1, 80, 70), block(2, 100, 90)]));
        assert!(!is_well_formed(&[block(1, 100, 80), block(2, 80, 70)]));
        assert!(!is_well_formed(&[block(1, 70, 80)]));
    }
}
