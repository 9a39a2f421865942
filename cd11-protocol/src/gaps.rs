//! Bounded gap tracking for CD-1.1 sequence numbers
//!
//! A [`GapList`] covers an inclusive `[min, max]` range of unsigned 64-bit
//! sequence numbers and records which sub-ranges have not yet been received.
//! Sequence numbers are native `u64`, so all comparisons are already the
//! unsigned comparisons the protocol requires.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Gap list errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GapError {
    #[error("minimum bound {min} exceeds maximum bound {max}")]
    InvertedBounds { min: u64, max: u64 },

    #[error("{op} rejected: current bound {current}, requested {requested}")]
    NonMonotonicBound {
        op: &'static str,
        current: u64,
        requested: u64,
    },

    #[error("value {value} is outside the tracked range [{min}, {max}]")]
    ValueOutOfRange { value: u64, min: u64, max: u64 },

    #[error("gap [{start}, {end}] overlaps existing gap [{other_start}, {other_end}]")]
    OverlappingGaps {
        start: u64,
        end: u64,
        other_start: u64,
        other_end: u64,
    },

    #[error("gap bound {0} cannot be shifted to an exclusive position")]
    ExclusiveBoundUnrepresentable(u64),
}

/// A contiguous inclusive range of missing sequence numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    /// First missing sequence number (inclusive)
    pub start: u64,
    /// Last missing sequence number (inclusive)
    pub end: u64,
    /// Last time this gap was created or shrunk
    pub modified: DateTime<Utc>,
}

impl Gap {
    /// Create a gap modified now
    pub fn new(start: u64, end: u64) -> Self {
        Gap {
            start,
            end,
            modified: Utc::now(),
        }
    }

    /// Create a gap with an explicit modified time (snapshot restore)
    pub fn with_modified(start: u64, end: u64, modified: DateTime<Utc>) -> Self {
        Gap {
            start,
            end,
            modified,
        }
    }

    /// Check if this gap contains a sequence number
    pub fn contains(&self, value: u64) -> bool {
        self.start <= value && value <= self.end
    }

    fn overlaps(&self, other: &Gap) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}

/// Bounded set of non-overlapping gaps over `[min, max]`
///
/// Gaps are kept sorted by start position. Every mutation preserves two
/// invariants: no two gaps overlap, and every gap lies within `[min, max]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapList {
    min: u64,
    max: u64,
    /// Non-overlapping gaps sorted by start
    gaps: Vec<Gap>,
}

impl Default for GapList {
    /// Degenerate `[0, 0]` range with its single-point gap
    fn default() -> Self {
        GapList {
            min: 0,
            max: 0,
            gaps: vec![Gap::new(0, 0)],
        }
    }
}

impl GapList {
    /// Create a gap list covering `[min, max]` with one full-range gap
    pub fn new(min: u64, max: u64) -> Result<Self, GapError> {
        if min > max {
            return Err(GapError::InvertedBounds { min, max });
        }
        Ok(GapList {
            min,
            max,
            gaps: vec![Gap::new(min, max)],
        })
    }

    /// Reconstruct a gap list from persisted state
    ///
    /// The gaps need not be sorted; they are sorted here and rejected if any
    /// two overlap or any lies outside `[min, max]`.
    pub fn from_parts(min: u64, max: u64, mut gaps: Vec<Gap>) -> Result<Self, GapError> {
        if min > max {
            return Err(GapError::InvertedBounds { min, max });
        }
        gaps.sort_by_key(|g| g.start);
        for gap in &gaps {
            if gap.start > gap.end {
                return Err(GapError::InvertedBounds {
                    min: gap.start,
                    max: gap.end,
                });
            }
            if gap.start < min || gap.end > max {
                return Err(GapError::ValueOutOfRange {
                    value: gap.start,
                    min,
                    max,
                });
            }
        }
        for pair in gaps.windows(2) {
            if pair[0].overlaps(&pair[1]) {
                return Err(GapError::OverlappingGaps {
                    start: pair[1].start,
                    end: pair[1].end,
                    other_start: pair[0].start,
                    other_end: pair[0].end,
                });
            }
        }
        Ok(GapList { min, max, gaps })
    }

    /// Lower bound of the tracked range
    pub fn min(&self) -> u64 {
        self.min
    }

    /// Upper bound of the tracked range
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Number of gaps currently tracked
    pub fn total_gaps(&self) -> usize {
        self.gaps.len()
    }

    /// Iterate over the tracked gaps in start order
    pub fn iter(&self) -> impl Iterator<Item = &Gap> {
        self.gaps.iter()
    }

    /// Increase the upper bound
    ///
    /// The newly uncovered range `(oldMax, newMax]` is missing until proven
    /// otherwise: the trailing gap is extended if it touches the old maximum,
    /// otherwise a new trailing gap `[oldMax + 1, newMax]` is appended.
    pub fn widen_max(&mut self, new_max: u64) -> Result<(), GapError> {
        if new_max < self.max {
            return Err(GapError::NonMonotonicBound {
                op: "widen_max",
                current: self.max,
                requested: new_max,
            });
        }
        if new_max == self.max {
            return Ok(());
        }

        let old_max = self.max;
        self.max = new_max;

        match self.gaps.last_mut() {
            Some(last) if last.end == old_max => {
                last.end = new_max;
            }
            _ => self.gaps.push(Gap::new(old_max + 1, new_max)),
        }
        Ok(())
    }

    /// Decrease the upper bound, dropping or clipping trailing gaps
    pub fn narrow_max(&mut self, new_max: u64) -> Result<(), GapError> {
        if new_max > self.max {
            return Err(GapError::NonMonotonicBound {
                op: "narrow_max",
                current: self.max,
                requested: new_max,
            });
        }
        if new_max < self.min {
            return Err(GapError::InvertedBounds {
                min: self.min,
                max: new_max,
            });
        }
        if new_max == self.max {
            return Ok(());
        }

        self.max = new_max;
        self.gaps.retain(|gap| gap.start <= new_max);
        if let Some(last) = self.gaps.last_mut() {
            if last.end > new_max {
                last.end = new_max;
            }
        }
        Ok(())
    }

    /// Decrease the lower bound
    ///
    /// Symmetric to [`GapList::widen_max`]: the leading gap is extended if it
    /// touches the old minimum, otherwise a new leading gap is prepended.
    pub fn widen_min(&mut self, new_min: u64) -> Result<(), GapError> {
        if new_min > self.min {
            return Err(GapError::NonMonotonicBound {
                op: "widen_min",
                current: self.min,
                requested: new_min,
            });
        }
        if new_min == self.min {
            return Ok(());
        }

        let old_min = self.min;
        self.min = new_min;

        match self.gaps.first_mut() {
            Some(first) if first.start == old_min => {
                first.start = new_min;
            }
            _ => self.gaps.insert(0, Gap::new(new_min, old_min - 1)),
        }
        Ok(())
    }

    /// Increase the lower bound, dropping or clipping leading gaps
    pub fn narrow_min(&mut self, new_min: u64) -> Result<(), GapError> {
        if new_min < self.min {
            return Err(GapError::NonMonotonicBound {
                op: "narrow_min",
                current: self.min,
                requested: new_min,
            });
        }
        if new_min > self.max {
            return Err(GapError::InvertedBounds {
                min: new_min,
                max: self.max,
            });
        }
        if new_min == self.min {
            return Ok(());
        }

        self.min = new_min;
        self.gaps.retain(|gap| gap.end >= new_min);
        if let Some(first) = self.gaps.first_mut() {
            if first.start < new_min {
                first.start = new_min;
            }
        }
        Ok(())
    }

    /// Move both bounds at once
    ///
    /// When both bounds grow, the maximum is widened before the minimum is
    /// raised; when both shrink, the minimum is lowered before the maximum is
    /// cut. Either order would otherwise pass through a transient state where
    /// the bounds invert.
    pub fn set_bounds(&mut self, new_min: u64, new_max: u64) -> Result<(), GapError> {
        if new_min > new_max {
            return Err(GapError::InvertedBounds {
                min: new_min,
                max: new_max,
            });
        }

        if new_min > self.min && new_max > self.max {
            self.widen_max(new_max)?;
            self.narrow_min(new_min)?;
        } else if new_min < self.min && new_max < self.max {
            self.widen_min(new_min)?;
            self.narrow_max(new_max)?;
        } else {
            if new_max >= self.max {
                self.widen_max(new_max)?;
            } else {
                self.narrow_max(new_max)?;
            }
            if new_min <= self.min {
                self.widen_min(new_min)?;
            } else {
                self.narrow_min(new_min)?;
            }
        }
        Ok(())
    }

    /// Mark a single sequence number as received
    ///
    /// Removes, shrinks or splits the gap containing `value`. Marking a value
    /// that falls in no gap is a no-op, so the operation is idempotent.
    pub fn mark_filled(&mut self, value: u64) -> Result<(), GapError> {
        if value < self.min || value > self.max {
            return Err(GapError::ValueOutOfRange {
                value,
                min: self.min,
                max: self.max,
            });
        }

        let idx = match self.find_gap(value) {
            Some(idx) => idx,
            None => return Ok(()),
        };
        let (start, end) = (self.gaps[idx].start, self.gaps[idx].end);

        if start == value && end == value {
            // Single-point gap is eliminated outright.
            self.gaps.remove(idx);
        } else if start == value {
            self.gaps[idx].start += 1;
            self.gaps[idx].modified = Utc::now();
        } else if end == value {
            self.gaps[idx].end -= 1;
            self.gaps[idx].modified = Utc::now();
        } else {
            // Interior hit: split around the value.
            let now = Utc::now();
            self.gaps[idx].end = value - 1;
            self.gaps[idx].modified = now;
            self.gaps
                .insert(idx + 1, Gap::with_modified(value + 1, end, now));
        }
        Ok(())
    }

    /// Gap ranges as (start, end) pairs
    ///
    /// `exclusive_start` / `exclusive_end` shift the respective bound by one
    /// for protocols that expect exclusive ranges. The shift is rejected when
    /// a bound sits at the edge of the u64 domain.
    pub fn gap_ranges(
        &self,
        exclusive_start: bool,
        exclusive_end: bool,
    ) -> Result<Vec<(u64, u64)>, GapError> {
        let mut ranges = Vec::with_capacity(self.gaps.len());
        for gap in &self.gaps {
            if exclusive_start && gap.start == 0 {
                return Err(GapError::ExclusiveBoundUnrepresentable(gap.start));
            }
            if exclusive_end && gap.end == u64::MAX {
                return Err(GapError::ExclusiveBoundUnrepresentable(gap.end));
            }
            ranges.push((
                if exclusive_start { gap.start - 1 } else { gap.start },
                if exclusive_end { gap.end + 1 } else { gap.end },
            ));
        }
        Ok(ranges)
    }

    /// Remove gaps last modified before `cutoff`
    ///
    /// The removed gaps may still represent genuinely missing data; dropping
    /// them trades correctness for bounded memory on long-lived connections.
    pub fn expire_older_than(&mut self, cutoff: DateTime<Utc>) {
        self.gaps.retain(|gap| gap.modified >= cutoff);
    }

    /// Binary search for the gap containing `value`
    fn find_gap(&self, value: u64) -> Option<usize> {
        let idx = self.gaps.partition_point(|gap| gap.start <= value);
        if idx == 0 {
            return None;
        }
        let candidate = idx - 1;
        self.gaps[candidate].contains(value).then_some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ranges(list: &GapList) -> Vec<(u64, u64)> {
        list.gap_ranges(false, false).unwrap()
    }

    #[test]
    fn test_new_full_range_gap() {
        let list = GapList::new(5, 10).unwrap();
        assert_eq!(list.min(), 5);
        assert_eq!(list.max(), 10);
        assert_eq!(ranges(&list), vec![(5, 10)]);
    }

    #[test]
    fn test_new_rejects_inverted_bounds() {
        assert_eq!(
            GapList::new(10, 5),
            Err(GapError::InvertedBounds { min: 10, max: 5 })
        );
    }

    #[test]
    fn test_mark_filled_all_cases() {
        let mut list = GapList::new(0, 10).unwrap();

        // Shrink from the start.
        list.mark_filled(0).unwrap();
        assert_eq!(ranges(&list), vec![(1, 10)]);

        // Shrink from the end.
        list.mark_filled(10).unwrap();
        assert_eq!(ranges(&list), vec![(1, 9)]);

        // Interior split.
        list.mark_filled(5).unwrap();
        assert_eq!(ranges(&list), vec![(1, 4), (6, 9)]);

        // Single-point elimination.
        list.mark_filled(2).unwrap();
        list.mark_filled(3).unwrap();
        list.mark_filled(4).unwrap();
        assert_eq!(ranges(&list), vec![(1, 1), (6, 9)]);
        list.mark_filled(1).unwrap();
        assert_eq!(ranges(&list), vec![(6, 9)]);
    }

    #[test]
    fn test_mark_filled_idempotent() {
        let mut list = GapList::new(0, 10).unwrap();
        list.mark_filled(5).unwrap();
        let before = ranges(&list);
        list.mark_filled(5).unwrap();
        assert_eq!(ranges(&list), before);
    }

    #[test]
    fn test_mark_filled_out_of_range() {
        let mut list = GapList::new(5, 10).unwrap();
        assert!(matches!(
            list.mark_filled(11),
            Err(GapError::ValueOutOfRange { value: 11, .. })
        ));
        assert!(matches!(
            list.mark_filled(4),
            Err(GapError::ValueOutOfRange { value: 4, .. })
        ));
    }

    #[test]
    fn test_widen_max_extends_touching_gap() {
        let mut list = GapList::new(0, 5).unwrap();
        list.widen_max(8).unwrap();
        assert_eq!(ranges(&list), vec![(0, 8)]);
    }

    #[test]
    fn test_widen_max_appends_after_filled_tail() {
        let mut list = GapList::new(0, 5).unwrap();
        for v in 3..=5 {
            list.mark_filled(v).unwrap();
        }
        list.widen_max(8).unwrap();
        assert_eq!(ranges(&list), vec![(0, 2), (6, 8)]);
    }

    #[test]
    fn test_widen_max_appends_when_no_gaps_remain() {
        let mut list = GapList::new(0, 0).unwrap();
        list.mark_filled(0).unwrap();
        assert_eq!(list.total_gaps(), 0);

        list.widen_max(4).unwrap();
        assert_eq!(ranges(&list), vec![(1, 4)]);
    }

    #[test]
    fn test_widen_max_rejects_decrease() {
        let mut list = GapList::new(0, 5).unwrap();
        assert!(matches!(
            list.widen_max(4),
            Err(GapError::NonMonotonicBound { op: "widen_max", .. })
        ));
        assert_eq!(list.max(), 5);
    }

    #[test]
    fn test_narrow_max_drops_and_clips() {
        let mut list = GapList::new(0, 10).unwrap();
        list.mark_filled(4).unwrap();
        list.mark_filled(7).unwrap();
        assert_eq!(ranges(&list), vec![(0, 3), (5, 6), (8, 10)]);

        list.narrow_max(5).unwrap();
        assert_eq!(list.max(), 5);
        assert_eq!(ranges(&list), vec![(0, 3), (5, 5)]);
    }

    #[test]
    fn test_widen_min_extends_and_prepends() {
        let mut list = GapList::new(5, 10).unwrap();
        list.widen_min(2).unwrap();
        assert_eq!(ranges(&list), vec![(2, 10)]);

        let mut list = GapList::new(5, 10).unwrap();
        for v in 5..=7 {
            list.mark_filled(v).unwrap();
        }
        list.widen_min(2).unwrap();
        assert_eq!(ranges(&list), vec![(2, 4), (8, 10)]);
    }

    #[test]
    fn test_narrow_min_drops_and_clips() {
        let mut list = GapList::new(0, 10).unwrap();
        list.mark_filled(4).unwrap();
        assert_eq!(ranges(&list), vec![(0, 3), (5, 10)]);

        list.narrow_min(6).unwrap();
        assert_eq!(list.min(), 6);
        assert_eq!(ranges(&list), vec![(6, 10)]);
    }

    #[test]
    fn test_set_bounds_both_grow() {
        let mut list = GapList::new(0, 5).unwrap();
        list.set_bounds(2, 9).unwrap();
        assert_eq!(list.min(), 2);
        assert_eq!(list.max(), 9);
        assert_eq!(ranges(&list), vec![(2, 9)]);
    }

    #[test]
    fn test_set_bounds_both_shrink() {
        let mut list = GapList::new(5, 10).unwrap();
        list.set_bounds(2, 7).unwrap();
        assert_eq!(list.min(), 2);
        assert_eq!(list.max(), 7);
        assert_eq!(ranges(&list), vec![(2, 7)]);
    }

    #[test]
    fn test_set_bounds_rejects_inverted() {
        let mut list = GapList::new(0, 10).unwrap();
        assert!(list.set_bounds(8, 3).is_err());
        assert_eq!(list.min(), 0);
        assert_eq!(list.max(), 10);
    }

    #[test]
    fn test_gap_ranges_exclusive_shift() {
        let mut list = GapList::new(1, 10).unwrap();
        list.mark_filled(5).unwrap();
        assert_eq!(
            list.gap_ranges(false, true).unwrap(),
            vec![(1, 5), (6, 11)]
        );
        assert_eq!(list.gap_ranges(true, false).unwrap(), vec![(0, 4), (5, 10)]);
    }

    #[test]
    fn test_gap_ranges_exclusive_unrepresentable() {
        let list = GapList::new(0, 5).unwrap();
        assert!(matches!(
            list.gap_ranges(true, false),
            Err(GapError::ExclusiveBoundUnrepresentable(0))
        ));

        let list = GapList::new(u64::MAX - 1, u64::MAX).unwrap();
        assert!(matches!(
            list.gap_ranges(false, true),
            Err(GapError::ExclusiveBoundUnrepresentable(u64::MAX))
        ));
    }

    #[test]
    fn test_expire_older_than() {
        let old = Utc::now() - Duration::days(10);
        let list = GapList::from_parts(
            0,
            20,
            vec![Gap::with_modified(5, 5, old), Gap::new(10, 12)],
        )
        .unwrap();

        let mut expired = list.clone();
        expired.expire_older_than(Utc::now() - Duration::days(5));
        assert_eq!(ranges(&expired), vec![(10, 12)]);

        let mut kept = list;
        kept.expire_older_than(Utc::now() - Duration::days(15));
        assert_eq!(ranges(&kept), vec![(5, 5), (10, 12)]);
    }

    #[test]
    fn test_from_parts_rejects_overlap() {
        let result = GapList::from_parts(0, 20, vec![Gap::new(1, 5), Gap::new(5, 9)]);
        assert!(matches!(result, Err(GapError::OverlappingGaps { .. })));
    }

    #[test]
    fn test_from_parts_rejects_out_of_bounds_gap() {
        let result = GapList::from_parts(5, 10, vec![Gap::new(3, 6)]);
        assert!(matches!(result, Err(GapError::ValueOutOfRange { .. })));
    }

    mod properties {
        use crate::gaps::GapList;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn mark_filled_keeps_gaps_ordered_and_bounded(
                values in prop::collection::vec(0u64..200, 1..60),
            ) {
                let mut list = GapList::new(0, 199).unwrap();
                for value in values {
                    list.mark_filled(value).unwrap();
                    let ranges = list.gap_ranges(false, false).unwrap();
                    for &(start, end) in &ranges {
                        prop_assert!(start <= end);
                        prop_assert!(start >= list.min() && end <= list.max());
                    }
                    for pair in ranges.windows(2) {
                        prop_assert!(pair[0].1 < pair[1].0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_unsigned_upper_domain() {
        // Values above i64::MAX must compare correctly.
        let high = u64::MAX - 5;
        let mut list = GapList::new(high, u64::MAX).unwrap();
        list.mark_filled(u64::MAX - 2).unwrap();
        assert_eq!(
            ranges(&list),
            vec![(high, u64::MAX - 3), (u64::MAX - 1, u64::MAX)]
        );
    }
}
