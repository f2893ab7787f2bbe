//! Ordered set of half-open byte ranges.
//!
//! Reassembly entries record which datagram offsets have been received in an
//! [`IntervalSet`]. Ranges are kept sorted and disjoint; adjacent ranges are
//! merged on insertion so a complete datagram collapses to a single range.
//! A new range is never merged with one it overlaps: that situation is
//! reported to the caller, which decides how to treat the fragment.

use std::ops::Range;

use thiserror::Error;

/// Default bound on the number of disjoint ranges per datagram.
pub const DEFAULT_MAX_INTERVALS: usize = 16;

/// Outcome of [`IntervalSet::insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insertion {
    /// The range was new and has been recorded.
    Inserted,
    /// The range was already fully covered; nothing changed.
    Duplicate,
    /// The range partially intersects recorded data; nothing changed.
    Overlap,
}

/// Returned when a range would need a new slot but the set is full.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("interval set already holds {limit} disjoint ranges")]
pub struct IntervalsExhausted {
    /// Configured bound on disjoint ranges.
    pub limit: usize,
}

/// Sorted, disjoint set of `[start, end)` ranges.
///
/// # Examples
///
/// ```
/// use lowpan_frag::interval::{Insertion, IntervalSet};
///
/// let mut set = IntervalSet::new(4);
/// assert_eq!(set.insert(8, 16), Ok(Insertion::Inserted));
/// assert_eq!(set.insert(0, 8), Ok(Insertion::Inserted));
/// assert_eq!(set.insert(4, 12), Ok(Insertion::Duplicate));
/// assert!(set.is_complete(16));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: Vec<Range<usize>>,
    limit: usize,
}

impl Default for IntervalSet {
    fn default() -> Self { Self::new(DEFAULT_MAX_INTERVALS) }
}

impl IntervalSet {
    /// Create an empty set bounded to `limit` disjoint ranges.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            ranges: Vec::with_capacity(limit.min(DEFAULT_MAX_INTERVALS)),
            limit: limit.max(1),
        }
    }

    /// Record `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`IntervalsExhausted`] when the range merges with no neighbour
    /// and the set already holds its maximum number of ranges.
    pub fn insert(&mut self, start: usize, end: usize) -> Result<Insertion, IntervalsExhausted> {
        if start >= end {
            return Ok(Insertion::Duplicate);
        }
        // first range that does not end before `start`
        let idx = self.ranges.partition_point(|r| r.end < start);
        let mut hi = idx;
        while let Some(existing) = self.ranges.get(hi)
            && existing.start <= end
        {
            if existing.start <= start && end <= existing.end {
                return Ok(Insertion::Duplicate);
            }
            if existing.start < end && start < existing.end {
                return Ok(Insertion::Overlap);
            }
            hi += 1;
        }
        // ranges[idx..hi] only touch the new range at their boundaries
        match hi - idx {
            0 => {
                if self.ranges.len() >= self.limit {
                    return Err(IntervalsExhausted { limit: self.limit });
                }
                self.ranges.insert(idx, start..end);
            }
            _ => {
                let merged = self.ranges[idx].start.min(start)..self.ranges[hi - 1].end.max(end);
                self.ranges.drain(idx + 1..hi);
                self.ranges[idx] = merged;
            }
        }
        Ok(Insertion::Inserted)
    }

    /// Whether the set covers exactly `[0, total_size)`.
    #[must_use]
    pub fn is_complete(&self, total_size: usize) -> bool {
        match self.ranges.as_slice() {
            [] => total_size == 0,
            [only] => only.start == 0 && only.end >= total_size,
            _ => false,
        }
    }

    /// Forget every recorded range.
    pub fn clear(&mut self) { self.ranges.clear(); }

    /// Total number of bytes covered.
    #[must_use]
    pub fn covered(&self) -> usize { self.ranges.iter().map(ExactSizeIterator::len).sum() }

    /// Number of disjoint ranges.
    #[must_use]
    pub fn len(&self) -> usize { self.ranges.len() }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.ranges.is_empty() }

    /// Iterate over the recorded ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Range<usize>> + '_ { self.ranges.iter().cloned() }
}
