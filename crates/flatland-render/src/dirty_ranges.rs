//! Dirty range tracking for partial buffer updates.

use std::ops::Range;

/// Sorted list of non-overlapping ranges that need uploading.
///
/// Adjacent and overlapping ranges are merged on insert, so marking slot `n`
/// and then slot `n + 1` results in a single upload.
#[derive(Debug, Clone, Default)]
pub struct DirtyRanges {
    /// Sorted, non-overlapping ranges; end is exclusive
    ranges: Vec<Range<usize>>,
}

impl DirtyRanges {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Mark `start..end` as dirty.
    pub fn mark_dirty(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }

        // Fast paths: slot-ordered writes extend or append to the last range.
        if let Some(last) = self.ranges.last_mut() {
            if start >= last.start && start <= last.end {
                last.end = last.end.max(end);
                return;
            }
            if start > last.end {
                self.ranges.push(start..end);
                return;
            }
        } else {
            self.ranges.push(start..end);
            return;
        }

        // Ranges are sorted and never touch, so both ends are monotonic.
        let first = self.ranges.partition_point(|r| r.end < start);
        let last = self.ranges.partition_point(|r| r.start <= end);
        if first < last {
            let merged = self.ranges[first].start.min(start)..self.ranges[last - 1].end.max(end);
            self.ranges.drain(first + 1..last);
            self.ranges[first] = merged;
        } else {
            self.ranges.insert(first, start..end);
        }
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<usize>> {
        self.ranges.iter()
    }

    /// Total number of dirty elements.
    pub fn total_dirty_count(&self) -> usize {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }
}
