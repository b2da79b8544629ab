//! Regress region bookkeeping.
//!
//! A regress region marks a contiguous run of node indices whose buffers
//! must survive a second (backward) pass over the same range. The planner
//! keeps every node inside the region live through the region's end.

use std::ops::Range;

use serde::Serialize;

/// Half-open node-index range `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegressRegion {
    pub begin: usize,
    pub end: usize,
}

impl RegressRegion {
    #[must_use]
    pub fn contains(&self, idx: usize) -> bool {
        self.begin <= idx && idx < self.end
    }

    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.begin..self.end
    }
}

/// Tracks the open/closed flag and the observed bounds while building.
#[derive(Debug, Default, Clone)]
pub(crate) struct RegressTracker {
    in_region: bool,
    begin: Option<usize>,
    end: Option<usize>,
}

impl RegressTracker {
    pub(crate) fn begin(&mut self) {
        assert!(
            !self.in_region,
            "regress_begin called while already inside a regress region"
        );
        self.in_region = true;
    }

    pub(crate) fn end(&mut self) {
        assert!(
            self.in_region,
            "regress_end called outside of a regress region"
        );
        self.in_region = false;
    }

    pub(crate) fn in_region(&self) -> bool {
        self.in_region
    }

    pub(crate) fn update_begin(&mut self, idx: usize) {
        if self.begin.is_none() {
            self.begin = Some(idx);
        }
    }

    pub(crate) fn update_end(&mut self, idx: usize) {
        let end = idx + 1;
        self.end = Some(self.end.map_or(end, |e| e.max(end)));
    }

    pub(crate) fn begin_idx(&self) -> Option<usize> {
        self.begin
    }

    pub(crate) fn end_idx(&self) -> Option<usize> {
        self.end
    }

    /// The recorded region, if both bounds were observed.
    pub(crate) fn region(&self) -> Option<RegressRegion> {
        match (self.begin, self.end) {
            (Some(begin), Some(end)) => Some(RegressRegion { begin, end }),
            _ => None,
        }
    }

    /// Check the region is closed and well ordered for a graph of
    /// `node_count` nodes.
    pub(crate) fn validate(&self, node_count: usize) -> Result<(), String> {
        if self.in_region {
            return Err("regress region opened but never closed".into());
        }
        match (self.begin, self.end) {
            (None, None) => Ok(()),
            (Some(begin), Some(end)) if begin <= end && end <= node_count => Ok(()),
            (Some(begin), Some(end)) => Err(format!(
                "regress region [{begin}, {end}) out of order or past node count {node_count}"
            )),
            (begin, end) => Err(format!(
                "regress region half recorded: begin={begin:?} end={end:?}"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_track_first_and_last() {
        let mut tracker = RegressTracker::default();
        tracker.begin();
        for idx in 5..9 {
            tracker.update_begin(idx);
            tracker.update_end(idx);
        }
        tracker.end();

        assert_eq!(tracker.region(), Some(RegressRegion { begin: 5, end: 9 }));
        assert!(tracker.validate(9).is_ok());
    }

    #[test]
    fn sequential_regions_widen() {
        let mut tracker = RegressTracker::default();
        tracker.begin();
        tracker.update_begin(2);
        tracker.update_end(2);
        tracker.end();
        tracker.begin();
        tracker.update_begin(6);
        tracker.update_end(6);
        tracker.end();

        assert_eq!(tracker.region(), Some(RegressRegion { begin: 2, end: 7 }));
    }

    #[test]
    #[should_panic(expected = "already inside a regress region")]
    fn nested_begin_panics() {
        let mut tracker = RegressTracker::default();
        tracker.begin();
        tracker.begin();
    }

    #[test]
    #[should_panic(expected = "outside of a regress region")]
    fn end_without_begin_panics() {
        let mut tracker = RegressTracker::default();
        tracker.end();
    }

    #[test]
    fn open_region_fails_validation() {
        let mut tracker = RegressTracker::default();
        tracker.begin();
        let err = tracker.validate(0).unwrap_err();
        assert!(err.contains("never closed"), "unexpected error: {err}");
    }

    #[test]
    fn half_recorded_fails_validation() {
        let mut tracker = RegressTracker::default();
        tracker.update_begin(3);
        assert!(tracker.validate(10).is_err());
    }

    #[test]
    fn contains_is_half_open() {
        let region = RegressRegion { begin: 2, end: 4 };
        assert!(!region.contains(1));
        assert!(region.contains(2));
        assert!(region.contains(3));
        assert!(!region.contains(4));
    }
}
