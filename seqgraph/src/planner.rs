//! Static memory planner for the temporary-buffer arena
//!
//! Given every node's byte size and liveness interval, assigns each node an
//! offset inside one shared arena. Nodes whose intervals overlap never share
//! bytes; nodes with disjoint intervals may reuse the same offset. The arena
//! only has to be as large as the most demanding placement, not the sum of
//! all node sizes.
//!
//! Placement is greedy by size: nodes are visited largest first (ties broken
//! by index), and each goes to the lowest offset that does not collide with
//! an already placed, simultaneously live node. The visiting order is a pure
//! function of the input, so plans are reproducible across builds.
//!
//! The planner never allocates device memory; see
//! [`Context::arena`](crate::Context::arena).

#![allow(clippy::must_use_candidate)]

use std::cmp::Reverse;

use serde::Serialize;

use crate::regress::RegressRegion;

/// Size and liveness of one node, as seen by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    /// Global sequence index of the node.
    pub index: usize,
    /// Bytes needed by the node's output.
    pub size: usize,
    /// First index at which the node is referenced.
    pub first_use: usize,
    /// Last index at which the node is referenced (inclusive).
    pub last_use: usize,
}

/// Result of planning: arena size plus one offset per node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryPlan {
    peak_bytes: usize,
    offsets: Vec<usize>,
    sizes: Vec<usize>,
    /// Effective `(first, last)` liveness after regress extension.
    intervals: Vec<(usize, usize)>,
}

impl MemoryPlan {
    /// Arena size needed to run the graph.
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }

    /// Byte offset of node `index` inside the arena.
    pub fn offset(&self, index: usize) -> Option<usize> {
        self.offsets.get(index).copied()
    }

    /// All offsets, indexed by node index.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Aligned size of node `index`.
    pub fn size(&self, index: usize) -> Option<usize> {
        self.sizes.get(index).copied()
    }

    /// Effective liveness interval `(first, last)` of node `index`.
    pub fn interval(&self, index: usize) -> Option<(usize, usize)> {
        self.intervals.get(index).copied()
    }

    /// Number of planned nodes.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Total aligned bytes of the nodes live at step `idx`.
    pub fn live_bytes_at(&self, idx: usize) -> usize {
        self.intervals
            .iter()
            .zip(&self.sizes)
            .filter(|&(&(first, last), _)| first <= idx && idx <= last)
            .map(|(_, &size)| size)
            .sum()
    }

    /// Largest [`live_bytes_at`](Self::live_bytes_at) over all steps.
    pub fn max_live_bytes(&self) -> usize {
        self.intervals
            .iter()
            .map(|&(first, _)| self.live_bytes_at(first))
            .max()
            .unwrap_or(0)
    }
}

/// Computes [`MemoryPlan`]s.
#[derive(Debug, Clone, Copy)]
pub struct MemoryPlanner {
    alignment: usize,
}

impl Default for MemoryPlanner {
    fn default() -> Self {
        Self { alignment: 1 }
    }
}

impl MemoryPlanner {
    /// Create a planner rounding every node size up to `alignment` bytes.
    ///
    /// # Panics
    /// Panics if `alignment` is zero.
    pub fn new(alignment: usize) -> Self {
        assert!(alignment > 0, "arena alignment must be > 0");
        Self { alignment }
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// `size` rounded up to the alignment, or `None` if that overflows.
    pub fn aligned_size(&self, size: usize) -> Option<usize> {
        size.div_ceil(self.alignment).checked_mul(self.alignment)
    }

    /// Sum of all aligned sizes, or `None` if it does not fit in `usize`.
    ///
    /// Every offset the planner hands out stays below this total.
    pub fn total_aligned_bytes(&self, sizes: impl IntoIterator<Item = usize>) -> Option<usize> {
        sizes
            .into_iter()
            .try_fold(0usize, |acc, size| acc.checked_add(self.aligned_size(size)?))
    }

    /// Plan offsets for `lifetimes`, which must be ordered by index with
    /// `lifetimes[i].index == i`.
    ///
    /// Nodes inside `region` stay live through `region.end` even if their
    /// last ordinary use is earlier.
    ///
    /// # Panics
    /// Panics if the aligned sizes sum past `usize::MAX`. Check with
    /// [`total_aligned_bytes`](Self::total_aligned_bytes) first.
    pub fn plan(&self, lifetimes: &[Lifetime], region: Option<RegressRegion>) -> MemoryPlan {
        let total_bytes = self
            .total_aligned_bytes(lifetimes.iter().map(|l| l.size))
            .unwrap_or_else(|| {
                panic!(
                    "aligned node sizes overflow the arena address space ({} nodes)",
                    lifetimes.len()
                )
            });
        // Each aligned size is at most `total_bytes`, so none of these fail.
        let sizes: Vec<usize> = lifetimes
            .iter()
            .filter_map(|l| self.aligned_size(l.size))
            .collect();
        let intervals: Vec<(usize, usize)> = lifetimes
            .iter()
            .map(|l| {
                let mut last = l.last_use.max(l.first_use);
                if let Some(region) = region {
                    if region.contains(l.index) {
                        last = last.max(region.end);
                    }
                }
                (l.first_use, last)
            })
            .collect();

        let mut order: Vec<usize> = (0..lifetimes.len()).filter(|&i| sizes[i] > 0).collect();
        order.sort_by_key(|&i| (Reverse(sizes[i]), i));

        let mut offsets = vec![0usize; lifetimes.len()];
        let mut placed: Vec<usize> = Vec::with_capacity(order.len());
        let mut peak_bytes = 0usize;

        for &i in &order {
            let (first, last) = intervals[i];
            let mut conflicts: Vec<(usize, usize)> = placed
                .iter()
                .filter(|&&j| {
                    let (jf, jl) = intervals[j];
                    first <= jl && jf <= last
                })
                .map(|&j| (offsets[j], offsets[j] + sizes[j]))
                .collect();
            conflicts.sort_unstable();

            let mut offset = 0usize;
            for (start, end) in conflicts {
                if offset + sizes[i] <= start {
                    break;
                }
                offset = offset.max(end);
            }

            offsets[i] = offset;
            peak_bytes = peak_bytes.max(offset + sizes[i]);
            placed.push(i);
        }

        tracing::debug!(
            nodes = lifetimes.len(),
            peak_bytes,
            total_bytes,
            "memory plan computed"
        );

        MemoryPlan {
            peak_bytes,
            offsets,
            sizes,
            intervals,
        }
    }
}
