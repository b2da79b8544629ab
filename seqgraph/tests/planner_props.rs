//! Property tests for the memory planner.

use proptest::prelude::*;
use seqgraph::{Lifetime, MemoryPlan, MemoryPlanner, RegressRegion};

/// Random node sequences: each node is referenced up to `span` steps later.
fn lifetimes_strategy() -> impl Strategy<Value = Vec<Lifetime>> {
    proptest::collection::vec((0usize..4096, 0usize..6), 0..48).prop_map(|raw| {
        let n = raw.len();
        raw.into_iter()
            .enumerate()
            .map(|(index, (size, span))| Lifetime {
                index,
                size,
                first_use: index,
                last_use: (index + span).min(n.saturating_sub(1)),
            })
            .collect()
    })
}

fn region_strategy() -> impl Strategy<Value = Option<(usize, usize)>> {
    proptest::option::of((0usize..48, 0usize..16))
}

fn to_region(raw: Option<(usize, usize)>, n: usize) -> Option<RegressRegion> {
    let (begin, len) = raw?;
    let begin = begin.min(n);
    Some(RegressRegion {
        begin,
        end: (begin + len).min(n),
    })
}

fn assert_disjoint(plan: &MemoryPlan) -> Result<(), TestCaseError> {
    for a in 0..plan.len() {
        for b in (a + 1)..plan.len() {
            let (af, al) = plan.interval(a).unwrap();
            let (bf, bl) = plan.interval(b).unwrap();
            let (asz, bsz) = (plan.size(a).unwrap(), plan.size(b).unwrap());
            if asz == 0 || bsz == 0 || al < bf || bl < af {
                continue;
            }
            let (ao, bo) = (plan.offset(a).unwrap(), plan.offset(b).unwrap());
            prop_assert!(
                ao + asz <= bo || bo + bsz <= ao,
                "live nodes {} and {} overlap: [{}, {}) vs [{}, {})",
                a, b, ao, ao + asz, bo, bo + bsz
            );
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn live_nodes_never_share_bytes(
        lifetimes in lifetimes_strategy(),
        region in region_strategy(),
        align_pow in 0u32..9,
    ) {
        let region = to_region(region, lifetimes.len());
        let plan = MemoryPlanner::new(1 << align_pow).plan(&lifetimes, region);
        assert_disjoint(&plan)?;
    }

    #[test]
    fn peak_is_bounded(lifetimes in lifetimes_strategy(), region in region_strategy()) {
        let region = to_region(region, lifetimes.len());
        let plan = MemoryPlanner::default().plan(&lifetimes, region);
        let total: usize = lifetimes.iter().map(|l| l.size).sum();
        prop_assert!(plan.peak_bytes() >= plan.max_live_bytes());
        prop_assert!(plan.peak_bytes() <= total);
        for i in 0..plan.len() {
            prop_assert!(plan.offset(i).unwrap() + plan.size(i).unwrap() <= plan.peak_bytes());
        }
    }

    #[test]
    fn planning_is_deterministic(lifetimes in lifetimes_strategy(), region in region_strategy()) {
        let region = to_region(region, lifetimes.len());
        let planner = MemoryPlanner::new(64);
        prop_assert_eq!(planner.plan(&lifetimes, region), planner.plan(&lifetimes, region));
    }

    #[test]
    fn region_nodes_live_through_region_end(
        lifetimes in lifetimes_strategy(),
        region in region_strategy(),
    ) {
        let Some(region) = to_region(region, lifetimes.len()) else {
            return Ok(());
        };
        let plan = MemoryPlanner::default().plan(&lifetimes, Some(region));
        for l in &lifetimes {
            let (_, last) = plan.interval(l.index).unwrap();
            if region.contains(l.index) {
                prop_assert_eq!(last, l.last_use.max(region.end));
            } else {
                prop_assert_eq!(last, l.last_use);
            }
        }
    }
}
