//! Partitionings: a partitioner bound to a concrete `(space, group)` pair,
//! with its result computed once and cached as a frozen [`RangeList`].
//!
//! Mirrors `laik_calc_partitioning`'s split between "the algorithm" and "the
//! concrete assignment it produced for this group/space pair" — the
//! `Partitioner` is reusable across many `Partitioning`s, the `RangeList` is
//! not.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::group::{ProcessGroup, Tid};
use crate::index::Range;
use crate::partitioner::{Partitioner, PartitionerCtx, RangeFilter, RangeFilterKind};
use crate::rangelist::RangeList;

/// Lazily-computed, narrower re-runs of the same partitioner, cached so a
/// second call with the same arguments doesn't recompute. Shared (via `Arc`)
/// across clones of the owning `Partitioning`, the same way `Instance`
/// shares its inner state.
#[derive(Debug, Default)]
struct Variants {
    own_tid: HashMap<Tid, RangeList>,
    intersection: HashMap<Tid, RangeList>,
}

/// A partitioner bound to a concrete `(space, group)` pair, with three
/// cacheable representations of its result:
///
/// - **Full**: every tid's ranges (`ranges`/`ranges_for`), computed eagerly.
/// - **OwnTid**: one tid's ranges only, via [`own_ranges`](Self::own_ranges) —
///   re-runs the partitioner with an `OwnTid` filter installed so a process
///   never has to materialize ranges it doesn't own.
/// - **Intersection**: ranges that intersect either of two reference
///   partitionings' own ranges for a tid, via
///   [`intersecting_ranges`](Self::intersecting_ranges) — the representation
///   `calc_transition` actually needs (what might this process send to or
///   receive from), which can be orders of magnitude smaller than Full for a
///   large group.
///
/// Mirrors `laik_calc_partitioning`'s split between "the algorithm" and "the
/// concrete assignment it produced for this group/space pair", and
/// `partitioning.c`'s `_store_allranges`/`_store_myranges`/
/// `_store_intersectranges` trio of cached representations.
#[derive(Debug, Clone)]
pub struct Partitioning {
    space: Range,
    group: ProcessGroup,
    partitioner: Partitioner,
    other: Option<RangeList>,
    ranges: RangeList,
    variants: Arc<Mutex<Variants>>,
}

impl Partitioning {
    /// Runs `partitioner` over `(space, group)` and freezes the result.
    /// `other` feeds partitioners that redistribute or refine an existing
    /// assignment (`Copy`, `Reassign`).
    pub fn new(space: Range, group: ProcessGroup, partitioner: &Partitioner, other: Option<&Partitioning>) -> Self {
        let other_ranges = other.map(|p| p.ranges.clone());
        let ctx = PartitionerCtx {
            space,
            group: &group,
            other: other_ranges.as_ref(),
            filter: None,
        };
        let ranges = partitioner.run(&ctx);
        Partitioning {
            space,
            group,
            partitioner: partitioner.clone(),
            other: other_ranges,
            ranges,
            variants: Arc::new(Mutex::new(Variants::default())),
        }
    }

    /// `tid`'s ranges only, computed by re-running the partitioner with an
    /// `OwnTid` filter rather than slicing the Full result — so a
    /// filter-aware partitioner (one that skips work for ranges it knows
    /// will be rejected) actually benefits. Cached per `tid`.
    pub fn own_ranges(&self, tid: Tid) -> RangeList {
        if let Some(rl) = self.variants.lock().unwrap().own_tid.get(&tid) {
            return rl.clone();
        }
        let ctx = PartitionerCtx {
            space: self.space,
            group: &self.group,
            other: self.other.as_ref(),
            filter: Some(RangeFilterKind::OwnTid(tid)),
        };
        let rl = self.partitioner.run(&ctx);
        self.variants.lock().unwrap().own_tid.insert(tid, rl.clone());
        rl
    }

    /// Ranges of this partitioning that intersect `tid`'s own ranges in
    /// either `a` or `b` — the set `calc_transition` needs when deciding
    /// what `tid` must send, receive, or reduce between two partitionings.
    /// Cached per `tid`; callers are expected to call this with the same
    /// `(a, b)` pair every time for a given `tid` (the cache key doesn't
    /// track which partitionings were used, only which tid).
    pub fn intersecting_ranges(&self, tid: Tid, a: &Partitioning, b: &Partitioning) -> RangeList {
        if let Some(rl) = self.variants.lock().unwrap().intersection.get(&tid) {
            return rl.clone();
        }
        let mut filter = RangeFilter::new();
        for fr in a.ranges_for(tid) {
            filter.add_slot1(fr.range);
        }
        for fr in b.ranges_for(tid) {
            filter.add_slot2(fr.range);
        }
        let ctx = PartitionerCtx {
            space: self.space,
            group: &self.group,
            other: self.other.as_ref(),
            filter: Some(RangeFilterKind::Filter(filter)),
        };
        let rl = self.partitioner.run(&ctx);
        self.variants.lock().unwrap().intersection.insert(tid, rl.clone());
        rl
    }

    pub fn space(&self) -> Range {
        self.space
    }

    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }

    pub fn ranges(&self) -> &RangeList {
        &self.ranges
    }

    /// All ranges assigned to `tid`.
    pub fn ranges_for(&self, tid: Tid) -> &[crate::rangelist::FrozenRange] {
        self.ranges.ranges_for(tid)
    }

    /// True if every index in `space` is covered by exactly one range
    /// across all tasks — the `Coverage`/`Intersection-completeness`
    /// invariant for partitioners that don't intentionally replicate.
    pub fn is_exact_cover(&self) -> bool {
        self.ranges.is_exact_cover(&self.space)
    }

    /// Re-expresses this partitioning's assignment in terms of `new_group`,
    /// translating each range's tid through the parent-chain id tables.
    /// Panics if a range is owned by a task that `new_group` dropped — the
    /// caller must `Reassign` first if it wants to keep that data.
    pub fn migrate(&self, new_group: ProcessGroup) -> Self {
        let mut rl = RangeList::new();
        for fr in self.ranges.all_ranges() {
            let world_tid = self.group.to_world(fr.tid);
            let new_tid = find_local_tid(&new_group, world_tid)
                .unwrap_or_else(|| panic!("migrate: tid {world_tid} (world) not present in new group"));
            rl.append(new_tid, fr.range, 0);
        }
        rl.freeze(new_group.size());
        Partitioning {
            space: self.space,
            group: new_group,
            partitioner: self.partitioner.clone(),
            other: None,
            ranges: rl,
            variants: Arc::new(Mutex::new(Variants::default())),
        }
    }
}

/// Finds `world_tid`'s id within `group`, walking down from the world group.
/// `group`'s lineage is assumed to terminate at the same world group as
/// `self` (both ultimately rooted in one instance's world group).
fn find_local_tid(group: &ProcessGroup, world_tid: Tid) -> Option<Tid> {
    // Walk from world down to `group` isn't directly representable (we only
    // have parent links), so instead check every local tid's to_world().
    (0..group.size()).find(|&tid| group.to_world(tid) == world_tid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::partitioner::{block, master};

    fn space() -> Range {
        Range::new(1, Index::new1(0), Index::new1(40))
    }

    #[test]
    fn block_partitioning_is_exact_cover() {
        let g = ProcessGroup::world(4);
        let p = Partitioning::new(space(), g, &block(None), None);
        assert!(p.is_exact_cover());
    }

    #[test]
    fn own_ranges_matches_the_full_variant_restricted_to_one_tid() {
        let g = ProcessGroup::world(4);
        let p = Partitioning::new(space(), g, &block(None), None);
        for tid in 0..4 {
            let own = p.own_ranges(tid);
            assert_eq!(own.all_ranges().len(), p.ranges_for(tid).len());
            for fr in own.all_ranges() {
                assert_eq!(fr.tid, tid);
                assert_eq!(fr.range, p.ranges_for(tid)[0].range);
            }
        }
    }

    #[test]
    fn own_ranges_is_cached() {
        let g = ProcessGroup::world(4);
        let p = Partitioning::new(space(), g, &block(None), None);
        let first = p.own_ranges(1);
        let second = p.own_ranges(1);
        assert_eq!(first.all_ranges().len(), second.all_ranges().len());
    }

    #[test]
    fn intersecting_ranges_pulls_in_overlapping_neighbors_only() {
        let g = ProcessGroup::world(4);
        let plain = Partitioning::new(space(), g.clone(), &block(None), None);
        let haloed = Partitioning::new(space(), g, &crate::partitioner::halo(2, block(None)), None);

        // block(None) over [0,40) with 4 tids gives [0,10),[10,20),[20,30),[30,40);
        // tid 1's depth-2 halo reaches [8,22), overlapping tid 0's and tid
        // 2's blocks but not tid 3's.
        let inter = plain.intersecting_ranges(1, &haloed, &haloed);
        let tids: std::collections::HashSet<_> = inter.all_ranges().iter().map(|fr| fr.tid).collect();
        assert!(tids.contains(&0));
        assert!(tids.contains(&1));
        assert!(tids.contains(&2));
        assert!(!tids.contains(&3), "tid 3's block doesn't overlap tid 1's halo");
    }

    #[test]
    fn migrate_translates_tids_through_shrink() {
        let g = ProcessGroup::world(4);
        let p = Partitioning::new(space(), g.clone(), &block(None), None);
        let shrunk = g.shrink(|t| t != 1);
        // only migrate a partitioning whose data tid 1 doesn't own ranges
        // under; use master() instead so tid1 owns nothing.
        let pm = Partitioning::new(space(), g, &master(), None);
        let migrated = pm.migrate(shrunk);
        assert_eq!(migrated.ranges_for(0)[0].range.size(), 40);
    }
}
