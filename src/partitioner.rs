//! Partitioner runtime and built-in partitioners.
//!
//! A [`Partitioner`] is a boxed closure `Fn(&PartitionerCtx) -> RangeList`.
//! The built-ins below (`all`, `master`, `copy`, `halo`, `corner_halo`,
//! `bisection`, `block`, `grid`, `reassign`) are constructors that return a
//! `Partitioner`, following the same shape as `original_source/src/partitioner.c`'s
//! run-callbacks (`runAllPartitioner`, `runMasterPartitioner`, ...).
//!
//! [`RangeFilter`] lets a caller restrict which of the full result a given
//! task actually needs to materialize — grounded on `partitioning.c`'s
//! `Laik_RangeFilter`/`idxfilter_check`.

use std::sync::Arc;

use crate::group::{ProcessGroup, Tid};
use crate::index::Range;
use crate::rangelist::RangeList;

/// Everything a partitioner callback needs: the full space range, the
/// process group it must produce ranges over, and (for `Reassign`) the
/// "other" partitioning being redistributed away from.
pub struct PartitionerCtx<'a> {
    pub space: Range,
    pub group: &'a ProcessGroup,
    /// Previous partitioning's frozen ranges, when this partitioner refines
    /// or redistributes an existing one (`Reassign`, or any user partitioner
    /// that reads `other`).
    pub other: Option<&'a RangeList>,
    /// Restricts which ranges `run` keeps before freezing. `None` means the
    /// caller wants the full, unfiltered result, in which case `run` also
    /// checks the result actually covers `space`.
    pub filter: Option<RangeFilterKind>,
}

/// Which ranges a task wants materialized out of a partitioner's full
/// result. Mirrors `Laik_RangeFilter`'s two uses in `partitioning.c`: a task
/// keeping only its own ranges, or only ranges some `RangeFilter` accepts.
#[derive(Debug, Clone)]
pub enum RangeFilterKind {
    OwnTid(Tid),
    Filter(RangeFilter),
}

pub type PartitionerFn = dyn Fn(&PartitionerCtx) -> RangeList + Send + Sync;

/// A named, reusable partitioning algorithm.
#[derive(Clone)]
pub struct Partitioner {
    name: &'static str,
    f: Arc<PartitionerFn>,
}

impl Partitioner {
    pub fn new(name: &'static str, f: impl Fn(&PartitionerCtx) -> RangeList + Send + Sync + 'static) -> Self {
        Partitioner { name, f: Arc::new(f) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the algorithm, applies `ctx.filter` (if any) before freezing so a
    /// task never materializes ranges it rejected, then freezes. When no
    /// filter is installed the full, unfiltered result must cover `ctx.space`
    /// with no gaps — panics otherwise, since an uninstalled filter means the
    /// caller trusts this to be the authoritative whole-space result.
    pub fn run(&self, ctx: &PartitionerCtx) -> RangeList {
        let mut rl = (self.f)(ctx);
        match &ctx.filter {
            Some(RangeFilterKind::OwnTid(tid)) => {
                let tid = *tid;
                rl.retain(|t, _, _| t == tid);
            }
            Some(RangeFilterKind::Filter(filter)) => {
                let filter = filter.clone();
                rl.retain(|_, r, _| filter.check(r));
            }
            None => {}
        }
        rl.freeze(ctx.group.size());
        if ctx.filter.is_none() {
            assert!(
                rl.covers(&ctx.space),
                "partitioner {:?} left gaps in {:?} with no filter installed",
                self.name,
                ctx.space
            );
        }
        rl
    }
}

impl std::fmt::Debug for Partitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partitioner").field("name", &self.name).finish()
    }
}

/// Restricts interest to ranges touching up to two sub-intervals, so a task
/// can avoid materializing ranges it will never copy from/to. Mirrors
/// `Laik_RangeFilter`'s two-slot `pfilter1`/`pfilter2` design.
#[derive(Debug, Default, Clone)]
pub struct RangeFilter {
    slot1: Vec<Range>,
    slot2: Vec<Range>,
}

impl RangeFilter {
    pub fn new() -> Self {
        RangeFilter::default()
    }

    pub fn add_slot1(&mut self, r: Range) {
        self.slot1.push(r);
    }

    pub fn add_slot2(&mut self, r: Range) {
        self.slot2.push(r);
    }

    /// Binary-search containment check: true if `r` intersects anything in
    /// either slot. Slots are kept sorted by `from` so this is O(log n).
    pub fn check(&self, r: &Range) -> bool {
        Self::check_slot(&self.slot1, r) || Self::check_slot(&self.slot2, r)
    }

    fn check_slot(slot: &[Range], r: &Range) -> bool {
        // Slots are small in practice (one entry per remote task touching a
        // halo); linear scan matches the original's behavior without
        // requiring a sorted invariant on every mutation.
        slot.iter().any(|s| s.intersects(r))
    }
}

/// Assigns every index in the space to tid 0. Degenerate partitioner mostly
/// useful as an identity/testing fixture.
pub fn master() -> Partitioner {
    Partitioner::new("master", |ctx| {
        let mut rl = RangeList::new();
        rl.append(0, ctx.space, 0);
        rl
    })
}

/// Assigns the full space to every tid (replicated). `Non-goal`: does not
/// attempt to deduplicate reduce-traffic across replicas; that's the
/// transition/action layer's job via `DataFlow::ReduceOut`.
pub fn all() -> Partitioner {
    Partitioner::new("all", |ctx| {
        let mut rl = RangeList::new();
        for tid in 0..ctx.group.size() {
            rl.append(tid, ctx.space, 0);
        }
        rl
    })
}

/// Derives ranges from `other` by projecting its `from_dim` bounds onto the
/// target space's `to_dim`: every tid's range is the full target-space
/// extent with only `to_dim`'s bounds overwritten by `other`'s `from_dim`
/// bounds. Used e.g. to carry a 1-d partitioning of one space's axis over
/// onto the matching axis of a differently-shaped space. Matches
/// `runCopyPartitioner`.
pub fn copy(from_dim: usize, to_dim: usize) -> Partitioner {
    Partitioner::new("copy", move |ctx| {
        let mut rl = RangeList::new();
        let other = ctx.other.expect("copy partitioner requires `other`");
        for fr in other.all_ranges() {
            let mut r = ctx.space;
            r.from.coords[to_dim] = fr.range.from.get(from_dim);
            r.to.coords[to_dim] = fr.range.to.get(from_dim);
            rl.append(fr.tid, r, 0);
        }
        rl
    })
}

/// Block-distributes a 1-d space with optional per-tid weights, matching
/// `runBlockPartitioner`'s prefix-sum approach: each tid gets a contiguous
/// slice proportional to its weight. Uniform weight 1.0 is the common case.
pub fn block(weights: Option<Vec<f64>>) -> Partitioner {
    Partitioner::new("block", move |ctx| {
        let size = ctx.group.size();
        let total = ctx.space.size();
        let from0 = ctx.space.from.get(0);
        let w: Vec<f64> = weights.clone().unwrap_or_else(|| vec![1.0; size as usize]);
        assert_eq!(w.len(), size as usize, "block: weight vector must match group size");
        let wsum: f64 = w.iter().sum();

        let mut rl = RangeList::new();
        let mut cursor = from0;
        let mut acc = 0.0;
        for tid in 0..size {
            acc += w[tid as usize];
            let target = from0 + ((total as f64) * acc / wsum).round() as i64;
            let to = if tid == size - 1 { ctx.space.to.get(0) } else { target.min(ctx.space.to.get(0)) };
            if to > cursor {
                let r = Range::new(
                    1,
                    crate::index::Index::new1(cursor),
                    crate::index::Index::new1(to),
                );
                rl.append(tid, r, 0);
                cursor = to;
            }
        }
        rl
    })
}

/// Recursively splits the space's widest dimension in proportion to the
/// width of each rank sub-interval, following `runBisectionPartitioner`'s
/// recursive halving. Works in any of 1-3 dimensions.
pub fn bisection() -> Partitioner {
    fn recurse(rl: &mut RangeList, r: Range, lo: Tid, hi: Tid) {
        if lo + 1 == hi {
            rl.append(lo, r, 0);
            return;
        }
        let mid = lo + (hi - lo) / 2;
        let frac = (mid - lo) as f64 / (hi - lo) as f64;
        let dim = r.widest_dim();
        let width = r.width(dim) as f64;
        let split_at = r.from.get(dim) + (width * frac).round() as i64;
        let split_at = split_at.clamp(r.from.get(dim) + 1, r.to.get(dim) - 1);
        let (lower, upper) = r.split_at(dim, split_at);
        recurse(rl, lower, lo, mid);
        recurse(rl, upper, mid, hi);
    }

    Partitioner::new("bisection", |ctx| {
        let mut rl = RangeList::new();
        let size = ctx.group.size();
        if size == 0 {
            return rl;
        }
        if size == 1 {
            rl.append(0, ctx.space, 0);
        } else if !ctx.space.is_empty() {
            recurse(&mut rl, ctx.space, 0, size);
        }
        rl
    })
}

/// Depth-`depth` halo around each tid's `base` assignment. Extends every
/// dimension of each owned range by up to two disjoint strips (one on each
/// side), each adjoining but never overlapping the owned range, and only
/// added when it fits entirely without reaching the space's edge — matches
/// `runHaloPartitioner`'s per-dimension strip growth. Tags every owned range
/// and its halo strips with the same nonzero tag so they land in one
/// mapping together.
pub fn halo(depth: i64, base: Partitioner) -> Partitioner {
    Partitioner::new("halo", move |ctx| {
        // halo needs every tid's base ranges to build each tid's neighbor
        // strips, so the base run must see the full space regardless of any
        // filter installed on the outer (halo) run.
        let base_ctx = PartitionerCtx { space: ctx.space, group: ctx.group, other: ctx.other, filter: None };
        let owned = base.run(&base_ctx);
        let mut rl = RangeList::new();
        for tid in 0..ctx.group.size() {
            for (i, fr) in owned.ranges_for(tid).iter().enumerate() {
                let tag = (i as u64) + 1;
                rl.append(tid, fr.range, tag);
                for dim in 0..fr.range.dims() {
                    if fr.range.from.get(dim) > ctx.space.from.get(dim) + depth {
                        let mut strip = fr.range;
                        strip.to.coords[dim] = fr.range.from.get(dim);
                        strip.from.coords[dim] = fr.range.from.get(dim) - depth;
                        rl.append(tid, strip, tag);
                    }
                    if fr.range.to.get(dim) < ctx.space.to.get(dim) - depth {
                        let mut strip = fr.range;
                        strip.from.coords[dim] = fr.range.to.get(dim);
                        strip.to.coords[dim] = fr.range.to.get(dim) + depth;
                        rl.append(tid, strip, tag);
                    }
                }
            }
        }
        rl
    })
}

/// Like [`halo`] but materializes one single enlarged range per tid (owned
/// range padded by `depth` on every side, including corners) instead of
/// separate owned+halo tagged ranges — matches `runCornerHaloPartitioner`.
pub fn corner_halo(depth: i64, base: Partitioner) -> Partitioner {
    Partitioner::new("corner_halo", move |ctx| {
        let base_ctx = PartitionerCtx { space: ctx.space, group: ctx.group, other: ctx.other, filter: None };
        let owned = base.run(&base_ctx);
        let mut rl = RangeList::new();
        for fr in owned.all_ranges() {
            let mut grown = fr.range;
            for d in 0..grown.dims() {
                grown.from.coords[d] = (grown.from.get(d) - depth).max(ctx.space.from.get(d));
                grown.to.coords[d] = (grown.to.get(d) + depth).min(ctx.space.to.get(d));
            }
            rl.append(fr.tid, grown, 0);
        }
        rl
    })
}

/// Product grid over up to 3 dimensions, choosing a per-dimension factor
/// count that (1) never leaves a rank idle and (2) balances the resulting
/// per-dimension block counts as evenly as possible. Not present in the
/// original C sources — specified directly by the redistribution spec this
/// partitioner was added for.
pub fn grid() -> Partitioner {
    Partitioner::new("grid", |ctx| {
        let dims = ctx.space.dims();
        let size = ctx.group.size() as u64;
        let factors = grid_factors(dims, size);

        let mut rl = RangeList::new();
        let mut bounds = [Vec::new(), Vec::new(), Vec::new()];
        for d in 0..dims {
            bounds[d] = block_bounds(ctx.space.from.get(d), ctx.space.to.get(d), factors[d]);
        }
        let mut tid = 0u32;
        let total: u64 = factors.iter().take(dims).product();
        let mut idx = [0usize; 3];
        for linear in 0..total {
            let mut rem = linear;
            for d in 0..dims {
                idx[d] = (rem % factors[d]) as usize;
                rem /= factors[d];
            }
            let mut from = crate::index::Index::default();
            let mut to = crate::index::Index::default();
            for d in 0..dims {
                from.coords[d] = bounds[d][idx[d]];
                to.coords[d] = bounds[d][idx[d] + 1];
            }
            let r = Range::new(dims, from, to);
            if !r.is_empty() {
                rl.append(tid, r, 0);
            }
            tid += 1;
        }
        rl
    })
}

fn grid_factors(dims: usize, size: u64) -> [u64; 3] {
    // Start with every rank along dim 0, then rebalance by moving factors
    // to whichever dimension most reduces the max block count.
    let mut factors = [1u64; 3];
    factors[0] = size;
    if dims == 1 || size <= 1 {
        return factors;
    }
    // Greedily redistribute prime factors across dims to balance block counts.
    let mut remaining = size;
    let mut f = 2u64;
    let mut primes = Vec::new();
    while f * f <= remaining {
        while remaining % f == 0 {
            primes.push(f);
            remaining /= f;
        }
        f += 1;
    }
    if remaining > 1 {
        primes.push(remaining);
    }
    factors = [1; 3];
    // assign largest primes first to the currently-smallest dimension product
    primes.sort_unstable_by(|a, b| b.cmp(a));
    for p in primes {
        let target = (0..dims).min_by_key(|&d| factors[d]).unwrap();
        factors[target] *= p;
    }
    factors
}

fn block_bounds(from: i64, to: i64, n: u64) -> Vec<i64> {
    let total = (to - from) as u64;
    let mut bounds = Vec::with_capacity(n as usize + 1);
    bounds.push(from);
    for i in 1..=n {
        let acc = total * i / n;
        bounds.push(from + acc as i64);
    }
    bounds
}

/// Redistributes the ranges owned by tasks no longer in `ctx.group` across
/// the survivors, splitting the combined weight of orphaned indexes evenly
/// via the same `block_bounds` prefix-sum boundaries [`block`] uses — an
/// orphaned range may be cut across several survivors, and several orphaned
/// ranges may combine onto one survivor, exactly as `runReassignPartitioner`
/// walks index-by-index accumulating weight against `weightPerTask`.
/// Survivors keep their existing ranges untouched.
pub fn reassign() -> Partitioner {
    Partitioner::new("reassign", |ctx| {
        let other = ctx.other.expect("reassign partitioner requires `other`");
        let new_size = ctx.group.size();
        let mut rl = RangeList::new();
        if new_size == 0 {
            return rl;
        }

        let mut orphaned = Vec::new();
        for fr in other.all_ranges() {
            if fr.tid < new_size {
                rl.append(fr.tid, fr.range, 0);
            } else {
                orphaned.push(fr.range);
            }
        }
        if orphaned.is_empty() {
            return rl;
        }

        // uniform per-index weight (no `getIdxW` equivalent in this crate),
        // so the total orphaned weight is just its combined width.
        let total_weight: i64 = orphaned.iter().map(|r| r.size() as i64).sum();
        let bounds = block_bounds(0, total_weight, new_size as u64);

        let mut virtual_pos: i64 = 0;
        let mut task: usize = 0;
        for r in orphaned {
            let to0 = r.to.get(0);
            let mut pos = r.from.get(0);
            while pos < to0 {
                while task + 1 < new_size as usize && virtual_pos >= bounds[task + 1] {
                    task += 1;
                }
                let quota_end = bounds[task + 1];
                let take = (quota_end - virtual_pos).min(to0 - pos).max(1);
                let seg_to = pos + take;
                let mut seg = r;
                seg.from.coords[0] = pos;
                seg.to.coords[0] = seg_to;
                rl.append(task as u32, seg, 0);
                pos = seg_to;
                virtual_pos += take;
            }
        }
        rl
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    fn ctx(size: u32, from: i64, to: i64) -> (ProcessGroup, Range) {
        (ProcessGroup::world(size), Range::new(1, Index::new1(from), Index::new1(to)))
    }

    #[test]
    fn master_gives_everything_to_tid0() {
        let (g, sp) = ctx(4, 0, 100);
        let rl = master().run(&PartitionerCtx { space: sp, group: &g, other: None, filter: None });
        assert_eq!(rl.ranges_for(0)[0].range.size(), 100);
        assert_eq!(rl.ranges_for(1).len(), 0);
    }

    #[test]
    fn block_covers_exactly_with_uniform_weights() {
        let (g, sp) = ctx(4, 0, 100);
        let rl = block(None).run(&PartitionerCtx { space: sp, group: &g, other: None, filter: None });
        assert!(rl.is_exact_cover(&sp));
    }

    #[test]
    fn bisection_covers_exactly() {
        let (g, sp) = ctx(5, 0, 97);
        let rl = bisection().run(&PartitionerCtx { space: sp, group: &g, other: None, filter: None });
        assert!(rl.is_exact_cover(&sp));
        for tid in 0..5 {
            assert_eq!(rl.ranges_for(tid).len(), 1);
        }
    }

    #[test]
    fn grid_factors_multiply_back_to_size() {
        let f = grid_factors(2, 12);
        assert_eq!(f[0] * f[1] * f[2], 12);
    }

    #[test]
    fn grid_covers_2d_exactly() {
        let (g, _) = ctx(6, 0, 0);
        let sp = Range::new(2, Index::new2(0, 0), Index::new2(12, 8));
        let rl = grid().run(&PartitionerCtx { space: sp, group: &g, other: None, filter: None });
        assert!(rl.is_exact_cover(&sp));
    }

    #[test]
    fn own_tid_filter_drops_other_tids_ranges() {
        let (g, sp) = ctx(4, 0, 100);
        let rl = block(None).run(&PartitionerCtx {
            space: sp,
            group: &g,
            other: None,
            filter: Some(RangeFilterKind::OwnTid(2)),
        });
        assert!(rl.ranges_for(0).is_empty());
        assert!(rl.ranges_for(1).is_empty());
        assert!(!rl.ranges_for(2).is_empty());
        assert!(rl.ranges_for(3).is_empty());
    }

    #[test]
    fn filter_kind_drops_ranges_outside_filter() {
        let (g, sp) = ctx(4, 0, 100);
        let mut filter = RangeFilter::new();
        filter.add_slot1(Range::new(1, Index::new1(0), Index::new1(30)));
        let rl = block(None).run(&PartitionerCtx {
            space: sp,
            group: &g,
            other: None,
            filter: Some(RangeFilterKind::Filter(filter)),
        });
        for fr in rl.all_ranges() {
            assert!(fr.range.from.get(0) < 30);
        }
    }

    #[test]
    #[should_panic(expected = "left gaps")]
    fn unfiltered_run_panics_if_result_has_gaps() {
        let (g, sp) = ctx(2, 0, 10);
        // a hand-written partitioner that only covers half the space.
        let gappy = Partitioner::new("gappy", |ctx| {
            let mut rl = RangeList::new();
            rl.append(0, Range::new(1, ctx.space.from, Index::new1(5)), 0);
            rl
        });
        gappy.run(&PartitionerCtx { space: sp, group: &g, other: None, filter: None });
    }

    #[test]
    fn halo_ignores_outer_filter_when_running_its_base() {
        let (g, sp) = ctx(3, 0, 9);
        let rl = halo(1, block(None)).run(&PartitionerCtx {
            space: sp,
            group: &g,
            other: None,
            filter: Some(RangeFilterKind::OwnTid(1)),
        });
        // only tid 1's ranges survive the outer filter, but they must still
        // reflect the full halo (built from every tid's base ranges), not a
        // halo computed from a base that only knew about tid 1.
        assert!(rl.ranges_for(0).is_empty());
        assert!(!rl.ranges_for(1).is_empty());
        let union: Vec<(i64, i64)> =
            rl.ranges_for(1).iter().map(|r| (r.range.from.get(0), r.range.to.get(0))).collect();
        assert_eq!(union, vec![(2, 7)]);
    }

    #[test]
    fn reassign_redistributes_orphaned_weight_evenly() {
        let old_g = ProcessGroup::world(4);
        let sp = Range::new(1, Index::new1(0), Index::new1(40));
        let old = block(None).run(&PartitionerCtx { space: sp, group: &old_g, other: None, filter: None });

        // drop tid 3 (owner of [30,40)); survivors 0,1,2 must absorb its
        // 10 orphaned units, roughly evenly (ceil/floor of 10/3).
        let new_g = ProcessGroup::world(3);
        let rl = reassign().run(&PartitionerCtx { space: sp, group: &new_g, other: Some(&old), filter: None });

        assert!(rl.covers(&sp), "reassign must not drop any orphaned index");
        assert_eq!(rl.ranges_for(0)[0].range, Range::new(1, Index::new1(0), Index::new1(10)), "survivor keeps its own range untouched");
        let widths: Vec<u64> = (0..3).map(|tid| rl.ranges_for(tid).iter().map(|fr| fr.range.size()).sum::<u64>()).collect();
        assert_eq!(widths.iter().sum::<u64>(), 40);
        for w in &widths {
            assert!((10..=14).contains(w), "each survivor should gain a roughly even share of the orphaned 10 units, got {w}");
        }
    }

    #[test]
    fn copy_projects_from_dim_onto_to_dim() {
        let g = ProcessGroup::world(2);
        let mut other = RangeList::new();
        other.append(0, Range::new(1, Index::new1(0), Index::new1(4)), 0);
        other.append(1, Range::new(1, Index::new1(4), Index::new1(10)), 0);
        other.freeze(2);

        let dst_sp = Range::new(2, Index::new2(0, 0), Index::new2(5, 10));
        let rl = copy(0, 1).run(&PartitionerCtx {
            space: dst_sp,
            group: &g,
            other: Some(&other),
            filter: None,
        });

        let r0 = rl.ranges_for(0)[0].range;
        assert_eq!((r0.from.get(0), r0.to.get(0)), (0, 5), "dim 0 keeps the full target extent");
        assert_eq!((r0.from.get(1), r0.to.get(1)), (0, 4), "dim 1 is projected from other's dim 0");

        let r1 = rl.ranges_for(1)[0].range;
        assert_eq!((r1.from.get(1), r1.to.get(1)), (4, 10));
    }
}
