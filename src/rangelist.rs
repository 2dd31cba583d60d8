//! Range lists: the frozen, queryable result of running a partitioner.
//!
//! A [`RangeList`] starts out as an append-only bag of `(tid, range, tag)`
//! triples produced by a partitioner callback, then gets [`RangeList::freeze`]n
//! once: sorted by `(tid, tag, from)`, adjacent same-tag ranges for the same
//! tid merged, and indexed so that "all ranges for tid T" and "all ranges in
//! mapping M of tid T" are O(1) lookups. `tag == 0` means "no grouping info
//! from the partitioner"; any other value groups ranges of the same tid that
//! should land in the same local mapping (used by `Halo`-style partitioners
//! to keep a owned range and its halo in one buffer).

use crate::group::Tid;
use crate::index::Range;

/// One contribution from a partitioner: a range assigned to `tid`, tagged
/// with an opaque group id (`0` = ungrouped).
#[derive(Debug, Clone, Copy)]
pub struct TaggedRange {
    pub tid: Tid,
    pub range: Range,
    pub tag: u64,
}

/// A range together with the index (within its tid's frozen entries) of its
/// local mapping, i.e. which contiguous buffer it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct FrozenRange {
    pub tid: Tid,
    pub range: Range,
    pub map_no: u32,
}

#[derive(Debug, Default, Clone)]
pub struct RangeList {
    entries: Vec<TaggedRange>,
    frozen: Option<Frozen>,
}

#[derive(Debug, Clone)]
struct Frozen {
    ranges: Vec<FrozenRange>,
    /// `tid -> [start, end)` into `ranges`.
    by_tid: Vec<(usize, usize)>,
    /// Number of distinct mapNo values per tid.
    map_counts: Vec<u32>,
}

impl RangeList {
    pub fn new() -> Self {
        RangeList::default()
    }

    /// Appends one range assignment. Only legal before [`freeze`](Self::freeze).
    pub fn append(&mut self, tid: Tid, range: Range, tag: u64) {
        assert!(self.frozen.is_none(), "cannot append to a frozen RangeList");
        if range.is_empty() {
            return;
        }
        self.entries.push(TaggedRange { tid, range, tag });
    }

    /// Drops every not-yet-frozen entry `keep` rejects. Used by the
    /// partitioner runtime to apply an installed `RangeFilter` before
    /// freezing, so a task never materializes ranges it has no use for.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(Tid, &Range, u64) -> bool) {
        assert!(self.frozen.is_none(), "cannot filter a frozen RangeList");
        self.entries.retain(|e| keep(e.tid, &e.range, e.tag));
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    /// Sorts, merges, and indexes the accumulated ranges. Idempotent: calling
    /// it twice is a no-op.
    pub fn freeze(&mut self, group_size: u32) {
        if self.frozen.is_some() {
            return;
        }
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by(|a, b| {
            (a.tid, a.tag, a.range.from.coords).cmp(&(b.tid, b.tag, b.range.from.coords))
        });

        let mut ranges = Vec::with_capacity(entries.len());
        let mut by_tid = vec![(0usize, 0usize); group_size as usize];
        let mut map_counts = vec![0u32; group_size as usize];

        let mut i = 0;
        while i < entries.len() {
            let tid = entries[i].tid;
            let start = ranges.len();
            let mut map_no: i64 = -1;
            let mut prev_tag: Option<u64> = None;
            while i < entries.len() && entries[i].tid == tid {
                let cur = entries[i];
                // new mapNo whenever the tag is 0 (ungrouped) or changes
                let new_group = cur.tag == 0 || prev_tag != Some(cur.tag);
                if new_group {
                    map_no += 1;
                } else if let Some(last) = ranges.last_mut() {
                    if let Some(merged) = try_merge(last.range, cur.range) {
                        last.range = merged;
                        prev_tag = Some(cur.tag);
                        i += 1;
                        continue;
                    }
                }
                ranges.push(FrozenRange { tid: cur.tid, range: cur.range, map_no: map_no as u32 });
                prev_tag = Some(cur.tag);
                i += 1;
            }
            let end = ranges.len();
            by_tid[tid as usize] = (start, end);
            map_counts[tid as usize] = (map_no + 1) as u32;
        }

        self.frozen = Some(Frozen { ranges, by_tid, map_counts });
    }

    fn frozen(&self) -> &Frozen {
        self.frozen.as_ref().expect("RangeList not frozen")
    }

    /// All ranges assigned to `tid`, in frozen order.
    pub fn ranges_for(&self, tid: Tid) -> &[FrozenRange] {
        let f = self.frozen();
        let (s, e) = f.by_tid.get(tid as usize).copied().unwrap_or((0, 0));
        &f.ranges[s..e]
    }

    /// Number of distinct local mappings `tid` owns.
    pub fn map_count(&self, tid: Tid) -> u32 {
        self.frozen().map_counts.get(tid as usize).copied().unwrap_or(0)
    }

    /// All frozen ranges across every tid, in `(tid, mapNo)` order.
    pub fn all_ranges(&self) -> &[FrozenRange] {
        &self.frozen().ranges
    }

    /// Every range across every tid that intersects `query`.
    pub fn intersecting(&self, query: &Range) -> impl Iterator<Item = &FrozenRange> {
        self.frozen().ranges.iter().filter(move |r| r.range.intersects(query))
    }

    /// True if the union of all ranges in this list exactly covers `whole`
    /// with no overlaps — the `Coverage` invariant partitioners must satisfy
    /// when they don't explicitly allow gaps/overlaps.
    pub fn is_exact_cover(&self, whole: &Range) -> bool {
        let total: u64 = self.frozen().ranges.iter().map(|r| r.range.size()).sum();
        if total != whole.size() {
            return false;
        }
        let ranges = &self.frozen().ranges;
        for i in 0..ranges.len() {
            for j in (i + 1)..ranges.len() {
                if ranges[i].range.intersects(&ranges[j].range) {
                    return false;
                }
            }
        }
        ranges.iter().all(|r| whole.contains_range(&r.range))
    }

    /// True if the union of all ranges in this list touches every index of
    /// `whole` at least once — unlike [`is_exact_cover`](Self::is_exact_cover),
    /// overlaps between ranges (replication, halos) are fine; only gaps fail
    /// this check. Implements the worklist-subtraction coverage check: start
    /// with `whole` as the sole uncovered piece, subtract every emitted range
    /// from it, and succeed iff nothing uncovered remains.
    pub fn covers(&self, whole: &Range) -> bool {
        let mut uncovered = vec![*whole];
        for fr in self.frozen().ranges.iter() {
            let mut next = Vec::new();
            for piece in uncovered {
                match piece.intersect(&fr.range) {
                    None => next.push(piece),
                    Some(ov) => next.extend(rect_difference(piece, ov)),
                }
            }
            uncovered = next;
            if uncovered.is_empty() {
                return true;
            }
        }
        uncovered.is_empty()
    }
}

/// Combines `a` and `b` into one box if they agree on every dimension but
/// one and are adjacent or overlapping along that dimension; `None` if they
/// differ along more than one axis or leave a gap between them. Identical
/// ranges merge trivially into themselves.
fn try_merge(a: Range, b: Range) -> Option<Range> {
    let dims = a.dims();
    let mut diff_dim = None;
    for d in 0..dims {
        if a.from.get(d) != b.from.get(d) || a.to.get(d) != b.to.get(d) {
            if diff_dim.is_some() {
                return None;
            }
            diff_dim = Some(d);
        }
    }
    let Some(d) = diff_dim else {
        return Some(a);
    };
    if b.from.get(d) > a.to.get(d) || a.from.get(d) > b.to.get(d) {
        return None;
    }
    let mut merged = a;
    merged.from.coords[d] = a.from.get(d).min(b.from.get(d));
    merged.to.coords[d] = a.to.get(d).max(b.to.get(d));
    Some(merged)
}

/// `p` minus `ov` (where `ov ⊆ p`), as up to `2*dims` disjoint slabs.
fn rect_difference(p: Range, ov: Range) -> Vec<Range> {
    let mut pieces = Vec::new();
    let mut remainder = p;
    for d in 0..p.dims() {
        if remainder.from.get(d) < ov.from.get(d) {
            let mut lo = remainder;
            lo.to.coords[d] = ov.from.get(d);
            pieces.push(lo);
            remainder.from.coords[d] = ov.from.get(d);
        }
        if remainder.to.get(d) > ov.to.get(d) {
            let mut hi = remainder;
            hi.from.coords[d] = ov.to.get(d);
            pieces.push(hi);
            remainder.to.coords[d] = ov.to.get(d);
        }
    }
    pieces.into_iter().filter(|r| !r.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    fn r(a: i64, b: i64) -> Range {
        Range::new(1, Index::new1(a), Index::new1(b))
    }

    #[test]
    fn freeze_sorts_and_groups_by_tid() {
        let mut rl = RangeList::new();
        rl.append(1, r(5, 10), 0);
        rl.append(0, r(0, 5), 0);
        rl.freeze(2);
        assert_eq!(rl.ranges_for(0)[0].range, r(0, 5));
        assert_eq!(rl.ranges_for(1)[0].range, r(5, 10));
    }

    #[test]
    fn exact_cover_detects_full_partition() {
        let mut rl = RangeList::new();
        rl.append(0, r(0, 5), 0);
        rl.append(1, r(5, 10), 0);
        rl.freeze(2);
        assert!(rl.is_exact_cover(&r(0, 10)));
    }

    #[test]
    fn exact_cover_rejects_gap() {
        let mut rl = RangeList::new();
        rl.append(0, r(0, 4), 0);
        rl.append(1, r(5, 10), 0);
        rl.freeze(2);
        assert!(!rl.is_exact_cover(&r(0, 10)));
    }

    #[test]
    fn covers_accepts_overlap_but_rejects_gaps() {
        let mut rl = RangeList::new();
        rl.append(0, r(0, 10), 0);
        rl.append(1, r(0, 10), 0);
        rl.freeze(2);
        assert!(rl.covers(&r(0, 10)), "fully overlapping replication should still cover");
        assert!(!rl.is_exact_cover(&r(0, 10)), "but it's not an exact, non-overlapping cover");

        let mut gapped = RangeList::new();
        gapped.append(0, r(0, 4), 0);
        gapped.append(1, r(5, 10), 0);
        gapped.freeze(2);
        assert!(!gapped.covers(&r(0, 10)));
    }

    #[test]
    fn tagged_ranges_share_one_mapno() {
        let mut rl = RangeList::new();
        rl.append(0, r(0, 5), 7);
        rl.append(0, r(5, 8), 7);
        rl.append(0, r(20, 25), 0);
        rl.freeze(1);
        let rs = rl.ranges_for(0);
        // the two adjacent tag-7 ranges merge into a single frozen entry.
        assert_eq!(rs.len(), 2);
        assert_eq!(rs[0].range, r(0, 8));
        assert_ne!(rs[0].map_no, rs[1].map_no);
        assert_eq!(rl.map_count(0), 2);
    }

    #[test]
    fn non_adjacent_same_tag_ranges_stay_separate() {
        let mut rl = RangeList::new();
        rl.append(0, r(0, 5), 7);
        rl.append(0, r(10, 15), 7);
        rl.freeze(1);
        let rs = rl.ranges_for(0);
        assert_eq!(rs.len(), 2, "a gap between same-tag ranges must not be merged away");
        assert_eq!(rs[0].map_no, rs[1].map_no, "they still share a mapNo");
    }
}
