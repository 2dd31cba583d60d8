//! Mappings: the actual element buffers backing a `Data` for one local
//! range, plus the allocator that decides whether a new switch can reuse an
//! old buffer instead of allocating fresh.
//!
//! Grounded on `layout_lex.c`'s `reuse_lex` for the containment check and
//! `data.c`'s `prepareMaps`/`checkMapReuse`/`laik_allocateMap` for the
//! overall allocate-then-donate protocol: a new mapping list is built
//! against the new partitioning, matched against the old mapping list by
//! containment, and only the genuinely new mappings get a fresh `Vec`.
//!
//! A reused mapping keeps the *originally allocated* layout (so existing
//! element offsets stay valid) and only narrows which sub-range is
//! considered "live" — exactly what `reuse_lex` does by keeping the old
//! `Lex_Data`'s stride/base and just repointing `validStart`/`validEnd`.

use crate::dataflow::ReduceElem;
use crate::index::Range;
use crate::layout::Layout;
use crate::rangelist::FrozenRange;

/// One contiguous local buffer for a `Data<T>`, covering exactly one
/// mapNo's worth of ranges.
pub struct Mapping<T: ReduceElem> {
    /// Layout of the backing buffer as originally allocated. Never changes
    /// across a reuse, so offsets computed against it stay valid.
    alloc_layout: Layout,
    /// The range currently considered live (a subset of `alloc_layout`'s
    /// range after a reuse, equal to it on fresh allocation).
    live_range: Range,
    buf: Vec<T>,
    /// Set once this mapping's buffer has been handed off to a newer
    /// mapping, so it can't be donated twice (mirrors `checkMapReuse`'s
    /// double-free guard).
    donated: bool,
}

impl<T: ReduceElem> Mapping<T> {
    pub fn allocate(range: Range) -> Self {
        let alloc_layout = Layout::new(range);
        let buf = vec![T::default(); alloc_layout.capacity() as usize];
        Mapping { alloc_layout, live_range: range, buf, donated: false }
    }

    /// The range this mapping currently serves.
    pub fn range(&self) -> Range {
        self.live_range
    }

    pub fn layout(&self) -> &Layout {
        &self.alloc_layout
    }

    pub fn as_slice(&self) -> &[T] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.buf
    }
}

/// A full local set of mappings for one (partitioning, flow) pair.
pub struct MappingList<T: ReduceElem> {
    mappings: Vec<Mapping<T>>,
}

impl<T: ReduceElem> MappingList<T> {
    pub fn empty() -> Self {
        MappingList { mappings: Vec::new() }
    }

    pub fn mappings(&self) -> &[Mapping<T>] {
        &self.mappings
    }

    pub fn mappings_mut(&mut self) -> &mut [Mapping<T>] {
        &mut self.mappings
    }

    /// Builds the mapping list for `ranges` — one mapping per distinct
    /// `map_no`, not per range: every range sharing a `map_no` lands in the
    /// same buffer, sized to their bounding hull, matching `prepareMaps`'s
    /// one-allocation-per-mapNo rule. Requires `ranges` to already be
    /// grouped by `map_no` with equal values adjacent (exactly what
    /// `RangeList::ranges_for` returns). Reuses a buffer out of `old`
    /// wherever an old mapping's allocated range fully contains the new
    /// group's hull, and allocates fresh otherwise. Each old mapping can
    /// donate its buffer to at most one new mapping.
    pub fn build(ranges: &[FrozenRange], old: Option<MappingList<T>>) -> Self {
        let mut old_mappings = old.map(|l| l.mappings).unwrap_or_default();
        let mut mappings = Vec::new();

        let mut i = 0;
        while i < ranges.len() {
            let map_no = ranges[i].map_no;
            let mut hull = ranges[i].range;
            let mut j = i + 1;
            while j < ranges.len() && ranges[j].map_no == map_no {
                hull = union_hull(hull, ranges[j].range);
                j += 1;
            }

            let reuse_idx = old_mappings.iter().position(|m| !m.donated && m.alloc_layout.can_reuse_for(&hull));
            match reuse_idx {
                Some(k) => {
                    old_mappings[k].donated = true;
                    let buf = std::mem::take(&mut old_mappings[k].buf);
                    mappings.push(Mapping {
                        alloc_layout: old_mappings[k].alloc_layout,
                        live_range: hull,
                        buf,
                        donated: false,
                    });
                }
                None => mappings.push(Mapping::allocate(hull)),
            }
            i = j;
        }

        MappingList { mappings }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Smallest hyper-rectangle containing both `a` and `b`.
fn union_hull(a: Range, b: Range) -> Range {
    let dims = a.dims();
    let mut from = a.from;
    let mut to = a.to;
    for d in 0..dims {
        from.coords[d] = from.coords[d].min(b.from.get(d));
        to.coords[d] = to.coords[d].max(b.to.get(d));
    }
    Range::new(dims, from, to)
}
