//! Lexicographic layout.
//!
//! A [`Layout`] maps indexes within one [`Range`] to flat offsets within a
//! contiguous buffer, in row-major ("lexicographic", last dimension
//! fastest-varying) order. Grounded on `layout_lex.c`: `offset_lex` for the
//! index→offset map, `copy_lex`/`pack_lex`/`unpack_lex` for the element
//! movement primitives the action executor calls, and `reuse_lex` for
//! deciding whether an old mapping's buffer can be reused unchanged for a
//! new (sub-)range.

use crate::index::{Index, Range};

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    range: Range,
    strides: [u64; 3],
}

impl Layout {
    /// Builds a lexicographic layout over `range`: the last dimension has
    /// stride 1, each earlier dimension's stride is the product of all
    /// later dimensions' widths.
    pub fn new(range: Range) -> Self {
        let dims = range.dims();
        let mut strides = [0u64; 3];
        let mut acc = 1u64;
        for d in (0..dims).rev() {
            strides[d] = acc;
            acc *= range.width(d).max(1);
        }
        Layout { range, strides }
    }

    pub fn range(&self) -> Range {
        self.range
    }

    /// Total number of elements the backing buffer must hold.
    pub fn capacity(&self) -> u64 {
        self.range.size()
    }

    /// Flat element offset of `idx` within this layout's buffer. Panics if
    /// `idx` falls outside `range`.
    pub fn offset(&self, idx: &Index) -> u64 {
        assert!(self.range.contains_index(idx), "index {idx} outside layout range {:?}", self.range);
        (0..self.range.dims())
            .map(|d| (idx.get(d) - self.range.from.get(d)) as u64 * self.strides[d])
            .sum()
    }

    /// True if `other`'s index set is a subset of `self`'s, i.e. a buffer
    /// sized/laid-out for `self` can be reused in place for `other` without
    /// reallocation. Mirrors `reuse_lex`'s containment check.
    pub fn can_reuse_for(&self, other: &Range) -> bool {
        self.range.contains_range(other)
    }

    /// Copies every element of `src_range` (a sub-range of `self.range`)
    /// from `src` into `dst` at the corresponding offsets for `dst_layout`,
    /// `dst_range` (possibly a different layout/buffer entirely). `T` is
    /// the POD element type; `elem` width is implicit in the slice types.
    pub fn copy_range<T: Copy>(
        &self,
        src: &[T],
        src_range: &Range,
        dst_layout: &Layout,
        dst: &mut [T],
    ) {
        assert_eq!(src_range.dims(), self.range.dims());
        for_each_index(src_range, |idx| {
            let s = self.offset(&idx) as usize;
            let d = dst_layout.offset(&idx) as usize;
            dst[d] = src[s];
        });
    }

    /// Packs every element of `pack_range` out of `src` (laid out per
    /// `self`) into `out`, in lexicographic order — the wire format
    /// `PackToBuf`/`PackAndSend` actions use.
    pub fn pack<T: Copy>(&self, src: &[T], pack_range: &Range, out: &mut Vec<T>) {
        for_each_index(pack_range, |idx| {
            out.push(src[self.offset(&idx) as usize]);
        });
    }

    /// Inverse of [`pack`](Self::pack): consumes `packed` in lexicographic
    /// order and scatters it into `dst` (laid out per `self`) over
    /// `unpack_range`.
    pub fn unpack<T: Copy>(&self, dst: &mut [T], unpack_range: &Range, packed: &[T]) {
        let mut it = packed.iter();
        for_each_index(unpack_range, |idx| {
            let v = *it.next().expect("unpack: packed buffer shorter than unpack_range");
            dst[self.offset(&idx) as usize] = v;
        });
    }
}

/// Iterates every index in `range` in lexicographic order, last dimension
/// fastest-varying.
pub fn for_each_index(range: &Range, mut f: impl FnMut(Index)) {
    if range.is_empty() {
        return;
    }
    let dims = range.dims();
    let mut cur = range.from;
    loop {
        f(cur);
        let mut d = dims;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            cur.coords[d] += 1;
            if cur.coords[d] < range.to.get(d) {
                break;
            }
            cur.coords[d] = range.from.get(d);
            if d == 0 {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_dense_and_unique_1d() {
        let r = Range::new(1, Index::new1(5), Index::new1(9));
        let l = Layout::new(r);
        let mut seen = vec![false; 4];
        for_each_index(&r, |idx| {
            seen[l.offset(&idx) as usize] = true;
        });
        assert!(seen.iter().all(|&b| b));
    }

    #[test]
    fn offsets_row_major_2d() {
        let r = Range::new(2, Index::new2(0, 0), Index::new2(2, 3));
        let l = Layout::new(r);
        // last dim (width 3) fastest-varying -> stride 1, first dim stride 3
        assert_eq!(l.offset(&Index::new2(0, 0)), 0);
        assert_eq!(l.offset(&Index::new2(0, 1)), 1);
        assert_eq!(l.offset(&Index::new2(1, 0)), 3);
    }

    #[test]
    fn reuse_detects_subset() {
        let outer = Layout::new(Range::new(1, Index::new1(0), Index::new1(100)));
        assert!(outer.can_reuse_for(&Range::new(1, Index::new1(10), Index::new1(20))));
        assert!(!outer.can_reuse_for(&Range::new(1, Index::new1(90), Index::new1(200))));
    }

    #[test]
    fn pack_then_unpack_round_trips() {
        let full = Range::new(1, Index::new1(0), Index::new1(10));
        let l = Layout::new(full);
        let src: Vec<i32> = (0..10).collect();
        let sub = Range::new(1, Index::new1(3), Index::new1(7));
        let mut packed = Vec::new();
        l.pack(&src, &sub, &mut packed);
        assert_eq!(packed, vec![3, 4, 5, 6]);

        let mut dst = vec![0i32; 10];
        l.unpack(&mut dst, &sub, &packed);
        assert_eq!(&dst[3..7], &[3, 4, 5, 6]);
    }
}
