//! Index and range primitives.
//!
//! An [`Index`] is a point in up to three dimensions; a [`Range`] is a
//! half-open hyper-rectangle `[from, to)`. These are the atoms every other
//! module (spaces, range lists, partitioners, transitions, layouts) builds
//! on, so they carry no allocation and no dependency on anything else in the
//! crate.

use std::fmt;

/// Number of dimensions a space/range can have. LAIK never needed more than 3.
pub const MAX_DIMS: usize = 3;

/// A point with 1 to 3 `i64` coordinates.
///
/// Unused trailing coordinates are conventionally `0` and ignored once the
/// owning [`Range`]'s dimensionality is known; `Index` itself does not track
/// how many of its coordinates are "live".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Index {
    pub coords: [i64; MAX_DIMS],
}

impl Index {
    pub fn new1(x: i64) -> Self {
        Index { coords: [x, 0, 0] }
    }

    pub fn new2(x: i64, y: i64) -> Self {
        Index { coords: [x, y, 0] }
    }

    pub fn new3(x: i64, y: i64, z: i64) -> Self {
        Index { coords: [x, y, z] }
    }

    pub fn get(&self, dim: usize) -> i64 {
        self.coords[dim]
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.coords[0], self.coords[1], self.coords[2])
    }
}

/// A half-open hyper-rectangle `[from, to)` in `dims` dimensions.
///
/// `dims` is fixed at construction and every method below treats coordinates
/// beyond `dims` as non-existent (both endpoints carry `0` there).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub from: Index,
    pub to: Index,
    dims: usize,
}

impl Range {
    /// Builds a range from explicit endpoints. Panics if `dims` is 0 or > 3,
    /// or if `from`/`to` disagree on any dimension beyond `dims` (they must
    /// be left at the default `0`).
    pub fn new(dims: usize, from: Index, to: Index) -> Self {
        assert!((1..=MAX_DIMS).contains(&dims), "range dims must be 1..=3, got {dims}");
        Range { from, to, dims }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// True when every dimension has `from >= to`, i.e. the range contains
    /// no indexes at all.
    pub fn is_empty(&self) -> bool {
        (0..self.dims).any(|d| self.from.get(d) >= self.to.get(d))
    }

    /// Number of indexes covered. `0` for an empty range.
    pub fn size(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (0..self.dims)
            .map(|d| (self.to.get(d) - self.from.get(d)) as u64)
            .product()
    }

    /// Width along a single dimension, `0` if `self` is empty.
    pub fn width(&self, dim: usize) -> u64 {
        let w = self.to.get(dim) - self.from.get(dim);
        if w <= 0 { 0 } else { w as u64 }
    }

    pub fn contains_index(&self, idx: &Index) -> bool {
        (0..self.dims).all(|d| idx.get(d) >= self.from.get(d) && idx.get(d) < self.to.get(d))
    }

    /// `self` fully contains `other` (empty `other` is trivially contained).
    pub fn contains_range(&self, other: &Range) -> bool {
        if other.is_empty() {
            return true;
        }
        (0..self.dims).all(|d| {
            other.from.get(d) >= self.from.get(d) && other.to.get(d) <= self.to.get(d)
        })
    }

    /// Largest range contained in both `self` and `other`, or `None` if they
    /// don't overlap. Returned range keeps `self`'s `dims`.
    pub fn intersect(&self, other: &Range) -> Option<Range> {
        let mut from = Index::default();
        let mut to = Index::default();
        for d in 0..self.dims {
            from.coords[d] = self.from.get(d).max(other.from.get(d));
            to.coords[d] = self.to.get(d).min(other.to.get(d));
        }
        let r = Range::new(self.dims, from, to);
        if r.is_empty() { None } else { Some(r) }
    }

    pub fn intersects(&self, other: &Range) -> bool {
        self.intersect(other).is_some()
    }

    /// Widest dimension by extent, used by the `Bisection` partitioner.
    pub fn widest_dim(&self) -> usize {
        (0..self.dims)
            .max_by_key(|&d| self.width(d))
            .unwrap_or(0)
    }

    /// Splits `self` at `at` along `dim` into `(lower, upper)`. `at` must lie
    /// strictly inside `(from[dim], to[dim])`.
    pub fn split_at(&self, dim: usize, at: i64) -> (Range, Range) {
        assert!(at > self.from.get(dim) && at < self.to.get(dim));
        let mut lower = *self;
        let mut upper = *self;
        lower.to.coords[dim] = at;
        upper.from.coords[dim] = at;
        (lower, upper)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{})", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r1(a: i64, b: i64) -> Range {
        Range::new(1, Index::new1(a), Index::new1(b))
    }

    #[test]
    fn empty_ranges() {
        assert!(r1(5, 5).is_empty());
        assert!(r1(5, 3).is_empty());
        assert!(!r1(5, 6).is_empty());
    }

    #[test]
    fn size_is_product_of_widths() {
        let r = Range::new(2, Index::new2(0, 0), Index::new2(4, 3));
        assert_eq!(r.size(), 12);
    }

    #[test]
    fn intersect_overlap() {
        let a = r1(0, 10);
        let b = r1(5, 15);
        let i = a.intersect(&b).unwrap();
        assert_eq!(i, r1(5, 10));
    }

    #[test]
    fn intersect_disjoint_is_none() {
        assert!(r1(0, 5).intersect(&r1(5, 10)).is_none());
    }

    #[test]
    fn contains_range() {
        let outer = r1(0, 10);
        assert!(outer.contains_range(&r1(2, 8)));
        assert!(!outer.contains_range(&r1(2, 11)));
        assert!(outer.contains_range(&r1(20, 20)));
    }

    #[test]
    fn split_at_divides_cleanly() {
        let r = r1(0, 10);
        let (lo, hi) = r.split_at(0, 4);
        assert_eq!(lo, r1(0, 4));
        assert_eq!(hi, r1(4, 10));
        assert_eq!(lo.size() + hi.size(), r.size());
    }
}
