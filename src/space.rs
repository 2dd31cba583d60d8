//! Index spaces.
//!
//! A [`Space`] names the full index domain that partitionings carve up: a
//! dimensionality and a total [`Range`]. Spaces are immutable once created
//! except for `resize`, which is only legal when no live partitioning still
//! references the old extent (checked by the owning instance, not here).

use crate::index::{Index, Range};

#[derive(Debug, Clone)]
pub struct Space {
    name: Option<String>,
    range: Range,
}

impl Space {
    pub fn new1(size: u64) -> Self {
        Space {
            name: None,
            range: Range::new(1, Index::new1(0), Index::new1(size as i64)),
        }
    }

    pub fn new2(size1: u64, size2: u64) -> Self {
        Space {
            name: None,
            range: Range::new(2, Index::new2(0, 0), Index::new2(size1 as i64, size2 as i64)),
        }
    }

    pub fn new3(size1: u64, size2: u64, size3: u64) -> Self {
        Space {
            name: None,
            range: Range::new(
                3,
                Index::new3(0, 0, 0),
                Index::new3(size1 as i64, size2 as i64, size3 as i64),
            ),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn dims(&self) -> usize {
        self.range.dims()
    }

    /// The full range covering this space, `[0, size)` in each dimension.
    pub fn full_range(&self) -> Range {
        self.range
    }

    pub fn size(&self) -> u64 {
        self.range.size()
    }

    /// Replaces the extent in-place for elastic growth/shrink. Callers are
    /// responsible for ensuring no live partitioning still references the
    /// old extent (spec's elastic-resize protocol runs this only between a
    /// `resize` announcement and `finish_resize`).
    pub fn resize(&mut self, new_range: Range) {
        assert_eq!(new_range.dims(), self.range.dims(), "resize cannot change dimensionality");
        self.range = new_range;
    }
}
