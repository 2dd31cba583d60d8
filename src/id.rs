//! Dense integer ids for arena-owned entities.
//!
//! Every long-lived object that an [`crate::instance::Instance`] owns (spaces,
//! groups, partitionings, data containers) is addressed by one of these
//! newtypes rather than by pointer or `Arc`. The pattern mirrors how a single
//! `Instance` hands out opaque handles and keeps the actual state behind a
//! lock, so application code never juggles lifetimes across a switch.

use std::fmt;

macro_rules! dense_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn new(v: u64) -> Self {
                $name(v)
            }

            /// Raw numeric value, stable for the lifetime of the owning instance.
            pub fn raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

dense_id!(SpaceId, "Identifies a registered index space.");
dense_id!(GroupId, "Identifies a process group.");
dense_id!(PartitioningId, "Identifies a partitioning bound to a space/group.");
dense_id!(DataId, "Identifies a data container.");

/// Monotonic id allocator shared by an instance's arenas.
#[derive(Debug, Default)]
pub(crate) struct IdCounter(u64);

impl IdCounter {
    pub(crate) fn next(&mut self) -> u64 {
        let v = self.0;
        self.0 += 1;
        v
    }
}
