//! Process groups.
//!
//! A [`ProcessGroup`] is an immutable, ordered set of task ids. Groups form a
//! tree: every group except the world group has a parent, plus a pair of
//! index tables (`to_parent`/`from_parent`) mapping this group's local task
//! ids to and from the parent's. Shrinking or cloning a group never mutates
//! an existing one — it always produces a new `ProcessGroup` linked to the
//! one it was derived from, mirroring `laik_clone_group` /
//! `laik_new_shrinked_group`.

use std::sync::Arc;

/// A task id local to some [`ProcessGroup`]. Not comparable across groups —
/// use `to_parent`/`from_parent` to translate.
pub type Tid = u32;

#[derive(Debug)]
struct GroupInner {
    /// Number of tasks in this group.
    size: u32,
    /// This group's tid -> parent's tid, or `None` at the root.
    to_parent: Option<Vec<Tid>>,
    /// Parent's tid -> this group's tid, or `-1`-equivalent (`None` entry)
    /// when the parent task isn't part of this group.
    from_parent: Option<Vec<Option<Tid>>>,
    parent: Option<ProcessGroup>,
}

/// Cheaply cloneable handle to an immutable process group.
#[derive(Debug, Clone)]
pub struct ProcessGroup(Arc<GroupInner>);

impl ProcessGroup {
    /// The root group of `size` tasks, with no parent.
    pub fn world(size: u32) -> Self {
        ProcessGroup(Arc::new(GroupInner {
            size,
            to_parent: None,
            from_parent: None,
            parent: None,
        }))
    }

    pub fn size(&self) -> u32 {
        self.0.size
    }

    pub fn parent(&self) -> Option<&ProcessGroup> {
        self.0.parent.as_ref()
    }

    /// Translates a local tid to the parent group's tid. `None` at the root.
    pub fn to_parent(&self, tid: Tid) -> Option<Tid> {
        self.0.to_parent.as_ref().map(|t| t[tid as usize])
    }

    /// Translates a parent tid into this group's local tid, if that task is
    /// still a member. `None` at the root.
    pub fn from_parent(&self, parent_tid: Tid) -> Option<Tid> {
        self.0
            .from_parent
            .as_ref()
            .and_then(|t| t.get(parent_tid as usize).copied().flatten())
    }

    /// Translates a local tid all the way up to the world group's tid.
    pub fn to_world(&self, mut tid: Tid) -> Tid {
        let mut g = self;
        while let Some(parent_tid) = g.to_parent(tid) {
            tid = parent_tid;
            g = g.parent().unwrap();
        }
        tid
    }

    /// Clones this group verbatim, producing a new handle with the same
    /// membership but linked as a child of `self` (identity tables). Used
    /// when a partitioning needs its own stable group snapshot.
    pub fn clone_group(&self) -> Self {
        let size = self.size();
        let ident: Vec<Tid> = (0..size).collect();
        ProcessGroup(Arc::new(GroupInner {
            size,
            to_parent: Some(ident.clone()),
            from_parent: Some(ident.into_iter().map(Some).collect()),
            parent: Some(self.clone()),
        }))
    }

    /// Builds the sub-group of tasks for which `keep(tid)` is true, in
    /// ascending tid order. Two-pass mark-then-compact, matching
    /// `laik_new_shrinked_group`.
    pub fn shrink<F: Fn(Tid) -> bool>(&self, keep: F) -> Self {
        let old_size = self.size();
        let mut to_parent = Vec::new();
        let mut from_parent = vec![None; old_size as usize];
        for old_tid in 0..old_size {
            if keep(old_tid) {
                let new_tid = to_parent.len() as Tid;
                to_parent.push(old_tid);
                from_parent[old_tid as usize] = Some(new_tid);
            }
        }
        ProcessGroup(Arc::new(GroupInner {
            size: to_parent.len() as u32,
            to_parent: Some(to_parent),
            from_parent: Some(from_parent),
            parent: Some(self.clone()),
        }))
    }

    /// True if the two handles refer to the same underlying group (same
    /// membership and lineage), not merely equal size.
    pub fn is_same(&self, other: &ProcessGroup) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
