//! Data containers.
//!
//! A [`Data`] binds an element type to whichever `(Partitioning, DataFlow)`
//! is currently active, and knows how to move to a new one: compute the
//! transition, reuse mappings where possible, compile+optimize the leftover
//! work into an action sequence, hand it to a [`crate::backend::Backend`],
//! then run the purely-local copies/inits itself. Grounded on `data.c`'s
//! `laik_switchto`/`doTransition`/`prepareMaps` pipeline.

use anyhow::{Context, Result};

use crate::action::{self, BufferId};
use crate::backend::Backend;
use crate::dataflow::{DataFlow, ReduceElem};
use crate::mapping::MappingList;
use crate::partitioning::Partitioning;
use crate::transition::{self, Transition};

/// A container of `T` elements, always active under exactly one
/// `(Partitioning, DataFlow)` pair.
pub struct Data<T: ReduceElem> {
    name: Option<String>,
    my_tid: u32,
    active: Option<(Partitioning, DataFlow)>,
    mappings: MappingList<T>,
    /// Extra (partitioning, flow) pairs pre-allocated by [`reserve`](Self::reserve)
    /// so a later `switch` to one of them does no allocation.
    reserved: Vec<(Partitioning, DataFlow, MappingList<T>)>,
}

impl<T: ReduceElem> Data<T> {
    pub fn new(my_tid: u32) -> Self {
        Data { name: None, my_tid, active: None, mappings: MappingList::empty(), reserved: Vec::new() }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn active(&self) -> Option<&(Partitioning, DataFlow)> {
        self.active.as_ref()
    }

    pub fn mappings(&self) -> &MappingList<T> {
        &self.mappings
    }

    pub fn mappings_mut(&mut self) -> &mut MappingList<T> {
        &mut self.mappings
    }

    /// Moves to `(to, to_flow)`, running the full switch protocol: compute
    /// the transition from whatever's currently active, build the new
    /// mapping list (reusing old buffers where the new ranges fit inside an
    /// old one), compile+optimize the leftover non-local work into an
    /// action sequence, execute it through `backend`, then perform the
    /// purely-local copies/inits in place.
    pub fn switch(&mut self, backend: &mut dyn Backend, to: Partitioning, to_flow: DataFlow) -> Result<()> {
        // A previously reserved (to, to_flow) can be adopted without
        // recomputation of its mapping list.
        if let Some(pos) = self
            .reserved
            .iter()
            .position(|(p, f, _)| p.space() == to.space() && p.group().is_same(to.group()) && *f == to_flow)
        {
            let (p, f, ml) = self.reserved.remove(pos);
            self.apply_switch(backend, p, f, Some(ml))?;
            return Ok(());
        }
        self.apply_switch(backend, to, to_flow, None)
    }

    fn apply_switch(
        &mut self,
        backend: &mut dyn Backend,
        to: Partitioning,
        to_flow: DataFlow,
        preallocated: Option<MappingList<T>>,
    ) -> Result<()> {
        let from = self.active.take();
        let transition = calc_transition_for(from.as_ref(), (&to, to_flow), self.my_tid);

        // Snapshot every `local` op's values before the old mappings are
        // possibly consumed by reuse/reallocation below — a `LocalOp`'s old
        // and new ranges only coincide with the *same* buffer when
        // mapping reuse kicks in; otherwise this is the only copy of that
        // data, so it must be read out before `MappingList::build` runs.
        let local_snapshots: Vec<(crate::index::Range, Vec<T>)> = transition
            .local
            .iter()
            .map(|op| (op.range, read_range(&self.mappings, &op.range)))
            .collect();

        let old_mappings = std::mem::replace(&mut self.mappings, MappingList::empty());
        let mut new_mappings =
            preallocated.unwrap_or_else(|| MappingList::build(to.ranges_for(self.my_tid), Some(old_mappings)));

        for (range, values) in &local_snapshots {
            write_range(&mut new_mappings, range, values);
        }

        if !transition.is_empty() {
            let seq = action::optimize(action::compile(&transition, BufferId(0)), self.my_tid);
            backend
                .exec(&seq, &transition)
                .context("backend failed to execute action sequence")?;
            // `send`/`recv`/`reduce` require an actual transport to move
            // bytes between processes — `backend.exec` above is that
            // transport's hook. A real `Backend` impl is expected to write
            // received/reduced values directly into this data's mapping
            // buffers via the same offsets `action::compile` addressed;
            // `testing::simulate_group_switch` is the in-process reference
            // implementation of that contract, used by this crate's own
            // multi-rank tests in place of a real transport.
            apply_init(&transition, &mut new_mappings);
        }

        self.mappings = new_mappings;
        self.active = Some((to, to_flow));
        Ok(())
    }

    /// Pre-allocates mappings for `to`/`to_flow` without activating them,
    /// so a future `switch` to the same pair is allocation-free. Does not
    /// run any transition or touch the backend.
    pub fn reserve(&mut self, to: Partitioning, to_flow: DataFlow) {
        let ml = MappingList::build(to.ranges_for(self.my_tid), None);
        self.reserved.push((to, to_flow, ml));
    }

    /// Re-expresses the currently active partitioning under `new_group`.
    /// Only legal when the active flow doesn't require `CopyOut` (nothing
    /// in this process's old buffers needs to survive the membership
    /// change verbatim); callers that need the data preserved must switch
    /// to a `Reassign`-based partitioning on the old group first.
    pub fn migrate(&mut self, new_group: crate::group::ProcessGroup) {
        let (part, flow) = self.active.as_ref().expect("migrate: no active partitioning");
        assert!(
            !flow.contains(DataFlow::COPY_OUT),
            "migrate: active flow requires CopyOut, data would be silently dropped"
        );
        let migrated = part.migrate(new_group);
        self.active = Some((migrated, *flow));
    }
}

fn calc_transition_for(
    from: Option<&(Partitioning, DataFlow)>,
    to: (&Partitioning, DataFlow),
    my_tid: u32,
) -> Transition {
    transition::calc_transition(from.map(|(p, f)| (p, *f)), to, Some(my_tid))
}

/// Zero/neutral-initializes every `InitOp` range directly in `mappings`.
fn apply_init<T: ReduceElem>(transition: &Transition, mappings: &mut MappingList<T>) {
    for op in &transition.init {
        for m in mappings.mappings_mut() {
            if m.range().intersects(&op.range) {
                if let Some(ov) = m.range().intersect(&op.range) {
                    crate::layout::for_each_index(&ov, |idx| {
                        let off = m.layout().offset(&idx) as usize;
                        m.as_mut_slice()[off] = T::neutral(op.op);
                    });
                }
            }
        }
    }
}

/// Reads every element of `range` out of `mappings`, in lexicographic
/// order, regardless of which mapping(s) it's split across.
fn read_range<T: ReduceElem>(mappings: &MappingList<T>, range: &crate::index::Range) -> Vec<T> {
    let mut out = Vec::with_capacity(range.size() as usize);
    crate::layout::for_each_index(range, |idx| {
        for m in mappings.mappings() {
            if m.range().contains_index(&idx) {
                out.push(m.as_slice()[m.layout().offset(&idx) as usize]);
                return;
            }
        }
        panic!("read_range: index {idx} not covered by any mapping");
    });
    out
}

/// Writes `values` (in the same lexicographic order `read_range` produced
/// them) back into `mappings` over `range`.
fn write_range<T: ReduceElem>(mappings: &mut MappingList<T>, range: &crate::index::Range, values: &[T]) {
    let mut it = values.iter();
    crate::layout::for_each_index(range, |idx| {
        let v = *it.next().expect("write_range: fewer values than indexes in range");
        for m in mappings.mappings_mut() {
            if m.range().contains_index(&idx) {
                let off = m.layout().offset(&idx) as usize;
                m.as_mut_slice()[off] = v;
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::ProcessGroup;
    use crate::index::{Index, Range};
    use crate::partitioner::master;
    use crate::testing::LocalBackend;

    fn space() -> Range {
        Range::new(1, Index::new1(0), Index::new1(10))
    }

    #[test]
    fn switch_from_none_initializes_new_ranges() {
        let g = ProcessGroup::world(1);
        let to = Partitioning::new(space(), g, &master(), None);
        let mut data = Data::<i32>::new(0);
        let mut backend = LocalBackend::new(1, 0);
        data.switch(&mut backend, to, DataFlow::INIT).unwrap();
        assert_eq!(data.mappings().mappings()[0].as_slice().len(), 10);
    }
}
