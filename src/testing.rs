//! In-process test harness.
//!
//! [`LocalBackend`] is a trivial [`Backend`] impl usable wherever code only
//! needs *a* backend to compile against (it accepts any action sequence and
//! does nothing with it). The actual cross-rank data movement tests need —
//! every tid's mapping actually receiving the bytes another tid sent, every
//! reduce actually combining every contributor's value — is done by
//! [`simulate_group_switch`], which plays a whole group's worth of
//! transitions against each other directly. Real backends don't get this
//! luxury (each process only sees its own mappings), but a same-process
//! simulator can, and it exists to give tests and this crate's own examples
//! a cheap collective "just works" fixture, the same role the teacher's
//! `testing/mock_io.rs` stand-in collaborator played there.

use anyhow::Result;

use crate::action::ActionSequence;
use crate::backend::Backend;
use crate::dataflow::{DataFlow, ReduceElem};
use crate::group::{ProcessGroup, Tid};
use crate::layout::for_each_index;
use crate::mapping::MappingList;
use crate::partitioning::Partitioning;
use crate::transition::{self, Transition};

/// A `Backend` that accepts everything and moves nothing. Good enough for
/// `Data::switch` calls whose interesting behavior is the local init/copy
/// path exercised by a single rank.
pub struct LocalBackend {
    group: ProcessGroup,
    my_tid: Tid,
    pub last_sequence: Option<ActionSequence>,
}

impl LocalBackend {
    pub fn new(group_size: u32, my_tid: Tid) -> Self {
        LocalBackend { group: ProcessGroup::world(group_size), my_tid, last_sequence: None }
    }

    pub fn my_tid(&self) -> Tid {
        self.my_tid
    }
}

impl Backend for LocalBackend {
    fn exec(&mut self, seq: &ActionSequence, _transition: &Transition) -> Result<()> {
        self.last_sequence = Some(seq.clone());
        Ok(())
    }

    fn sync(&mut self, _group: &ProcessGroup) -> Result<()> {
        Ok(())
    }

    fn resize(&mut self) -> Result<ProcessGroup> {
        Ok(self.group.clone())
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Computes, for every tid in `to.0.group()`, the transition from `from` to
/// `to`, then actually performs it: local copies stay in place, sends
/// become direct reads out of the sender's old mapping, receives become
/// direct writes into the receiver's new mapping, and reduces fold every
/// contributor's value into every consumer's mapping. Returns one fresh
/// [`MappingList`] per tid, in tid order.
///
/// This is the reference semantics every real backend's action execution
/// must reproduce; it's also what the crate's own integration tests drive
/// to check a scenario end-to-end without standing up a transport.
pub fn simulate_group_switch<T: ReduceElem>(
    from: Option<(&Partitioning, DataFlow)>,
    to: (&Partitioning, DataFlow),
    old_mappings: &[MappingList<T>],
) -> Vec<MappingList<T>> {
    let (to_part, to_flow) = to;
    let group_size = to_part.group().size();

    let mut new_mappings: Vec<MappingList<T>> =
        (0..group_size).map(|tid| MappingList::build(to_part.ranges_for(tid), None)).collect();

    for tid in 0..group_size {
        let t = transition::calc_transition(from, (to_part, to_flow), Some(tid));
        apply_transition_for_tid(&t, tid, old_mappings, &mut new_mappings);
    }

    new_mappings
}

fn apply_transition_for_tid<T: ReduceElem>(
    t: &Transition,
    my_tid: Tid,
    old_mappings: &[MappingList<T>],
    new_mappings: &mut [MappingList<T>],
) {
    for op in &t.init {
        write_range(&mut new_mappings[my_tid as usize], &op.range, |_| T::neutral(op.op));
    }
    for op in &t.local {
        let val_at = |idx: &crate::index::Index| read_range(&old_mappings[my_tid as usize], idx);
        write_range_indexed(&mut new_mappings[my_tid as usize], &op.range, val_at);
    }
    for op in &t.recv {
        let from_tid = op.from_tid;
        let val_at = |idx: &crate::index::Index| read_range(&old_mappings[from_tid as usize], idx);
        write_range_indexed(&mut new_mappings[my_tid as usize], &op.range, val_at);
    }
    for op in &t.reduce {
        for &out_tid in &op.output_tids {
            write_range_indexed(&mut new_mappings[out_tid as usize], &op.range, |idx| {
                let values = op.input_tids.iter().map(|&in_tid| read_range(&old_mappings[in_tid as usize], idx));
                crate::dataflow::reduce_fold(op.op, values)
            });
        }
    }
}

fn read_range<T: ReduceElem>(mappings: &MappingList<T>, idx: &crate::index::Index) -> T {
    for m in mappings.mappings() {
        if m.range().contains_index(idx) {
            let off = m.layout().offset(idx) as usize;
            return m.as_slice()[off];
        }
    }
    panic!("read_range: index {idx} not covered by any mapping");
}

fn write_range<T: ReduceElem>(mappings: &mut MappingList<T>, range: &crate::index::Range, mut f: impl FnMut(&crate::index::Index) -> T) {
    write_range_indexed(mappings, range, |idx| f(idx));
}

fn write_range_indexed<T: ReduceElem>(
    mappings: &mut MappingList<T>,
    range: &crate::index::Range,
    f: impl Fn(&crate::index::Index) -> T,
) {
    for m in mappings.mappings_mut() {
        if m.range().intersects(range) {
            let r = m.range();
            if let Some(ov) = r.intersect(range) {
                for_each_index(&ov, |idx| {
                    let off = m.layout().offset(&idx) as usize;
                    m.as_mut_slice()[off] = f(&idx);
                });
            }
        }
    }
}

/// Asserts every index in `space` appears in exactly one tid's mapping
/// within `partitioning` — a convenience wrapper around
/// `Partitioning::is_exact_cover` with a readable panic message.
pub fn assert_exact_cover(partitioning: &Partitioning) {
    assert!(
        partitioning.is_exact_cover(),
        "partitioner {:?} did not exactly cover {:?}",
        partitioning.partitioner_name(),
        partitioning.space()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Index, Range};
    use crate::partitioner::{all, block, master};

    fn space() -> Range {
        Range::new(1, Index::new1(0), Index::new1(8))
    }

    #[test]
    fn block_to_master_moves_every_value() {
        let g = ProcessGroup::world(4);
        let from = Partitioning::new(space(), g.clone(), &block(None), None);
        let to = Partitioning::new(space(), g, &master(), None);

        let old: Vec<MappingList<i32>> = (0..4)
            .map(|tid| {
                let mut ml = MappingList::build(from.ranges_for(tid), None);
                for m in ml.mappings_mut() {
                    for_each_index(&m.range(), |idx| {
                        let off = m.layout().offset(&idx) as usize;
                        m.as_mut_slice()[off] = idx.get(0) as i32;
                    });
                }
                ml
            })
            .collect();

        let new = simulate_group_switch(Some((&from, DataFlow::COPY_OUT)), (&to, DataFlow::COPY_IN), &old);
        let master_mapping = &new[0];
        for i in 0..8 {
            let idx = Index::new1(i);
            assert_eq!(read_range(master_mapping, &idx), i as i32);
        }
    }

    #[test]
    fn all_reduce_sums_every_contribution() {
        let g = ProcessGroup::world(4);
        let from = Partitioning::new(space(), g.clone(), &all(), None);
        let to = Partitioning::new(space(), g, &master(), None);

        let old: Vec<MappingList<i32>> = (0..4)
            .map(|tid| {
                let mut ml = MappingList::build(from.ranges_for(tid), None);
                for m in ml.mappings_mut() {
                    for_each_index(&m.range(), |idx| {
                        let off = m.layout().offset(&idx) as usize;
                        m.as_mut_slice()[off] = 1;
                    });
                }
                ml
            })
            .collect();

        let new = simulate_group_switch(
            Some((&from, DataFlow::COPY_OUT)),
            (&to, DataFlow::REDUCE_OUT.with_op(crate::dataflow::ReduceOp::Sum)),
            &old,
        );
        let idx = Index::new1(3);
        assert_eq!(read_range(&new[0], &idx), 4);
    }
}
