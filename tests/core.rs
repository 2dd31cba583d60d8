//! End-to-end scenarios exercised against the public API, one per
//! documented behavior: a block-partitioned sum reduction to a master
//! task, a depth-1 halo exchange, all-reduce collapse in the action
//! optimizer, an elastic shrink-and-migrate, a tagged single-index freeze,
//! and allocation-free reservation.

use laik::action::{self, BufferId};
use laik::dataflow::{DataFlow, ReduceOp};
use laik::group::ProcessGroup;
use laik::index::{Index, Range};
use laik::mapping::MappingList;
use laik::partitioner::{block, halo, master};
use laik::partitioning::Partitioning;
use laik::rangelist::RangeList;
use laik::testing::simulate_group_switch;
use laik::transition::calc_transition;

fn space1(n: i64) -> Range {
    Range::new(1, Index::new1(0), Index::new1(n))
}

fn filled_mappings(part: &Partitioning, group_size: u32, value_per_index: impl Fn(i64) -> i32) -> Vec<MappingList<i32>> {
    (0..group_size)
        .map(|tid| {
            let mut ml = MappingList::build(part.ranges_for(tid), None);
            for m in ml.mappings_mut() {
                laik::layout::for_each_index(&m.range(), |idx| {
                    let off = m.layout().offset(&idx) as usize;
                    m.as_mut_slice()[off] = value_per_index(idx.get(0));
                });
            }
            ml
        })
        .collect()
}

#[test]
fn block_partition_sum_reduces_to_master() {
    let group = ProcessGroup::world(4);
    let sp = space1(100);
    let from = Partitioning::new(sp, group.clone(), &block(None), None);
    let to = Partitioning::new(sp, group, &master(), None);

    let old = filled_mappings(&from, 4, |_| 1);
    let new = simulate_group_switch(
        Some((&from, DataFlow::COPY_OUT)),
        (&to, DataFlow::REDUCE_OUT.with_op(ReduceOp::Sum)),
        &old,
    );

    // each index is owned by exactly one block task, so its "reduction" is
    // just that one contribution; verify every one of them landed at master.
    let master_mapping = &new[0];
    let mut total = 0i64;
    for m in master_mapping.mappings() {
        laik::layout::for_each_index(&m.range(), |idx| {
            total += m.as_slice()[m.layout().offset(&idx) as usize] as i64;
        });
    }
    assert_eq!(total, 100);
}

#[test]
fn all_reduce_sums_every_rank_contribution() {
    let group = ProcessGroup::world(4);
    let sp = space1(16);
    let from = Partitioning::new(sp, group.clone(), &laik::partitioner::all(), None);
    let to = Partitioning::new(sp, group, &master(), None);

    let old = filled_mappings(&from, 4, |_| 1);
    let new = simulate_group_switch(
        Some((&from, DataFlow::COPY_OUT)),
        (&to, DataFlow::REDUCE_OUT.with_op(ReduceOp::Sum)),
        &old,
    );

    for i in 0..16 {
        let idx = Index::new1(i);
        let val = new[0]
            .mappings()
            .iter()
            .find(|m| m.range().contains_index(&idx))
            .map(|m| m.as_slice()[m.layout().offset(&idx) as usize])
            .unwrap();
        assert_eq!(val, 4, "index {i} should have summed all 4 ranks' contribution of 1");
    }
}

#[test]
fn all_reduce_action_collapses_to_group_reduce() {
    let group = ProcessGroup::world(4);
    let sp = space1(16);
    let from = Partitioning::new(sp, group.clone(), &laik::partitioner::all(), None);
    let to = Partitioning::new(sp, group, &laik::partitioner::all(), None);

    let t = calc_transition(
        Some((&from, DataFlow::COPY_OUT)),
        (&to, DataFlow::REDUCE_OUT.with_op(ReduceOp::Sum)),
        Some(0),
    );
    let seq = action::optimize(action::compile(&t, BufferId(0)), 0);
    assert!(
        seq.actions().iter().any(|a| matches!(a, action::Action::GroupReduce { .. })),
        "all-reduce transition should collapse into a single GroupReduce action"
    );
}

#[test]
fn halo_depth_one_extends_each_rank_by_its_neighbor_slice() {
    let group = ProcessGroup::world(3);
    let sp = space1(9);
    let haloed = Partitioning::new(sp, group, &halo(1, block(None)), None);

    // block(None) over [0,9) with 3 ranks gives [0,3), [3,6), [6,9); a
    // depth-1 halo extends each by its neighbor slice and `freeze` merges
    // the owned core with its adjoining strips (same tag, same tid) into
    // one contiguous range per rank: [0,4), [2,7), [5,9).
    let union = |tid: u32| -> Vec<(i64, i64)> {
        let mut rs: Vec<(i64, i64)> =
            haloed.ranges_for(tid).iter().map(|r| (r.range.from.get(0), r.range.to.get(0))).collect();
        rs.sort_unstable();
        rs
    };

    assert_eq!(union(0), vec![(0, 4)]);
    assert_eq!(union(1), vec![(2, 7)]);
    assert_eq!(union(2), vec![(5, 9)]);
}

#[test]
fn shrink_and_migrate_drops_one_rank() {
    let group = ProcessGroup::world(4);
    let sp = space1(40);
    // master owns everything, so migrating after a shrink never orphans data.
    let part = Partitioning::new(sp, group.clone(), &master(), None);
    let shrunk = group.shrink(|t| t != 2);
    let migrated = part.migrate(shrunk);
    assert_eq!(migrated.group().size(), 3);
    assert_eq!(migrated.ranges_for(0)[0].range.size(), 40);
}

#[test]
fn tagged_single_index_freeze_groups_by_map_number() {
    let mut rl = RangeList::new();
    rl.append(0, Range::new(1, Index::new1(0), Index::new1(1)), 0);
    rl.append(0, Range::new(1, Index::new1(1), Index::new1(2)), 0);
    rl.append(0, Range::new(1, Index::new1(5), Index::new1(6)), 9);
    rl.append(0, Range::new(1, Index::new1(6), Index::new1(7)), 9);
    rl.freeze(1);

    let ranges = rl.ranges_for(0);
    // two ungrouped singletons each get their own mapNo; the two adjacent
    // tag-9 ranges share one and merge into a single frozen entry.
    assert_eq!(ranges.len(), 3);
    assert_ne!(ranges[0].map_no, ranges[1].map_no);
    assert_eq!(ranges[2].range, Range::new(1, Index::new1(5), Index::new1(7)));
    assert_eq!(rl.map_count(0), 3);
}

#[test]
fn reservation_avoids_allocation_on_switch() {
    use laik::testing::LocalBackend;
    use laik::Data;

    let group = ProcessGroup::world(1);
    let sp = space1(20);
    let part = Partitioning::new(sp, group, &master(), None);

    let mut data = Data::<i32>::new(0);
    data.reserve(part.clone(), DataFlow::INIT);

    let mut backend = LocalBackend::new(1, 0);
    data.switch(&mut backend, part, DataFlow::INIT).unwrap();
    assert_eq!(data.mappings().mappings()[0].as_slice().len(), 20);
}
