//! Transition calculation.
//!
//! [`calc_transition`] is a pure function: given a `from`/`to` partitioning
//! pair (each with its own [`DataFlow`]) and the tid this process owns, it
//! computes exactly what that one process must do — which of its own old
//! ranges survive unchanged (`local`), which new ranges need zero-init
//! (`init`), which ranges must be sent to / received from which remote tid
//! (`send`/`recv`), and which overlapping old ranges must be combined via a
//! reduction before they can be used as the new value (`reduce`).
//!
//! Grounded on `laik_calc_transition`'s iterate-own-ranges-times-remote-ranges
//! double loop, refined per the newer input-group/output-group reduction
//! model: a reduce step names the *set* of tids contributing input and the
//! *set* of tids that should end up with the result, rather than assuming
//! every remote contributor also wants the output.

use crate::dataflow::{DataFlow, ReduceOp};
use crate::group::Tid;
use crate::index::Range;
use crate::partitioning::Partitioning;
use crate::rangelist::FrozenRange;

/// One local range that doesn't change under the transition — no copy
/// needed, just keep using it.
#[derive(Debug, Clone, Copy)]
pub struct LocalOp {
    pub range: Range,
}

/// A new range that must be zero/neutral-initialized because no old range
/// covers it (or it's only covered by `Init`-flagged ranges).
#[derive(Debug, Clone, Copy)]
pub struct InitOp {
    pub range: Range,
    pub op: ReduceOp,
}

/// Send the overlap of `my_range` and `to_range` to `to_tid`.
#[derive(Debug, Clone, Copy)]
pub struct SendOp {
    pub range: Range,
    pub to_tid: Tid,
}

/// Receive the overlap of `from_range` and `my_range` from `from_tid`.
#[derive(Debug, Clone, Copy)]
pub struct RecvOp {
    pub range: Range,
    pub from_tid: Tid,
}

/// Combine contributions from `input_tids` over `range` via `op`, with the
/// result needed by every tid in `output_tids`. When this process is both an
/// input and output tid the reduce is local; otherwise it participates only
/// as a contributor or only as a consumer.
#[derive(Debug, Clone)]
pub struct ReduceStep {
    pub range: Range,
    pub op: ReduceOp,
    pub input_tids: Vec<Tid>,
    pub output_tids: Vec<Tid>,
}

#[derive(Debug, Clone, Default)]
pub struct Transition {
    pub local: Vec<LocalOp>,
    pub init: Vec<InitOp>,
    pub send: Vec<SendOp>,
    pub recv: Vec<RecvOp>,
    pub reduce: Vec<ReduceStep>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
            && self.init.is_empty()
            && self.send.is_empty()
            && self.recv.is_empty()
            && self.reduce.is_empty()
    }
}

/// Computes the transition for `my_tid` (a tid in `to.group()`, or in
/// `from.group()` when `from` still owns ranges this process must send
/// away even though it's leaving the group — see elastic resize).
/// `my_tid` is `None` when this process isn't a member of either
/// partitioning's group (the spec's `-1`) and the transition is empty.
///
/// Preconditions are checked as hard invariants and panic on violation:
/// `to_flow` requesting `CopyIn` requires a `from` whose flow has `CopyOut`
/// or `ReduceOut` to source it from, and `to_flow` requesting `ReduceOut`
/// requires a `from` whose flow has `CopyOut` to reduce over.
pub fn calc_transition(
    from: Option<(&Partitioning, DataFlow)>,
    to: (&Partitioning, DataFlow),
    my_tid: Option<Tid>,
) -> Transition {
    let (to_part, to_flow) = to;

    if let Some((from_part, from_flow)) = from {
        assert_eq!(
            from_part.space(),
            to_part.space(),
            "calc_transition: from/to partitionings must share the same space"
        );
        if to_flow.contains(DataFlow::COPY_IN) {
            assert!(
                from_flow.contains(DataFlow::COPY_OUT) || from_flow.contains(DataFlow::REDUCE_OUT),
                "calc_transition: to_flow requests CopyIn but from_flow has neither CopyOut nor ReduceOut"
            );
        }
        if to_flow.contains(DataFlow::REDUCE_OUT) {
            assert!(
                from_flow.contains(DataFlow::COPY_OUT),
                "calc_transition: to_flow requests ReduceOut but from_flow lacks CopyOut to reduce from"
            );
        }
    }

    let Some(my_tid) = my_tid else {
        return Transition::default();
    };

    let mut t = Transition::default();

    let my_to_ranges: Vec<FrozenRange> = to_part.ranges_for(my_tid).to_vec();

    let Some((from_part, from_flow)) = from else {
        // No previous assignment: every new range needs init (if requested)
        // or is simply uninitialized memory the caller must fill itself.
        for r in &my_to_ranges {
            if to_flow.contains(DataFlow::INIT) {
                t.init.push(InitOp { range: r.range, op: to_flow.op() });
            }
        }
        return t;
    };

    if to_flow.contains(DataFlow::REDUCE_OUT) {
        // Every new range is the result of reducing old contributions that
        // overlap it, but the set of contributors isn't uniform across the
        // whole range whenever sources are disjoint (e.g. reducing a
        // Block-distributed source into a Master target): each sub-piece of
        // `r` only has the one or few source tids that actually cover it as
        // input. Split `r` into maximal sub-rectangles with a constant
        // contributor set before emitting a reduce step for each.
        for r in &my_to_ranges {
            let mut output_tids: Vec<Tid> = to_part
                .ranges()
                .all_ranges()
                .iter()
                .filter(|ofr| ofr.range.intersects(&r.range))
                .map(|ofr| ofr.tid)
                .collect();
            output_tids.sort_unstable();
            output_tids.dedup();

            for (sub_range, mut input_tids) in split_by_contributor(r.range, from_part.ranges().all_ranges()) {
                input_tids.sort_unstable();
                input_tids.dedup();
                if input_tids.is_empty() {
                    continue;
                }
                t.reduce.push(ReduceStep {
                    range: sub_range,
                    op: to_flow.op(),
                    input_tids,
                    output_tids: output_tids.clone(),
                });
            }
        }
        return t;
    }

    // Non-reduce path: for each of my new ranges, find what covers it.
    for r in &my_to_ranges {
        let mut remaining = vec![r.range];
        // My own old ranges first: pure local copy, no network traffic.
        if from_flow.contains(DataFlow::COPY_OUT) {
            let my_old = from_part.ranges_for(my_tid).to_vec();
            remaining = subtract_covered(remaining, my_old.iter().map(|f| f.range));
            for ofr in &my_old {
                if let Some(ov) = ofr.range.intersect(&r.range) {
                    t.local.push(LocalOp { range: ov });
                }
            }
        }
        // Then remote old ranges: need a recv.
        if from_flow.contains(DataFlow::COPY_OUT) {
            for ofr in from_part.ranges().all_ranges() {
                if ofr.tid == my_tid {
                    continue;
                }
                if let Some(ov) = ofr.range.intersect(&r.range) {
                    t.recv.push(RecvOp { range: ov, from_tid: ofr.tid });
                    remaining = subtract_covered(remaining, std::iter::once(ov));
                }
            }
        }
        // Anything left over is genuinely new: init if requested.
        if to_flow.contains(DataFlow::INIT) {
            for rem in remaining {
                t.init.push(InitOp { range: rem, op: to_flow.op() });
            }
        }
    }

    // Sends: for each of my old ranges, find new ranges elsewhere that need it.
    if from_flow.contains(DataFlow::COPY_OUT) {
        for ofr in from_part.ranges_for(my_tid) {
            for nfr in to_part.ranges().all_ranges() {
                if nfr.tid == my_tid {
                    continue;
                }
                if let Some(ov) = ofr.range.intersect(&nfr.range) {
                    t.send.push(SendOp { range: ov, to_tid: nfr.tid });
                }
            }
        }
    }

    t
}

/// Subtracts every range in `covered` from every range in `pieces`,
/// returning the leftover pieces (possibly split, never merged back).
/// Simple O(n*m) rectangle difference sufficient for the small range counts
/// transitions deal with per call.
fn subtract_covered(pieces: Vec<Range>, covered: impl Iterator<Item = Range> + Clone) -> Vec<Range> {
    let mut result = pieces;
    for cov in covered {
        let mut next = Vec::new();
        for p in result {
            match p.intersect(&cov) {
                None => next.push(p),
                Some(ov) => next.extend(rect_difference(p, ov)),
            }
        }
        result = next;
    }
    result
}

/// Splits `r` into maximal sub-rectangles that each have a fixed set of
/// contributing tids (every `source` range whose own range covers that
/// sub-rectangle). Pieces with no contributor at all are included with an
/// empty tid list so callers can filter them out explicitly.
fn split_by_contributor(r: Range, source: &[FrozenRange]) -> Vec<(Range, Vec<Tid>)> {
    let mut cells: Vec<(Range, Vec<Tid>)> = vec![(r, Vec::new())];
    for ofr in source {
        let mut next = Vec::with_capacity(cells.len());
        for (cell_range, tids) in cells {
            match cell_range.intersect(&ofr.range) {
                None => next.push((cell_range, tids)),
                Some(ov) => {
                    let mut with_tid = tids.clone();
                    with_tid.push(ofr.tid);
                    next.push((ov, with_tid));
                    for rem in rect_difference(cell_range, ov) {
                        next.push((rem, tids.clone()));
                    }
                }
            }
        }
        cells = next;
    }
    cells
}

/// `p` minus `ov` (where `ov ⊆ p`), expressed as up to `2*dims` disjoint
/// slabs — a standard hyper-rectangle difference.
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
    use crate::group::ProcessGroup;
    use crate::index::Index;
    use crate::partitioner::{all, block, master};

    fn space() -> Range {
        Range::new(1, Index::new1(0), Index::new1(40))
    }

    #[test]
    fn fresh_data_inits_everything() {
        let g = ProcessGroup::world(4);
        let to = Partitioning::new(space(), g, &block(None), None);
        let t = calc_transition(None, (&to, DataFlow::INIT), Some(0));
        assert!(!t.init.is_empty());
        assert!(t.send.is_empty() && t.recv.is_empty());
    }

    #[test]
    fn block_to_master_generates_recv_for_master() {
        let g = ProcessGroup::world(4);
        let from = Partitioning::new(space(), g.clone(), &block(None), None);
        let to = Partitioning::new(space(), g, &master(), None);
        let t = calc_transition(
            Some((&from, DataFlow::COPY_OUT)),
            (&to, DataFlow::COPY_IN),
            Some(0),
        );
        // master (tid0) keeps its own old slice locally and receives the rest.
        assert!(!t.local.is_empty());
        assert!(!t.recv.is_empty());
    }

    #[test]
    fn block_to_master_generates_send_for_others() {
        let g = ProcessGroup::world(4);
        let from = Partitioning::new(space(), g.clone(), &block(None), None);
        let to = Partitioning::new(space(), g, &master(), None);
        let t = calc_transition(
            Some((&from, DataFlow::COPY_OUT)),
            (&to, DataFlow::COPY_IN),
            Some(2),
        );
        assert!(!t.send.is_empty());
        assert!(t.local.is_empty());
        assert!(t.recv.is_empty());
    }

    #[test]
    fn block_reduce_to_master_splits_by_contributing_tid() {
        let g = ProcessGroup::world(4);
        let from = Partitioning::new(space(), g.clone(), &block(None), None);
        let to = Partitioning::new(space(), g, &master(), None);
        let t = calc_transition(
            Some((&from, DataFlow::COPY_OUT)),
            (&to, DataFlow::REDUCE_OUT.with_op(ReduceOp::Sum)),
            Some(0),
        );
        // block ranges are disjoint, so every reduce step should have
        // exactly one contributor and together they must cover the space.
        assert!(t.reduce.iter().all(|s| s.input_tids.len() == 1));
        let total: u64 = t.reduce.iter().map(|s| s.range.size()).sum();
        assert_eq!(total, space().size());
    }

    #[test]
    fn all_reduce_to_master_produces_reduce_op() {
        let g = ProcessGroup::world(4);
        let from = Partitioning::new(space(), g.clone(), &all(), None);
        let to = Partitioning::new(space(), g, &master(), None);
        let t = calc_transition(
            Some((&from, DataFlow::COPY_OUT)),
            (&to, DataFlow::REDUCE_OUT.with_op(ReduceOp::Sum)),
            Some(0),
        );
        assert_eq!(t.reduce.len(), 1);
        assert_eq!(t.reduce[0].input_tids.len(), 4);
        assert_eq!(t.reduce[0].output_tids, vec![0]);
        assert_eq!(t.reduce[0].op, ReduceOp::Sum);
    }

    #[test]
    fn reduce_op_other_than_sum_is_threaded_through() {
        let g = ProcessGroup::world(4);
        let from = Partitioning::new(space(), g.clone(), &block(None), None);
        let to = Partitioning::new(space(), g, &master(), None);
        let t = calc_transition(
            Some((&from, DataFlow::COPY_OUT)),
            (&to, DataFlow::REDUCE_OUT.with_op(ReduceOp::Max)),
            Some(0),
        );
        assert!(t.reduce.iter().all(|s| s.op == ReduceOp::Max));
    }

    #[test]
    fn not_a_member_yields_empty_transition() {
        let g = ProcessGroup::world(4);
        let to = Partitioning::new(space(), g, &block(None), None);
        let t = calc_transition(None, (&to, DataFlow::INIT), None);
        assert!(t.is_empty());
    }

    #[test]
    #[should_panic(expected = "CopyIn")]
    fn copy_in_without_source_flow_panics() {
        let g = ProcessGroup::world(4);
        let from = Partitioning::new(space(), g.clone(), &block(None), None);
        let to = Partitioning::new(space(), g, &master(), None);
        calc_transition(Some((&from, DataFlow::INIT)), (&to, DataFlow::COPY_IN), Some(0));
    }
}
