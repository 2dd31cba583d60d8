//! Actions and action sequences.
//!
//! A [`Transition`] says *what* has to happen; an [`ActionSequence`] says
//! *how*, as a flat, backend-executable list of [`Action`]s. Compiling one
//! from the other and then running a fixed pipeline of optimization passes
//! over it is structurally the same job the teacher's `planner.rs` does for
//! dataflow nodes (`build_plan`'s ordered chain of `*_tracked` passes) and
//! `node.rs`'s tagged `Node` enum does for operations — here the "nodes" are
//! wire-level actions instead of dataflow stages.

use std::fmt;

use crate::dataflow::ReduceOp;
use crate::group::Tid;
use crate::index::Range;
use crate::transition::Transition;

/// A scratch or mapping buffer an action reads/writes, identified by a
/// dense index the executor resolves against its own buffer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// One wire-level or local-memory step of an action sequence. Every variant
/// corresponds to one opcode a `Backend` must be able to execute.
#[derive(Debug, Clone)]
pub enum Action {
    /// Copy `range` directly out of a mapping into the network layer,
    /// addressed to `to`.
    BufSend { buf: BufferId, range: Range, to: Tid },
    /// Receive `range` directly into a mapping from `from`.
    BufRecv { buf: BufferId, range: Range, from: Tid },
    /// Send the result of a prior local reduce living in `buf`.
    RBufSend { buf: BufferId, range: Range, to: Tid },
    /// Receive into a scratch buffer, later consumed by a reduce.
    Recv { buf: BufferId, range: Range, from: Tid },
    /// Send a whole mapping verbatim (no packing needed: contiguous).
    MapSend { buf: BufferId, to: Tid },
    /// Receive a whole mapping verbatim.
    MapRecv { buf: BufferId, from: Tid },
    /// Pack `range` out of a mapping into a fresh wire buffer, then send.
    PackAndSend { buf: BufferId, range: Range, to: Tid },
    /// Receive a wire buffer, then unpack `range` into a mapping.
    RecvAndUnpack { buf: BufferId, range: Range, from: Tid },
    /// Pack a whole mapping into a wire buffer, then send.
    MapPackAndSend { buf: BufferId, to: Tid },
    /// Receive a wire buffer, then unpack a whole mapping from it.
    MapRecvAndUnpack { buf: BufferId, from: Tid },
    /// In-process copy from one mapping's range into another buffer.
    CopyToBuf { src: BufferId, range: Range, dst: BufferId },
    /// In-process copy from a buffer into a mapping's range.
    CopyFromBuf { src: BufferId, dst: BufferId, range: Range },
    /// Pack a range into a contiguous scratch buffer (no send).
    PackToBuf { src: BufferId, range: Range, dst: BufferId },
    /// Unpack a contiguous scratch buffer into a mapping's range.
    UnpackFromBuf { src: BufferId, dst: BufferId, range: Range },
    /// Collective reduce across `input_tids`, result delivered to
    /// `output_tids`, operating on `range` via `op`.
    Reduce { range: Range, op: ReduceOp, input_tids: Vec<Tid>, output_tids: Vec<Tid> },
    /// Reduce within a subgroup smaller than the full transition (emitted by
    /// the all-reduce-collapse pass when a reduce's input/output groups
    /// match exactly).
    GroupReduce { range: Range, op: ReduceOp, group: Vec<Tid> },
    /// Combine two local buffers in place via `op` (no network traffic).
    RBufLocalReduce { buf: BufferId, other: BufferId, op: ReduceOp },
    /// Copy one scratch buffer's contents into another.
    RBufCopy { src: BufferId, dst: BufferId },
    /// Raw buffer-to-buffer byte copy (used by scratch allocation passes).
    BufCopy { src: BufferId, dst: BufferId },
    /// Zero/neutral-initialize `range` within a mapping for reduction `op`.
    BufInit { buf: BufferId, range: Range, op: ReduceOp },
    /// Reserve `size` elements for scratch buffer `buf` before any action
    /// that reads/writes it runs.
    BufReserve { buf: BufferId, size: u64 },
    /// Does nothing; a placeholder a pass can substitute for a removed
    /// action without renumbering the sequence.
    Nop,
}

impl Action {
    /// The synchronization round this action belongs to, used by the
    /// round-boundary and deadlock-avoidance passes. Sends/recvs/reduces are
    /// collective-ish and get round 1; purely local actions are round 0 so
    /// they can run before any collective starts.
    fn round(&self) -> u32 {
        match self {
            Action::CopyToBuf { .. }
            | Action::CopyFromBuf { .. }
            | Action::PackToBuf { .. }
            | Action::UnpackFromBuf { .. }
            | Action::RBufLocalReduce { .. }
            | Action::RBufCopy { .. }
            | Action::BufCopy { .. }
            | Action::BufInit { .. }
            | Action::BufReserve { .. }
            | Action::Nop => 0,
            _ => 1,
        }
    }

    /// Sort priority within a round: receives before sends before reduces,
    /// so a backend posting non-blocking receives early doesn't stall.
    fn priority(&self) -> u32 {
        match self {
            Action::BufReserve { .. } => 0,
            Action::Recv { .. } | Action::BufRecv { .. } | Action::MapRecv { .. } | Action::RecvAndUnpack { .. } | Action::MapRecvAndUnpack { .. } => 1,
            Action::BufSend { .. } | Action::RBufSend { .. } | Action::MapSend { .. } | Action::PackAndSend { .. } | Action::MapPackAndSend { .. } => 2,
            Action::Reduce { .. } | Action::GroupReduce { .. } | Action::RBufLocalReduce { .. } => 3,
            _ => 0,
        }
    }

    fn is_nop(&self) -> bool {
        matches!(self, Action::Nop)
    }
}

/// Stats computed by the final optimizer pass, surfaced through
/// [`ActionSequence::explain`].
#[derive(Debug, Clone, Default)]
pub struct SequenceStats {
    pub action_count: usize,
    pub send_count: usize,
    pub recv_count: usize,
    pub reduce_count: usize,
    pub local_count: usize,
    pub scratch_buffers: usize,
}

#[derive(Debug, Clone)]
pub struct ActionSequence {
    actions: Vec<Action>,
    stats: SequenceStats,
    next_buf: u32,
}

impl ActionSequence {
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn stats(&self) -> &SequenceStats {
        &self.stats
    }

    fn alloc_buf(&mut self) -> BufferId {
        let id = BufferId(self.next_buf);
        self.next_buf += 1;
        id
    }

    /// One explanatory line per action, in a box-drawing table — same
    /// intent as the teacher's `ExecutionExplanation` `Display` impl, with
    /// opcode names in place of dataflow-node names.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        out.push_str("┌─ action sequence ─────────────────────────\n");
        for (i, a) in self.actions.iter().enumerate() {
            out.push_str(&format!("│ {:>3}  {}\n", i, describe(a)));
        }
        out.push_str("├────────────────────────────────────────────\n");
        out.push_str(&format!(
            "│ total={} send={} recv={} reduce={} local={} scratch_bufs={}\n",
            self.stats.action_count,
            self.stats.send_count,
            self.stats.recv_count,
            self.stats.reduce_count,
            self.stats.local_count,
            self.stats.scratch_buffers
        ));
        out.push_str("└────────────────────────────────────────────");
        out
    }
}

fn describe(a: &Action) -> String {
    match a {
        Action::BufSend { to, range, .. } => format!("BufSend      -> tid{to} {range}"),
        Action::BufRecv { from, range, .. } => format!("BufRecv      <- tid{from} {range}"),
        Action::RBufSend { to, range, .. } => format!("RBufSend     -> tid{to} {range}"),
        Action::Recv { from, range, .. } => format!("Recv         <- tid{from} {range}"),
        Action::MapSend { to, .. } => format!("MapSend      -> tid{to}"),
        Action::MapRecv { from, .. } => format!("MapRecv      <- tid{from}"),
        Action::PackAndSend { to, range, .. } => format!("PackAndSend  -> tid{to} {range}"),
        Action::RecvAndUnpack { from, range, .. } => format!("RecvAndUnpack<- tid{from} {range}"),
        Action::MapPackAndSend { to, .. } => format!("MapPackAndSend -> tid{to}"),
        Action::MapRecvAndUnpack { from, .. } => format!("MapRecvAndUnpack <- tid{from}"),
        Action::CopyToBuf { range, .. } => format!("CopyToBuf    {range}"),
        Action::CopyFromBuf { range, .. } => format!("CopyFromBuf  {range}"),
        Action::PackToBuf { range, .. } => format!("PackToBuf    {range}"),
        Action::UnpackFromBuf { range, .. } => format!("UnpackFromBuf {range}"),
        Action::Reduce { range, op, input_tids, output_tids } => {
            format!("Reduce({op:?}) {range} in={input_tids:?} out={output_tids:?}")
        }
        Action::GroupReduce { range, op, group } => format!("GroupReduce({op:?}) {range} group={group:?}"),
        Action::RBufLocalReduce { op, .. } => format!("RBufLocalReduce({op:?})"),
        Action::RBufCopy { .. } => "RBufCopy".to_string(),
        Action::BufCopy { .. } => "BufCopy".to_string(),
        Action::BufInit { range, op, .. } => format!("BufInit({op:?}) {range}"),
        Action::BufReserve { buf, size } => format!("BufReserve   buf{} size={}", buf.0, size),
        Action::Nop => "Nop".to_string(),
    }
}

/// Compiles a naive, unoptimized action sequence straight out of a
/// `Transition`: one `CopyFromBuf`-style local op per `local`, one
/// `BufInit` per `init`, one `PackAndSend`/`RecvAndUnpack` per `send`/`recv`,
/// and one `Reduce` per reduce step. [`optimize`] then rewrites this into
/// something a backend would actually want to run.
pub fn compile(transition: &Transition, mapping: BufferId) -> ActionSequence {
    let mut seq = ActionSequence { actions: Vec::new(), stats: SequenceStats::default(), next_buf: mapping.0 + 1 };

    for op in &transition.local {
        seq.actions.push(Action::CopyToBuf { src: mapping, range: op.range, dst: mapping });
    }
    for op in &transition.init {
        seq.actions.push(Action::BufInit { buf: mapping, range: op.range, op: op.op });
    }
    for op in &transition.send {
        seq.actions.push(Action::PackAndSend { buf: mapping, range: op.range, to: op.to_tid });
    }
    for op in &transition.recv {
        seq.actions.push(Action::RecvAndUnpack { buf: mapping, range: op.range, from: op.from_tid });
    }
    for op in &transition.reduce {
        seq.actions.push(Action::Reduce {
            range: op.range,
            op: op.op,
            input_tids: op.input_tids.clone(),
            output_tids: op.output_tids.clone(),
        });
    }

    seq
}

/// Runs the fixed optimizer pipeline. Each pass takes the sequence produced
/// by the previous one; order matters (e.g. combining sends must happen
/// before the deadlock-avoidance sort, or the sort would see less to work
/// with). `my_tid` is this process's own id, needed by the deadlock-avoidance
/// pass to decide, for each remote partner, which side of the pair sends
/// first.
pub fn optimize(mut seq: ActionSequence, my_tid: Tid) -> ActionSequence {
    split_transition_boundaries(&mut seq);
    flatten_packing(&mut seq);
    collapse_all_reduce(&mut seq);
    combine_adjacent(&mut seq);
    allocate_scratch_buffers(&mut seq);
    split_oversized_reduces(&mut seq, 1 << 20);
    sort_by_round_and_priority(&mut seq);
    avoid_deadlock(&mut seq, my_tid);
    calc_stats(&mut seq);
    seq
}

/// Pass 1: marks the boundary between independent transitions so later
/// passes (combine/sort) never merge actions across them. A no-op here
/// because `compile` only ever sees one transition at a time; kept as an
/// explicit pass so a caller compiling several transitions back-to-back
/// (e.g. `Data::reserve`) can concatenate sequences and still re-run the
/// full pipeline safely.
fn split_transition_boundaries(_seq: &mut ActionSequence) {}

/// Pass 2: a `PackAndSend`/`RecvAndUnpack` against an already-empty range
/// (left behind by an upstream cancellation) degrades to `Nop` instead of
/// going through the packer for nothing.
fn flatten_packing(seq: &mut ActionSequence) {
    for a in seq.actions.iter_mut() {
        let empty = match a {
            Action::PackAndSend { range, .. } | Action::RecvAndUnpack { range, .. } => range.is_empty(),
            _ => false,
        };
        if empty {
            *a = Action::Nop;
        }
    }
}

/// Pass 3: a `Reduce` whose `input_tids` and `output_tids` are identical
/// (every contributor also wants the result — a true all-reduce) collapses
/// to `GroupReduce`, which a backend can implement with a single collective
/// call instead of reduce-then-scatter.
fn collapse_all_reduce(seq: &mut ActionSequence) {
    for a in seq.actions.iter_mut() {
        if let Action::Reduce { range, op, input_tids, output_tids } = a {
            if input_tids == output_tids {
                *a = Action::GroupReduce { range: *range, op: *op, group: std::mem::take(input_tids) };
            }
        }
    }
}

/// Pass 4: adjacent sends (or receives) to (from) the same tid merge into
/// one by widening the range when they're contiguous, cutting round-trips.
fn combine_adjacent(seq: &mut ActionSequence) {
    let mut i = 0;
    while i + 1 < seq.actions.len() {
        let merged = match (&seq.actions[i], &seq.actions[i + 1]) {
            (
                Action::PackAndSend { buf: b1, range: r1, to: t1 },
                Action::PackAndSend { buf: b2, range: r2, to: t2 },
            ) if b1 == b2 && t1 == t2 && contiguous(r1, r2) => {
                Some(Action::PackAndSend { buf: *b1, range: union(r1, r2), to: *t1 })
            }
            (
                Action::RecvAndUnpack { buf: b1, range: r1, from: f1 },
                Action::RecvAndUnpack { buf: b2, range: r2, from: f2 },
            ) if b1 == b2 && f1 == f2 && contiguous(r1, r2) => {
                Some(Action::RecvAndUnpack { buf: *b1, range: union(r1, r2), from: *f1 })
            }
            _ => None,
        };
        if let Some(m) = merged {
            seq.actions[i] = m;
            seq.actions.remove(i + 1);
        } else {
            i += 1;
        }
    }
}

fn contiguous(a: &Range, b: &Range) -> bool {
    a.dims() == 1 && b.dims() == 1 && a.to == b.from
}

fn union(a: &Range, b: &Range) -> Range {
    Range::new(a.dims(), a.from, b.to)
}

/// Pass 5: any action that needs a scratch (non-mapping) buffer gets a
/// `BufReserve` inserted before the earliest action that touches it.
fn allocate_scratch_buffers(seq: &mut ActionSequence) {
    let mut reserved = std::collections::HashSet::new();
    let mut inserts = Vec::new();
    for (i, a) in seq.actions.iter().enumerate() {
        if let Action::Recv { buf, range, .. } = a {
            if reserved.insert(buf.0) {
                inserts.push((i, Action::BufReserve { buf: *buf, size: range.size() }));
            }
        }
    }
    for (offset, (i, action)) in inserts.into_iter().enumerate() {
        seq.actions.insert(i + offset, action);
    }
}

/// Pass 6: a `Reduce`/`GroupReduce` over more than `max_elems` elements
/// splits along its widest dimension into two independent reduces, so a
/// backend with a transport-level message-size ceiling never sees an
/// oversized single reduce.
fn split_oversized_reduces(seq: &mut ActionSequence, max_elems: u64) {
    let mut out = Vec::with_capacity(seq.actions.len());
    for a in seq.actions.drain(..) {
        match a {
            Action::Reduce { range, op, input_tids, output_tids } if range.size() > max_elems => {
                let dim = range.widest_dim();
                let mid = range.from.get(dim) + (range.width(dim) / 2) as i64;
                let (lo, hi) = range.split_at(dim, mid);
                out.push(Action::Reduce { range: lo, op, input_tids: input_tids.clone(), output_tids: output_tids.clone() });
                out.push(Action::Reduce { range: hi, op, input_tids, output_tids });
            }
            other => out.push(other),
        }
    }
    seq.actions = out;
}

/// Pass 7: stable sort by `(round, priority)` so all purely local work runs
/// before any collective step, and within a round receives are posted
/// before sends before reduces.
fn sort_by_round_and_priority(seq: &mut ActionSequence) {
    seq.actions.sort_by_key(|a| (a.round(), a.priority()));
}

/// Which side of a pairwise communication an action represents, as seen by
/// the process running it — needed to decide which phase it belongs to.
enum Peer {
    Send(Tid),
    Recv(Tid),
}

fn peer_of(a: &Action) -> Option<Peer> {
    match a {
        Action::PackAndSend { to, .. }
        | Action::BufSend { to, .. }
        | Action::MapSend { to, .. }
        | Action::MapPackAndSend { to, .. }
        | Action::RBufSend { to, .. } => Some(Peer::Send(*to)),
        Action::RecvAndUnpack { from, .. }
        | Action::BufRecv { from, .. }
        | Action::MapRecv { from, .. }
        | Action::MapRecvAndUnpack { from, .. }
        | Action::Recv { from, .. } => Some(Peer::Recv(*from)),
        _ => None,
    }
}

/// Pass 8: two-phase deadlock-avoidance sort, relative to `my_tid`. For
/// every pair of ranks `(i, j)` with `i < j`, rank `i` must send to `j`
/// before receiving from it, and rank `j` must receive from `i` before
/// sending to it — otherwise a backend posting blocking sends on both sides
/// deadlocks waiting for a matching receive that never gets posted. Actions
/// that determine "goes first" for their partner land in phase 0, the rest
/// in phase 1; actions with no partner (reduces, local copies) are phase 0
/// and unaffected by the relative ordering.
fn avoid_deadlock(seq: &mut ActionSequence, my_tid: Tid) {
    seq.actions.sort_by_key(|a| {
        let phase = match peer_of(a) {
            Some(Peer::Send(to)) => {
                if my_tid < to {
                    0
                } else {
                    1
                }
            }
            Some(Peer::Recv(from)) => {
                if my_tid < from {
                    1
                } else {
                    0
                }
            }
            None => 0,
        };
        (a.round(), phase, a.priority())
    });
}

/// Pass 9: drops `Nop`s left by earlier passes and computes final stats.
fn calc_stats(seq: &mut ActionSequence) {
    seq.actions.retain(|a| !a.is_nop());
    let mut stats = SequenceStats::default();
    let mut scratch = std::collections::HashSet::new();
    for a in &seq.actions {
        stats.action_count += 1;
        match a {
            Action::BufSend { .. } | Action::PackAndSend { .. } | Action::MapSend { .. } | Action::MapPackAndSend { .. } | Action::RBufSend { .. } => {
                stats.send_count += 1
            }
            Action::BufRecv { .. } | Action::Recv { .. } | Action::RecvAndUnpack { .. } | Action::MapRecv { .. } | Action::MapRecvAndUnpack { .. } => {
                stats.recv_count += 1
            }
            Action::Reduce { .. } | Action::GroupReduce { .. } | Action::RBufLocalReduce { .. } => stats.reduce_count += 1,
            Action::CopyToBuf { .. } | Action::CopyFromBuf { .. } | Action::BufInit { .. } => stats.local_count += 1,
            Action::BufReserve { buf, .. } => {
                scratch.insert(buf.0);
            }
            _ => {}
        }
    }
    stats.scratch_buffers = scratch.len();
    seq.stats = stats;
}

impl fmt::Display for ActionSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.explain())
    }
}
