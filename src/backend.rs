//! The `Backend` trait: the one seam this crate leaves for an actual
//! transport (MPI, TCP, shared memory, ...) to plug into. Everything above
//! this trait — partitioners, transitions, action sequences — is
//! transport-agnostic; everything below it is explicitly out of scope here,
//! per the engine/transport split this crate draws the line at.

use anyhow::Result;

use crate::action::ActionSequence;
use crate::group::ProcessGroup;
use crate::transition::Transition;

/// What an action-sequence executor must provide. A real implementation
/// owns sockets/windows/whatever; `exec` walks the sequence and issues the
/// corresponding network or RDMA operations, `wait` blocks until they all
/// complete (most `exec` implementations will just do both inline for a
/// synchronous transport).
pub trait Backend {
    /// Called once before the first `exec` against a given action sequence;
    /// lets a backend pre-post receives or register buffers.
    fn prepare(&mut self, _seq: &ActionSequence) -> Result<()> {
        Ok(())
    }

    /// Issues every network-facing action in `seq`. `transition` is passed
    /// alongside for backends that want the higher-level intent (e.g. to
    /// choose a reduce algorithm) rather than re-deriving it from actions.
    fn exec(&mut self, seq: &ActionSequence, transition: &Transition) -> Result<()>;

    /// Blocks until all actions issued by the most recent `exec` complete.
    /// Synchronous backends can leave this as a no-op.
    fn wait(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after a sequence's actions have all completed, for backends
    /// that hold onto per-sequence resources (registered buffers, request
    /// handles) between `prepare` and here.
    fn cleanup(&mut self, _seq: &ActionSequence) -> Result<()> {
        Ok(())
    }

    /// Informs the backend that the live process group changed (elastic
    /// resize, or any operation that alters tid membership).
    fn update_group(&mut self, _group: &ProcessGroup) -> Result<()> {
        Ok(())
    }

    /// Drops the named tasks from whatever connection state the backend
    /// tracks, after the engine has confirmed no data they own still needs
    /// to be migrated off of them.
    fn eliminate_nodes(&mut self, _group: &ProcessGroup) -> Result<()> {
        Ok(())
    }

    /// Collective barrier: every task in `group` must call this before any
    /// of them proceeds past it.
    fn sync(&mut self, group: &ProcessGroup) -> Result<()>;

    /// Announces an elastic resize is starting: the backend should begin
    /// accepting connections from/tearing down connections to the tasks
    /// that will join/leave.
    fn resize(&mut self) -> Result<ProcessGroup>;

    /// Confirms the resize announced by `resize` has been applied
    /// everywhere and it's safe to use the new group for collectives.
    fn finish_resize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Releases every resource the backend holds; no further calls are
    /// made after this.
    fn finalize(&mut self) -> Result<()>;
}
