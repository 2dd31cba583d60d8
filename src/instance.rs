//! The instance: the top-level handle an application holds, owning every
//! space/group/partitioning/data arena and the id counters that hand out
//! their keys. Modeled on the teacher's `Pipeline { inner: Arc<Mutex<PipelineInner>> }`
//! split — one small cloneable handle wrapping a lock around the actual
//! arenas — generalized from "one pipeline's nodes and edges" to "one
//! process's spaces, groups, partitionings, and data containers".
//!
//! `Data<T>` is generic per element type, but one instance holds many
//! `Data`s of different `T`; they're stored type-erased (`Box<dyn Any>`)
//! and downcast back to `Data<T>` on access, the same pattern the teacher's
//! `type_token.rs` uses to let one `PCollection` arena hold values of
//! differing element types.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::backend::Backend;
use crate::config::Config;
use crate::data::Data;
use crate::dataflow::ReduceElem;
use crate::group::ProcessGroup;
use crate::id::{DataId, GroupId, IdCounter, PartitioningId, SpaceId};
use crate::log::{LogLevel, Logger};
use crate::partitioning::Partitioning;
use crate::space::Space;

/// Callback invoked whenever the engine hits an unrecoverable condition
/// (mirrors the original's installable error handler); defaults to
/// `Logger::panic`.
pub type ErrorHandler = Box<dyn Fn(&str) + Send + Sync>;

struct InstanceInner {
    my_tid: u32,
    world: ProcessGroup,
    ids: Ids,
    spaces: HashMap<u64, Space>,
    groups: HashMap<u64, ProcessGroup>,
    partitionings: HashMap<u64, Partitioning>,
    data: HashMap<u64, Box<dyn Any + Send + Sync>>,
    logger: Logger,
    error_handler: Option<ErrorHandler>,
}

#[derive(Default)]
struct Ids {
    space: IdCounter,
    group: IdCounter,
    partitioning: IdCounter,
    data: IdCounter,
}

/// Cheaply cloneable handle to one process's share of arenas.
#[derive(Clone)]
pub struct Instance(Arc<Mutex<InstanceInner>>);

impl Instance {
    /// Builds a new instance for a world of `world_size` tasks, with this
    /// process identified as `my_tid`, configured from `cfg`.
    pub fn new(world_size: u32, my_tid: u32, cfg: Config) -> Self {
        let logger = Logger::new(cfg.log_level, cfg.log_tid_range, my_tid, cfg.log_file.as_deref());
        let inner = InstanceInner {
            my_tid,
            world: ProcessGroup::world(world_size),
            ids: Ids::default(),
            spaces: HashMap::new(),
            groups: HashMap::new(),
            partitionings: HashMap::new(),
            data: HashMap::new(),
            logger,
            error_handler: None,
        };
        Instance(Arc::new(Mutex::new(inner)))
    }

    /// Convenience constructor reading `Config::from_env()`.
    pub fn from_env(world_size: u32, my_tid: u32) -> Self {
        Instance::new(world_size, my_tid, Config::from_env())
    }

    pub fn my_tid(&self) -> u32 {
        self.0.lock().unwrap().my_tid
    }

    pub fn world_group(&self) -> ProcessGroup {
        self.0.lock().unwrap().world.clone()
    }

    pub fn set_error_handler(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.0.lock().unwrap().error_handler = Some(Box::new(handler));
    }

    /// Reports an unrecoverable error: invokes the installed handler if any,
    /// then logs and panics regardless (matches spec's "recovery is
    /// unsafe" stance — a handler can add a side effect like flushing
    /// telemetry, but it can't prevent the panic).
    pub fn fatal(&self, msg: &str) -> ! {
        let inner = self.0.lock().unwrap();
        if let Some(h) = &inner.error_handler {
            h(msg);
        }
        inner.logger.panic(msg)
    }

    pub fn log(&self, level: LogLevel, msg: &str) {
        self.0.lock().unwrap().logger.log(level, msg);
    }

    pub fn add_space(&self, space: Space) -> SpaceId {
        let mut inner = self.0.lock().unwrap();
        let id = inner.ids.space.next();
        inner.spaces.insert(id, space);
        SpaceId::new(id)
    }

    pub fn space(&self, id: SpaceId) -> Space {
        self.0.lock().unwrap().spaces.get(&id.raw()).cloned().expect("unknown SpaceId")
    }

    /// Replaces a registered space's extent in place, for elastic growth or
    /// an application-driven domain resize. Callers must have already
    /// migrated every partitioning/data built against the old extent.
    pub fn resize_space(&self, id: SpaceId, new_range: crate::index::Range) {
        let mut inner = self.0.lock().unwrap();
        let space = inner.spaces.get_mut(&id.raw()).expect("unknown SpaceId");
        space.resize(new_range);
    }

    pub fn add_group(&self, group: ProcessGroup) -> GroupId {
        let mut inner = self.0.lock().unwrap();
        let id = inner.ids.group.next();
        inner.groups.insert(id, group);
        GroupId::new(id)
    }

    pub fn group(&self, id: GroupId) -> ProcessGroup {
        self.0.lock().unwrap().groups.get(&id.raw()).cloned().expect("unknown GroupId")
    }

    pub fn add_partitioning(&self, p: Partitioning) -> PartitioningId {
        let mut inner = self.0.lock().unwrap();
        let id = inner.ids.partitioning.next();
        inner.partitionings.insert(id, p);
        PartitioningId::new(id)
    }

    pub fn partitioning(&self, id: PartitioningId) -> Partitioning {
        self.0
            .lock()
            .unwrap()
            .partitionings
            .get(&id.raw())
            .cloned()
            .expect("unknown PartitioningId")
    }

    /// Registers a new, empty `Data<T>` and returns its id.
    pub fn add_data<T: ReduceElem>(&self) -> DataId {
        let mut inner = self.0.lock().unwrap();
        let id = inner.ids.data.next();
        let my_tid = inner.my_tid;
        inner.data.insert(id, Box::new(Data::<T>::new(my_tid)));
        DataId::new(id)
    }

    /// Runs `f` against the `Data<T>` registered at `id`. Returns an error
    /// (rather than panicking) if `id` was registered with a different
    /// element type, since that's a caller bug a `Result` is more useful
    /// for than a hard crash mid-collective.
    pub fn with_data<T: ReduceElem, R>(&self, id: DataId, f: impl FnOnce(&mut Data<T>) -> Result<R>) -> Result<R> {
        let mut inner = self.0.lock().unwrap();
        let boxed = inner.data.get_mut(&id.raw()).ok_or_else(|| anyhow!("unknown DataId"))?;
        let data = boxed
            .downcast_mut::<Data<T>>()
            .ok_or_else(|| anyhow!("DataId {} was not registered with this element type", id.raw()))?;
        f(data)
    }

    /// Collective barrier + group-membership exchange, delegated to
    /// `backend.sync`. Used to publish a newly-registered space's extent
    /// (or any other out-of-band metadata) to every task before anyone
    /// partitions against it.
    pub fn sync_spaces(&self, backend: &mut dyn Backend) -> Result<()> {
        let group = self.world_group();
        backend.sync(&group)
    }

    /// Runs the elastic-resize protocol: ask the backend for the
    /// newly-agreed group, install it as the instance's world group, and
    /// let the backend finish applying it. Callers are responsible for
    /// migrating every live `Partitioning`/`Data` onto the returned group
    /// afterward.
    pub fn resize(&self, backend: &mut dyn Backend) -> Result<ProcessGroup> {
        let new_group = backend.resize()?;
        {
            let mut inner = self.0.lock().unwrap();
            inner.world = new_group.clone();
        }
        backend.finish_resize()?;
        Ok(new_group)
    }

    pub fn finalize(&self, backend: &mut dyn Backend) -> Result<()> {
        backend.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Index, Range};
    use crate::partitioner::master;
    use crate::testing::LocalBackend;
    use crate::dataflow::DataFlow;

    #[test]
    fn spaces_and_data_round_trip_through_the_arena() {
        let inst = Instance::new(1, 0, Config::default());
        let sid = inst.add_space(Space::new1(10));
        assert_eq!(inst.space(sid).size(), 10);

        let did = inst.add_data::<i32>();
        let group = inst.world_group();
        let space = inst.space(sid).full_range();
        let part = Partitioning::new(space, group, &master(), None);
        let mut backend = LocalBackend::new(1, 0);
        inst.with_data::<i32, ()>(did, |d| {
            d.switch(&mut backend, part, DataFlow::INIT)?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn with_data_rejects_wrong_type() {
        let inst = Instance::new(1, 0, Config::default());
        let did = inst.add_data::<i32>();
        let err = inst.with_data::<f64, ()>(did, |_| Ok(()));
        assert!(err.is_err());
    }
}
