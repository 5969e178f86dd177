//! The public submission surface: `WorkQueue`, `AccessQueue`, `Conveyor`,
//! and their priority variants, each bundling a [`TaskManager`], a
//! processor, and a [`WorkerLoop`] behind one handle.
//!
//! Every constructor here clamps its [`Config`] and validates its arguments
//! up front, so a misconfigured queue fails at construction rather than at
//! some later, harder-to-trace submission call.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::argument::Resource;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::context::ServiceContext;
use crate::error::{Result, TaskError};
use crate::manager::{FifoTaskManager, PriorityLane, PriorityTaskManager, TaskManager};
use crate::processor::{MultiStaticProcessor, NullProcessor, SingleResourceProcessor};
use crate::unit::DynConveyorMachine;
use crate::worker::WorkerLoop;
use crate::wrapper::{TaskHandle, TaskWrapper, UnitFn};

/// Await every handle in a batch, preserving submission order.
pub async fn await_all<R: Send + 'static>(handles: Vec<TaskHandle<R>>) -> Vec<std::result::Result<R, TaskError>> {
    join_all(handles).await
}

/// A FIFO queue of argument-less units, each run by a single (or
/// fan-out, per `config.max_concurrency`) worker.
pub struct WorkQueue<R> {
    manager: Arc<FifoTaskManager<(), R>>,
    processor: Arc<NullProcessor>,
    worker: WorkerLoop,
    config: Config,
}

impl<R: Send + 'static> WorkQueue<R> {
    /// Build a queue with no worker running yet; call [`WorkQueue::start`]
    /// to begin draining.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let config = config.clamped();
        Self {
            manager: Arc::new(FifoTaskManager::new()),
            processor: Arc::new(NullProcessor::new(config.max_concurrency)),
            worker: WorkerLoop::new(),
            config,
        }
    }

    /// Spawn the worker coroutine.
    pub fn start(&self) {
        let m1 = Arc::clone(&self.manager);
        let m2 = Arc::clone(&self.manager);
        let m3 = Arc::clone(&self.manager);
        let processor = Arc::clone(&self.processor);
        self.worker.start(
            move || m1.has_task(),
            move |cancel| {
                let m = Arc::clone(&m2);
                async move { m.wait_for_task(&cancel).await }
            },
            move |ctx, cancel| {
                let m = Arc::clone(&m3);
                let p = Arc::clone(&processor);
                async move { p.drain(&*m, &ctx, &cancel).await }
            },
        );
    }

    /// Signal shutdown and await the worker, up to `deadline`.
    pub async fn stop(&self, deadline: Duration) {
        self.worker.stop(deadline).await;
    }

    /// File a unit, returning a future that resolves to its outcome.
    pub fn submit(&self, unit: UnitFn<(), R>, attempts: u32, inner_cancel: CancelToken) -> Result<TaskHandle<R>> {
        let attempts = self.config.clamp_attempts(attempts)?;
        let (wrapper, handle) = TaskWrapper::new(unit, attempts, inner_cancel);
        self.manager.submit(wrapper);
        Ok(handle)
    }

    /// File a batch of units, preserving their relative submission order.
    pub fn submit_batch(
        &self,
        units: Vec<UnitFn<(), R>>,
        attempts: u32,
        inner_cancel: CancelToken,
    ) -> Result<Vec<TaskHandle<R>>> {
        let attempts = self.config.clamp_attempts(attempts)?;
        Ok(units
            .into_iter()
            .map(|unit| {
                let (wrapper, handle) = TaskWrapper::new(unit, attempts, inner_cancel.clone());
                self.manager.submit(wrapper);
                handle
            })
            .collect())
    }
}

/// A strict-priority queue of argument-less units.
pub struct PriorityWorkQueue<R> {
    manager: Arc<PriorityTaskManager<(), R>>,
    processor: Arc<NullProcessor>,
    worker: WorkerLoop,
    config: Config,
}

impl<R: Send + 'static> PriorityWorkQueue<R> {
    /// Build a queue accepting priorities `0..=config.max_priority`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let config = config.clamped();
        Self {
            manager: Arc::new(PriorityTaskManager::new(config.max_priority)),
            processor: Arc::new(NullProcessor::new(config.max_concurrency)),
            worker: WorkerLoop::new(),
            config,
        }
    }

    /// Spawn the worker coroutine.
    pub fn start(&self) {
        let m1 = Arc::clone(&self.manager);
        let m2 = Arc::clone(&self.manager);
        let m3 = Arc::clone(&self.manager);
        let processor = Arc::clone(&self.processor);
        self.worker.start(
            move || m1.has_task(),
            move |cancel| {
                let m = Arc::clone(&m2);
                async move { m.wait_for_task(&cancel).await }
            },
            move |ctx, cancel| {
                let m = Arc::clone(&m3);
                let p = Arc::clone(&processor);
                async move { p.drain(&*m, &ctx, &cancel).await }
            },
        );
    }

    /// Signal shutdown and await the worker, up to `deadline`.
    pub async fn stop(&self, deadline: Duration) {
        self.worker.stop(deadline).await;
    }

    /// File a unit at a given priority lane (clamped to `[0, max_priority]`).
    pub fn submit(
        &self,
        unit: UnitFn<(), R>,
        attempts: u32,
        priority: PriorityLane,
        inner_cancel: CancelToken,
    ) -> Result<TaskHandle<R>> {
        let attempts = self.config.clamp_attempts(attempts)?;
        let priority = self.config.clamp_priority(priority);
        let (wrapper, handle) = TaskWrapper::new(unit, attempts, inner_cancel);
        self.manager.submit_with_priority(wrapper, priority);
        Ok(handle)
    }
}

enum AccessProcessorKind<T: Resource> {
    Single(Arc<SingleResourceProcessor<T>>),
    Pool(Arc<MultiStaticProcessor<T>>),
}

impl<T: Resource> Clone for AccessProcessorKind<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Single(p) => Self::Single(Arc::clone(p)),
            Self::Pool(p) => Self::Pool(Arc::clone(p)),
        }
    }
}

/// A FIFO queue of units that run against a shared resource `T`, acquired
/// per one of the three non-conveyor [`crate::argument::ReuseStrategy`]
/// variants.
pub struct AccessQueue<T: Resource, R> {
    manager: Arc<FifoTaskManager<Arc<T>, R>>,
    processor: AccessProcessorKind<T>,
    worker: WorkerLoop,
    config: Config,
}

impl<T: Resource, R: Send + 'static> AccessQueue<T, R> {
    /// One resource, built once and kept alive for the worker's lifetime.
    #[must_use]
    pub fn reusable(factory: Arc<dyn Fn() -> Arc<T> + Send + Sync>, config: Config) -> Self {
        Self {
            manager: Arc::new(FifoTaskManager::new()),
            processor: AccessProcessorKind::Single(Arc::new(SingleResourceProcessor::reusable(factory))),
            worker: WorkerLoop::new(),
            config: config.clamped(),
        }
    }

    /// One resource, rebuilt fresh for every drain batch.
    #[must_use]
    pub fn transient(factory: Arc<dyn Fn() -> Arc<T> + Send + Sync>, config: Config) -> Self {
        Self {
            manager: Arc::new(FifoTaskManager::new()),
            processor: AccessProcessorKind::Single(Arc::new(SingleResourceProcessor::transient(factory))),
            worker: WorkerLoop::new(),
            config: config.clamped(),
        }
    }

    /// A fixed pool of resources, each used by at most one task at a time.
    #[must_use]
    pub fn pool(resources: Vec<Arc<T>>, config: Config) -> Self {
        Self {
            manager: Arc::new(FifoTaskManager::new()),
            processor: AccessProcessorKind::Pool(Arc::new(MultiStaticProcessor::new(resources))),
            worker: WorkerLoop::new(),
            config: config.clamped(),
        }
    }

    /// Spawn the worker coroutine.
    pub fn start(&self) {
        let m1 = Arc::clone(&self.manager);
        let m2 = Arc::clone(&self.manager);
        let m3 = Arc::clone(&self.manager);
        let processor = self.processor.clone();
        self.worker.start(
            move || m1.has_task(),
            move |cancel| {
                let m = Arc::clone(&m2);
                async move { m.wait_for_task(&cancel).await }
            },
            move |ctx, cancel| {
                let m = Arc::clone(&m3);
                let processor = processor.clone();
                async move {
                    match processor {
                        AccessProcessorKind::Single(p) => p.drain(&*m, &ctx, &cancel).await,
                        AccessProcessorKind::Pool(p) => p.drain(&*m, &ctx, &cancel).await,
                    }
                }
            },
        );
    }

    /// Signal shutdown and await the worker, up to `deadline`.
    pub async fn stop(&self, deadline: Duration) {
        self.worker.stop(deadline).await;
    }

    /// File a unit, returning a future that resolves to its outcome.
    pub fn submit(&self, unit: UnitFn<Arc<T>, R>, attempts: u32, inner_cancel: CancelToken) -> Result<TaskHandle<R>> {
        let attempts = self.config.clamp_attempts(attempts)?;
        let (wrapper, handle) = TaskWrapper::new(unit, attempts, inner_cancel);
        self.manager.submit(wrapper);
        Ok(handle)
    }
}

/// A strict-priority queue of units that run against a shared resource `T`.
pub struct PriorityAccessQueue<T: Resource, R> {
    manager: Arc<PriorityTaskManager<Arc<T>, R>>,
    processor: AccessProcessorKind<T>,
    worker: WorkerLoop,
    config: Config,
}

impl<T: Resource, R: Send + 'static> PriorityAccessQueue<T, R> {
    /// One resource, built once and kept alive for the worker's lifetime.
    #[must_use]
    pub fn reusable(factory: Arc<dyn Fn() -> Arc<T> + Send + Sync>, config: Config) -> Self {
        let config = config.clamped();
        Self {
            manager: Arc::new(PriorityTaskManager::new(config.max_priority)),
            processor: AccessProcessorKind::Single(Arc::new(SingleResourceProcessor::reusable(factory))),
            worker: WorkerLoop::new(),
            config,
        }
    }

    /// A fixed pool of resources, each used by at most one task at a time.
    #[must_use]
    pub fn pool(resources: Vec<Arc<T>>, config: Config) -> Self {
        let config = config.clamped();
        Self {
            manager: Arc::new(PriorityTaskManager::new(config.max_priority)),
            processor: AccessProcessorKind::Pool(Arc::new(MultiStaticProcessor::new(resources))),
            worker: WorkerLoop::new(),
            config,
        }
    }

    /// Spawn the worker coroutine.
    pub fn start(&self) {
        let m1 = Arc::clone(&self.manager);
        let m2 = Arc::clone(&self.manager);
        let m3 = Arc::clone(&self.manager);
        let processor = self.processor.clone();
        self.worker.start(
            move || m1.has_task(),
            move |cancel| {
                let m = Arc::clone(&m2);
                async move { m.wait_for_task(&cancel).await }
            },
            move |ctx, cancel| {
                let m = Arc::clone(&m3);
                let processor = processor.clone();
                async move {
                    match processor {
                        AccessProcessorKind::Single(p) => p.drain(&*m, &ctx, &cancel).await,
                        AccessProcessorKind::Pool(p) => p.drain(&*m, &ctx, &cancel).await,
                    }
                }
            },
        );
    }

    /// Signal shutdown and await the worker, up to `deadline`.
    pub async fn stop(&self, deadline: Duration) {
        self.worker.stop(deadline).await;
    }

    /// File a unit at a given priority lane.
    pub fn submit(
        &self,
        unit: UnitFn<Arc<T>, R>,
        attempts: u32,
        priority: PriorityLane,
        inner_cancel: CancelToken,
    ) -> Result<TaskHandle<R>> {
        let attempts = self.config.clamp_attempts(attempts)?;
        let priority = self.config.clamp_priority(priority);
        let (wrapper, handle) = TaskWrapper::new(unit, attempts, inner_cancel);
        self.manager.submit_with_priority(wrapper, priority);
        Ok(handle)
    }
}

/// A FIFO belt of data items run through one fixed, reusable machine.
pub struct Conveyor<D: Send + 'static, R: Send + 'static> {
    machine: Arc<DynConveyorMachine<D, R>>,
    manager: Arc<FifoTaskManager<Arc<DynConveyorMachine<D, R>>, R>>,
    processor: Arc<SingleResourceProcessor<DynConveyorMachine<D, R>>>,
    worker: WorkerLoop,
    config: Config,
}

impl<D: Clone + Send + Sync + 'static, R: Send + 'static> Conveyor<D, R> {
    /// Build a conveyor around one machine instance.
    #[must_use]
    pub fn new(machine: Arc<DynConveyorMachine<D, R>>, config: Config) -> Self {
        let for_factory = Arc::clone(&machine);
        Self {
            machine,
            manager: Arc::new(FifoTaskManager::new()),
            processor: Arc::new(SingleResourceProcessor::reusable(Arc::new(move || Arc::clone(&for_factory)))),
            worker: WorkerLoop::new(),
            config: config.clamped(),
        }
    }

    /// Spawn the worker coroutine.
    pub fn start(&self) {
        let m1 = Arc::clone(&self.manager);
        self.worker.start(
            move || m1.has_task(),
            move |_cancel| async move {},
            move |_ctx, _cancel| async move {},
        );
    }

    /// Signal shutdown and await the worker, up to `deadline`.
    pub async fn stop(&self, deadline: Duration) {
        self.worker.stop(deadline).await;
    }

    /// Reference to the machine this conveyor runs every datum through.
    #[must_use]
    pub fn machine(&self) -> &Arc<DynConveyorMachine<D, R>> {
        &self.machine
    }

    /// Place one datum on the belt.
    pub fn add(&self, datum: D, attempts: u32, inner_cancel: CancelToken) -> Result<TaskHandle<R>> {
        let attempts = self.config.clamp_attempts(attempts)?;
        let unit = crate::unit::conveyor_unit::<D, R>(datum);
        let (wrapper, handle) = TaskWrapper::new(unit, attempts, inner_cancel);
        self.manager.submit(wrapper);
        Ok(handle)
    }

    /// Place a batch of data on the belt, preserving order.
    pub fn add_batch(&self, data: Vec<D>, attempts: u32, inner_cancel: CancelToken) -> Result<Vec<TaskHandle<R>>> {
        let attempts = self.config.clamp_attempts(attempts)?;
        Ok(data
            .into_iter()
            .map(|d| {
                let unit = crate::unit::conveyor_unit::<D, R>(d);
                let (wrapper, handle) = TaskWrapper::new(unit, attempts, inner_cancel.clone());
                self.manager.submit(wrapper);
                handle
            })
            .collect())
    }
}

/// A strict-priority belt of data items run through one fixed, reusable
/// machine.
pub struct PriorityConveyor<D: Send + 'static, R: Send + 'static> {
    machine: Arc<DynConveyorMachine<D, R>>,
    manager: Arc<PriorityTaskManager<Arc<DynConveyorMachine<D, R>>, R>>,
    processor: Arc<SingleResourceProcessor<DynConveyorMachine<D, R>>>,
    worker: WorkerLoop,
    config: Config,
}

impl<D: Clone + Send + Sync + 'static, R: Send + 'static> PriorityConveyor<D, R> {
    /// Build a conveyor around one machine instance.
    #[must_use]
    pub fn new(machine: Arc<DynConveyorMachine<D, R>>, config: Config) -> Self {
        let config = config.clamped();
        let for_factory = Arc::clone(&machine);
        Self {
            machine,
            manager: Arc::new(PriorityTaskManager::new(config.max_priority)),
            processor: Arc::new(SingleResourceProcessor::reusable(Arc::new(move || Arc::clone(&for_factory)))),
            worker: WorkerLoop::new(),
            config,
        }
    }

    /// Spawn the worker coroutine.
    pub fn start(&self) {
        let m1 = Arc::clone(&self.manager);
        self.worker.start(
            move || m1.has_task(),
            move |_cancel| async move {},
            move |_ctx, _cancel| async move {},
        );
    }

    /// Signal shutdown and await the worker, up to `deadline`.
    pub async fn stop(&self, deadline: Duration) {
        self.worker.stop(deadline).await;
    }

    /// Reference to the machine this conveyor runs every datum through.
    #[must_use]
    pub fn machine(&self) -> &Arc<DynConveyorMachine<D, R>> {
        &self.machine
    }

    /// Place one datum on the belt at a given priority lane.
    pub fn add(
        &self,
        datum: D,
        attempts: u32,
        priority: PriorityLane,
        inner_cancel: CancelToken,
    ) -> Result<TaskHandle<R>> {
        let attempts = self.config.clamp_attempts(attempts)?;
        let priority = self.config.clamp_priority(priority);
        let unit = crate::unit::conveyor_unit::<D, R>(datum);
        let (wrapper, handle) = TaskWrapper::new(unit, attempts, inner_cancel);
        self.manager.submit_with_priority(wrapper, priority);
        Ok(handle)
    }
}

/// A registry of units that must all complete before a host considers
/// startup finished. Every registered unit runs concurrently; the first
/// business error (if any) is returned after every unit has finished, so one
/// slow or failing unit never hides the others' results.
#[derive(Default)]
pub struct StartupWork {
    units: Vec<(String, UnitFn<(), ()>)>,
}

impl StartupWork {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named unit to run at startup.
    pub fn register(&mut self, name: impl Into<String>, unit: UnitFn<(), ()>) {
        self.units.push((name.into(), unit));
    }

    /// Run every registered unit concurrently against `context`, waiting for
    /// all of them before returning.
    pub async fn run_all(&self, context: ServiceContext) -> Result<()> {
        let handles = self.units.iter().map(|(name, unit)| {
            let name = name.clone();
            let unit = Arc::clone(unit);
            let ctx = context.child_scope();
            tokio::spawn(async move {
                let result = (unit)((), ctx, CancelToken::new()).await;
                (name, result)
            })
        });

        let mut first_err = None;
        for joined in join_all(handles).await {
            let (name, result) = joined.expect("startup unit task panicked");
            if let Err(err) = result {
                tracing::error!(name, %err, "startup work failed");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{AccessUnit, Unit};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn work_queue_runs_units_in_fifo_order() {
        let queue: WorkQueue<u32> = WorkQueue::new(Config::default());
        queue.start();
        let mut handles = Vec::new();
        for n in 0..3 {
            handles.push(
                queue
                    .submit(Unit::async_result(move || async move { Ok(n) }), 1, CancelToken::new())
                    .expect("valid attempts"),
            );
        }
        let results = await_all(handles).await;
        assert_eq!(
            results.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        queue.stop(Duration::from_secs(1)).await;
    }

    struct PlainResource {
        count: AtomicU32,
    }
    impl Resource for PlainResource {}

    #[tokio::test]
    async fn access_queue_reusable_shares_one_resource() {
        let resource = Arc::new(PlainResource {
            count: AtomicU32::new(0),
        });
        let for_factory = Arc::clone(&resource);
        let queue: AccessQueue<PlainResource, ()> =
            AccessQueue::reusable(Arc::new(move || Arc::clone(&for_factory)), Config::default());
        queue.start();

        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(
                queue
                    .submit(
                        AccessUnit::sync(|arg: Arc<PlainResource>| {
                            arg.count.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }),
                        1,
                        CancelToken::new(),
                    )
                    .expect("valid attempts"),
            );
        }
        await_all(handles).await;
        assert_eq!(resource.count.load(Ordering::SeqCst), 4);
        queue.stop(Duration::from_secs(1)).await;
    }

    struct Doubler;
    #[async_trait]
    impl ConveyorMachine<u32, u32> for Doubler {
        async fn process(&self, datum: u32) -> std::result::Result<u32, TaskError> {
            Ok(datum * 2)
        }
    }

    #[tokio::test]
    async fn conveyor_processes_every_datum_through_the_same_machine() {
        let conveyor: Conveyor<u32, u32> = Conveyor::new(Arc::new(Doubler), Config::default());
        conveyor.start();
        let handles = conveyor
            .add_batch(vec![1, 2, 3], 1, CancelToken::new())
            .expect("valid attempts");
        let results = await_all(handles).await;
        assert_eq!(
            results.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
            vec![2, 4, 6]
        );
        conveyor.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn submit_with_zero_attempts_is_rejected_synchronously() {
        let queue: WorkQueue<()> = WorkQueue::new(Config::default());
        let err = queue
            .submit(Unit::async_void(|| async {}), 0, CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, TaskError::OutOfRange(_)));
    }

    #[tokio::test]
    async fn startup_work_collects_first_error_after_running_all() {
        let mut startup = StartupWork::new();
        let ran = Arc::new(AtomicU32::new(0));
        let r1 = Arc::clone(&ran);
        startup.register(
            "ok",
            Unit::async_void(move || {
                let r1 = Arc::clone(&r1);
                async move {
                    r1.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        let r2 = Arc::clone(&ran);
        startup.register(
            "fails",
            Unit::sync_result(move || {
                r2.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::BusinessError {
                    task_id: uuid::Uuid::nil(),
                    message: "boom".into(),
                })
            }),
        );
        let result = startup.run_all(ServiceContext::new()).await;
        assert!(result.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }
}
