//! Processor variants: the worker-side consumers that acquire an argument
//! and drive [`TaskWrapper::execute`] until a manager's containers are
//! empty.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, Notify};

use crate::argument::Resource;
use crate::cancel::CancelToken;
use crate::context::ServiceContext;
use crate::manager::TaskManager;
use crate::wrapper::ExecuteResult;

/// The unit itself is the argument; nothing is acquired.
///
/// `concurrency == 1` gives the single-worker variant; `concurrency > 1`
/// spawns that many concurrent take-execute cycles sharing one manager.
pub struct NullProcessor {
    concurrency: u32,
}

impl NullProcessor {
    /// Build a processor with the given fan-out (clamped to at least 1).
    #[must_use]
    pub fn new(concurrency: u32) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Drain `manager` until it is empty or `outer` is cancelled.
    pub async fn drain<TM, R>(&self, manager: &TM, ctx: &ServiceContext, outer: &CancelToken)
    where
        TM: TaskManager<(), R>,
        R: Send + 'static,
    {
        if self.concurrency <= 1 {
            Self::drain_one(manager, ctx, outer).await;
            return;
        }
        let lanes: Vec<_> = (0..self.concurrency)
            .map(|_| Self::drain_one(manager, ctx, outer))
            .collect();
        join_all(lanes).await;
    }

    async fn drain_one<TM, R>(manager: &TM, ctx: &ServiceContext, outer: &CancelToken)
    where
        TM: TaskManager<(), R>,
        R: Send + 'static,
    {
        while manager.has_task() && !outer.is_cancelled() {
            let Some((wrapper, meta)) = manager.take() else {
                break;
            };
            let result = wrapper.execute((), ctx.child_scope(), outer).await;
            if result == ExecuteResult::Retry {
                manager.revert(wrapper, meta);
            }
        }
    }
}

/// A single resource, either kept alive across batches (reusable) or
/// recreated every batch (transient).
pub struct SingleResourceProcessor<T: Resource + ?Sized> {
    factory: Arc<dyn Fn() -> Arc<T> + Send + Sync>,
    transient: bool,
    retained: Mutex<Option<Arc<T>>>,
}

impl<T: Resource + ?Sized> SingleResourceProcessor<T> {
    /// One argument, produced once, kept alive for the worker's lifetime.
    #[must_use]
    pub fn reusable(factory: Arc<dyn Fn() -> Arc<T> + Send + Sync>) -> Self {
        Self {
            factory,
            transient: false,
            retained: Mutex::new(None),
        }
    }

    /// A fresh argument produced per drain batch.
    #[must_use]
    pub fn transient(factory: Arc<dyn Fn() -> Arc<T> + Send + Sync>) -> Self {
        Self {
            factory,
            transient: true,
            retained: Mutex::new(None),
        }
    }

    async fn acquire(&self) -> Arc<T> {
        if self.transient {
            return (self.factory)();
        }
        let mut guard = self.retained.lock().await;
        if guard.is_none() {
            *guard = Some((self.factory)());
        }
        Arc::clone(guard.as_ref().expect("just populated"))
    }

    /// Drain `manager` until it is empty or `outer` is cancelled.
    pub async fn drain<TM, R>(&self, manager: &TM, ctx: &ServiceContext, outer: &CancelToken)
    where
        TM: TaskManager<Arc<T>, R>,
        R: Send + 'static,
    {
        let argument = self.acquire().await;

        if let Some(activatable) = argument.as_activatable() {
            if !activatable.is_active() {
                if let Err(err) = activatable.activate().await {
                    tracing::error!(%err, "resource activation failed, leaving tasks queued");
                    return;
                }
            }
        }

        while manager.has_task() && !outer.is_cancelled() {
            let Some((wrapper, meta)) = manager.take() else {
                break;
            };
            let result = wrapper
                .execute(Arc::clone(&argument), ctx.child_scope(), outer)
                .await;
            if result == ExecuteResult::Retry {
                manager.revert(wrapper, meta);
            }
            if let Some(throttling) = argument.as_throttling() {
                tokio::time::sleep(throttling.timeout()).await;
            }
        }

        if argument.as_activatable().is_some() {
            let argument = Arc::clone(&argument);
            tokio::spawn(async move {
                if let Some(activatable) = argument.as_activatable() {
                    if let Err(err) = activatable.deactivate().await {
                        tracing::error!(%err, "resource deactivation failed");
                    }
                }
            });
        }
    }
}

/// A fixed pool of resources, each used by at most one task at a time,
/// partitioned into `active`/`inactive` bags.
pub struct MultiStaticProcessor<T: Resource> {
    active: crossbeam::queue::SegQueue<Arc<T>>,
    inactive: crossbeam::queue::SegQueue<Arc<T>>,
    pool_reset: Notify,
    teardown_gate: Mutex<()>,
    size: usize,
}

impl<T: Resource> MultiStaticProcessor<T> {
    /// Build a pool from a fixed set of resources, all initially inactive.
    #[must_use]
    pub fn new(resources: Vec<Arc<T>>) -> Self {
        let size = resources.len();
        let inactive = crossbeam::queue::SegQueue::new();
        for r in resources {
            inactive.push(r);
        }
        Self {
            active: crossbeam::queue::SegQueue::new(),
            inactive,
            pool_reset: Notify::new(),
            teardown_gate: Mutex::new(()),
            size,
        }
    }

    fn return_argument(&self, argument: Arc<T>) {
        let running = argument.as_stoppable().map_or(true, |s| s.is_running());
        if running {
            self.active.push(argument);
        } else {
            self.inactive.push(argument);
        }
    }

    /// Drain `manager` until it is empty or `outer` is cancelled.
    ///
    /// Spawns up to `size` concurrent lanes (the same fan-out pattern
    /// [`NullProcessor::drain`] uses), one per pool resource, so the pool
    /// actually delivers parallel throughput instead of serializing through
    /// a single resource at a time. Takes `self` as an `Arc` because the
    /// post-drain teardown step (opportunistically stopping every resource
    /// still running after the drain completes) runs detached and needs to
    /// outlive this call.
    pub async fn drain<TM, R>(self: &Arc<Self>, manager: &TM, ctx: &ServiceContext, outer: &CancelToken)
    where
        TM: TaskManager<Arc<T>, R>,
        R: Send + 'static,
    {
        // A fresh batch only begins once any in-flight teardown from the
        // previous batch has completed.
        let _ = self.teardown_gate.lock().await;

        let lanes: Vec<_> = (0..self.size.max(1))
            .map(|_| self.drain_one(manager, ctx, outer))
            .collect();
        join_all(lanes).await;

        self.teardown_active_async();
    }

    async fn drain_one<TM, R>(&self, manager: &TM, ctx: &ServiceContext, outer: &CancelToken)
    where
        TM: TaskManager<Arc<T>, R>,
        R: Send + 'static,
    {
        loop {
            if outer.is_cancelled() || !manager.has_task() {
                break;
            }

            let argument = match self.active.pop().or_else(|| self.inactive.pop()) {
                Some(a) => a,
                None => {
                    self.pool_reset.notified().await;
                    continue;
                }
            };

            let Some((wrapper, meta)) = manager.take() else {
                self.return_argument(argument);
                self.pool_reset.notify_one();
                continue;
            };

            if let Some(stoppable) = argument.as_stoppable() {
                if !stoppable.is_running() {
                    if let Err(err) = stoppable.start().await {
                        tracing::error!(%err, "resource start failed, reverting task");
                        manager.revert(wrapper, meta);
                        self.inactive.push(argument);
                        self.pool_reset.notify_one();
                        continue;
                    }
                }
            }

            let result = wrapper
                .execute(Arc::clone(&argument), ctx.child_scope(), outer)
                .await;
            if result == ExecuteResult::Retry {
                manager.revert(wrapper, meta);
            }
            if let Some(throttling) = argument.as_throttling() {
                tokio::time::sleep(throttling.timeout()).await;
            }

            self.return_argument(argument);
            self.pool_reset.notify_one();
        }
    }

    fn teardown_active_async(self: &Arc<Self>) {
        let mut drained = Vec::new();
        while let Some(arg) = self.active.pop() {
            drained.push(arg);
        }
        if drained.is_empty() {
            return;
        }
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = pool.teardown_gate.lock().await;
            for arg in drained {
                if let Some(stoppable) = arg.as_stoppable() {
                    if let Err(err) = stoppable.stop().await {
                        tracing::error!(%err, "resource stop failed during teardown");
                    }
                }
                pool.inactive.push(arg);
            }
            pool.pool_reset.notify_one();
        });
    }
}
