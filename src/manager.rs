//! `TaskManager`: the queue-side owner of [`TaskWrapper`]s.

use std::sync::Arc;

use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use tokio::sync::Notify;

use crate::cancel::CancelToken;
use crate::wrapper::TaskWrapper;

/// Owns a collection of `TaskWrapper<A, R>` and schedules them onto workers.
///
/// `M` is opaque metadata returned by [`TaskManager::take`] and threaded
/// back through [`TaskManager::revert`] so a priority variant can restore
/// the wrapper to the lane it came from.
#[async_trait]
pub trait TaskManager<A, R>: Send + Sync
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Opaque per-take metadata (e.g. which priority lane a wrapper came
    /// from).
    type Metadata: Send + Sync + Clone + 'static;

    /// File a freshly-created wrapper into the default container and wake
    /// one waiter.
    fn submit(&self, wrapper: Arc<TaskWrapper<A, R>>);

    /// True iff at least one container currently holds a wrapper.
    fn has_task(&self) -> bool;

    /// Suspend until `has_task()` would return `true`, or `cancellation`
    /// fires. Returns immediately if work is already available.
    async fn wait_for_task(&self, cancellation: &CancelToken);

    /// Take the next eligible wrapper, skipping (and resolving) any whose
    /// inner cancellation already fired.
    fn take(&self) -> Option<(Arc<TaskWrapper<A, R>>, Self::Metadata)>;

    /// Re-file a wrapper after a transient failure, restoring it to the
    /// container identified by `metadata` and waking one waiter.
    fn revert(&self, wrapper: Arc<TaskWrapper<A, R>>, metadata: Self::Metadata);
}

/// Single-lane FIFO manager: the non-priority queue variant.
pub struct FifoTaskManager<A, R> {
    queue: SegQueue<Arc<TaskWrapper<A, R>>>,
    notify: Notify,
}

impl<A, R> Default for FifoTaskManager<A, R> {
    fn default() -> Self {
        Self {
            queue: SegQueue::new(),
            notify: Notify::new(),
        }
    }
}

impl<A, R> FifoTaskManager<A, R> {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<A, R> TaskManager<A, R> for FifoTaskManager<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    type Metadata = ();

    fn submit(&self, wrapper: Arc<TaskWrapper<A, R>>) {
        tracing::debug!(task_id = %wrapper.id(), "task submitted to fifo manager");
        self.queue.push(wrapper);
        self.notify.notify_one();
    }

    fn has_task(&self) -> bool {
        !self.queue.is_empty()
    }

    async fn wait_for_task(&self, cancellation: &CancelToken) {
        if self.has_task() {
            return;
        }
        tokio::select! {
            () = self.notify.notified() => {}
            () = cancellation.cancelled() => {}
        }
    }

    fn take(&self) -> Option<(Arc<TaskWrapper<A, R>>, ())> {
        loop {
            let wrapper = self.queue.pop()?;
            if wrapper.is_canceled() {
                let w = Arc::clone(&wrapper);
                tokio::spawn(async move {
                    w.resolve_cancelled_if_pending().await;
                });
                continue;
            }
            return Some((wrapper, ()));
        }
    }

    fn revert(&self, wrapper: Arc<TaskWrapper<A, R>>, _metadata: ()) {
        tracing::debug!(task_id = %wrapper.id(), "task reverted to fifo manager");
        self.queue.push(wrapper);
        self.notify.notify_one();
    }
}

/// Priority lane index, used as the `Metadata` of a
/// [`PriorityTaskManager`]'s `take`/`revert` pair.
pub type PriorityLane = u32;

/// Strict-priority manager: `max_priority + 1` FIFO lanes, scanned high to
/// low with no aging.
pub struct PriorityTaskManager<A, R> {
    lanes: Vec<SegQueue<Arc<TaskWrapper<A, R>>>>,
    notify: Notify,
    max_priority: PriorityLane,
}

impl<A, R> PriorityTaskManager<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Create a manager with lanes `0..=max_priority`.
    #[must_use]
    pub fn new(max_priority: PriorityLane) -> Self {
        let lanes = (0..=max_priority).map(|_| SegQueue::new()).collect();
        Self {
            lanes,
            notify: Notify::new(),
            max_priority,
        }
    }

    /// The highest priority lane this manager accepts.
    #[must_use]
    pub fn max_priority(&self) -> PriorityLane {
        self.max_priority
    }

    /// Submit into a specific priority lane (clamped by the caller via
    /// [`crate::config::Config::clamp_priority`]).
    pub fn submit_with_priority(&self, wrapper: Arc<TaskWrapper<A, R>>, priority: PriorityLane) {
        let lane = priority.min(self.max_priority) as usize;
        tracing::debug!(task_id = %wrapper.id(), priority = lane, "task submitted to priority manager");
        self.lanes[lane].push(wrapper);
        self.notify.notify_one();
    }
}

#[async_trait]
impl<A, R> TaskManager<A, R> for PriorityTaskManager<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    type Metadata = PriorityLane;

    fn submit(&self, wrapper: Arc<TaskWrapper<A, R>>) {
        self.submit_with_priority(wrapper, 0);
    }

    fn has_task(&self) -> bool {
        self.lanes.iter().any(|lane| !lane.is_empty())
    }

    async fn wait_for_task(&self, cancellation: &CancelToken) {
        if self.has_task() {
            return;
        }
        tokio::select! {
            () = self.notify.notified() => {}
            () = cancellation.cancelled() => {}
        }
    }

    fn take(&self) -> Option<(Arc<TaskWrapper<A, R>>, PriorityLane)> {
        for lane in (0..=self.max_priority).rev() {
            loop {
                let Some(wrapper) = self.lanes[lane as usize].pop() else {
                    break;
                };
                if wrapper.is_canceled() {
                    let w = Arc::clone(&wrapper);
                    tokio::spawn(async move {
                        w.resolve_cancelled_if_pending().await;
                    });
                    continue;
                }
                return Some((wrapper, lane));
            }
        }
        None
    }

    fn revert(&self, wrapper: Arc<TaskWrapper<A, R>>, metadata: PriorityLane) {
        // Re-files at the tail of its original priority lane, deliberately
        // behind any newer same-priority work: this prevents a poison unit
        // from starving the lane, at the cost of no starvation guarantee for
        // the retried unit itself.
        let lane = metadata.min(self.max_priority) as usize;
        tracing::debug!(task_id = %wrapper.id(), priority = lane, "task reverted to priority manager");
        self.lanes[lane].push(wrapper);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServiceContext;
    use crate::wrapper::UnitFn;

    fn unit_of(n: u32, out: Arc<tokio::sync::Mutex<Vec<u32>>>) -> UnitFn<(), ()> {
        Arc::new(move |_arg, _ctx, _cancel| {
            let out = Arc::clone(&out);
            Box::pin(async move {
                out.lock().await.push(n);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn fifo_manager_take_respects_submission_order() {
        let manager: FifoTaskManager<(), ()> = FifoTaskManager::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        for n in 0..3 {
            let (wrapper, _handle) = TaskWrapper::new(unit_of(n, Arc::clone(&order)), 1, CancelToken::new());
            manager.submit(wrapper);
        }
        let outer = CancelToken::new();
        for _ in 0..3 {
            let (wrapper, _meta) = manager.take().expect("has task");
            wrapper.execute((), ServiceContext::new(), &outer).await;
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn priority_manager_scans_high_to_low() {
        let manager: PriorityTaskManager<(), ()> = PriorityTaskManager::new(10);
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let priorities = [0u32, 0, 1, 2];
        for (i, p) in priorities.iter().enumerate() {
            let (wrapper, _handle) = TaskWrapper::new(unit_of(i as u32, Arc::clone(&order)), 1, CancelToken::new());
            manager.submit_with_priority(wrapper, *p);
        }
        let outer = CancelToken::new();
        for _ in 0..4 {
            let (wrapper, _meta) = manager.take().expect("has task");
            wrapper.execute((), ServiceContext::new(), &outer).await;
        }
        // priority 2 (index 3) first, then priority 1 (index 2), then the two
        // priority-0 tasks (index 0, 1) in submission order.
        assert_eq!(*order.lock().await, vec![3, 2, 0, 1]);
    }

    #[tokio::test]
    async fn canceled_wrapper_is_skipped_and_resolved() {
        let manager: FifoTaskManager<(), ()> = FifoTaskManager::new();
        let inner = CancelToken::new();
        let (wrapper, handle) = TaskWrapper::new(unit_of(0, Arc::new(tokio::sync::Mutex::new(Vec::new()))), 1, inner.clone());
        inner.cancel();
        manager.submit(wrapper);
        assert!(manager.take().is_none());
        assert!(matches!(
            handle.await,
            Err(crate::error::TaskError::Cancelled { .. })
        ));
    }
}
