//! The time-driven dispatcher: delayed, repeated, and cron schedules.
//!
//! A [`WorkScheduler`] owns a [`SchedulerStore`] of live
//! [`ScheduledTaskWrapper`] entries and runs a single background dispatcher
//! loop, grounded on the same `Arc`-wrapped, `Notify`-woken shape the rest of
//! this codebase's worker loop uses. The loop scans entries due within a
//! configurable look-ahead horizon, arms a precise timer once an entry is
//! within its "beforehand" slack of firing, and otherwise sleeps until the
//! next scan or a new entry changes the picture.
//!
//! A delayed entry executes the single [`TaskWrapper`] created at submission
//! time -- the handle already handed to the caller resolves automatically
//! when that wrapper completes. A repeated or cron entry has no single
//! wrapper to hand out up front (there will be many occurrences), so instead
//! it hands out a [`StreamHandle`] and builds a fresh `TaskWrapper` -- with a
//! fresh retry budget -- for every occurrence.

mod cron;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Local, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::context::ServiceContext;
use crate::error::{Result, TaskError};
use crate::stream::{StreamHandle, StreamSource};
use crate::wrapper::{ExecuteResult, TaskHandle, TaskWrapper, UnitFn};

/// Re-exported so callers can build cron expressions without depending on
/// the `cron` crate directly.
pub use cron::parse as parse_cron;

/// How many more times a repeated/cron schedule should fire.
#[derive(Debug, Clone, Copy)]
enum RemainingExecutions {
    Unlimited,
    Count(u32),
}

impl RemainingExecutions {
    fn from_exec_count(exec_count: i64) -> Result<Self> {
        match exec_count {
            -1 => Ok(Self::Unlimited),
            n if n >= 1 => Ok(Self::Count(n as u32)),
            other => Err(TaskError::OutOfRange(format!(
                "execCount must be -1 (unlimited) or >= 1, got {other}"
            ))),
        }
    }

    /// Consume one occurrence. `None` means this was the last one.
    fn tick(self) -> Option<Self> {
        match self {
            Self::Unlimited => Some(Self::Unlimited),
            Self::Count(1) => None,
            Self::Count(n) => Some(Self::Count(n - 1)),
        }
    }
}

enum ScheduleBody<R> {
    Delayed {
        wrapper: Arc<TaskWrapper<(), R>>,
    },
    Repeated {
        unit: UnitFn<(), R>,
        attempts: u32,
        inner_cancel: CancelToken,
        period: StdDuration,
        remaining: RemainingExecutions,
        stream: Arc<StreamSource<R>>,
    },
    Cron {
        unit: UnitFn<(), R>,
        attempts: u32,
        inner_cancel: CancelToken,
        schedule: ::cron::Schedule,
        remaining: RemainingExecutions,
        stream: Arc<StreamSource<R>>,
    },
}

/// One live schedule entry: a due time plus enough state to run the next
/// occurrence and compute the one after it.
struct ScheduledTaskWrapper<R> {
    id: Uuid,
    next_time: StdMutex<DateTime<Local>>,
    armed: AtomicBool,
    body: StdMutex<Option<ScheduleBody<R>>>,
}

impl<R: Clone + Send + Sync + 'static> ScheduledTaskWrapper<R> {
    fn due_at(&self) -> DateTime<Local> {
        *self.next_time.lock().expect("next_time lock poisoned")
    }

    /// Run one occurrence to completion, retrying within this call until the
    /// wrapper is `Done` or the host is shutting down (in which case this
    /// returns `None` and the occurrence's future is left pending, per the
    /// documented shutdown behavior for un-executed units).
    async fn run_existing(wrapper: &Arc<TaskWrapper<(), R>>, ctx: &ServiceContext, outer: &CancelToken) -> bool {
        loop {
            let result = wrapper.execute((), ctx.child_scope(), outer).await;
            if result == ExecuteResult::Done {
                return true;
            }
            if outer.is_cancelled() {
                return false;
            }
        }
    }

    async fn run_fresh(
        unit: UnitFn<(), R>,
        attempts: u32,
        inner_cancel: CancelToken,
        ctx: &ServiceContext,
        outer: &CancelToken,
    ) -> Option<std::result::Result<R, TaskError>> {
        let (wrapper, handle) = TaskWrapper::new(unit, attempts, inner_cancel);
        if !Self::run_existing(&wrapper, ctx, outer).await {
            return None;
        }
        Some(handle.await)
    }

    /// Execute the due occurrence, then reschedule or retire this entry.
    /// Returns `true` if the entry should remain in the store (rescheduled).
    async fn fire(self: &Arc<Self>, ctx: ServiceContext, outer: &CancelToken) -> bool {
        self.armed.store(false, Ordering::SeqCst);
        let body = self.body.lock().expect("body lock poisoned").take();
        let Some(body) = body else {
            return false;
        };

        match body {
            ScheduleBody::Delayed { wrapper } => {
                Self::run_existing(&wrapper, &ctx, outer).await;
                false
            }
            ScheduleBody::Repeated {
                unit,
                attempts,
                inner_cancel,
                period,
                remaining,
                stream,
            } => {
                let outcome = Self::run_fresh(Arc::clone(&unit), attempts, inner_cancel.clone(), &ctx, outer).await;
                let Some(outcome) = outcome else {
                    stream.complete();
                    return false;
                };
                match outcome {
                    Ok(value) => stream.next(value),
                    Err(TaskError::Cancelled { .. }) => {
                        stream.complete();
                        return false;
                    }
                    Err(err) => stream.error(err),
                }
                match remaining.tick() {
                    None => {
                        stream.complete();
                        false
                    }
                    Some(remaining) => {
                        *self.next_time.lock().expect("next_time lock poisoned") += period;
                        *self.body.lock().expect("body lock poisoned") = Some(ScheduleBody::Repeated {
                            unit,
                            attempts,
                            inner_cancel,
                            period,
                            remaining,
                            stream,
                        });
                        true
                    }
                }
            }
            ScheduleBody::Cron {
                unit,
                attempts,
                inner_cancel,
                schedule,
                remaining,
                stream,
            } => {
                let outcome = Self::run_fresh(Arc::clone(&unit), attempts, inner_cancel.clone(), &ctx, outer).await;
                let Some(outcome) = outcome else {
                    stream.complete();
                    return false;
                };
                match outcome {
                    Ok(value) => stream.next(value),
                    Err(TaskError::Cancelled { .. }) => {
                        stream.complete();
                        return false;
                    }
                    Err(err) => stream.error(err),
                }
                let next_remaining = remaining.tick();
                let next_fire = cron::next_occurrence_local(&schedule, Utc::now());
                match (next_remaining, next_fire) {
                    (Some(remaining), Some(next_fire)) => {
                        *self.next_time.lock().expect("next_time lock poisoned") = next_fire;
                        *self.body.lock().expect("body lock poisoned") = Some(ScheduleBody::Cron {
                            unit,
                            attempts,
                            inner_cancel,
                            schedule,
                            remaining,
                            stream,
                        });
                        true
                    }
                    _ => {
                        stream.complete();
                        false
                    }
                }
            }
        }
    }
}

struct SchedulerStore<R> {
    entries: DashMap<Uuid, Arc<ScheduledTaskWrapper<R>>>,
    changed: Notify,
}

impl<R> SchedulerStore<R> {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            changed: Notify::new(),
        }
    }

    fn insert(&self, entry: Arc<ScheduledTaskWrapper<R>>) {
        self.entries.insert(entry.id, entry);
        self.changed.notify_waiters();
    }

    fn remove(&self, id: Uuid) {
        self.entries.remove(&id);
    }

    fn snapshot(&self) -> Vec<Arc<ScheduledTaskWrapper<R>>>
    where
        R: Clone + Send + Sync + 'static,
    {
        self.entries.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

/// The time-driven counterpart to a [`crate::manager::TaskManager`]: holds
/// delayed, repeated, and cron entries and dispatches each as it becomes
/// due.
pub struct WorkScheduler<R> {
    store: Arc<SchedulerStore<R>>,
    context: ServiceContext,
    config: Config,
    shutdown: CancelToken,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<R: Clone + Send + Sync + 'static> WorkScheduler<R> {
    /// Build a scheduler bound to `context`, not yet running.
    #[must_use]
    pub fn new(context: ServiceContext, config: Config) -> Self {
        Self {
            store: Arc::new(SchedulerStore::new()),
            context,
            config,
            shutdown: CancelToken::new(),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawn the background dispatcher loop.
    pub async fn start(&self) {
        let store = Arc::clone(&self.store);
        let ctx = self.context.clone();
        let shutdown = self.shutdown.clone();
        let horizon = self.config.scheduler_horizon;
        let beforehand = self.config.scheduler_beforehand;

        let join = tokio::spawn(async move {
            tracing::info!("scheduler dispatcher started");
            loop {
                if shutdown.is_cancelled() {
                    break;
                }

                let now = Local::now();
                let mut nearest_wake = horizon;
                for entry in store.snapshot() {
                    let due = entry.due_at();
                    let until_due = (due - now).to_std().unwrap_or(StdDuration::ZERO);
                    if until_due > horizon {
                        continue;
                    }
                    if until_due <= beforehand && !entry.armed.swap(true, Ordering::SeqCst) {
                        let store = Arc::clone(&store);
                        let ctx = ctx.child_scope();
                        let shutdown = shutdown.clone();
                        let entry = Arc::clone(&entry);
                        tokio::spawn(async move {
                            if !until_due.is_zero() {
                                tokio::time::sleep(until_due).await;
                            }
                            if entry.fire(ctx, &shutdown).await {
                                store.changed.notify_waiters();
                            } else {
                                store.remove(entry.id);
                            }
                        });
                    } else {
                        nearest_wake = nearest_wake.min(until_due.saturating_sub(beforehand).max(StdDuration::from_millis(1)));
                    }
                }

                tokio::select! {
                    () = store.changed.notified() => {}
                    () = tokio::time::sleep(nearest_wake) => {}
                    () = shutdown.cancelled() => break,
                }
            }
            tracing::info!("scheduler dispatcher stopped");
        });

        *self.handle.lock().await = Some(join);
    }

    /// Signal shutdown and await the dispatcher, up to `deadline`.
    pub async fn stop(&self, deadline: StdDuration) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(deadline, handle).await.is_err() {
                tracing::warn!("scheduler dispatcher did not stop within deadline");
            }
        }
    }

    /// Schedule a one-shot unit to run at `at`. Returns the future resolving
    /// to its outcome, available immediately.
    pub fn add_delayed_work(
        &self,
        unit: UnitFn<(), R>,
        attempts: u32,
        at: DateTime<Local>,
        inner_cancel: CancelToken,
    ) -> Result<TaskHandle<R>> {
        if at <= Local::now() {
            return Err(TaskError::OutOfRange(
                "scheduled time must be in the future".into(),
            ));
        }
        let attempts = self.config.clamp_attempts(attempts)?;
        let (wrapper, handle) = TaskWrapper::new(unit, attempts, inner_cancel);
        let entry = Arc::new(ScheduledTaskWrapper {
            id: wrapper.id(),
            next_time: StdMutex::new(at),
            armed: AtomicBool::new(false),
            body: StdMutex::new(Some(ScheduleBody::Delayed { wrapper })),
        });
        self.store.insert(entry);
        Ok(handle)
    }

    /// Schedule a repeating unit starting at `start_at`, firing every
    /// `period`, for `exec_count` occurrences (`-1` for unlimited). Returns a
    /// push-stream of each occurrence's outcome.
    pub fn add_repeated_work(
        &self,
        unit: UnitFn<(), R>,
        attempts: u32,
        start_at: DateTime<Local>,
        period: StdDuration,
        exec_count: i64,
        inner_cancel: CancelToken,
    ) -> Result<StreamHandle<R>> {
        if start_at <= Local::now() {
            return Err(TaskError::OutOfRange("startAt must be in the future".into()));
        }
        if period.is_zero() {
            return Err(TaskError::OutOfRange("period must be greater than zero".into()));
        }
        let remaining = RemainingExecutions::from_exec_count(exec_count)?;
        let attempts = self.config.clamp_attempts(attempts)?;
        let stream = Arc::new(StreamSource::new(16));
        let handle = stream.handle();
        let entry = Arc::new(ScheduledTaskWrapper {
            id: Uuid::now_v7(),
            next_time: StdMutex::new(start_at),
            armed: AtomicBool::new(false),
            body: StdMutex::new(Some(ScheduleBody::Repeated {
                unit,
                attempts,
                inner_cancel,
                period,
                remaining,
                stream,
            })),
        });
        self.store.insert(entry);
        Ok(handle)
    }

    /// Schedule a unit on a cron expression (5- or 6-field), for
    /// `exec_count` occurrences (`-1` for unlimited). Returns a push-stream
    /// of each occurrence's outcome.
    pub fn add_cron_work(
        &self,
        unit: UnitFn<(), R>,
        attempts: u32,
        cron_expr: &str,
        exec_count: i64,
        inner_cancel: CancelToken,
    ) -> Result<StreamHandle<R>> {
        let schedule = cron::parse(cron_expr)?;
        let remaining = RemainingExecutions::from_exec_count(exec_count)?;
        let Some(next_fire) = cron::next_occurrence_local(&schedule, Utc::now()) else {
            return Err(TaskError::InvalidArgument(format!(
                "cron expression `{cron_expr}` has no future occurrence"
            )));
        };
        let attempts = self.config.clamp_attempts(attempts)?;
        let stream = Arc::new(StreamSource::new(16));
        let handle = stream.handle();
        let entry = Arc::new(ScheduledTaskWrapper {
            id: Uuid::now_v7(),
            next_time: StdMutex::new(next_fire),
            armed: AtomicBool::new(false),
            body: StdMutex::new(Some(ScheduleBody::Cron {
                unit,
                attempts,
                inner_cancel,
                schedule,
                remaining,
                stream,
            })),
        });
        self.store.insert(entry);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamItem;
    use crate::unit::Unit;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn delayed_work_resolves_after_its_due_time() {
        let scheduler: WorkScheduler<u32> = WorkScheduler::new(
            ServiceContext::new(),
            Config {
                scheduler_horizon: Duration::from_secs(1),
                scheduler_beforehand: Duration::from_millis(50),
                ..Config::default()
            },
        );
        scheduler.start().await;

        let at = Local::now() + chrono::Duration::milliseconds(150);
        let handle = scheduler
            .add_delayed_work(Unit::async_result(|| async { Ok(7) }), 1, at, CancelToken::new())
            .expect("valid schedule");

        let started = std::time::Instant::now();
        let value = handle.await.expect("resolves");
        assert_eq!(value, 7);
        assert!(started.elapsed() >= Duration::from_millis(100));
        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn repeated_work_fires_exec_count_times_then_completes() {
        let scheduler: WorkScheduler<u32> = WorkScheduler::new(
            ServiceContext::new(),
            Config {
                scheduler_horizon: Duration::from_secs(1),
                scheduler_beforehand: Duration::from_millis(20),
                ..Config::default()
            },
        );
        scheduler.start().await;

        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let start_at = Local::now() + chrono::Duration::milliseconds(100);
        let mut handle = scheduler
            .add_repeated_work(
                Unit::async_result(move || {
                    let c = Arc::clone(&c);
                    async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1) }
                }),
                1,
                start_at,
                Duration::from_millis(120),
                4,
                CancelToken::new(),
            )
            .expect("valid schedule");

        let mut values = Vec::new();
        loop {
            match handle.recv().await {
                Some(StreamItem::Next(v)) => values.push(*v),
                Some(StreamItem::Complete) => break,
                Some(StreamItem::Error(_)) => {}
                None => break,
            }
        }
        assert_eq!(values, vec![1, 2, 3, 4]);
        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn inner_cancelled_repeated_work_completes_instead_of_repeating_forever() {
        let scheduler: WorkScheduler<u32> = WorkScheduler::new(
            ServiceContext::new(),
            Config {
                scheduler_horizon: Duration::from_secs(1),
                scheduler_beforehand: Duration::from_millis(20),
                ..Config::default()
            },
        );
        scheduler.start().await;

        let inner_cancel = CancelToken::new();
        inner_cancel.cancel();
        let start_at = Local::now() + chrono::Duration::milliseconds(50);
        let mut handle = scheduler
            .add_repeated_work(
                Unit::async_result(|| async { Ok(1) }),
                1,
                start_at,
                Duration::from_millis(50),
                -1,
                inner_cancel,
            )
            .expect("valid schedule");

        let first = handle.recv().await;
        assert!(matches!(first, Some(StreamItem::Complete)));
        scheduler.stop(Duration::from_secs(1)).await;
    }
}
