//! `TaskWrapper<A, R>`: the one-shot envelope between a submitter, a queue,
//! and a worker.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

use crate::cancel::{CancelSource, CancelToken};
use crate::context::ServiceContext;
use crate::error::TaskError;

/// A boxed, `Send` future, the shape every unit callable must return.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The callable a [`TaskWrapper`] invokes on each attempt.
///
/// `A` is the argument the processor hands in (`()` for work queues, a
/// shared resource for access queues, a conveyor machine for conveyors).
pub type UnitFn<A, R> =
    Arc<dyn Fn(A, ServiceContext, CancelToken) -> BoxFuture<std::result::Result<R, TaskError>> + Send + Sync>;

/// The terminal outcome of a wrapper, delivered exactly once.
#[derive(Debug, Clone)]
pub enum Outcome<R> {
    /// The unit ran to completion with a value (`()` for void units).
    Value(R),
    /// The unit raised a business error, or attempts were exhausted.
    Error(TaskError),
    /// The wrapper was cancelled by its caller-supplied (inner) token.
    Cancelled,
}

impl<R> Outcome<R> {
    /// Collapse into the `Result` shape most callers want: cancellation and
    /// business errors both become `Err`.
    pub fn into_result(self) -> std::result::Result<R, TaskError> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Error(e) => Err(e),
            Outcome::Cancelled => Err(TaskError::Cancelled {
                task_id: Uuid::nil(),
            }),
        }
    }
}

/// What a single [`TaskWrapper::execute`] call tells its caller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteResult {
    /// The wrapper reached a terminal state (resolved or exhausted); the
    /// caller must not hold onto it any further.
    Done,
    /// A transient failure occurred; the caller should `revert` the wrapper
    /// back into its manager.
    Retry,
}

/// A future-like handle returned to the submitter. Resolves to the
/// wrapper's [`Outcome`] collapsed into a `Result`.
pub struct TaskHandle<R> {
    rx: oneshot::Receiver<Outcome<R>>,
}

impl<R> Future for TaskHandle<R> {
    type Output = std::result::Result<R, TaskError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            std::task::Poll::Ready(Ok(outcome)) => std::task::Poll::Ready(outcome.into_result()),
            std::task::Poll::Ready(Err(_)) => std::task::Poll::Ready(Err(TaskError::Cancelled {
                task_id: Uuid::nil(),
            })),
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

struct Completion<R> {
    sender: Mutex<Option<oneshot::Sender<Outcome<R>>>>,
    completed: AtomicBool,
    faulted: AtomicBool,
}

/// The envelope carrying a unit plus its retry budget, cancellation link,
/// and completion slot.
pub struct TaskWrapper<A, R> {
    id: Uuid,
    call: UnitFn<A, R>,
    attempts_remaining: AtomicU32,
    inner_cancel: CancelToken,
    completion: Completion<R>,
}

impl<A, R> TaskWrapper<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Build a new wrapper and its paired [`TaskHandle`].
    ///
    /// `attempts` must already be clamped by the caller (queues clamp via
    /// [`crate::config::Config::clamp_attempts`] before reaching here).
    #[must_use]
    pub fn new(call: UnitFn<A, R>, attempts: u32, inner_cancel: CancelToken) -> (Arc<Self>, TaskHandle<R>) {
        let (tx, rx) = oneshot::channel();
        let wrapper = Arc::new(Self {
            id: Uuid::now_v7(),
            call,
            attempts_remaining: AtomicU32::new(attempts.max(1)),
            inner_cancel,
            completion: Completion {
                sender: Mutex::new(Some(tx)),
                completed: AtomicBool::new(false),
                faulted: AtomicBool::new(false),
            },
        });
        (wrapper, TaskHandle { rx })
    }

    /// Stable identifier, used in log lines and error variants.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// True once the caller's own token has fired. A wrapper with
    /// `is_canceled() == true` must never be handed to a processor.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner_cancel.is_cancelled()
    }

    /// True once the completion slot has been assigned.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completion.completed.load(Ordering::SeqCst)
    }

    /// True if the wrapper resolved with a business error or exhausted
    /// attempts (not cancellation).
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.completion.faulted.load(Ordering::SeqCst)
    }

    /// Resolve the completion slot as cancelled, if it has not already been
    /// resolved. Used by [`crate::manager::TaskManager::take`] implementations
    /// to drop an inner-cancelled wrapper without handing it to a processor.
    pub async fn resolve_cancelled_if_pending(&self) {
        self.try_resolve(Outcome::Cancelled, false).await;
    }

    async fn try_resolve(&self, outcome: Outcome<R>, faulted: bool) -> bool {
        let mut guard = self.completion.sender.lock().await;
        if let Some(tx) = guard.take() {
            self.completion.completed.store(true, Ordering::SeqCst);
            if faulted {
                self.completion.faulted.store(true, Ordering::SeqCst);
            }
            let _ = tx.send(outcome);
            true
        } else {
            false
        }
    }

    /// Execute one attempt against `argument`.
    pub async fn execute(
        &self,
        argument: A,
        context: ServiceContext,
        outer_cancellation: &CancelToken,
    ) -> ExecuteResult {
        if self.is_completed() {
            return ExecuteResult::Done;
        }

        if self.attempts_remaining.load(Ordering::SeqCst) < 1 {
            self.try_resolve(
                Outcome::Error(TaskError::AttemptsExhausted { task_id: self.id }),
                true,
            )
            .await;
            return ExecuteResult::Done;
        }

        self.attempts_remaining.fetch_sub(1, Ordering::SeqCst);

        let effective = self.inner_cancel.with_outer(outer_cancellation);
        let call = Arc::clone(&self.call);
        let fut = (call)(argument, context, self.inner_cancel.clone());

        tokio::select! {
            biased;
            () = effective.cancelled() => {
                self.handle_cancellation(&effective).await
            }
            result = fut => {
                self.handle_result(result).await
            }
        }
    }

    async fn handle_result(&self, result: std::result::Result<R, TaskError>) -> ExecuteResult {
        match result {
            Ok(value) => {
                self.try_resolve(Outcome::Value(value), false).await;
                ExecuteResult::Done
            }
            Err(err) if matches!(err, TaskError::BadData { .. }) => {
                tracing::error!(task_id = %self.id, %err, "conveyor rejected data, terminal");
                self.try_resolve(Outcome::Error(err), true).await;
                ExecuteResult::Done
            }
            Err(err) => {
                if self.attempts_remaining.load(Ordering::SeqCst) > 0 {
                    tracing::error!(task_id = %self.id, %err, "task attempt failed, will retry");
                    ExecuteResult::Retry
                } else {
                    tracing::error!(task_id = %self.id, %err, "task attempts exhausted");
                    self.try_resolve(
                        Outcome::Error(TaskError::BusinessError {
                            task_id: self.id,
                            message: err.to_string(),
                        }),
                        true,
                    )
                    .await;
                    ExecuteResult::Done
                }
            }
        }
    }

    async fn handle_cancellation(
        &self,
        effective: &crate::cancel::EffectiveCancel,
    ) -> ExecuteResult {
        match effective.source() {
            Some(CancelSource::Inner) | None => {
                self.try_resolve(Outcome::Cancelled, false).await;
                ExecuteResult::Done
            }
            Some(CancelSource::Outer) => {
                tracing::warn!(task_id = %self.id, "cancelled by runtime");
                // This attempt does not count against the retry budget: restore
                // it, so the wrapper always has at least one attempt left and
                // always retries. A restart that loses the worker must not
                // also lose the task.
                self.attempts_remaining.fetch_add(1, Ordering::SeqCst);
                ExecuteResult::Retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as StdAtomicU32;
    use std::time::Duration;

    fn unit_ok() -> UnitFn<(), u32> {
        Arc::new(|_arg, _ctx, _cancel| Box::pin(async { Ok(42) }))
    }

    #[tokio::test]
    async fn successful_execution_resolves_value() {
        let (wrapper, handle) = TaskWrapper::new(unit_ok(), 3, CancelToken::new());
        let outer = CancelToken::new();
        let result = wrapper.execute((), ServiceContext::new(), &outer).await;
        assert_eq!(result, ExecuteResult::Done);
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn business_error_retries_until_exhausted() {
        let calls = Arc::new(StdAtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let unit: UnitFn<(), u32> = Arc::new(move |_arg, _ctx, _cancel| {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::BusinessError {
                    task_id: Uuid::nil(),
                    message: "boom".into(),
                })
            })
        });
        let (wrapper, handle) = TaskWrapper::new(unit, 3, CancelToken::new());
        let outer = CancelToken::new();
        for _ in 0..2 {
            let r = wrapper.execute((), ServiceContext::new(), &outer).await;
            assert_eq!(r, ExecuteResult::Retry);
        }
        let r = wrapper.execute((), ServiceContext::new(), &outer).await;
        assert_eq!(r, ExecuteResult::Done);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(handle.await.is_err());
    }

    #[tokio::test]
    async fn outer_cancellation_does_not_consume_attempt() {
        let unit: UnitFn<(), u32> = Arc::new(|_arg, _ctx, _cancel| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(0)
            })
        });
        let (wrapper, _handle) = TaskWrapper::new(unit, 2, CancelToken::new());
        let outer = CancelToken::new();

        let wrapper_clone = Arc::clone(&wrapper);
        let outer_clone = outer.clone();
        let exec = tokio::spawn(async move {
            wrapper_clone
                .execute((), ServiceContext::new(), &outer_clone)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        outer.cancel();
        let result = exec.await.unwrap();
        assert_eq!(result, ExecuteResult::Retry);
    }

    #[tokio::test]
    async fn inner_cancellation_is_terminal() {
        let inner = CancelToken::new();
        let inner_clone = inner.clone();
        let unit: UnitFn<(), u32> = Arc::new(move |_arg, _ctx, cancel| {
            Box::pin(async move {
                cancel.cancelled().await;
                Ok(0)
            })
        });
        let (wrapper, handle) = TaskWrapper::new(unit, 3, inner_clone);
        let outer = CancelToken::new();
        let wrapper_clone = Arc::clone(&wrapper);
        let exec = tokio::spawn(async move { wrapper_clone.execute((), ServiceContext::new(), &outer).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        inner.cancel();
        let result = exec.await.unwrap();
        assert_eq!(result, ExecuteResult::Done);
        assert!(matches!(handle.await, Err(TaskError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn already_completed_wrapper_is_a_no_op() {
        let (wrapper, _handle) = TaskWrapper::new(unit_ok(), 3, CancelToken::new());
        let outer = CancelToken::new();
        let first = wrapper.execute((), ServiceContext::new(), &outer).await;
        let second = wrapper.execute((), ServiceContext::new(), &outer).await;
        assert_eq!(first, ExecuteResult::Done);
        assert_eq!(second, ExecuteResult::Done);
    }
}
