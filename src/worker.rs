//! The host-managed worker loop that drives a [`TaskManager`] with a drain
//! closure.
//!
//! The processor variants in [`crate::processor`] each have a different
//! `drain` signature (different argument types), so `WorkerLoop` is generic
//! over an async drain closure rather than over a fixed `Processor` trait --
//! this keeps one worker implementation usable by every processor variant
//! instead of a near-identical overload per variant.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::cancel::CancelToken;
use crate::context::ServiceContext;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

/// Drives repeated calls to a processor's `drain` until told to stop.
///
/// `created -> running -> stopping -> stopped`.
pub struct WorkerLoop {
    state: Arc<AtomicU8>,
    shutdown: CancelToken,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerLoop {
    /// Build a worker that is not yet running. Call [`WorkerLoop::start`]
    /// to spawn its background coroutine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(State::Created as u8)),
            shutdown: CancelToken::new(),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawn the background coroutine. `manager_has_task`/`wait_for_task`
    /// close over the paired manager; `drain_once` closes over the paired
    /// processor and manager, executing one batch.
    ///
    /// Loops while not shut down: drain while work remains, then suspend
    /// until signalled.
    pub fn start<HasTask, WaitFut, Wait, DrainFut, Drain>(
        &self,
        has_task: HasTask,
        wait_for_task: Wait,
        drain: Drain,
    ) where
        HasTask: Fn() -> bool + Send + Sync + 'static,
        Wait: Fn(CancelToken) -> WaitFut + Send + Sync + 'static,
        WaitFut: Future<Output = ()> + Send + 'static,
        Drain: Fn(ServiceContext, CancelToken) -> DrainFut + Send + Sync + 'static,
        DrainFut: Future<Output = ()> + Send + 'static,
    {
        self.state.store(State::Running as u8, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        let shutdown = self.shutdown.clone();
        let root_context = ServiceContext::new();

        let join = tokio::spawn(async move {
            tracing::info!("worker loop started");
            loop {
                if shutdown.is_cancelled() {
                    break;
                }
                while has_task() {
                    drain(root_context.child_scope(), shutdown.clone()).await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                }
                if shutdown.is_cancelled() {
                    break;
                }
                wait_for_task(shutdown.clone()).await;
            }
            state.store(State::Stopped as u8, Ordering::SeqCst);
            tracing::info!("worker loop stopped");
        });

        // `handle` can only be populated from an async context; stash a
        // lock-free swap via try_lock since `start` is synchronous and no
        // other task can be racing this field yet (worker not yet shared).
        if let Ok(mut guard) = self.handle.try_lock() {
            *guard = Some(join);
        }
    }

    /// True once [`WorkerLoop::start`] has been called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == State::Running as u8
    }

    /// Signal shutdown and await the coroutine, up to `deadline`. If the
    /// coroutine is still live after `deadline`, this returns without
    /// blocking further.
    pub async fn stop(&self, deadline: Duration) {
        self.state.store(State::Stopping as u8, Ordering::SeqCst);
        self.shutdown.cancel();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(deadline, handle).await.is_err() {
                tracing::warn!("worker loop did not stop within deadline");
            }
        }
        self.state.store(State::Stopped as u8, Ordering::SeqCst);
    }

    /// The token that fires when [`WorkerLoop::stop`] is called; this is the
    /// "outer" cancellation threaded through every `execute` call.
    #[must_use]
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }
}

impl Default for WorkerLoop {
    fn default() -> Self {
        Self::new()
    }
}
