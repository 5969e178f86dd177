//! The push-stream observable returned for repeated and cron schedules.
//!
//! Grounded on [`tokio::sync::broadcast`], the same primitive this
//! codebase's IPC bus uses for its own publish/subscribe surface.
//! Backpressure is handled the way `broadcast` already handles it: a
//! bounded ring buffer where a lagging subscriber is told how many items it
//! missed rather than silently losing them -- a stronger guarantee than
//! silent drop-oldest, and the natural choice given the crate already in
//! use here.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::TaskError;

/// One item delivered to a [`StreamHandle`] subscriber.
#[derive(Debug, Clone)]
pub enum StreamItem<R> {
    /// A successful execution's result (`()` for void units).
    Next(Arc<R>),
    /// A business error from one occurrence; the schedule continues unless
    /// `execCount` has also run out.
    Error(TaskError),
    /// Terminal: no further items will be delivered.
    Complete,
}

/// The producer side of a push-stream, owned by the scheduler entry that
/// feeds it.
pub struct StreamSource<R> {
    sender: broadcast::Sender<StreamItem<R>>,
}

impl<R: Clone + Send + Sync + 'static> StreamSource<R> {
    /// Create a source with the given backlog capacity for slow
    /// subscribers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Push a successful value to all current subscribers.
    pub fn next(&self, value: R) {
        let _ = self.sender.send(StreamItem::Next(Arc::new(value)));
    }

    /// Push a business error to all current subscribers; non-terminal.
    pub fn error(&self, err: TaskError) {
        let _ = self.sender.send(StreamItem::Error(err));
    }

    /// Push the terminal `Complete` marker. No further sends are meaningful
    /// after this.
    pub fn complete(&self) {
        let _ = self.sender.send(StreamItem::Complete);
    }

    /// Create a new handle that will receive every future item.
    #[must_use]
    pub fn handle(&self) -> StreamHandle<R> {
        StreamHandle {
            receiver: self.sender.subscribe(),
        }
    }
}

/// The consumer side of a push-stream, returned to callers of
/// `addCronWork`/`addRepeatedWork`.
pub struct StreamHandle<R> {
    receiver: broadcast::Receiver<StreamItem<R>>,
}

impl<R: Clone + Send + 'static> StreamHandle<R> {
    /// Await the next item. Returns `None` once the channel is closed
    /// (the source was dropped) without an explicit `Complete` having been
    /// observed.
    pub async fn recv(&mut self) -> Option<StreamItem<R>> {
        match self.receiver.recv().await {
            Ok(item) => Some(item),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "push-stream subscriber lagged, items were skipped");
                Box::pin(self.recv()).await
            }
        }
    }
}
