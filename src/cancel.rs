//! Cooperative cancellation tokens.
//!
//! Every execution attempt composes two tokens: an *inner* token supplied by
//! the caller at submission time, and an *outer* token owned by the worker
//! (and, transitively, the host's shutdown signal). The distinction matters
//! for retry accounting -- see [`crate::wrapper::TaskWrapper::execute`].
//!
//! The token itself is a small `Arc`-backed flag plus a [`tokio::sync::Notify`],
//! the same pairing the kernel crate's scheduler uses to wake its worker loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A cooperatively-checked cancellation flag.
///
/// Cloning a [`CancelToken`] shares the same underlying flag; cancelling any
/// clone cancels all of them.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a fresh, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// True if [`CancelToken::cancel`] has been called on this token or any
    /// clone of it.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Suspend until this token is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// Compose this token (the "inner", caller-supplied token) with an
    /// "outer" token (worker/host shutdown) into a single effective token
    /// whose cancellation source can still be distinguished afterwards via
    /// [`EffectiveCancel::source`].
    #[must_use]
    pub fn with_outer(&self, outer: &CancelToken) -> EffectiveCancel {
        EffectiveCancel {
            inner: self.clone(),
            outer: outer.clone(),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies which of the two composed tokens triggered a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    /// The caller's own token fired -- terminal, does not retry.
    Inner,
    /// Only the worker/host shutdown token fired -- transient, retries.
    Outer,
}

/// The union of an inner and an outer [`CancelToken`], handed to unit
/// callables as their effective cancellation signal.
#[derive(Clone)]
pub struct EffectiveCancel {
    inner: CancelToken,
    outer: CancelToken,
}

impl EffectiveCancel {
    /// True if either token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled() || self.outer.is_cancelled()
    }

    /// Suspend until either token fires.
    pub async fn cancelled(&self) {
        tokio::select! {
            () = self.inner.cancelled() => {}
            () = self.outer.cancelled() => {}
        }
    }

    /// When both tokens could explain a cancellation, the inner (caller)
    /// token always wins, because it is terminal and the outer token is
    /// merely transient.
    #[must_use]
    pub fn source(&self) -> Option<CancelSource> {
        if self.inner.is_cancelled() {
            Some(CancelSource::Inner)
        } else if self.outer.is_cancelled() {
            Some(CancelSource::Outer)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        token.cancel();
        handle.await.expect("waiter task should finish");
        assert!(token.is_cancelled());
    }

    #[test]
    fn inner_wins_over_outer() {
        let inner = CancelToken::new();
        let outer = CancelToken::new();
        inner.cancel();
        outer.cancel();
        let effective = inner.with_outer(&outer);
        assert_eq!(effective.source(), Some(CancelSource::Inner));
    }

    #[test]
    fn outer_only_is_reported_as_outer() {
        let inner = CancelToken::new();
        let outer = CancelToken::new();
        outer.cancel();
        let effective = inner.with_outer(&outer);
        assert_eq!(effective.source(), Some(CancelSource::Outer));
    }

    #[test]
    fn neither_cancelled_reports_none() {
        let inner = CancelToken::new();
        let outer = CancelToken::new();
        let effective = inner.with_outer(&outer);
        assert_eq!(effective.source(), None);
        assert!(!effective.is_cancelled());
    }
}
