//! Optional resource capabilities and the reuse strategies that drive how a
//! processor acquires its argument.
//!
//! Rust has no structural "implements at most these interfaces" typing, so
//! capability probing is modelled as opt-in: a resource declares a
//! capability by overriding one of [`Resource`]'s default `as_*` methods to
//! return `Some(self)`. A resource that implements none of them is a
//! perfectly valid argument -- the processor simply skips the corresponding
//! transition.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A value usable as a processor argument: a shared resource (`AccessQueue`)
/// or a conveyor machine.
///
/// Implement the `as_*` probes to opt in to [`Activatable`], [`Stoppable`],
/// or [`Throttling`] behavior; the default implementations declare none of
/// them.
pub trait Resource: Send + Sync + 'static {
    /// Expose this resource's [`Activatable`] capability, if any.
    fn as_activatable(&self) -> Option<&dyn Activatable> {
        None
    }

    /// Expose this resource's [`Stoppable`] capability, if any.
    fn as_stoppable(&self) -> Option<&dyn Stoppable> {
        None
    }

    /// Expose this resource's [`Throttling`] capability, if any.
    fn as_throttling(&self) -> Option<&dyn Throttling> {
        None
    }
}

/// A resource that must be switched on before use and can be switched off
/// when idle. Weaker than [`Stoppable`]: activation state is tracked
/// in-place rather than in a pool bag.
#[async_trait]
pub trait Activatable: Send + Sync {
    /// Current activation state.
    fn is_active(&self) -> bool;

    /// Transition to active. Failure is terminal for the current drain
    /// batch but not for any queued task.
    async fn activate(&self) -> Result<()>;

    /// Transition to inactive. Errors are logged by the caller and
    /// otherwise ignored -- this runs fire-and-forget at batch end.
    async fn deactivate(&self) -> Result<()>;
}

/// A resource with a stronger start/stop lifecycle, tracked externally in an
/// active/inactive bag by [`crate::processor::MultiStaticProcessor`].
#[async_trait]
pub trait Stoppable: Send + Sync {
    /// Current running state.
    fn is_running(&self) -> bool;

    /// Transition to running.
    async fn start(&self) -> Result<()>;

    /// Transition to stopped.
    async fn stop(&self) -> Result<()>;
}

/// A resource that demands a cooldown after each use.
pub trait Throttling: Send + Sync {
    /// How long the processor should sleep after finishing one execution
    /// with this resource before handing it to the next task.
    fn timeout(&self) -> Duration;
}

/// Which argument-acquisition strategy a processor uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseStrategy {
    /// The unit itself is the argument; nothing is acquired.
    None,
    /// One argument, produced once, kept alive for the worker's lifetime.
    SingleReusable,
    /// A fresh argument is produced per drain batch.
    SingleTransient,
    /// A fixed pool of arguments, each used by at most one task at a time.
    MultipleStatic,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    impl Resource for Plain {}

    struct Throttled;
    impl Resource for Throttled {
        fn as_throttling(&self) -> Option<&dyn Throttling> {
            Some(self)
        }
    }
    impl Throttling for Throttled {
        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }
    }

    #[test]
    fn plain_resource_declares_no_capabilities() {
        let r = Plain;
        assert!(r.as_activatable().is_none());
        assert!(r.as_stoppable().is_none());
        assert!(r.as_throttling().is_none());
    }

    #[test]
    fn opted_in_capability_is_reachable() {
        let r = Throttled;
        let throttling = r.as_throttling().expect("opted in");
        assert_eq!(throttling.timeout(), Duration::from_millis(50));
    }
}
