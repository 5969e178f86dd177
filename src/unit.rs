//! Ergonomic constructors that adapt plain callables into the [`UnitFn`]
//! shape every task wrapper executes.
//!
//! A unit can be sync or async, and can return a value or not; rather than
//! model that as four distinct types this module normalizes every shape down
//! to the same `Fn(A, ServiceContext, CancelToken) -> BoxFuture<Result<R>>`
//! signature at construction time. A sync callable is simply invoked inline
//! and its result wrapped in an already-ready future.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::argument::Resource;
use crate::error::TaskError;
use crate::wrapper::{BoxFuture, UnitFn};

/// Constructors for argument-less units, the shape behind `WorkQueue` and
/// `PriorityWorkQueue`.
pub struct Unit;

impl Unit {
    /// A synchronous, infallible callable, retried only if it panics is not
    /// possible -- this variant simply cannot fail.
    #[must_use]
    pub fn sync<F>(f: F) -> UnitFn<(), ()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(move |_arg, _ctx, _cancel| {
            f();
            Box::pin(async { Ok(()) })
        })
    }

    /// A synchronous callable that may return a business error.
    #[must_use]
    pub fn sync_result<F, R>(f: F) -> UnitFn<(), R>
    where
        F: Fn() -> std::result::Result<R, TaskError> + Send + Sync + 'static,
        R: Send + 'static,
    {
        Arc::new(move |_arg, _ctx, _cancel| {
            let result = f();
            Box::pin(async move { result })
        })
    }

    /// An async, infallible callable.
    #[must_use]
    pub fn async_void<F, Fut>(f: F) -> UnitFn<(), ()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(move |_arg, _ctx, _cancel| {
            let fut = f();
            Box::pin(async move {
                fut.await;
                Ok(())
            })
        })
    }

    /// An async callable that may return a business error, and the only
    /// shape that also receives the service context and cancellation token
    /// untouched -- use this when a unit needs to resolve a service or
    /// observe cooperative cancellation itself.
    #[must_use]
    pub fn async_result<F, Fut, R>(f: F) -> UnitFn<(), R>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, TaskError>> + Send + 'static,
        R: Send + 'static,
    {
        Arc::new(move |_arg, _ctx, _cancel| Box::pin(f()))
    }
}

/// Constructors for units that run against an acquired shared resource `T`,
/// the shape behind `AccessQueue<T>` and `PriorityAccessQueue<T>`.
pub struct AccessUnit<T>(PhantomData<T>);

impl<T: Send + Sync + 'static> AccessUnit<T> {
    /// A synchronous callable invoked with the shared resource.
    #[must_use]
    pub fn sync<F, R>(f: F) -> UnitFn<Arc<T>, R>
    where
        F: Fn(Arc<T>) -> std::result::Result<R, TaskError> + Send + Sync + 'static,
        R: Send + 'static,
    {
        Arc::new(move |arg, _ctx, _cancel| {
            let result = f(arg);
            Box::pin(async move { result })
        })
    }

    /// An async callable invoked with the shared resource.
    #[must_use]
    pub fn async_result<F, Fut, R>(f: F) -> UnitFn<Arc<T>, R>
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, TaskError>> + Send + 'static,
        R: Send + 'static,
    {
        Arc::new(move |arg, _ctx, _cancel| Box::pin(f(arg)))
    }
}

/// The argument a `Conveyor<D, R>` processor hands to every wrapper: the
/// conveyor's stateful machine, acquired the same way any other resource is.
///
/// The per-task datum `D` is captured by the wrapper's unit closure itself
/// (see [`conveyor_unit`]), not threaded through the processor, because a
/// conveyor's machine is shared across every item on the belt while the
/// datum is private to one item.
#[async_trait]
pub trait ConveyorMachine<D, R>: Send + Sync
where
    D: Send + 'static,
    R: Send + 'static,
{
    /// Process one datum, returning its result or a business/bad-data error.
    async fn process(&self, datum: D) -> std::result::Result<R, TaskError>;
}

/// Canonical trait-object form of a [`ConveyorMachine`], pinned to a single
/// explicit lifetime everywhere it's named so the compiler always resolves
/// every occurrence to the same type.
pub type DynConveyorMachine<D, R> = dyn ConveyorMachine<D, R> + Send + Sync + 'static;

/// A conveyor machine declares no activation/lifecycle/throttling
/// capabilities of its own; a conveyor's processor only ever needs the
/// machine to exist, not to start or stop.
impl<D: Send + 'static, R: Send + 'static> Resource for DynConveyorMachine<D, R> {}

/// Build the unit for one conveyor item, closing over its datum.
///
/// `D` must be `Clone` so a retried attempt can re-invoke
/// [`ConveyorMachine::process`] with the same datum rather than consuming it
/// on the first (possibly failing) attempt.
#[must_use]
pub fn conveyor_unit<D, R>(datum: D) -> UnitFn<Arc<DynConveyorMachine<D, R>>, R>
where
    D: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    Arc::new(move |machine, _ctx, _cancel| {
        let datum = datum.clone();
        let fut: BoxFuture<std::result::Result<R, TaskError>> = Box::pin(async move { machine.process(datum).await });
        fut
    })
}
