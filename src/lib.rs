//! taskloom: an in-process background execution substrate.
//!
//! - **[`wrapper`]** -- `TaskWrapper`, the one-shot envelope around a unit,
//!   its retry budget, and its cancellation link.
//! - **[`manager`]** -- FIFO and strict-priority containers that own
//!   wrappers between submission and execution.
//! - **[`processor`]** -- the worker-side argument-acquisition strategies:
//!   none, single reusable, single transient, fixed pool.
//! - **[`worker`]** -- the host-managed loop that drives a manager/processor
//!   pair until shutdown.
//! - **[`scheduler`]** -- the time-driven dispatcher for delayed, repeated,
//!   and cron schedules.
//! - **[`stream`]** -- the push-stream observable returned by repeated and
//!   cron schedules, built on [`tokio::sync::broadcast`].
//! - **[`unit`]** -- ergonomic constructors that adapt plain callables into
//!   the shape a `TaskWrapper` executes.
//! - **[`api`]** -- the public submission surface: `WorkQueue`,
//!   `AccessQueue`, `Conveyor`, `WorkScheduler`, `StartupWork`.
//! - **[`argument`]** -- `Resource` and its optional capabilities
//!   (`Activatable`, `Stoppable`, `Throttling`).
//! - **[`cancel`]** -- cooperative cancellation tokens and their inner/outer
//!   composition.
//! - **[`context`]** -- opaque, type-keyed service lookup threaded through
//!   every execution.
//! - **[`config`]** -- per-queue configuration and its documented bounds.
//! - **[`error`]** -- the crate-wide [`TaskError`] type.
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod api;
pub mod argument;
pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod processor;
pub mod scheduler;
pub mod stream;
pub mod unit;
pub mod worker;
pub mod wrapper;

pub use api::{
    AccessQueue, Conveyor, PriorityAccessQueue, PriorityConveyor, PriorityWorkQueue, StartupWork, WorkQueue, await_all,
};
pub use argument::{Activatable, ReuseStrategy, Resource, Stoppable, Throttling};
pub use cancel::{CancelSource, CancelToken, EffectiveCancel};
pub use config::Config;
pub use context::ServiceContext;
pub use error::{Result, TaskError};
pub use manager::{FifoTaskManager, PriorityLane, PriorityTaskManager, TaskManager};
pub use processor::{MultiStaticProcessor, NullProcessor, SingleResourceProcessor};
pub use scheduler::{WorkScheduler, parse_cron};
pub use stream::{StreamHandle, StreamItem, StreamSource};
pub use unit::{AccessUnit, ConveyorMachine, Unit, conveyor_unit};
pub use worker::WorkerLoop;
pub use wrapper::{BoxFuture, ExecuteResult, Outcome, TaskHandle, TaskWrapper, UnitFn};
