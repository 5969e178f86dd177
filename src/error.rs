//! Crate-wide error type.
//!
//! All public APIs in this crate return `Result<T, TaskError>`. Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

use uuid::Uuid;

/// Unified error type for the background execution substrate.
#[derive(Debug, thiserror::Error, Clone)]
pub enum TaskError {
    // -- Construction-time errors (raised synchronously to the submitter) --
    /// A required argument was missing or null (e.g. an empty cron string).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A numeric or temporal argument fell outside its documented bounds
    /// (`delay <= 0`, `period <= 0`, `time <= now`, `attempts < 1`,
    /// `execCount == 0 || execCount < -1`).
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The host's service context has no factory registered for the
    /// requested type.
    #[error("no such service: {type_name}")]
    NoSuchService {
        /// The type name that was looked up.
        type_name: &'static str,
    },

    // -- Execution-time errors (resolve the wrapper's future/stream item) --
    /// The wrapper's retry budget was exhausted without a successful
    /// execution.
    #[error("attempts exhausted for task {task_id}")]
    AttemptsExhausted {
        /// The wrapper whose attempts ran out.
        task_id: Uuid,
    },

    /// The task was cancelled by its caller-supplied (inner) token.
    #[error("task {task_id} was cancelled")]
    Cancelled {
        /// The wrapper that was cancelled.
        task_id: Uuid,
    },

    /// The underlying unit raised an application-level error.
    #[error("task {task_id} failed: {message}")]
    BusinessError {
        /// The wrapper that failed.
        task_id: Uuid,
        /// Human-readable failure description.
        message: String,
    },

    /// Conveyor-only: the input data is structurally invalid and will never
    /// succeed, regardless of remaining attempts.
    #[error("task {task_id} rejected bad data: {reason}")]
    BadData {
        /// The wrapper whose data was rejected.
        task_id: Uuid,
        /// Human-readable rejection reason.
        reason: String,
    },

    // -- Internal-only kinds, never surfaced through a public future -------
    /// The attempt failed for a reason the processor should retry.
    #[error("transient failure: {0}")]
    TransientFailure(String),

    /// The attempt was cancelled by the worker/host (outer token), not by
    /// the caller. Does not consume a retry.
    #[error("cancelled by runtime")]
    RuntimeCancellation,

    /// A resource's `activate`/`start` transition failed.
    #[error("activation failed: {0}")]
    ActivationFailure(String),
}

impl TaskError {
    /// True for the internal-only kinds that must never escape to a public
    /// future or stream.
    pub(crate) fn is_internal_only(&self) -> bool {
        matches!(
            self,
            TaskError::TransientFailure(_)
                | TaskError::RuntimeCancellation
                | TaskError::ActivationFailure(_)
        )
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TaskError>;
