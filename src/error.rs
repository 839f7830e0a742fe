//! Error types shared across every subsystem of the scheduler.

use crate::keys::{JobKey, TriggerKey};
use thiserror::Error;

/// A convenience `Result` alias using [`SchedulerError`].
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Top-level error type for the scheduler.
///
/// Each variant corresponds to one of the error kinds in the error handling
/// design: invalid input, already-exists conflicts, missing dependencies,
/// transient job failures, and fatal conditions.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A cron expression or other structured input failed to parse.
    #[error("invalid {field} in '{input}': {message}")]
    InvalidExpression {
        /// Name of the offending field (e.g. "day-of-month").
        field: String,
        /// The original text that failed to parse.
        input: String,
        /// Human-readable description of the problem.
        message: String,
    },

    /// A value was out of its legal range.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// `storeJob`/`storeTrigger` with `replace=false` found an existing key.
    #[error("job already exists: {0}")]
    JobAlreadyExists(JobKey),

    /// `storeTrigger` with `replace=false` found an existing key.
    #[error("trigger already exists: {0}")]
    TriggerAlreadyExists(TriggerKey),

    /// The referenced job does not exist in the store.
    #[error("job not found: {0}")]
    JobNotFound(JobKey),

    /// The referenced trigger does not exist in the store.
    #[error("trigger not found: {0}")]
    TriggerNotFound(TriggerKey),

    /// `storeTrigger` named a job key that isn't in the store.
    #[error("trigger {trigger} references unknown job {job}")]
    DanglingJobReference {
        /// The trigger being stored.
        trigger: TriggerKey,
        /// The job key it references.
        job: JobKey,
    },

    /// The named calendar does not exist.
    #[error("calendar not found: {0}")]
    CalendarNotFound(String),

    /// `removeCalendar` was called on a calendar still referenced by a trigger.
    #[error("calendar '{0}' is still referenced by one or more triggers")]
    CalendarInUse(String),

    /// `replaceTrigger` was given a replacement whose job key doesn't match.
    #[error("replacement trigger for {trigger} must target job {expected}, found {found}")]
    MismatchedJobKey {
        /// The trigger being replaced.
        trigger: TriggerKey,
        /// The job key of the trigger being replaced.
        expected: JobKey,
        /// The job key the replacement trigger actually targets.
        found: JobKey,
    },

    /// A job's `execute` reported failure.
    #[error("job execution failed: {0}")]
    JobExecution(String),

    /// An operation was attempted after the worker pool shut down.
    #[error("worker pool is shut down")]
    PoolShutdown,

    /// An operation was attempted after the scheduler shut down.
    #[error("scheduler is shut down")]
    SchedulerShutdown,
}
