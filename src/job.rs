//! Jobs: the unit of work a trigger fires, and the context it runs with.

use crate::error::SchedulerResult;
use crate::keys::JobKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A bag of string-keyed values passed to a job at execution time.
///
/// Values are stored as [`serde_json::Value`] so both the property-setting
/// job factory (primitive coercion) and user code (typed getters) can work
/// with the same map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDataMap(HashMap<String, Value>);

impl JobDataMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning `self` for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts a value in place.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String getter.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Integer getter.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Float getter.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Boolean getter.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Merges `other` over `self`, `other`'s values winning on conflict.
    ///
    /// Used to layer a trigger's own data map over its job's data map before
    /// a job executes.
    pub fn merged_over(&self, other: &JobDataMap) -> JobDataMap {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        JobDataMap(merged)
    }

    /// Iterates over the entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// True if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for JobDataMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        JobDataMap(iter.into_iter().collect())
    }
}

/// Instruction returned by [`Job::execute`] telling the scheduler how to
/// treat the firing trigger and any sibling triggers of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletedExecutionInstruction {
    /// No special action.
    #[default]
    Noop,
    /// Re-execute the job immediately, using the same trigger.
    ReExecuteJob,
    /// Delete the firing trigger.
    DeleteTrigger,
    /// Mark the firing trigger complete (stop firing it).
    SetTriggerComplete,
    /// Mark the firing trigger as errored.
    SetTriggerError,
    /// Mark every trigger of this job as errored.
    SetAllJobTriggersError,
    /// Mark every trigger of this job as complete.
    SetAllJobTriggersComplete,
}

/// The work a trigger fires. Implementors must be safe to invoke from any
/// worker thread and should treat `context` as their only channel to the
/// scheduler's state.
pub trait Job: Send + Sync {
    /// Runs the job. Returning `Err` marks this firing as a job execution
    /// failure; the store still honors `context.completion_instruction()`.
    fn execute(&self, context: &mut ExecutionContext) -> SchedulerResult<()>;
}

/// Durability and concurrency metadata attached to a stored job, independent
/// of any particular trigger.
#[derive(Clone)]
pub struct JobDetail {
    key: JobKey,
    description: Option<String>,
    job: Arc<dyn Job>,
    job_data_map: JobDataMap,
    durable: bool,
    persist_job_data_after_execution: bool,
    concurrent_execution_disallowed: bool,
    requests_recovery: bool,
}

impl std::fmt::Debug for JobDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDetail")
            .field("key", &self.key)
            .field("description", &self.description)
            .field("job", &"<dyn Job>")
            .field("job_data_map", &self.job_data_map)
            .field("durable", &self.durable)
            .field(
                "persist_job_data_after_execution",
                &self.persist_job_data_after_execution,
            )
            .field(
                "concurrent_execution_disallowed",
                &self.concurrent_execution_disallowed,
            )
            .field("requests_recovery", &self.requests_recovery)
            .finish()
    }
}

impl JobDetail {
    /// Builds a job detail around a concrete [`Job`] implementation.
    pub fn new(key: JobKey, job: Arc<dyn Job>) -> Self {
        Self {
            key,
            description: None,
            job,
            job_data_map: JobDataMap::new(),
            durable: false,
            persist_job_data_after_execution: false,
            concurrent_execution_disallowed: false,
            requests_recovery: false,
        }
    }

    /// Attaches a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attaches a job data map.
    pub fn with_data(mut self, data: JobDataMap) -> Self {
        self.job_data_map = data;
        self
    }

    /// Marks the job as durable: it remains stored even without triggers.
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Marks data-map mutations made during `execute` for persistence back
    /// to the store.
    pub fn with_persist_job_data_after_execution(mut self, persist: bool) -> Self {
        self.persist_job_data_after_execution = persist;
        self
    }

    /// Marks the job as not permitted to run concurrently with itself.
    pub fn with_concurrent_execution_disallowed(mut self, disallowed: bool) -> Self {
        self.concurrent_execution_disallowed = disallowed;
        self
    }

    /// Marks the job as wanting recovery firings after an unclean shutdown.
    pub fn with_requests_recovery(mut self, requests_recovery: bool) -> Self {
        self.requests_recovery = requests_recovery;
        self
    }

    /// The job's key.
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    /// The job's description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The runnable [`Job`] implementation.
    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }

    /// The job's own data map.
    pub fn job_data_map(&self) -> &JobDataMap {
        &self.job_data_map
    }

    /// Replaces the job's data map, e.g. after a persisted execution.
    pub fn set_job_data_map(&mut self, data: JobDataMap) {
        self.job_data_map = data;
    }

    /// Whether this job remains stored without any triggers.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Whether data-map mutations during execution are persisted.
    pub fn persist_job_data_after_execution(&self) -> bool {
        self.persist_job_data_after_execution
    }

    /// Whether concurrent firings of this job are disallowed.
    pub fn is_concurrent_execution_disallowed(&self) -> bool {
        self.concurrent_execution_disallowed
    }

    /// Whether this job should be refired after an unclean shutdown finds it
    /// mid-execution.
    pub fn requests_recovery(&self) -> bool {
        self.requests_recovery
    }
}

impl fmt::Display for JobDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Everything a running [`Job`] can observe and mutate about its own firing.
pub struct ExecutionContext {
    job_key: JobKey,
    trigger_key: crate::keys::TriggerKey,
    merged_data_map: JobDataMap,
    fire_time: DateTime<Utc>,
    scheduled_fire_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    refire_count: u32,
    recovering: bool,
    result: Option<Value>,
    completion_instruction: CompletedExecutionInstruction,
}

impl ExecutionContext {
    /// Constructs a context for one firing. Called by the scheduler loop
    /// immediately before dispatching to a worker thread.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_key: JobKey,
        trigger_key: crate::keys::TriggerKey,
        merged_data_map: JobDataMap,
        fire_time: DateTime<Utc>,
        scheduled_fire_time: Option<DateTime<Utc>>,
        previous_fire_time: Option<DateTime<Utc>>,
        next_fire_time: Option<DateTime<Utc>>,
        refire_count: u32,
        recovering: bool,
    ) -> Self {
        Self {
            job_key,
            trigger_key,
            merged_data_map,
            fire_time,
            scheduled_fire_time,
            previous_fire_time,
            next_fire_time,
            refire_count,
            recovering,
            result: None,
            completion_instruction: CompletedExecutionInstruction::default(),
        }
    }

    /// The key of the job being executed.
    pub fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    /// The key of the trigger that caused this firing.
    pub fn trigger_key(&self) -> &crate::keys::TriggerKey {
        &self.trigger_key
    }

    /// The data map merged from the job and the firing trigger, trigger data
    /// winning on conflict.
    pub fn data_map(&self) -> &JobDataMap {
        &self.merged_data_map
    }

    /// Mutable access to the merged data map; mutations are written back to
    /// the job's stored data map when `persist_job_data_after_execution` is
    /// set on the [`JobDetail`].
    pub fn data_map_mut(&mut self) -> &mut JobDataMap {
        &mut self.merged_data_map
    }

    /// The actual instant the job began executing.
    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    /// The instant the trigger was scheduled to fire, before any misfire
    /// adjustment.
    pub fn scheduled_fire_time(&self) -> Option<DateTime<Utc>> {
        self.scheduled_fire_time
    }

    /// The previous time this trigger fired, if any.
    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    /// The next time this trigger is scheduled to fire, if any.
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    /// How many times this job has been automatically re-executed for this
    /// trigger firing.
    pub fn refire_count(&self) -> u32 {
        self.refire_count
    }

    /// True if this firing is a recovery firing after an unclean shutdown.
    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    /// Stores a result value visible to listeners after execution.
    pub fn set_result(&mut self, result: Value) {
        self.result = Some(result);
    }

    /// The result value, if the job set one.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Requests a specific post-execution instruction; defaults to
    /// [`CompletedExecutionInstruction::Noop`].
    pub fn set_completion_instruction(&mut self, instruction: CompletedExecutionInstruction) {
        self.completion_instruction = instruction;
    }

    /// The instruction the job requested.
    pub fn completion_instruction(&self) -> CompletedExecutionInstruction {
        self.completion_instruction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Job for Echo {
        fn execute(&self, ctx: &mut ExecutionContext) -> SchedulerResult<()> {
            let greeting = ctx.data_map().get_string("name").unwrap_or("world").to_string();
            ctx.set_result(Value::String(format!("hello {greeting}")));
            Ok(())
        }
    }

    #[test]
    fn data_map_merge_prefers_trigger_over_job() {
        let job_data = JobDataMap::new().with("name", "job");
        let trigger_data = JobDataMap::new().with("name", "trigger");
        let merged = job_data.merged_over(&trigger_data);
        assert_eq!(merged.get_string("name"), Some("trigger"));
    }

    #[test]
    fn job_execution_sets_result() {
        let mut ctx = ExecutionContext::new(
            JobKey::new("j1"),
            crate::keys::TriggerKey::new("t1"),
            JobDataMap::new().with("name", "rustaceans"),
            Utc::now(),
            None,
            None,
            None,
            0,
            false,
        );
        Echo.execute(&mut ctx).unwrap();
        assert_eq!(ctx.result(), Some(&Value::String("hello rustaceans".into())));
    }

    #[test]
    fn job_detail_defaults() {
        let detail = JobDetail::new(JobKey::new("j1"), Arc::new(Echo));
        assert!(!detail.is_durable());
        assert!(!detail.is_concurrent_execution_disallowed());
        assert!(!detail.requests_recovery());
    }
}
