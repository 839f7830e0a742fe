//! The scheduler loop (C5) and the public [`Scheduler`] API surface (§6).

use crate::calendar::Calendar;
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::factory::{JobFactory, SimpleJobFactory};
use crate::job::{CompletedExecutionInstruction, ExecutionContext, JobDataMap, JobDetail};
use crate::keys::{GroupMatcher, JobKey, TriggerKey};
use crate::listener::{JobListener, ListenerManager, SchedulerListener, TriggerListener, VetoDecision};
use crate::pool::WorkerPool;
use crate::store::{JobStore, TriggerFiredBundle, TriggerState};
use crate::trigger::{RepeatCount, Trigger};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const POLL_STEP: std::time::Duration = std::time::Duration::from_millis(50);

/// A currently executing job, as reported by [`Scheduler::currently_executing_jobs`].
#[derive(Debug, Clone)]
pub struct ExecutingJob {
    /// The job's key.
    pub job_key: JobKey,
    /// The key of the trigger whose firing is running it.
    pub trigger_key: TriggerKey,
    /// The instant execution began.
    pub fire_time: chrono::DateTime<Utc>,
}

/// The in-process scheduler: owns the job store, worker pool, and the
/// single background thread that drives the acquire/fire/complete protocol.
pub struct Scheduler {
    store: Arc<JobStore>,
    pool: Arc<WorkerPool>,
    listeners: Arc<ListenerManager>,
    job_factory: RwLock<Arc<dyn JobFactory>>,
    config: SchedulerConfig,
    halted: Arc<AtomicBool>,
    in_standby: Arc<AtomicBool>,
    started: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    executing: Arc<Mutex<Vec<ExecutingJob>>>,
}

impl Scheduler {
    /// Builds a scheduler with the given configuration. Does not start
    /// firing triggers until [`Scheduler::start`] is called.
    pub fn new(config: SchedulerConfig) -> Self {
        let store = Arc::new(JobStore::new());
        store.set_misfire_threshold(config.misfire_threshold());
        Self {
            pool: Arc::new(WorkerPool::new(config.thread_pool_size())),
            store,
            listeners: Arc::new(ListenerManager::new()),
            job_factory: RwLock::new(Arc::new(SimpleJobFactory)),
            config,
            halted: Arc::new(AtomicBool::new(false)),
            in_standby: Arc::new(AtomicBool::new(true)),
            started: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
            executing: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A scheduler with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SchedulerConfig::builder().build())
    }

    /// The scheduler's configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Replaces the job factory consulted for every firing.
    pub fn set_job_factory(&self, factory: Arc<dyn JobFactory>) {
        *self.job_factory.write().unwrap_or_else(|p| p.into_inner()) = factory;
    }

    // ---- listener registration ------------------------------------------

    /// Registers a job listener.
    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>) {
        self.listeners.add_job_listener(listener);
    }

    /// Registers a trigger listener.
    pub fn add_trigger_listener(&self, listener: Arc<dyn TriggerListener>) {
        self.listeners.add_trigger_listener(listener);
    }

    /// Registers a scheduler listener.
    pub fn add_scheduler_listener(&self, listener: Arc<dyn SchedulerListener>) {
        self.listeners.add_scheduler_listener(listener);
    }

    // ---- lifecycle --------------------------------------------------------

    /// Starts firing triggers. Spawns the scheduler loop thread on first
    /// call; subsequent calls while halted do nothing but resume from
    /// standby.
    pub fn start(&self) {
        self.in_standby.store(false, Ordering::SeqCst);
        if self.started.swap(true, Ordering::SeqCst) {
            self.listeners.fire_scheduler_resumed();
            self.store.signal().notify();
            return;
        }
        let store = Arc::clone(&self.store);
        let pool = Arc::clone(&self.pool);
        let listeners = Arc::clone(&self.listeners);
        let job_factory = {
            let guard = self.job_factory.read().unwrap_or_else(|p| p.into_inner());
            Arc::clone(&*guard)
        };
        let halted = Arc::clone(&self.halted);
        let in_standby = Arc::clone(&self.in_standby);
        let executing = Arc::clone(&self.executing);
        let batch_max = self.config.batch_trigger_acquisition_max_count();
        let fire_ahead = self.config.batch_trigger_acquisition_fire_ahead_window();
        let idle_wait = self.config.idle_wait_time();

        let handle = thread::Builder::new()
            .name("quartzite-scheduler".to_string())
            .spawn(move || {
                run_loop(
                    store,
                    pool,
                    listeners,
                    job_factory,
                    halted,
                    in_standby,
                    executing,
                    batch_max,
                    fire_ahead,
                    idle_wait,
                )
            })
            .expect("failed to spawn scheduler thread");
        *self.loop_handle.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        self.listeners.fire_scheduler_started();
    }

    /// Pauses trigger firing without shutting down; [`Scheduler::start`]
    /// resumes it. Jobs already dispatched to the worker pool keep running.
    pub fn standby(&self) {
        self.in_standby.store(true, Ordering::SeqCst);
        self.store.signal().notify();
        self.listeners.fire_scheduler_paused();
    }

    /// True if the scheduler has been started and is not in standby or
    /// shut down.
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
            && !self.in_standby.load(Ordering::SeqCst)
            && !self.halted.load(Ordering::SeqCst)
    }

    /// Stops the scheduler loop permanently and shuts down the worker pool.
    /// If `wait_for_jobs_to_complete` is true, blocks until every
    /// in-flight job finishes.
    pub fn shutdown(&self, wait_for_jobs_to_complete: bool) {
        self.halted.store(true, Ordering::SeqCst);
        self.store.signal().notify();
        if let Some(handle) = self.loop_handle.lock().unwrap_or_else(|p| p.into_inner()).take() {
            let _ = handle.join();
        }
        self.pool.shutdown(wait_for_jobs_to_complete);
        self.listeners.fire_scheduler_shutdown();
    }

    /// Currently executing jobs, a live snapshot.
    pub fn currently_executing_jobs(&self) -> Vec<ExecutingJob> {
        self.executing.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    // ---- job / trigger management -----------------------------------------

    /// Stores a job and trigger together, the common case of scheduling new
    /// work.
    pub fn schedule_job(&self, detail: JobDetail, trigger: Trigger) -> SchedulerResult<()> {
        self.store.store_job(detail, false)?;
        self.store.store_trigger(trigger, false)?;
        self.listeners.fire_scheduling_changed();
        Ok(())
    }

    /// Stores several triggers against one job in a single call.
    pub fn schedule_jobs(&self, detail: JobDetail, triggers: Vec<Trigger>) -> SchedulerResult<()> {
        self.store.store_job(detail, false)?;
        for trigger in triggers {
            self.store.store_trigger(trigger, false)?;
        }
        self.listeners.fire_scheduling_changed();
        Ok(())
    }

    /// Adds a trigger to an already-stored job.
    pub fn schedule_trigger(&self, trigger: Trigger) -> SchedulerResult<()> {
        self.store.store_trigger(trigger, false)?;
        self.listeners.fire_scheduling_changed();
        Ok(())
    }

    /// Stores a job without any trigger; it will not fire unless `durable`
    /// or a trigger is added later.
    pub fn add_job(&self, detail: JobDetail, replace: bool) -> SchedulerResult<()> {
        self.store.store_job(detail, replace)?;
        self.listeners.fire_scheduling_changed();
        Ok(())
    }

    /// Removes a trigger. Returns `true` if it existed.
    pub fn unschedule_job(&self, trigger_key: &TriggerKey) -> bool {
        let removed = self.store.remove_trigger(trigger_key);
        if removed {
            self.listeners.fire_scheduling_changed();
        }
        removed
    }

    /// Atomically replaces one trigger with another targeting the same job.
    pub fn reschedule_job(&self, trigger_key: &TriggerKey, new_trigger: Trigger) -> SchedulerResult<bool> {
        let replaced = self.store.replace_trigger(trigger_key, new_trigger)?;
        if replaced {
            self.listeners.fire_scheduling_changed();
        }
        Ok(replaced)
    }

    /// Removes a job and every trigger that targets it.
    pub fn delete_job(&self, job_key: &JobKey) -> bool {
        let removed = self.store.remove_job(job_key);
        if removed {
            self.listeners.fire_scheduling_changed();
        }
        removed
    }

    /// Fires a job immediately, outside its regular schedule, using an
    /// ephemeral one-shot trigger.
    pub fn trigger_job(&self, job_key: &JobKey, data: Option<JobDataMap>) -> SchedulerResult<()> {
        if !self.store.check_exists_job(job_key) {
            return Err(SchedulerError::JobNotFound(job_key.clone()));
        }
        let manual_key = TriggerKey::in_group(
            format!("manual-{}-{}", job_key.name(), self.store.signal().generation()),
            "MANUAL_TRIGGERS",
        );
        let mut trigger = Trigger::simple(
            manual_key,
            job_key.clone(),
            Utc::now(),
            RepeatCount::Finite(0),
            Duration::zero(),
        );
        if let Some(data) = data {
            trigger = trigger.with_job_data_map(data);
        }
        self.store.store_trigger(trigger, false)?;
        self.listeners.fire_scheduling_changed();
        Ok(())
    }

    // ---- calendars ----------------------------------------------------

    /// Stores a calendar.
    pub fn add_calendar(
        &self,
        name: impl Into<String>,
        calendar: Calendar,
        replace: bool,
        update_triggers: bool,
    ) -> SchedulerResult<()> {
        self.store.store_calendar(name, calendar, replace, update_triggers)
    }

    /// Removes a calendar.
    pub fn delete_calendar(&self, name: &str) -> SchedulerResult<bool> {
        self.store.remove_calendar(name)
    }

    // ---- pause / resume --------------------------------------------------

    /// Pauses one trigger.
    pub fn pause_trigger(&self, key: &TriggerKey) {
        self.store.pause_trigger(key);
    }

    /// Pauses every trigger of one job.
    pub fn pause_job(&self, key: &JobKey) {
        self.store.pause_job(key);
    }

    /// Pauses every trigger group matching `matcher`.
    pub fn pause_triggers(&self, matcher: &GroupMatcher) -> Vec<String> {
        self.store.pause_triggers(matcher)
    }

    /// Pauses every job group matching `matcher`.
    pub fn pause_jobs(&self, matcher: &GroupMatcher) -> Vec<String> {
        self.store.pause_jobs(matcher)
    }

    /// Pauses every trigger and job group.
    pub fn pause_all(&self) {
        self.store.pause_all();
    }

    /// Resumes one trigger.
    pub fn resume_trigger(&self, key: &TriggerKey) {
        self.store.resume_trigger(key);
    }

    /// Resumes every trigger of one job.
    pub fn resume_job(&self, key: &JobKey) {
        self.store.resume_job(key);
    }

    /// Resumes every trigger group matching `matcher`.
    pub fn resume_triggers(&self, matcher: &GroupMatcher) -> Vec<String> {
        self.store.resume_triggers(matcher)
    }

    /// Resumes every job group matching `matcher`.
    pub fn resume_jobs(&self, matcher: &GroupMatcher) -> Vec<String> {
        self.store.resume_jobs(matcher)
    }

    /// Resumes every trigger and clears all paused groups.
    pub fn resume_all(&self) {
        self.store.resume_all();
    }

    /// Removes every job, trigger, and calendar.
    pub fn clear(&self) {
        self.store.clear_all();
    }

    // ---- read access -----------------------------------------------------

    /// Fetches a job by key.
    pub fn job_detail(&self, key: &JobKey) -> Option<JobDetail> {
        self.store.retrieve_job(key)
    }

    /// Fetches a trigger by key.
    pub fn trigger(&self, key: &TriggerKey) -> Option<Trigger> {
        self.store.retrieve_trigger(key)
    }

    /// The observable state of a trigger.
    pub fn trigger_state(&self, key: &TriggerKey) -> TriggerState {
        self.store.get_trigger_state(key)
    }

    /// Every trigger targeting a job.
    pub fn triggers_for_job(&self, key: &JobKey) -> Vec<Trigger> {
        self.store.triggers_for_job(key)
    }

    /// Every job group name.
    pub fn job_group_names(&self) -> Vec<String> {
        self.store.job_group_names()
    }

    /// Every trigger group name.
    pub fn trigger_group_names(&self) -> Vec<String> {
        self.store.trigger_group_names()
    }

    /// Every currently paused trigger group.
    pub fn paused_trigger_groups(&self) -> HashSet<String> {
        self.store.paused_trigger_groups()
    }

    /// A direct handle to the underlying store, for callers that need
    /// operations not exposed on [`Scheduler`] itself.
    pub fn store(&self) -> &JobStore {
        &self.store
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    store: Arc<JobStore>,
    pool: Arc<WorkerPool>,
    listeners: Arc<ListenerManager>,
    job_factory: Arc<dyn JobFactory>,
    halted: Arc<AtomicBool>,
    in_standby: Arc<AtomicBool>,
    executing: Arc<Mutex<Vec<ExecutingJob>>>,
    batch_max: usize,
    fire_ahead: Duration,
    idle_wait: std::time::Duration,
) {
    let signal = store.signal();
    info!("scheduler loop started");

    while !halted.load(Ordering::SeqCst) {
        if in_standby.load(Ordering::SeqCst) {
            signal.wait_for_change(signal.generation(), idle_wait);
            continue;
        }

        let available = pool.block_for_available();
        if halted.load(Ordering::SeqCst) {
            break;
        }

        let count = available.min(batch_max).max(1);
        let now = Utc::now();
        let acquired = store.acquire_next_triggers(now, count, fire_ahead);
        if acquired.is_empty() {
            signal.wait_for_change(signal.generation(), idle_wait);
            continue;
        }

        let mut ready_keys = Vec::with_capacity(acquired.len());
        for trigger in &acquired {
            let generation_before_wait = signal.generation();
            let Some(fire_at) = trigger.next_fire_time() else {
                store.release_acquired_trigger(trigger.key());
                continue;
            };
            loop {
                if halted.load(Ordering::SeqCst) {
                    store.release_acquired_trigger(trigger.key());
                    break;
                }
                let now = Utc::now();
                if now >= fire_at {
                    ready_keys.push(trigger.key().clone());
                    break;
                }
                if signal.generation() != generation_before_wait {
                    // A concurrent store mutation may have changed this
                    // trigger's schedule; release and let the next cycle
                    // re-acquire it with fresh data.
                    store.release_acquired_trigger(trigger.key());
                    break;
                }
                let remaining = (fire_at - now)
                    .to_std()
                    .unwrap_or(POLL_STEP)
                    .min(POLL_STEP);
                thread::sleep(remaining);
            }
        }
        if halted.load(Ordering::SeqCst) || ready_keys.is_empty() {
            continue;
        }

        let mut vetoed: HashSet<TriggerKey> = HashSet::new();
        for trigger in &acquired {
            if ready_keys.contains(trigger.key())
                && listeners.fire_trigger_fired(trigger) == VetoDecision::Veto
            {
                vetoed.insert(trigger.key().clone());
            }
        }

        let bundles = store.triggers_fired(&ready_keys);
        for bundle in bundles {
            let was_vetoed = vetoed.contains(bundle.trigger.key());
            dispatch(
                bundle,
                was_vetoed,
                Arc::clone(&store),
                Arc::clone(&pool),
                Arc::clone(&listeners),
                Arc::clone(&job_factory),
                Arc::clone(&executing),
            );
        }
    }

    info!("scheduler loop stopped");
}

fn dispatch(
    bundle: TriggerFiredBundle,
    was_vetoed: bool,
    store: Arc<JobStore>,
    pool: Arc<WorkerPool>,
    listeners: Arc<ListenerManager>,
    job_factory: Arc<dyn JobFactory>,
    executing: Arc<Mutex<Vec<ExecutingJob>>>,
) {
    let job_key = bundle.job_detail.key().clone();
    let trigger_key = bundle.trigger.key().clone();

    if was_vetoed {
        store.triggered_job_complete(
            &trigger_key,
            &job_key,
            CompletedExecutionInstruction::Noop,
            None,
        );
        return;
    }

    let merged_data = bundle
        .job_detail
        .job_data_map()
        .merged_over(bundle.trigger.job_data_map());
    let job = job_factory.new_job(&bundle.job_detail, &merged_data);

    let dispatch_store = Arc::clone(&store);
    let dispatch_trigger_key = trigger_key.clone();
    let dispatch_job_key = job_key.clone();

    let submitted = pool.submit(move || {
        let mut context = ExecutionContext::new(
            dispatch_job_key.clone(),
            dispatch_trigger_key.clone(),
            merged_data,
            bundle.fired_at,
            bundle.scheduled_fire_time,
            bundle.previous_fire_time,
            bundle.next_fire_time,
            0,
            false,
        );

        executing.lock().unwrap_or_else(|p| p.into_inner()).push(ExecutingJob {
            job_key: dispatch_job_key.clone(),
            trigger_key: dispatch_trigger_key.clone(),
            fire_time: bundle.fired_at,
        });
        listeners.fire_job_to_be_executed(&context);

        let result = job.execute(&mut context);
        let error_message = result.as_ref().err().map(ToString::to_string);
        listeners.fire_job_was_executed(&context, error_message.as_deref());

        executing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|e| e.trigger_key != dispatch_trigger_key);

        let instruction = match (&result, context.completion_instruction()) {
            (Err(_), CompletedExecutionInstruction::Noop) => {
                warn!(job = %dispatch_job_key, error = ?error_message, "job execution failed");
                CompletedExecutionInstruction::SetTriggerError
            }
            (_, instruction) => instruction,
        };

        let updated_data = if bundle.job_detail.persist_job_data_after_execution() {
            Some(context.data_map().clone())
        } else {
            None
        };

        listeners.fire_trigger_complete(&bundle.trigger, instruction);
        dispatch_store.triggered_job_complete(
            &dispatch_trigger_key,
            &dispatch_job_key,
            instruction,
            updated_data,
        );

        if let Err(message) = result {
            listeners.fire_job_scheduling_error(&dispatch_job_key, &message.to_string());
        }
    });

    if !submitted {
        error!(job = %job_key, "worker pool rejected submission; pool is shut down");
        store.triggered_job_complete(
            &trigger_key,
            &job_key,
            CompletedExecutionInstruction::Noop,
            None,
        );
    } else {
        debug!(job = %job_key, "dispatched firing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerResult as Res;
    use crate::job::Job;
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    struct Signal(Mutex<mpsc::Sender<()>>);

    impl Job for Signal {
        fn execute(&self, _ctx: &mut ExecutionContext) -> Res<()> {
            let _ = self.0.lock().unwrap_or_else(|p| p.into_inner()).send(());
            Ok(())
        }
    }

    #[test]
    fn single_shot_trigger_fires_once() {
        let scheduler = Scheduler::with_defaults();
        let (tx, rx) = mpsc::channel();
        let detail = JobDetail::new(JobKey::new("j1"), Arc::new(Signal(Mutex::new(tx))));
        let trigger = Trigger::simple(
            TriggerKey::new("t1"),
            JobKey::new("j1"),
            Utc::now(),
            RepeatCount::Finite(0),
            Duration::seconds(1),
        );
        scheduler.schedule_job(detail, trigger).unwrap();
        scheduler.start();

        assert!(rx.recv_timeout(StdDuration::from_secs(2)).is_ok());
        assert!(rx.recv_timeout(StdDuration::from_millis(200)).is_err());
        scheduler.shutdown(false);
    }

    #[test]
    fn trigger_job_fires_immediately_without_a_schedule() {
        let scheduler = Scheduler::with_defaults();
        let (tx, rx) = mpsc::channel();
        let detail = JobDetail::new(JobKey::new("j1"), Arc::new(Signal(Mutex::new(tx))));
        scheduler.add_job(detail, false).unwrap();
        scheduler.start();
        scheduler.trigger_job(&JobKey::new("j1"), None).unwrap();
        assert!(rx.recv_timeout(StdDuration::from_secs(2)).is_ok());
        scheduler.shutdown(false);
    }

    #[test]
    fn standby_prevents_firing_until_resumed() {
        let scheduler = Scheduler::with_defaults();
        let (tx, rx) = mpsc::channel();
        let detail = JobDetail::new(JobKey::new("j1"), Arc::new(Signal(Mutex::new(tx))));
        let trigger = Trigger::simple(
            TriggerKey::new("t1"),
            JobKey::new("j1"),
            Utc::now(),
            RepeatCount::Finite(0),
            Duration::seconds(1),
        );
        scheduler.schedule_job(detail, trigger).unwrap();
        scheduler.start();
        scheduler.standby();
        assert!(rx.recv_timeout(StdDuration::from_millis(200)).is_err());
        scheduler.start();
        assert!(rx.recv_timeout(StdDuration::from_secs(2)).is_ok());
        scheduler.shutdown(false);
    }
}
