//! The in-memory job store (C4): a single mutex-guarded critical section
//! holding every job, trigger, and calendar, plus the acquire/fire/complete
//! protocol the scheduler loop drives.

use crate::calendar::Calendar;
use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{JobDataMap, JobDetail};
use crate::keys::{GroupMatcher, JobKey, TriggerKey};
use crate::signal::{ScheduleSignal, SharedSignal};
use crate::trigger::Trigger;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// The externally observable status of a trigger. `PAUSED_BLOCKED` surfaces
/// as [`TriggerState::Paused`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// The trigger is not in the store.
    None,
    /// Waiting, acquired, or executing: business as usual.
    Normal,
    /// Paused, whether or not it is also blocked.
    Paused,
    /// Terminally complete; no further firings.
    Complete,
    /// Terminally errored.
    Error,
    /// Blocked by a concurrently-executing sibling trigger of the same job.
    Blocked,
}

/// Internal trigger lifecycle state. `Paused` carries whether the trigger
/// was also blocked when it was paused, so resuming can restore it exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InternalState {
    Waiting,
    Acquired,
    Executing,
    Complete,
    Paused { blocked: bool },
    Blocked,
    Error,
}

impl InternalState {
    fn external(self) -> TriggerState {
        match self {
            InternalState::Waiting | InternalState::Acquired | InternalState::Executing => {
                TriggerState::Normal
            }
            InternalState::Complete => TriggerState::Complete,
            InternalState::Paused { .. } => TriggerState::Paused,
            InternalState::Blocked => TriggerState::Blocked,
            InternalState::Error => TriggerState::Error,
        }
    }
}

struct TriggerWrapper {
    trigger: Trigger,
    state: InternalState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TimeIndexEntry {
    next_fire_time: DateTime<Utc>,
    priority: i32,
    key: TriggerKey,
}

impl Ord for TimeIndexEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.next_fire_time
            .cmp(&other.next_fire_time)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.key.group().cmp(other.key.group()))
            .then_with(|| self.key.name().cmp(other.key.name()))
    }
}

impl PartialOrd for TimeIndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Everything the store needs to dispatch one firing to the worker pool.
#[derive(Clone)]
pub struct TriggerFiredBundle {
    /// The job being fired.
    pub job_detail: JobDetail,
    /// The trigger that fired, already advanced past this firing.
    pub trigger: Trigger,
    /// The calendar named by the trigger, if any and if it still exists.
    pub calendar: Option<Calendar>,
    /// The instant the firing was actually processed.
    pub fired_at: DateTime<Utc>,
    /// The instant the trigger was scheduled to fire, before this firing.
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    /// The trigger's `previousFireTime` before this firing.
    pub previous_fire_time: Option<DateTime<Utc>>,
    /// The trigger's `nextFireTime` after this firing.
    pub next_fire_time: Option<DateTime<Utc>>,
}

/// Instruction a worker passes back to [`JobStore::triggered_job_complete`]
/// after running a job, mirroring [`crate::job::CompletedExecutionInstruction`].
pub use crate::job::CompletedExecutionInstruction;

/// The default window within which a late firing is not considered a misfire.
pub const DEFAULT_MISFIRE_THRESHOLD: Duration = Duration::milliseconds(5000);

struct StoreState {
    jobs_by_key: HashMap<JobKey, JobDetail>,
    jobs_by_group: HashMap<String, HashSet<JobKey>>,
    triggers_by_key: HashMap<TriggerKey, TriggerWrapper>,
    triggers_by_group: HashMap<String, HashSet<TriggerKey>>,
    triggers_by_job: HashMap<JobKey, HashSet<TriggerKey>>,
    time_triggers: BTreeSet<TimeIndexEntry>,
    calendars_by_name: HashMap<String, Calendar>,
    paused_trigger_groups: HashSet<String>,
    paused_job_groups: HashSet<String>,
    blocked_jobs: HashSet<JobKey>,
    misfire_threshold: Duration,
    fire_instance_counter: u64,
}

impl StoreState {
    fn new() -> Self {
        Self {
            jobs_by_key: HashMap::new(),
            jobs_by_group: HashMap::new(),
            triggers_by_key: HashMap::new(),
            triggers_by_group: HashMap::new(),
            triggers_by_job: HashMap::new(),
            time_triggers: BTreeSet::new(),
            calendars_by_name: HashMap::new(),
            paused_trigger_groups: HashSet::new(),
            paused_job_groups: HashSet::new(),
            blocked_jobs: HashSet::new(),
            misfire_threshold: DEFAULT_MISFIRE_THRESHOLD,
            fire_instance_counter: Utc::now().timestamp_millis().max(0) as u64,
        }
    }

    fn next_fire_instance_id(&mut self) -> String {
        self.fire_instance_counter += 1;
        format!("ft-{}", self.fire_instance_counter)
    }

    fn group_index_insert(index: &mut HashMap<String, HashSet<TriggerKey>>, group: &str, key: TriggerKey) {
        index.entry(group.to_string()).or_default().insert(key);
    }

    fn group_index_remove(index: &mut HashMap<String, HashSet<TriggerKey>>, group: &str, key: &TriggerKey) {
        if let Some(set) = index.get_mut(group) {
            set.remove(key);
            if set.is_empty() {
                index.remove(group);
            }
        }
    }

    fn job_group_insert(&mut self, group: &str, key: JobKey) {
        self.jobs_by_group.entry(group.to_string()).or_default().insert(key);
    }

    fn job_group_remove(&mut self, group: &str, key: &JobKey) {
        if let Some(set) = self.jobs_by_group.get_mut(group) {
            set.remove(key);
            if set.is_empty() {
                self.jobs_by_group.remove(group);
            }
        }
    }

    fn is_trigger_group_paused(&self, group: &str) -> bool {
        self.paused_trigger_groups.contains(group)
    }

    fn is_job_group_paused(&self, group: &str) -> bool {
        self.paused_job_groups.contains(group)
    }

    fn insert_time_index(&mut self, trigger: &Trigger) {
        if let Some(next) = trigger.next_fire_time() {
            self.time_triggers.insert(TimeIndexEntry {
                next_fire_time: next,
                priority: trigger.priority(),
                key: trigger.key().clone(),
            });
        }
    }

    fn remove_time_index(&mut self, key: &TriggerKey, next_fire_time: Option<DateTime<Utc>>) {
        if let Some(next) = next_fire_time {
            if let Some(wrapper) = self.triggers_by_key.get(key) {
                self.time_triggers.remove(&TimeIndexEntry {
                    next_fire_time: next,
                    priority: wrapper.trigger.priority(),
                    key: key.clone(),
                });
            }
        }
    }

    /// Computes the initial internal state for a freshly stored trigger,
    /// honoring paused groups and blocked jobs.
    fn initial_state(&self, trigger: &Trigger) -> InternalState {
        let trigger_paused = self.is_trigger_group_paused(trigger.key().group());
        let job_paused = self.is_job_group_paused(trigger.job_key().group());
        let blocked = self.blocked_jobs.contains(trigger.job_key());
        match (trigger_paused || job_paused, blocked) {
            (true, blocked) => InternalState::Paused { blocked },
            (false, true) => InternalState::Blocked,
            (false, false) => {
                if trigger.next_fire_time().is_some() {
                    InternalState::Waiting
                } else {
                    InternalState::Complete
                }
            }
        }
    }
}

/// The in-memory, mutex-guarded job store.
pub struct JobStore {
    state: Mutex<StoreState>,
    signal: SharedSignal,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::new()),
            signal: ScheduleSignal::new(),
        }
    }

    /// The schedule-changed signal the scheduler loop waits on.
    pub fn signal(&self) -> SharedSignal {
        self.signal.clone()
    }

    /// The misfire threshold new triggers are evaluated against.
    pub fn misfire_threshold(&self) -> Duration {
        self.state.lock().misfire_threshold
    }

    /// Sets the misfire threshold.
    pub fn set_misfire_threshold(&self, threshold: Duration) {
        self.state.lock().misfire_threshold = threshold;
    }

    // ---- write operations -------------------------------------------------

    /// Stores a job, replacing any existing job with the same key only if
    /// `replace` is true.
    pub fn store_job(&self, detail: JobDetail, replace: bool) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        if !replace && state.jobs_by_key.contains_key(detail.key()) {
            return Err(SchedulerError::JobAlreadyExists(detail.key().clone()));
        }
        state.job_group_insert(detail.key().group(), detail.key().clone());
        state.jobs_by_key.insert(detail.key().clone(), detail);
        Ok(())
    }

    /// Stores a trigger, computing its first fire time and linking it to its
    /// job. Fails if the job doesn't exist or (without `replace`) the
    /// trigger key is already in use.
    pub fn store_trigger(&self, mut trigger: Trigger, replace: bool) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        if !replace && state.triggers_by_key.contains_key(trigger.key()) {
            return Err(SchedulerError::TriggerAlreadyExists(trigger.key().clone()));
        }
        if !state.jobs_by_key.contains_key(trigger.job_key()) {
            return Err(SchedulerError::DanglingJobReference {
                trigger: trigger.key().clone(),
                job: trigger.job_key().clone(),
            });
        }
        if replace {
            self.remove_trigger_locked(&mut state, trigger.key());
        }
        let calendar = trigger
            .calendar_name()
            .and_then(|name| state.calendars_by_name.get(name))
            .cloned();
        trigger.compute_first_fire_time(calendar.as_ref());

        let key = trigger.key().clone();
        let job_key = trigger.job_key().clone();
        StoreState::group_index_insert(&mut state.triggers_by_group, key.group(), key.clone());
        state
            .triggers_by_job
            .entry(job_key)
            .or_default()
            .insert(key.clone());

        let initial_state = state.initial_state(&trigger);
        if matches!(initial_state, InternalState::Waiting) {
            state.insert_time_index(&trigger);
        }
        state.triggers_by_key.insert(
            key,
            TriggerWrapper {
                trigger,
                state: initial_state,
            },
        );
        self.signal.notify();
        Ok(())
    }

    /// Removes a job and all of its triggers. Returns `true` if the job
    /// existed.
    pub fn remove_job(&self, job_key: &JobKey) -> bool {
        let mut state = self.state.lock();
        self.remove_job_locked(&mut state, job_key)
    }

    fn remove_job_locked(&self, state: &mut StoreState, job_key: &JobKey) -> bool {
        let Some(detail) = state.jobs_by_key.remove(job_key) else {
            return false;
        };
        state.job_group_remove(detail.key().group(), job_key);
        if let Some(trigger_keys) = state.triggers_by_job.remove(job_key) {
            for trigger_key in trigger_keys {
                self.remove_trigger_locked(state, &trigger_key);
            }
        }
        self.signal.notify();
        true
    }

    /// Removes a trigger, and its job too if the job is non-durable and this
    /// was its last trigger. Returns `true` if the trigger existed.
    pub fn remove_trigger(&self, trigger_key: &TriggerKey) -> bool {
        let mut state = self.state.lock();
        let removed = self.remove_trigger_locked(&mut state, trigger_key);
        if removed {
            self.signal.notify();
        }
        removed
    }

    fn remove_trigger_locked(&self, state: &mut StoreState, trigger_key: &TriggerKey) -> bool {
        let Some(wrapper) = state.triggers_by_key.remove(trigger_key) else {
            return false;
        };
        state.remove_time_index(trigger_key, wrapper.trigger.next_fire_time());
        StoreState::group_index_remove(&mut state.triggers_by_group, trigger_key.group(), trigger_key);
        let job_key = wrapper.trigger.job_key().clone();
        if let Some(siblings) = state.triggers_by_job.get_mut(&job_key) {
            siblings.remove(trigger_key);
            if siblings.is_empty() {
                state.triggers_by_job.remove(&job_key);
                let durable = state
                    .jobs_by_key
                    .get(&job_key)
                    .is_some_and(JobDetail::is_durable);
                if !durable {
                    self.remove_job_locked(state, &job_key);
                }
            }
        }
        true
    }

    /// Replaces the trigger at `key` with `new_trigger`, which must target
    /// the same job. Returns `true` if the replacement took place.
    pub fn replace_trigger(&self, key: &TriggerKey, new_trigger: Trigger) -> SchedulerResult<bool> {
        let mut state = self.state.lock();
        let Some(existing) = state.triggers_by_key.get(key) else {
            return Ok(false);
        };
        let expected = existing.trigger.job_key().clone();
        if new_trigger.job_key() != &expected {
            return Err(SchedulerError::MismatchedJobKey {
                trigger: key.clone(),
                expected,
                found: new_trigger.job_key().clone(),
            });
        }
        self.remove_trigger_locked(&mut state, key);
        drop(state);
        self.store_trigger(new_trigger, true)?;
        Ok(true)
    }

    /// Stores a calendar, optionally recomputing every trigger named it.
    pub fn store_calendar(
        &self,
        name: impl Into<String>,
        calendar: Calendar,
        replace: bool,
        update_triggers: bool,
    ) -> SchedulerResult<()> {
        let name = name.into();
        let mut state = self.state.lock();
        if !replace && state.calendars_by_name.contains_key(&name) {
            return Err(SchedulerError::InvalidInput(format!(
                "calendar '{name}' already exists"
            )));
        }
        state.calendars_by_name.insert(name.clone(), calendar.clone());
        if update_triggers {
            let affected: Vec<TriggerKey> = state
                .triggers_by_key
                .values()
                .filter(|w| w.trigger.calendar_name() == Some(name.as_str()))
                .map(|w| w.trigger.key().clone())
                .collect();
            for trigger_key in affected {
                self.recompute_for_calendar_change(&mut state, &trigger_key, Some(&calendar));
            }
        }
        self.signal.notify();
        Ok(())
    }

    fn recompute_for_calendar_change(
        &self,
        state: &mut StoreState,
        trigger_key: &TriggerKey,
        calendar: Option<&Calendar>,
    ) {
        let Some(wrapper) = state.triggers_by_key.get_mut(trigger_key) else {
            return;
        };
        let was_waiting = matches!(wrapper.state, InternalState::Waiting);
        let old_next = wrapper.trigger.next_fire_time();
        wrapper.trigger.recompute_next_fire_time(calendar);
        if was_waiting {
            state.remove_time_index(trigger_key, old_next);
            let trigger = state.triggers_by_key[trigger_key].trigger.clone();
            state.insert_time_index(&trigger);
        }
    }

    /// Removes a calendar. Fails if any trigger still names it.
    pub fn remove_calendar(&self, name: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock();
        if !state.calendars_by_name.contains_key(name) {
            return Ok(false);
        }
        let in_use = state
            .triggers_by_key
            .values()
            .any(|w| w.trigger.calendar_name() == Some(name));
        if in_use {
            return Err(SchedulerError::CalendarInUse(name.to_string()));
        }
        state.calendars_by_name.remove(name);
        Ok(true)
    }

    /// Pauses one trigger.
    pub fn pause_trigger(&self, key: &TriggerKey) {
        let mut state = self.state.lock();
        self.pause_trigger_locked(&mut state, key);
        self.signal.notify();
    }

    fn pause_trigger_locked(&self, state: &mut StoreState, key: &TriggerKey) {
        let Some(wrapper) = state.triggers_by_key.get_mut(key) else {
            return;
        };
        let blocked = matches!(wrapper.state, InternalState::Blocked | InternalState::Paused { blocked: true });
        if matches!(wrapper.state, InternalState::Paused { .. }) {
            return;
        }
        let old_next = wrapper.trigger.next_fire_time();
        wrapper.state = InternalState::Paused { blocked };
        state.remove_time_index(key, old_next);
    }

    /// Pauses every trigger of one job.
    pub fn pause_job(&self, job_key: &JobKey) {
        let mut state = self.state.lock();
        if let Some(keys) = state.triggers_by_job.get(job_key).cloned() {
            for key in keys {
                self.pause_trigger_locked(&mut state, &key);
            }
        }
        self.signal.notify();
    }

    /// Pauses every trigger and every job group.
    pub fn pause_all(&self) {
        let mut state = self.state.lock();
        let groups: Vec<String> = state.triggers_by_group.keys().cloned().collect();
        for group in groups {
            state.paused_trigger_groups.insert(group.clone());
            let keys: Vec<TriggerKey> = state
                .triggers_by_group
                .get(&group)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default();
            for key in keys {
                self.pause_trigger_locked(&mut state, &key);
            }
        }
        self.signal.notify();
    }

    /// Resumes one trigger.
    pub fn resume_trigger(&self, key: &TriggerKey) {
        let mut state = self.state.lock();
        self.resume_trigger_locked(&mut state, key);
        self.signal.notify();
    }

    fn resume_trigger_locked(&self, state: &mut StoreState, key: &TriggerKey) {
        let now = Utc::now();
        let Some(wrapper) = state.triggers_by_key.get_mut(key) else {
            return;
        };
        let blocked = match wrapper.state {
            InternalState::Paused { blocked } => blocked,
            _ => return,
        };
        if blocked {
            wrapper.state = InternalState::Blocked;
            return;
        }
        let misfired = wrapper
            .trigger
            .next_fire_time()
            .is_some_and(|t| t + state.misfire_threshold < now)
            && !wrapper.trigger.misfire_is_ignored();
        wrapper.state = if wrapper.trigger.next_fire_time().is_some() {
            InternalState::Waiting
        } else {
            InternalState::Complete
        };
        if misfired {
            self.apply_misfire_locked(state, key, now);
        } else if matches!(state.triggers_by_key[key].state, InternalState::Waiting) {
            let trigger = state.triggers_by_key[key].trigger.clone();
            state.insert_time_index(&trigger);
        }
    }

    /// Resumes every trigger of one job.
    pub fn resume_job(&self, job_key: &JobKey) {
        let mut state = self.state.lock();
        if let Some(keys) = state.triggers_by_job.get(job_key).cloned() {
            for key in keys {
                self.resume_trigger_locked(&mut state, &key);
            }
        }
        self.signal.notify();
    }

    /// Resumes every trigger and clears all paused groups.
    pub fn resume_all(&self) {
        let mut state = self.state.lock();
        let keys: Vec<TriggerKey> = state.triggers_by_key.keys().cloned().collect();
        state.paused_trigger_groups.clear();
        state.paused_job_groups.clear();
        for key in keys {
            self.resume_trigger_locked(&mut state, &key);
        }
        self.signal.notify();
    }

    /// Pauses every trigger group matching `matcher`. Returns the matched
    /// group names (each matched group is recorded, not the matcher value).
    pub fn pause_triggers(&self, matcher: &GroupMatcher) -> Vec<String> {
        let mut state = self.state.lock();
        let groups: Vec<String> = state
            .triggers_by_group
            .keys()
            .filter(|g| matcher.matches_group(g))
            .cloned()
            .collect();
        for group in &groups {
            state.paused_trigger_groups.insert(group.clone());
            let keys: Vec<TriggerKey> = state
                .triggers_by_group
                .get(group)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default();
            for key in keys {
                self.pause_trigger_locked(&mut state, &key);
            }
        }
        self.signal.notify();
        groups
    }

    /// Pauses every job group matching `matcher`.
    pub fn pause_jobs(&self, matcher: &GroupMatcher) -> Vec<String> {
        let mut state = self.state.lock();
        let groups: Vec<String> = state
            .jobs_by_group
            .keys()
            .filter(|g| matcher.matches_group(g))
            .cloned()
            .collect();
        for group in &groups {
            state.paused_job_groups.insert(group.clone());
            let job_keys: Vec<JobKey> = state
                .jobs_by_group
                .get(group)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default();
            for job_key in job_keys {
                let trigger_keys: Vec<TriggerKey> = state
                    .triggers_by_job
                    .get(&job_key)
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default();
                for key in trigger_keys {
                    self.pause_trigger_locked(&mut state, &key);
                }
            }
        }
        self.signal.notify();
        groups
    }

    /// Resumes every trigger group matching `matcher`.
    pub fn resume_triggers(&self, matcher: &GroupMatcher) -> Vec<String> {
        let mut state = self.state.lock();
        let groups: Vec<String> = state
            .paused_trigger_groups
            .iter()
            .filter(|g| matcher.matches_group(g))
            .cloned()
            .collect();
        for group in &groups {
            state.paused_trigger_groups.remove(group);
            let keys: Vec<TriggerKey> = state
                .triggers_by_group
                .get(group)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default();
            for key in keys {
                self.resume_trigger_locked(&mut state, &key);
            }
        }
        self.signal.notify();
        groups
    }

    /// Resumes every job group matching `matcher`.
    pub fn resume_jobs(&self, matcher: &GroupMatcher) -> Vec<String> {
        let mut state = self.state.lock();
        let groups: Vec<String> = state
            .paused_job_groups
            .iter()
            .filter(|g| matcher.matches_group(g))
            .cloned()
            .collect();
        for group in &groups {
            state.paused_job_groups.remove(group);
            let job_keys: Vec<JobKey> = state
                .jobs_by_group
                .get(group)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default();
            for job_key in job_keys {
                let trigger_keys: Vec<TriggerKey> = state
                    .triggers_by_job
                    .get(&job_key)
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default();
                for key in trigger_keys {
                    self.resume_trigger_locked(&mut state, &key);
                }
            }
        }
        self.signal.notify();
        groups
    }

    /// The trigger groups currently paused.
    pub fn paused_trigger_groups(&self) -> HashSet<String> {
        self.state.lock().paused_trigger_groups.clone()
    }

    /// Removes every job, trigger, and calendar.
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        *state = StoreState::new();
        self.signal.notify();
    }

    // ---- read operations ----------------------------------------------

    /// Fetches a job by key.
    pub fn retrieve_job(&self, key: &JobKey) -> Option<JobDetail> {
        self.state.lock().jobs_by_key.get(key).cloned()
    }

    /// Fetches a trigger by key.
    pub fn retrieve_trigger(&self, key: &TriggerKey) -> Option<Trigger> {
        self.state.lock().triggers_by_key.get(key).map(|w| w.trigger.clone())
    }

    /// True if a job with this key is stored.
    pub fn check_exists_job(&self, key: &JobKey) -> bool {
        self.state.lock().jobs_by_key.contains_key(key)
    }

    /// True if a trigger with this key is stored.
    pub fn check_exists_trigger(&self, key: &TriggerKey) -> bool {
        self.state.lock().triggers_by_key.contains_key(key)
    }

    /// The observable state of a trigger.
    pub fn get_trigger_state(&self, key: &TriggerKey) -> TriggerState {
        self.state
            .lock()
            .triggers_by_key
            .get(key)
            .map(|w| w.state.external())
            .unwrap_or(TriggerState::None)
    }

    /// The number of stored jobs.
    pub fn job_count(&self) -> usize {
        self.state.lock().jobs_by_key.len()
    }

    /// The number of stored triggers.
    pub fn trigger_count(&self) -> usize {
        self.state.lock().triggers_by_key.len()
    }

    /// Job keys matching `matcher`.
    pub fn job_keys(&self, matcher: &GroupMatcher) -> Vec<JobKey> {
        self.state
            .lock()
            .jobs_by_key
            .keys()
            .filter(|k| matcher.matches_job(k))
            .cloned()
            .collect()
    }

    /// Trigger keys matching `matcher`.
    pub fn trigger_keys(&self, matcher: &GroupMatcher) -> Vec<TriggerKey> {
        self.state
            .lock()
            .triggers_by_key
            .keys()
            .filter(|k| matcher.matches_trigger(k))
            .cloned()
            .collect()
    }

    /// Every calendar name.
    pub fn calendar_names(&self) -> Vec<String> {
        self.state.lock().calendars_by_name.keys().cloned().collect()
    }

    /// Fetches a calendar by name.
    pub fn retrieve_calendar(&self, name: &str) -> Option<Calendar> {
        self.state.lock().calendars_by_name.get(name).cloned()
    }

    /// Every job group name.
    pub fn job_group_names(&self) -> Vec<String> {
        self.state.lock().jobs_by_group.keys().cloned().collect()
    }

    /// Every trigger group name.
    pub fn trigger_group_names(&self) -> Vec<String> {
        self.state.lock().triggers_by_group.keys().cloned().collect()
    }

    /// Every trigger targeting `job_key`.
    pub fn triggers_for_job(&self, job_key: &JobKey) -> Vec<Trigger> {
        let state = self.state.lock();
        state
            .triggers_by_job
            .get(job_key)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| state.triggers_by_key.get(k).map(|w| w.trigger.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ---- acquire / fire / complete protocol -----------------------------

    /// Selects up to `max_count` due triggers, applying misfire handling and
    /// the concurrent-execution-disallowed constraint, and marks them
    /// `ACQUIRED`.
    pub fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Vec<Trigger> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut acquired = Vec::new();
        let mut acquired_job_keys: HashSet<JobKey> = HashSet::new();
        let mut window_end: Option<DateTime<Utc>> = None;
        let mut skipped: Vec<TimeIndexEntry> = Vec::new();

        loop {
            if acquired.len() >= max_count {
                break;
            }
            let Some(entry) = state.time_triggers.iter().next().cloned() else {
                break;
            };
            let deadline = window_end.unwrap_or(no_later_than) + time_window;
            if entry.next_fire_time > deadline {
                break;
            }
            state.time_triggers.remove(&entry);

            let threshold = state.misfire_threshold;
            let misfire_ignored = state
                .triggers_by_key
                .get(&entry.key)
                .is_some_and(|w| w.trigger.misfire_is_ignored());
            if !misfire_ignored && entry.next_fire_time + threshold < now {
                self.apply_misfire_locked(&mut state, &entry.key, now);
                // applyMisfire may have changed nextFireTime or removed the
                // trigger from timeTriggers entirely; either way this round
                // does not acquire it.
                continue;
            }

            let Some(wrapper) = state.triggers_by_key.get(&entry.key) else {
                continue;
            };
            if !matches!(wrapper.state, InternalState::Waiting) {
                continue;
            }
            let job_key = wrapper.trigger.job_key().clone();
            let disallows_concurrency = state
                .jobs_by_key
                .get(&job_key)
                .is_some_and(JobDetail::is_concurrent_execution_disallowed);
            if disallows_concurrency
                && (acquired_job_keys.contains(&job_key) || state.blocked_jobs.contains(&job_key))
            {
                skipped.push(entry);
                continue;
            }

            if window_end.is_none() {
                window_end = Some(entry.next_fire_time);
            }
            acquired_job_keys.insert(job_key);
            let id = state.next_fire_instance_id();
            let wrapper = state.triggers_by_key.get_mut(&entry.key).expect("present");
            wrapper.state = InternalState::Acquired;
            wrapper.trigger.assign_fire_instance_id(id);
            acquired.push(wrapper.trigger.clone());
        }

        for entry in skipped {
            state.time_triggers.insert(entry);
        }
        acquired
    }

    /// Reverts an acquired trigger back to `WAITING` and re-indexes it.
    pub fn release_acquired_trigger(&self, trigger_key: &TriggerKey) {
        let mut state = self.state.lock();
        if let Some(wrapper) = state.triggers_by_key.get_mut(trigger_key) {
            if matches!(wrapper.state, InternalState::Acquired) {
                wrapper.state = InternalState::Waiting;
                let trigger = wrapper.trigger.clone();
                state.insert_time_index(&trigger);
            }
        }
    }

    /// Advances each acquired trigger's schedule and produces the fired
    /// bundles the scheduler loop hands to the worker pool.
    pub fn triggers_fired(&self, trigger_keys: &[TriggerKey]) -> Vec<TriggerFiredBundle> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut bundles = Vec::new();

        for trigger_key in trigger_keys {
            let Some(wrapper) = state.triggers_by_key.get(trigger_key) else {
                continue;
            };
            if !matches!(wrapper.state, InternalState::Acquired) {
                continue;
            }
            let calendar_name = wrapper.trigger.calendar_name().map(str::to_string);
            if calendar_name.is_some()
                && !state
                    .calendars_by_name
                    .contains_key(calendar_name.as_deref().unwrap_or_default())
            {
                // Named calendar was removed after the trigger was stored;
                // silently skip this firing per the error handling design.
                if let Some(wrapper) = state.triggers_by_key.get_mut(trigger_key) {
                    wrapper.state = InternalState::Waiting;
                }
                continue;
            }
            let calendar = calendar_name
                .as_deref()
                .and_then(|name| state.calendars_by_name.get(name))
                .cloned();

            let Some(job_detail) = state
                .jobs_by_key
                .get(wrapper.trigger.job_key())
                .cloned()
            else {
                continue;
            };

            let prev_fire_time = wrapper.trigger.previous_fire_time();
            let disallows_concurrency = job_detail.is_concurrent_execution_disallowed();
            let wrapper = state.triggers_by_key.get_mut(trigger_key).expect("present");
            wrapper.trigger.triggered(calendar.as_ref());
            let next_fire_time = wrapper.trigger.next_fire_time();
            wrapper.state = match (next_fire_time.is_some(), disallows_concurrency) {
                (true, true) => InternalState::Blocked,
                (true, false) => InternalState::Waiting,
                (false, _) => InternalState::Complete,
            };
            let fired_trigger = wrapper.trigger.clone();
            if matches!(state.triggers_by_key[trigger_key].state, InternalState::Waiting) {
                state.insert_time_index(&fired_trigger);
            }

            if disallows_concurrency {
                state.blocked_jobs.insert(job_detail.key().clone());
                if let Some(sibling_keys) = state.triggers_by_job.get(job_detail.key()).cloned() {
                    for sibling_key in sibling_keys {
                        if &sibling_key == trigger_key {
                            continue;
                        }
                        if let Some(sibling) = state.triggers_by_key.get_mut(&sibling_key) {
                            match sibling.state {
                                InternalState::Waiting => {
                                    let next = sibling.trigger.next_fire_time();
                                    sibling.state = InternalState::Blocked;
                                    state.remove_time_index(&sibling_key, next);
                                }
                                InternalState::Paused { blocked: false } => {
                                    sibling.state = InternalState::Paused { blocked: true };
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }

            bundles.push(TriggerFiredBundle {
                job_detail,
                trigger: fired_trigger,
                calendar,
                fired_at: now,
                scheduled_fire_time: prev_fire_time,
                previous_fire_time: prev_fire_time,
                next_fire_time,
            });
        }
        bundles
    }

    /// Applies a completed job's instruction, unblocking sibling triggers if
    /// the job disallows concurrent execution.
    pub fn triggered_job_complete(
        &self,
        trigger_key: &TriggerKey,
        job_key: &JobKey,
        instruction: CompletedExecutionInstruction,
        updated_job_data: Option<JobDataMap>,
    ) {
        let mut state = self.state.lock();

        if let (Some(data), Some(job)) = (updated_job_data, state.jobs_by_key.get_mut(job_key)) {
            if job.persist_job_data_after_execution() {
                job.set_job_data_map(data);
            }
        }

        let disallows_concurrency = state
            .jobs_by_key
            .get(job_key)
            .is_some_and(JobDetail::is_concurrent_execution_disallowed);
        if disallows_concurrency {
            state.blocked_jobs.remove(job_key);
            if let Some(sibling_keys) = state.triggers_by_job.get(job_key).cloned() {
                for sibling_key in sibling_keys {
                    if let Some(sibling) = state.triggers_by_key.get_mut(&sibling_key) {
                        match sibling.state {
                            InternalState::Blocked => {
                                sibling.state = InternalState::Waiting;
                                let trigger = sibling.trigger.clone();
                                state.insert_time_index(&trigger);
                            }
                            InternalState::Paused { blocked: true } => {
                                sibling.state = InternalState::Paused { blocked: false };
                            }
                            _ => {}
                        }
                    }
                }
            }
            self.signal.notify();
        }

        match instruction {
            CompletedExecutionInstruction::Noop => {}
            CompletedExecutionInstruction::ReExecuteJob => {
                if let Some(wrapper) = state.triggers_by_key.get_mut(trigger_key) {
                    wrapper.state = InternalState::Waiting;
                }
                self.signal.notify();
            }
            CompletedExecutionInstruction::DeleteTrigger => {
                let reschedule_pending = state
                    .triggers_by_key
                    .get(trigger_key)
                    .is_some_and(|w| w.trigger.next_fire_time().is_some());
                if !reschedule_pending {
                    self.remove_trigger_locked(&mut state, trigger_key);
                }
            }
            CompletedExecutionInstruction::SetTriggerComplete => {
                self.finalize_trigger(&mut state, trigger_key, InternalState::Complete);
            }
            CompletedExecutionInstruction::SetTriggerError => {
                self.finalize_trigger(&mut state, trigger_key, InternalState::Error);
            }
            CompletedExecutionInstruction::SetAllJobTriggersComplete => {
                if let Some(keys) = state.triggers_by_job.get(job_key).cloned() {
                    for key in keys {
                        self.finalize_trigger(&mut state, &key, InternalState::Complete);
                    }
                }
            }
            CompletedExecutionInstruction::SetAllJobTriggersError => {
                if let Some(keys) = state.triggers_by_job.get(job_key).cloned() {
                    for key in keys {
                        self.finalize_trigger(&mut state, &key, InternalState::Error);
                    }
                }
            }
        }
    }

    fn finalize_trigger(&self, state: &mut StoreState, trigger_key: &TriggerKey, terminal: InternalState) {
        if let Some(wrapper) = state.triggers_by_key.get_mut(trigger_key) {
            let next = wrapper.trigger.next_fire_time();
            wrapper.state = terminal;
            state.remove_time_index(trigger_key, next);
        }
    }

    /// Applies misfire handling to one trigger. Returns `true` if the
    /// trigger's `nextFireTime` actually changed.
    pub fn apply_misfire(&self, trigger_key: &TriggerKey) -> bool {
        let mut state = self.state.lock();
        let now = Utc::now();
        self.apply_misfire_locked(&mut state, trigger_key, now)
    }

    fn apply_misfire_locked(&self, state: &mut StoreState, trigger_key: &TriggerKey, now: DateTime<Utc>) -> bool {
        let threshold = state.misfire_threshold;
        let Some(wrapper) = state.triggers_by_key.get(trigger_key) else {
            return false;
        };
        let Some(old_next) = wrapper.trigger.next_fire_time() else {
            return false;
        };
        if old_next > now - threshold || wrapper.trigger.misfire_is_ignored() {
            return false;
        }

        let calendar = wrapper
            .trigger
            .calendar_name()
            .and_then(|name| state.calendars_by_name.get(name))
            .cloned();
        let wrapper = state.triggers_by_key.get_mut(trigger_key).expect("present");
        wrapper.trigger.update_after_misfire(calendar.as_ref(), now);
        let new_next = wrapper.trigger.next_fire_time();
        debug!(trigger = %trigger_key, "trigger misfired");

        if new_next.is_none() {
            wrapper.state = InternalState::Complete;
            state.remove_time_index(trigger_key, Some(old_next));
            self.signal.notify();
            return true;
        }
        if new_next == Some(old_next) {
            return false;
        }
        if matches!(wrapper.state, InternalState::Waiting) {
            state.remove_time_index(trigger_key, Some(old_next));
            let trigger = state.triggers_by_key[trigger_key].trigger.clone();
            state.insert_time_index(&trigger);
        }
        self.signal.notify();
        true
    }
}
