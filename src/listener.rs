//! Listeners and the signaler fan-out (C7).
//!
//! Callbacks run synchronously, on whichever thread triggers them (the
//! scheduler loop or a worker thread), and are invoked outside the store's
//! mutex so a misbehaving listener cannot deadlock a store operation. A
//! listener that panics is caught and logged; it never takes down the
//! caller or the other listeners in the fan-out.

use crate::job::{CompletedExecutionInstruction, ExecutionContext};
use crate::keys::{JobKey, TriggerKey};
use crate::trigger::Trigger;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::error;

/// Observes job execution.
pub trait JobListener: Send + Sync {
    /// A unique name identifying this listener.
    fn name(&self) -> &str;

    /// Called immediately before a job executes.
    fn job_to_be_executed(&self, _context: &ExecutionContext) {}

    /// Called immediately after a job executes, successfully or not.
    fn job_was_executed(&self, _context: &ExecutionContext, _error: Option<&str>) {}
}

/// Decision a [`TriggerListener::vetoes_execution`] hook can make before a
/// trigger's job would run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VetoDecision {
    /// Let the job run.
    Allow,
    /// Skip this firing entirely.
    Veto,
}

/// Observes trigger firings.
pub trait TriggerListener: Send + Sync {
    /// A unique name identifying this listener.
    fn name(&self) -> &str;

    /// Called when a trigger fires, before the job factory is consulted.
    fn trigger_fired(&self, _trigger: &Trigger) {}

    /// Called instead of [`JobListener::job_to_be_executed`] when this
    /// listener vetoes the firing.
    fn vetoes_execution(&self, _trigger: &Trigger) -> VetoDecision {
        VetoDecision::Allow
    }

    /// Called when a trigger misfires.
    fn trigger_misfired(&self, _trigger: &Trigger) {}

    /// Called after a job completes for this trigger's firing.
    fn trigger_complete(&self, _trigger: &Trigger, _instruction: CompletedExecutionInstruction) {}
}

/// Observes scheduler-wide lifecycle events.
pub trait SchedulerListener: Send + Sync {
    /// A unique name identifying this listener.
    fn name(&self) -> &str;

    /// Called once the scheduler starts firing triggers.
    fn scheduler_started(&self) {}

    /// Called when the scheduler enters standby (paused) mode.
    fn scheduler_paused(&self) {}

    /// Called when the scheduler resumes from standby.
    fn scheduler_resumed(&self) {}

    /// Called once the scheduler has fully shut down.
    fn scheduler_shutdown(&self) {}

    /// Called whenever a job is added, removed, or a trigger (re)scheduled.
    fn scheduling_changed(&self) {}

    /// Called when a job throws and no more specific handling intercepts it.
    fn job_scheduling_error(&self, job_key: &JobKey, message: &str) {
        let _ = (job_key, message);
    }
}

/// Holds every registered listener and fans callbacks out to them.
#[derive(Default)]
pub struct ListenerManager {
    job_listeners: RwLock<Vec<Arc<dyn JobListener>>>,
    trigger_listeners: RwLock<Vec<Arc<dyn TriggerListener>>>,
    scheduler_listeners: RwLock<Vec<Arc<dyn SchedulerListener>>>,
}

impl ListenerManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job listener.
    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>) {
        self.job_listeners.write().unwrap_or_else(|p| p.into_inner()).push(listener);
    }

    /// Unregisters a job listener by name.
    pub fn remove_job_listener(&self, name: &str) -> bool {
        let mut listeners = self.job_listeners.write().unwrap_or_else(|p| p.into_inner());
        let before = listeners.len();
        listeners.retain(|l| l.name() != name);
        listeners.len() != before
    }

    /// Registers a trigger listener.
    pub fn add_trigger_listener(&self, listener: Arc<dyn TriggerListener>) {
        self.trigger_listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
    }

    /// Unregisters a trigger listener by name.
    pub fn remove_trigger_listener(&self, name: &str) -> bool {
        let mut listeners = self.trigger_listeners.write().unwrap_or_else(|p| p.into_inner());
        let before = listeners.len();
        listeners.retain(|l| l.name() != name);
        listeners.len() != before
    }

    /// Registers a scheduler listener.
    pub fn add_scheduler_listener(&self, listener: Arc<dyn SchedulerListener>) {
        self.scheduler_listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
    }

    /// Unregisters a scheduler listener by name.
    pub fn remove_scheduler_listener(&self, name: &str) -> bool {
        let mut listeners = self.scheduler_listeners.write().unwrap_or_else(|p| p.into_inner());
        let before = listeners.len();
        listeners.retain(|l| l.name() != name);
        listeners.len() != before
    }

    fn job_listeners_snapshot(&self) -> Vec<Arc<dyn JobListener>> {
        self.job_listeners.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn trigger_listeners_snapshot(&self) -> Vec<Arc<dyn TriggerListener>> {
        self.trigger_listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn scheduler_listeners_snapshot(&self) -> Vec<Arc<dyn SchedulerListener>> {
        self.scheduler_listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Fans `trigger_fired` out to every trigger listener, returning
    /// [`VetoDecision::Veto`] if any one of them vetoes the firing.
    pub fn fire_trigger_fired(&self, trigger: &Trigger) -> VetoDecision {
        let mut decision = VetoDecision::Allow;
        for listener in self.trigger_listeners_snapshot() {
            guard(listener.name(), || listener.trigger_fired(trigger));
            if guard(listener.name(), || listener.vetoes_execution(trigger))
                == Some(VetoDecision::Veto)
            {
                decision = VetoDecision::Veto;
            }
        }
        decision
    }

    /// Fans `trigger_misfired` out to every trigger listener.
    pub fn fire_trigger_misfired(&self, trigger: &Trigger) {
        for listener in self.trigger_listeners_snapshot() {
            guard(listener.name(), || listener.trigger_misfired(trigger));
        }
    }

    /// Fans `trigger_complete` out to every trigger listener.
    pub fn fire_trigger_complete(&self, trigger: &Trigger, instruction: CompletedExecutionInstruction) {
        for listener in self.trigger_listeners_snapshot() {
            guard(listener.name(), || listener.trigger_complete(trigger, instruction));
        }
    }

    /// Fans `job_to_be_executed` out to every job listener.
    pub fn fire_job_to_be_executed(&self, context: &ExecutionContext) {
        for listener in self.job_listeners_snapshot() {
            guard(listener.name(), || listener.job_to_be_executed(context));
        }
    }

    /// Fans `job_was_executed` out to every job listener.
    pub fn fire_job_was_executed(&self, context: &ExecutionContext, error: Option<&str>) {
        for listener in self.job_listeners_snapshot() {
            guard(listener.name(), || listener.job_was_executed(context, error));
        }
    }

    /// Fans `scheduler_started` out to every scheduler listener.
    pub fn fire_scheduler_started(&self) {
        for listener in self.scheduler_listeners_snapshot() {
            guard(listener.name(), || listener.scheduler_started());
        }
    }

    /// Fans `scheduler_paused` out to every scheduler listener.
    pub fn fire_scheduler_paused(&self) {
        for listener in self.scheduler_listeners_snapshot() {
            guard(listener.name(), || listener.scheduler_paused());
        }
    }

    /// Fans `scheduler_resumed` out to every scheduler listener.
    pub fn fire_scheduler_resumed(&self) {
        for listener in self.scheduler_listeners_snapshot() {
            guard(listener.name(), || listener.scheduler_resumed());
        }
    }

    /// Fans `scheduler_shutdown` out to every scheduler listener.
    pub fn fire_scheduler_shutdown(&self) {
        for listener in self.scheduler_listeners_snapshot() {
            guard(listener.name(), || listener.scheduler_shutdown());
        }
    }

    /// Fans `scheduling_changed` out to every scheduler listener.
    pub fn fire_scheduling_changed(&self) {
        for listener in self.scheduler_listeners_snapshot() {
            guard(listener.name(), || listener.scheduling_changed());
        }
    }

    /// Fans `job_scheduling_error` out to every scheduler listener.
    pub fn fire_job_scheduling_error(&self, job_key: &JobKey, message: &str) {
        for listener in self.scheduler_listeners_snapshot() {
            guard(listener.name(), || listener.job_scheduling_error(job_key, message));
        }
    }
}

impl std::fmt::Debug for ListenerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerManager")
            .field("job_listeners", &self.job_listeners_snapshot().len())
            .field("trigger_listeners", &self.trigger_listeners_snapshot().len())
            .field("scheduler_listeners", &self.scheduler_listeners_snapshot().len())
            .finish()
    }
}

fn guard<T>(listener_name: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            error!(listener = listener_name, "listener panicked; isolating and continuing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobDataMap;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJobListener {
        name: String,
        count: Arc<AtomicUsize>,
    }

    impl JobListener for CountingJobListener {
        fn name(&self) -> &str {
            &self.name
        }

        fn job_to_be_executed(&self, _context: &ExecutionContext) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingListener;

    impl JobListener for PanickingListener {
        fn name(&self) -> &str {
            "panicker"
        }

        fn job_to_be_executed(&self, _context: &ExecutionContext) {
            panic!("listener exploded");
        }
    }

    fn sample_context() -> ExecutionContext {
        ExecutionContext::new(
            JobKey::new("j1"),
            TriggerKey::new("t1"),
            JobDataMap::new(),
            Utc::now(),
            None,
            None,
            None,
            0,
            false,
        )
    }

    #[test]
    fn job_listener_fan_out_runs_every_listener() {
        let manager = ListenerManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        manager.add_job_listener(Arc::new(CountingJobListener {
            name: "a".into(),
            count: Arc::clone(&count),
        }));
        manager.add_job_listener(Arc::new(CountingJobListener {
            name: "b".into(),
            count: Arc::clone(&count),
        }));
        manager.fire_job_to_be_executed(&sample_context());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn a_panicking_listener_does_not_stop_the_others() {
        let manager = ListenerManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        manager.add_job_listener(Arc::new(PanickingListener));
        manager.add_job_listener(Arc::new(CountingJobListener {
            name: "survivor".into(),
            count: Arc::clone(&count),
        }));
        manager.fire_job_to_be_executed(&sample_context());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_listener_by_name() {
        let manager = ListenerManager::new();
        manager.add_job_listener(Arc::new(CountingJobListener {
            name: "a".into(),
            count: Arc::new(AtomicUsize::new(0)),
        }));
        assert!(manager.remove_job_listener("a"));
        assert!(!manager.remove_job_listener("a"));
    }
}
