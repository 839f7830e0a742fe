//! Scheduler configuration.

use chrono::Duration;
use std::time::Duration as StdDuration;

use crate::store::DEFAULT_MISFIRE_THRESHOLD;

/// How the scheduler names itself and its run instance, mirroring the
/// Quartz convention of `instanceName` + `instanceId`.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    instance_name: String,
    instance_id: String,
    thread_pool_size: usize,
    misfire_threshold: Duration,
    idle_wait_time: StdDuration,
    batch_trigger_acquisition_max_count: usize,
    batch_trigger_acquisition_fire_ahead_window: Duration,
}

impl SchedulerConfig {
    /// A builder seeded with Quartz-like defaults: a ten-thread pool,
    /// a 5 second misfire threshold, and a generated instance id.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// The scheduler's logical name.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// This run's unique instance id.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The worker pool's thread count.
    pub fn thread_pool_size(&self) -> usize {
        self.thread_pool_size
    }

    /// The misfire threshold applied to newly stored triggers.
    pub fn misfire_threshold(&self) -> Duration {
        self.misfire_threshold
    }

    /// How long the scheduler loop waits on its signal when there is no
    /// trigger due.
    pub fn idle_wait_time(&self) -> StdDuration {
        self.idle_wait_time
    }

    /// The maximum number of triggers acquired per polling cycle.
    pub fn batch_trigger_acquisition_max_count(&self) -> usize {
        self.batch_trigger_acquisition_max_count
    }

    /// How far past the earliest due trigger's fire time the acquisition
    /// window extends when batching.
    pub fn batch_trigger_acquisition_fire_ahead_window(&self) -> Duration {
        self.batch_trigger_acquisition_fire_ahead_window
    }
}

/// Builder for [`SchedulerConfig`].
pub struct SchedulerConfigBuilder {
    instance_name: String,
    instance_id: Option<String>,
    thread_pool_size: usize,
    misfire_threshold: Duration,
    idle_wait_time: StdDuration,
    batch_trigger_acquisition_max_count: usize,
    batch_trigger_acquisition_fire_ahead_window: Duration,
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self {
            instance_name: "QuartziteScheduler".to_string(),
            instance_id: None,
            thread_pool_size: 10,
            misfire_threshold: DEFAULT_MISFIRE_THRESHOLD,
            idle_wait_time: StdDuration::from_millis(50),
            batch_trigger_acquisition_max_count: 1,
            batch_trigger_acquisition_fire_ahead_window: Duration::zero(),
        }
    }
}

impl SchedulerConfigBuilder {
    /// Sets the scheduler's logical name.
    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Sets an explicit instance id, overriding the generated default.
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Sets the worker pool's thread count.
    pub fn thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = size.max(1);
        self
    }

    /// Sets the misfire threshold.
    pub fn misfire_threshold(mut self, threshold: Duration) -> Self {
        self.misfire_threshold = threshold;
        self
    }

    /// Sets how long the scheduler loop waits on its signal when idle.
    pub fn idle_wait_time(mut self, wait: StdDuration) -> Self {
        self.idle_wait_time = wait;
        self
    }

    /// Sets the maximum number of triggers acquired per polling cycle.
    pub fn batch_trigger_acquisition_max_count(mut self, max_count: usize) -> Self {
        self.batch_trigger_acquisition_max_count = max_count.max(1);
        self
    }

    /// Sets the fire-ahead window used when batching trigger acquisition.
    pub fn batch_trigger_acquisition_fire_ahead_window(mut self, window: Duration) -> Self {
        self.batch_trigger_acquisition_fire_ahead_window = window;
        self
    }

    /// Builds the configuration, generating an instance id from the
    /// hostname and current time if none was set explicitly — the same
    /// fallback Quartz itself uses.
    pub fn build(self) -> SchedulerConfig {
        let instance_id = self.instance_id.unwrap_or_else(generate_instance_id);
        SchedulerConfig {
            instance_name: self.instance_name,
            instance_id,
            thread_pool_size: self.thread_pool_size,
            misfire_threshold: self.misfire_threshold,
            idle_wait_time: self.idle_wait_time,
            batch_trigger_acquisition_max_count: self.batch_trigger_acquisition_max_count,
            batch_trigger_acquisition_fire_ahead_window: self.batch_trigger_acquisition_fire_ahead_window,
        }
    }
}

fn generate_instance_id() -> String {
    if let Ok(explicit) = std::env::var("QUARTZITE_INSTANCE_ID") {
        return explicit;
    }
    let host = hostname_or_default();
    let millis = chrono::Utc::now().timestamp_millis();
    format!("{host}-{millis}")
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "non-clustered".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_quartz_style_defaults() {
        let config = SchedulerConfig::builder().build();
        assert_eq!(config.instance_name(), "QuartziteScheduler");
        assert_eq!(config.thread_pool_size(), 10);
        assert!(!config.instance_id().is_empty());
    }

    #[test]
    fn explicit_instance_id_is_preserved() {
        let config = SchedulerConfig::builder().instance_id("fixed-id").build();
        assert_eq!(config.instance_id(), "fixed-id");
    }

    #[test]
    fn thread_pool_size_clamped_to_at_least_one() {
        let config = SchedulerConfig::builder().thread_pool_size(0).build();
        assert_eq!(config.thread_pool_size(), 1);
    }
}
