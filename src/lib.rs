//! quartzite: an in-process job scheduler in the shape of Quartz — jobs,
//! triggers, calendars, and a job store driving a single scheduler loop
//! over a bounded worker pool.
//!
//! ```no_run
//! use quartzite::{JobDetail, JobKey, RepeatCount, Scheduler, SchedulerConfig, Trigger, TriggerKey};
//! use quartzite::job::{ExecutionContext, Job};
//! use chrono::{Duration, Utc};
//! use std::sync::Arc;
//!
//! struct PrintJob;
//! impl Job for PrintJob {
//!     fn execute(&self, _ctx: &mut ExecutionContext) -> quartzite::error::SchedulerResult<()> {
//!         println!("tick");
//!         Ok(())
//!     }
//! }
//!
//! let scheduler = Scheduler::new(SchedulerConfig::builder().build());
//! let detail = JobDetail::new(JobKey::new("heartbeat"), Arc::new(PrintJob));
//! let trigger = Trigger::simple(
//!     TriggerKey::new("heartbeat-trigger"),
//!     JobKey::new("heartbeat"),
//!     Utc::now(),
//!     RepeatCount::Infinite,
//!     Duration::seconds(30),
//! );
//! scheduler.schedule_job(detail, trigger).unwrap();
//! scheduler.start();
//! # scheduler.shutdown(false);
//! ```

pub mod calendar;
pub mod config;
pub mod cron;
pub mod error;
pub mod factory;
pub mod job;
pub mod keys;
pub mod listener;
pub mod logging;
pub mod pool;
pub mod scheduler;
pub mod signal;
pub mod store;
pub mod trigger;

pub use calendar::{Calendar, CalendarKind};
pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use cron::CronExpression;
pub use error::{SchedulerError, SchedulerResult};
pub use factory::{
    JobFactory, JobTypeRegistry, PropertySettable, PropertySettingJobFactory, SimpleJobFactory,
    UnmatchedPropertyPolicy,
};
pub use job::{CompletedExecutionInstruction, ExecutionContext, Job, JobDataMap, JobDetail};
pub use keys::{GroupMatcher, JobKey, MatcherOperator, TriggerKey, DEFAULT_GROUP};
pub use listener::{JobListener, ListenerManager, SchedulerListener, TriggerListener, VetoDecision};
pub use pool::WorkerPool;
pub use scheduler::{ExecutingJob, Scheduler};
pub use store::{JobStore, TriggerFiredBundle, TriggerState};
pub use trigger::{
    CalendarIntervalMisfireInstruction, CronMisfireInstruction, IntervalUnit, RepeatCount,
    SimpleMisfireInstruction, Trigger, TriggerSchedule, DEFAULT_PRIORITY,
};
