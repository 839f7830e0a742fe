//! End-to-end scheduler scenarios driven through the public API.

use chrono::{Duration, NaiveDate, Utc};
use quartzite::job::{ExecutionContext, Job};
use quartzite::{
    Calendar, CompletedExecutionInstruction, JobDataMap, JobDetail, JobKey, RepeatCount,
    Scheduler, SchedulerConfig, SimpleMisfireInstruction, Trigger, TriggerKey, TriggerState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration as StdDuration;

struct CountingJob {
    count: Arc<AtomicUsize>,
    tx: mpsc::Sender<()>,
}

impl Job for CountingJob {
    fn execute(&self, _ctx: &mut ExecutionContext) -> quartzite::error::SchedulerResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(());
        Ok(())
    }
}

fn scheduler_with_one_worker() -> Scheduler {
    Scheduler::new(SchedulerConfig::builder().thread_pool_size(1).build())
}

#[test]
fn single_shot_trigger_fires_exactly_once() {
    let scheduler = scheduler_with_one_worker();
    let (tx, rx) = mpsc::channel();
    let count = Arc::new(AtomicUsize::new(0));
    let detail = JobDetail::new(
        JobKey::new("once"),
        Arc::new(CountingJob {
            count: Arc::clone(&count),
            tx,
        }),
    );
    let trigger = Trigger::simple(
        TriggerKey::new("once-trigger"),
        JobKey::new("once"),
        Utc::now(),
        RepeatCount::Finite(0),
        Duration::seconds(1),
    );
    scheduler.schedule_job(detail, trigger).unwrap();
    scheduler.start();

    assert!(rx.recv_timeout(StdDuration::from_secs(2)).is_ok());
    assert!(rx.recv_timeout(StdDuration::from_millis(300)).is_err());
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(
        scheduler.trigger_state(&TriggerKey::new("once-trigger")),
        TriggerState::Complete
    );
    scheduler.shutdown(true);
}

#[test]
fn repeating_trigger_with_misfire_catches_up_once() {
    let scheduler = scheduler_with_one_worker();
    let (tx, rx) = mpsc::channel();
    let count = Arc::new(AtomicUsize::new(0));
    let detail = JobDetail::new(
        JobKey::new("repeater"),
        Arc::new(CountingJob {
            count: Arc::clone(&count),
            tx,
        }),
    );
    // Start time is well in the past, past the default 5s misfire
    // threshold, with a policy that fires once immediately on catch-up.
    let trigger = Trigger::simple(
        TriggerKey::new("repeater-trigger"),
        JobKey::new("repeater"),
        Utc::now() - Duration::seconds(30),
        RepeatCount::Finite(2),
        Duration::seconds(10),
    )
    .with_simple_misfire_instruction(SimpleMisfireInstruction::RescheduleNowWithRemainingRepeatCount);
    scheduler.schedule_job(detail, trigger).unwrap();
    scheduler.start();

    // One immediate catch-up firing, then it settles back onto its
    // repeat_interval cadence for the remaining count.
    assert!(rx.recv_timeout(StdDuration::from_secs(2)).is_ok());
    scheduler.shutdown(true);
    assert!(count.load(Ordering::SeqCst) >= 1);
}

#[test]
fn holiday_calendar_skips_new_years_day() {
    let scheduler = scheduler_with_one_worker();
    let weekly = Calendar::weekly([6, 7], chrono_tz::UTC);
    let holiday =
        Calendar::holiday([NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()], chrono_tz::UTC)
            .with_base(weekly);
    scheduler
        .add_calendar("business-days", holiday, false, false)
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let count = Arc::new(AtomicUsize::new(0));
    let detail = JobDetail::new(
        JobKey::new("daily"),
        Arc::new(CountingJob {
            count: Arc::clone(&count),
            tx,
        }),
    );
    let start = chrono::Utc.with_ymd_and_hms(2024, 12, 30, 9, 0, 0).unwrap();
    let trigger = Trigger::simple(
        TriggerKey::new("daily-trigger"),
        JobKey::new("daily"),
        start,
        RepeatCount::Infinite,
        Duration::days(1),
    )
    .with_calendar_name("business-days");

    scheduler.schedule_job(detail, trigger).unwrap();
    let stored = scheduler.trigger(&TriggerKey::new("daily-trigger")).unwrap();
    assert_eq!(stored.next_fire_time(), Some(start));

    // Advancing the schedule directly (without waiting real days) exercises
    // the same calendar-skip path the scheduler loop drives.
    let mut cursor = stored;
    let holiday_cal = scheduler.store().retrieve_calendar("business-days").unwrap();
    cursor.triggered(Some(&holiday_cal));
    assert_eq!(
        cursor.next_fire_time(),
        Some(chrono::Utc.with_ymd_and_hms(2024, 12, 31, 9, 0, 0).unwrap())
    );
    cursor.triggered(Some(&holiday_cal));
    // 2025-01-01 excluded by the holiday rule; 2025-01-02 is a Thursday.
    assert_eq!(
        cursor.next_fire_time(),
        Some(chrono::Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap())
    );

    let _ = rx.try_recv();
    scheduler.shutdown(false);
}

#[test]
fn concurrent_execution_disallowed_blocks_sibling_until_completion() {
    let scheduler = scheduler_with_one_worker();
    let detail = JobDetail::new(JobKey::new("exclusive"), Arc::new(BlockingJob))
        .with_concurrent_execution_disallowed(true);
    let now = Utc::now() - Duration::milliseconds(1);
    let a = Trigger::simple(
        TriggerKey::new("a"),
        JobKey::new("exclusive"),
        now,
        RepeatCount::Finite(0),
        Duration::seconds(1),
    );
    let b = Trigger::simple(
        TriggerKey::new("b"),
        JobKey::new("exclusive"),
        now,
        RepeatCount::Finite(0),
        Duration::seconds(1),
    );
    scheduler.add_job(detail, false).unwrap();
    scheduler.schedule_trigger(a).unwrap();
    scheduler.schedule_trigger(b).unwrap();
    scheduler.start();

    std::thread::sleep(StdDuration::from_millis(200));
    let states = [
        scheduler.trigger_state(&TriggerKey::new("a")),
        scheduler.trigger_state(&TriggerKey::new("b")),
    ];
    // Exactly one sibling was blocked while the other fired the exclusive job.
    let blocked_count = states.iter().filter(|s| **s == TriggerState::Blocked).count();
    assert_eq!(
        blocked_count, 1,
        "expected exactly one sibling trigger blocked, got states: {states:?}"
    );
    scheduler.shutdown(true);
}

struct BlockingJob;
impl Job for BlockingJob {
    fn execute(&self, _ctx: &mut ExecutionContext) -> quartzite::error::SchedulerResult<()> {
        std::thread::sleep(StdDuration::from_millis(150));
        Ok(())
    }
}

#[test]
fn pause_then_resume_trigger_round_trips_state() {
    let scheduler = scheduler_with_one_worker();
    let (tx, _rx) = mpsc::channel();
    let detail = JobDetail::new(
        JobKey::new("paused"),
        Arc::new(CountingJob {
            count: Arc::new(AtomicUsize::new(0)),
            tx,
        }),
    );
    let trigger = Trigger::simple(
        TriggerKey::new("paused-trigger"),
        JobKey::new("paused"),
        Utc::now() + Duration::hours(1),
        RepeatCount::Infinite,
        Duration::seconds(1),
    );
    scheduler.schedule_job(detail, trigger).unwrap();
    scheduler.pause_trigger(&TriggerKey::new("paused-trigger"));
    assert_eq!(
        scheduler.trigger_state(&TriggerKey::new("paused-trigger")),
        TriggerState::Paused
    );
    scheduler.resume_trigger(&TriggerKey::new("paused-trigger"));
    assert_eq!(
        scheduler.trigger_state(&TriggerKey::new("paused-trigger")),
        TriggerState::Normal
    );
}

#[test]
fn reschedule_job_replaces_trigger_atomically() {
    let scheduler = scheduler_with_one_worker();
    let (tx, _rx) = mpsc::channel();
    let detail = JobDetail::new(
        JobKey::new("replaceable"),
        Arc::new(CountingJob {
            count: Arc::new(AtomicUsize::new(0)),
            tx,
        }),
    );
    let original = Trigger::simple(
        TriggerKey::new("replaceable-trigger"),
        JobKey::new("replaceable"),
        Utc::now() + Duration::hours(1),
        RepeatCount::Finite(0),
        Duration::seconds(1),
    );
    scheduler.schedule_job(detail, original).unwrap();

    let replacement = Trigger::simple(
        TriggerKey::new("replaceable-trigger"),
        JobKey::new("replaceable"),
        Utc::now() + Duration::hours(2),
        RepeatCount::Finite(0),
        Duration::seconds(1),
    );
    let replaced = scheduler
        .reschedule_job(&TriggerKey::new("replaceable-trigger"), replacement)
        .unwrap();
    assert!(replaced);

    let stored = scheduler.trigger(&TriggerKey::new("replaceable-trigger")).unwrap();
    assert!(stored.next_fire_time().unwrap() > Utc::now() + Duration::minutes(90));
}

#[test]
fn data_map_without_job_data_round_trips_empty() {
    let data = JobDataMap::new();
    assert!(data.is_empty());
}

use chrono::TimeZone;

#[test]
fn completed_execution_instruction_deletes_trigger_after_final_firing() {
    let scheduler = scheduler_with_one_worker();
    let (tx, rx) = mpsc::channel();
    struct SelfDeleting(mpsc::Sender<()>);
    impl Job for SelfDeleting {
        fn execute(&self, ctx: &mut ExecutionContext) -> quartzite::error::SchedulerResult<()> {
            ctx.set_completion_instruction(CompletedExecutionInstruction::DeleteTrigger);
            let _ = self.0.send(());
            Ok(())
        }
    }
    let detail = JobDetail::new(JobKey::new("self-delete"), Arc::new(SelfDeleting(tx)));
    let trigger = Trigger::simple(
        TriggerKey::new("self-delete-trigger"),
        JobKey::new("self-delete"),
        Utc::now(),
        RepeatCount::Finite(0),
        Duration::seconds(1),
    );
    scheduler.schedule_job(detail, trigger).unwrap();
    scheduler.start();
    assert!(rx.recv_timeout(StdDuration::from_secs(2)).is_ok());
    std::thread::sleep(StdDuration::from_millis(100));
    assert_eq!(
        scheduler.trigger_state(&TriggerKey::new("self-delete-trigger")),
        TriggerState::None
    );
    scheduler.shutdown(true);
}
