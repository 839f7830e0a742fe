//! Boundary-behavior scenarios for trigger schedules (spec §8).

use chrono::{TimeZone, Utc};
use quartzite::{CronExpression, IntervalUnit, JobKey, Trigger, TriggerKey};

#[test]
fn calendar_interval_one_month_clamps_to_shorter_months() {
    let start = Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap();
    let mut trigger = Trigger::calendar_interval(
        TriggerKey::new("monthly"),
        JobKey::new("j"),
        start,
        1,
        IntervalUnit::Month,
        chrono_tz::UTC,
    );
    trigger.compute_first_fire_time(None);
    assert_eq!(trigger.next_fire_time(), Some(start));

    trigger.triggered(None);
    assert_eq!(
        trigger.next_fire_time(),
        Some(Utc.with_ymd_and_hms(2024, 2, 29, 9, 0, 0).unwrap()) // 2024 is a leap year
    );

    trigger.triggered(None);
    assert_eq!(
        trigger.next_fire_time(),
        Some(Utc.with_ymd_and_hms(2024, 3, 31, 9, 0, 0).unwrap())
    );

    trigger.triggered(None);
    assert_eq!(
        trigger.next_fire_time(),
        Some(Utc.with_ymd_and_hms(2024, 4, 30, 9, 0, 0).unwrap())
    );
}

#[test]
fn daily_cron_trigger_fires_on_consecutive_midnights() {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let expr = CronExpression::parse("0 0 10 ? * *", chrono_tz::UTC).unwrap();
    let mut trigger = Trigger::cron(TriggerKey::new("daily-10"), JobKey::new("j"), start, expr);
    trigger.compute_first_fire_time(None);

    assert_eq!(
        trigger.next_fire_time(),
        Some(Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap())
    );
    trigger.triggered(None);
    assert_eq!(
        trigger.next_fire_time(),
        Some(Utc.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).unwrap())
    );
    trigger.triggered(None);
    assert_eq!(
        trigger.next_fire_time(),
        Some(Utc.with_ymd_and_hms(2025, 1, 3, 10, 0, 0).unwrap())
    );
}
