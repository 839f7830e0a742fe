//! Trigger families: the schedules that decide when a job fires (C3).

use crate::calendar::Calendar;
use crate::cron::CronExpression;
use crate::job::JobDataMap;
use crate::keys::{JobKey, TriggerKey};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// How many times a [`TriggerSchedule::Simple`] trigger should repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    /// Fires `startTime`, then `n` further times.
    Finite(u32),
    /// Fires forever, subject to `endTime`.
    Infinite,
}

/// Misfire handling for [`TriggerSchedule::Simple`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimpleMisfireInstruction {
    /// Defer to `FireNow` if `repeatCount == 0`, else
    /// `RescheduleNowWithRemainingRepeatCount`.
    #[default]
    SmartPolicy,
    /// Never apply misfire handling; let the schedule slide silently.
    IgnoreMisfirePolicy,
    /// `nextFireTime := now`, fire once, keep the original repeat count.
    FireNow,
    /// `nextFireTime := now`, keep the original repeat count.
    RescheduleNowWithExistingRepeatCount,
    /// `nextFireTime := now`, set the count to what remains.
    RescheduleNowWithRemainingRepeatCount,
    /// Slide to the next pattern slot at or after now, keep original count.
    RescheduleNextWithExistingCount,
    /// Slide to the next pattern slot at or after now, set count to what remains.
    RescheduleNextWithRemainingCount,
}

/// Misfire handling for [`TriggerSchedule::Cron`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CronMisfireInstruction {
    /// Collapses to [`CronMisfireInstruction::FireOnceNow`].
    #[default]
    Smart,
    /// Never apply misfire handling.
    IgnoreMisfirePolicy,
    /// Slide to the next valid instant at or after now.
    DoNothing,
    /// `nextFireTime := now`, once.
    FireOnceNow,
}

/// Misfire handling for [`TriggerSchedule::CalendarInterval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalendarIntervalMisfireInstruction {
    /// Collapses to [`CalendarIntervalMisfireInstruction::FireOnceNow`].
    #[default]
    Smart,
    /// Never apply misfire handling.
    IgnoreMisfirePolicy,
    /// Slide to the next valid instant at or after now.
    DoNothing,
    /// `nextFireTime := now`, once.
    FireOnceNow,
}

/// The unit a [`TriggerSchedule::CalendarInterval`] counts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// Family-specific schedule state carried by a [`Trigger`].
#[derive(Debug, Clone)]
pub enum TriggerSchedule {
    /// Fires at `startTime`, then every `repeat_interval` for `repeat_count`
    /// further firings.
    Simple {
        repeat_count: RepeatCount,
        repeat_interval: Duration,
        times_triggered: u32,
        misfire_instruction: SimpleMisfireInstruction,
    },
    /// Fires according to a cron expression.
    Cron {
        expression: CronExpression,
        misfire_instruction: CronMisfireInstruction,
    },
    /// Fires every `interval` `unit`s.
    CalendarInterval {
        interval: i64,
        unit: IntervalUnit,
        times_triggered: u32,
        timezone: Tz,
        preserve_hour_across_dst: bool,
        misfire_instruction: CalendarIntervalMisfireInstruction,
    },
}

/// A schedule bound to a job, with the bookkeeping common to every family.
#[derive(Debug, Clone)]
pub struct Trigger {
    key: TriggerKey,
    job_key: JobKey,
    description: Option<String>,
    calendar_name: Option<String>,
    job_data_map: JobDataMap,
    priority: i32,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    fire_instance_id: Option<String>,
    schedule: TriggerSchedule,
}

/// Default trigger priority; higher values win ties in the acquire order.
pub const DEFAULT_PRIORITY: i32 = 5;

impl Trigger {
    fn new(
        key: TriggerKey,
        job_key: JobKey,
        start_time: DateTime<Utc>,
        schedule: TriggerSchedule,
    ) -> Self {
        Self {
            key,
            job_key,
            description: None,
            calendar_name: None,
            job_data_map: JobDataMap::new(),
            priority: DEFAULT_PRIORITY,
            start_time,
            end_time: None,
            previous_fire_time: None,
            next_fire_time: None,
            fire_instance_id: None,
            schedule,
        }
    }

    /// Builds a simple trigger firing at `start_time`, then every
    /// `repeat_interval` for `repeat_count` further firings.
    pub fn simple(
        key: TriggerKey,
        job_key: JobKey,
        start_time: DateTime<Utc>,
        repeat_count: RepeatCount,
        repeat_interval: Duration,
    ) -> Self {
        Self::new(
            key,
            job_key,
            start_time,
            TriggerSchedule::Simple {
                repeat_count,
                repeat_interval,
                times_triggered: 0,
                misfire_instruction: SimpleMisfireInstruction::default(),
            },
        )
    }

    /// Builds a cron trigger firing according to `expression`, starting no
    /// earlier than `start_time`.
    pub fn cron(
        key: TriggerKey,
        job_key: JobKey,
        start_time: DateTime<Utc>,
        expression: CronExpression,
    ) -> Self {
        Self::new(
            key,
            job_key,
            start_time,
            TriggerSchedule::Cron {
                expression,
                misfire_instruction: CronMisfireInstruction::default(),
            },
        )
    }

    /// Builds a calendar-interval trigger firing every `interval` `unit`s.
    pub fn calendar_interval(
        key: TriggerKey,
        job_key: JobKey,
        start_time: DateTime<Utc>,
        interval: i64,
        unit: IntervalUnit,
        timezone: Tz,
    ) -> Self {
        Self::new(
            key,
            job_key,
            start_time,
            TriggerSchedule::CalendarInterval {
                interval,
                unit,
                times_triggered: 0,
                timezone,
                preserve_hour_across_dst: false,
                misfire_instruction: CalendarIntervalMisfireInstruction::default(),
            },
        )
    }

    /// Attaches a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Names the calendar excluding instants from this trigger's schedule.
    pub fn with_calendar_name(mut self, name: impl Into<String>) -> Self {
        self.calendar_name = Some(name.into());
        self
    }

    /// Attaches a trigger-specific data map, merged over the job's own map
    /// at execution time.
    pub fn with_job_data_map(mut self, data: JobDataMap) -> Self {
        self.job_data_map = data;
        self
    }

    /// Sets the priority used to break ties among triggers due at the same
    /// instant. Higher wins.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets an end time truncating the schedule.
    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// For calendar-interval triggers, preserves wall-clock hour across DST
    /// transitions. No-op for other families.
    pub fn with_preserve_hour_across_dst(mut self, preserve: bool) -> Self {
        if let TriggerSchedule::CalendarInterval {
            preserve_hour_across_dst,
            ..
        } = &mut self.schedule
        {
            *preserve_hour_across_dst = preserve;
        }
        self
    }

    /// Sets the misfire instruction for a simple trigger. No-op on other
    /// families.
    pub fn with_simple_misfire_instruction(mut self, instr: SimpleMisfireInstruction) -> Self {
        if let TriggerSchedule::Simple {
            misfire_instruction,
            ..
        } = &mut self.schedule
        {
            *misfire_instruction = instr;
        }
        self
    }

    /// Sets the misfire instruction for a cron trigger. No-op on other
    /// families.
    pub fn with_cron_misfire_instruction(mut self, instr: CronMisfireInstruction) -> Self {
        if let TriggerSchedule::Cron {
            misfire_instruction,
            ..
        } = &mut self.schedule
        {
            *misfire_instruction = instr;
        }
        self
    }

    /// Sets the misfire instruction for a calendar-interval trigger. No-op
    /// on other families.
    pub fn with_calendar_interval_misfire_instruction(
        mut self,
        instr: CalendarIntervalMisfireInstruction,
    ) -> Self {
        if let TriggerSchedule::CalendarInterval {
            misfire_instruction,
            ..
        } = &mut self.schedule
        {
            *misfire_instruction = instr;
        }
        self
    }

    /// The trigger's key.
    pub fn key(&self) -> &TriggerKey {
        &self.key
    }

    /// The key of the job this trigger fires.
    pub fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    /// The description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The name of the calendar excluding instants from this schedule, if any.
    pub fn calendar_name(&self) -> Option<&str> {
        self.calendar_name.as_deref()
    }

    /// The trigger's own data map.
    pub fn job_data_map(&self) -> &JobDataMap {
        &self.job_data_map
    }

    /// The priority used to break fire-time ties.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The earliest instant this trigger may fire.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// The instant past which this trigger no longer fires, if any.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// The last instant this trigger fired, if any.
    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    /// The next instant this trigger is scheduled to fire, if any.
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    /// The most recently assigned fire-instance id.
    pub fn fire_instance_id(&self) -> Option<&str> {
        self.fire_instance_id.as_deref()
    }

    /// Assigns a fresh fire-instance id, called by the store on acquire.
    pub fn assign_fire_instance_id(&mut self, id: String) {
        self.fire_instance_id = Some(id);
    }

    /// The family-specific schedule state.
    pub fn schedule(&self) -> &TriggerSchedule {
        &self.schedule
    }

    /// The configured misfire instruction is the "ignore" sentinel for this
    /// family.
    pub fn misfire_is_ignored(&self) -> bool {
        match &self.schedule {
            TriggerSchedule::Simple {
                misfire_instruction,
                ..
            } => *misfire_instruction == SimpleMisfireInstruction::IgnoreMisfirePolicy,
            TriggerSchedule::Cron {
                misfire_instruction,
                ..
            } => *misfire_instruction == CronMisfireInstruction::IgnoreMisfirePolicy,
            TriggerSchedule::CalendarInterval {
                misfire_instruction,
                ..
            } => *misfire_instruction == CalendarIntervalMisfireInstruction::IgnoreMisfirePolicy,
        }
    }

    /// Computes the first `nextFireTime`, seeding the schedule from
    /// `start_time`. Called once, when the trigger is stored.
    pub fn compute_first_fire_time(&mut self, calendar: Option<&Calendar>) -> Option<DateTime<Utc>> {
        self.previous_fire_time = None;
        let candidate = match &self.schedule {
            TriggerSchedule::Simple { .. } => Some(self.start_time),
            TriggerSchedule::Cron { expression, .. } => {
                if expression.is_satisfied_by(self.start_time.with_timezone(&expression.timezone()))
                {
                    Some(self.start_time)
                } else {
                    expression
                        .next_valid_time_after(
                            self.start_time.with_timezone(&expression.timezone()),
                        )
                        .map(|t| t.with_timezone(&Utc))
                }
            }
            TriggerSchedule::CalendarInterval { .. } => Some(self.start_time),
        };
        self.next_fire_time = candidate.and_then(|t| self.skip_excluded(t, calendar));
        self.apply_end_time();
        self.next_fire_time
    }

    /// Advances the schedule after an actual firing: increments counters,
    /// moves `previousFireTime := nextFireTime`, and recomputes
    /// `nextFireTime`.
    pub fn triggered(&mut self, calendar: Option<&Calendar>) {
        self.previous_fire_time = self.next_fire_time;
        let prev = match self.previous_fire_time {
            Some(t) => t,
            None => return,
        };
        let candidate = match &mut self.schedule {
            TriggerSchedule::Simple {
                repeat_count,
                repeat_interval,
                times_triggered,
                ..
            } => {
                let exhausted = match *repeat_count {
                    RepeatCount::Finite(n) => *times_triggered >= n,
                    RepeatCount::Infinite => false,
                };
                if exhausted {
                    None
                } else {
                    *times_triggered += 1;
                    Some(prev + *repeat_interval)
                }
            }
            TriggerSchedule::Cron {
                expression,
                ..
            } => expression
                .next_valid_time_after(prev.with_timezone(&expression.timezone()))
                .map(|t| t.with_timezone(&Utc)),
            TriggerSchedule::CalendarInterval {
                interval,
                unit,
                times_triggered,
                timezone,
                preserve_hour_across_dst,
                ..
            } => {
                *times_triggered += 1;
                Some(advance_interval(
                    self.start_time,
                    *times_triggered as i64,
                    *interval,
                    *unit,
                    *timezone,
                    *preserve_hour_across_dst,
                ))
            }
        };
        self.next_fire_time = candidate.and_then(|t| self.skip_excluded(t, calendar));
        self.apply_end_time();
    }

    /// Recomputes `nextFireTime` after a misfire is detected, per the
    /// trigger's configured misfire instruction.
    pub fn update_after_misfire(&mut self, calendar: Option<&Calendar>, now: DateTime<Utc>) {
        match &mut self.schedule {
            TriggerSchedule::Simple {
                repeat_count,
                times_triggered,
                misfire_instruction,
                ..
            } => {
                let remaining = match *repeat_count {
                    RepeatCount::Finite(n) => RepeatCount::Finite(n.saturating_sub(*times_triggered)),
                    RepeatCount::Infinite => RepeatCount::Infinite,
                };
                let effective = match *misfire_instruction {
                    SimpleMisfireInstruction::SmartPolicy => {
                        if matches!(*repeat_count, RepeatCount::Finite(0)) {
                            SimpleMisfireInstruction::FireNow
                        } else {
                            SimpleMisfireInstruction::RescheduleNowWithRemainingRepeatCount
                        }
                    }
                    other => other,
                };
                match effective {
                    SimpleMisfireInstruction::FireNow
                    | SimpleMisfireInstruction::RescheduleNowWithExistingRepeatCount => {
                        self.next_fire_time = Some(now);
                    }
                    SimpleMisfireInstruction::RescheduleNowWithRemainingRepeatCount => {
                        *repeat_count = remaining;
                        self.next_fire_time = Some(now);
                    }
                    SimpleMisfireInstruction::RescheduleNextWithExistingCount
                    | SimpleMisfireInstruction::RescheduleNextWithRemainingCount => {
                        if matches!(
                            effective,
                            SimpleMisfireInstruction::RescheduleNextWithRemainingCount
                        ) {
                            *repeat_count = remaining;
                        }
                        let mut candidate = self.next_fire_time.unwrap_or(now);
                        while candidate < now {
                            candidate += Self::simple_repeat_interval(&self.schedule);
                        }
                        self.next_fire_time = Some(candidate);
                    }
                    SimpleMisfireInstruction::IgnoreMisfirePolicy
                    | SimpleMisfireInstruction::SmartPolicy => {}
                }
            }
            TriggerSchedule::Cron {
                expression,
                misfire_instruction,
            } => {
                let effective = match *misfire_instruction {
                    CronMisfireInstruction::Smart => CronMisfireInstruction::FireOnceNow,
                    other => other,
                };
                match effective {
                    CronMisfireInstruction::FireOnceNow => self.next_fire_time = Some(now),
                    CronMisfireInstruction::DoNothing => {
                        self.next_fire_time = expression
                            .next_valid_time_after(now.with_timezone(&expression.timezone()))
                            .map(|t| t.with_timezone(&Utc));
                    }
                    CronMisfireInstruction::IgnoreMisfirePolicy | CronMisfireInstruction::Smart => {}
                }
            }
            TriggerSchedule::CalendarInterval {
                misfire_instruction,
                ..
            } => {
                let effective = match *misfire_instruction {
                    CalendarIntervalMisfireInstruction::Smart => {
                        CalendarIntervalMisfireInstruction::FireOnceNow
                    }
                    other => other,
                };
                match effective {
                    CalendarIntervalMisfireInstruction::FireOnceNow => {
                        self.next_fire_time = Some(now);
                    }
                    CalendarIntervalMisfireInstruction::DoNothing => {
                        self.next_fire_time = self
                            .next_fire_time
                            .map(|t| self.advance_calendar_interval_until(t, now));
                    }
                    CalendarIntervalMisfireInstruction::IgnoreMisfirePolicy
                    | CalendarIntervalMisfireInstruction::Smart => {}
                }
            }
        }
        self.next_fire_time = self.next_fire_time.and_then(|t| self.skip_excluded(t, calendar));
        self.apply_end_time();
    }

    fn simple_repeat_interval(schedule: &TriggerSchedule) -> Duration {
        match schedule {
            TriggerSchedule::Simple { repeat_interval, .. } => *repeat_interval,
            _ => Duration::zero(),
        }
    }

    fn advance_calendar_interval_until(&self, from: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        if let TriggerSchedule::CalendarInterval {
            interval,
            unit,
            timezone,
            preserve_hour_across_dst,
            ..
        } = &self.schedule
        {
            let mut k = 0i64;
            let mut candidate = self.start_time;
            while candidate < from {
                k += 1;
                candidate = advance_interval(
                    self.start_time,
                    k,
                    *interval,
                    *unit,
                    *timezone,
                    *preserve_hour_across_dst,
                );
            }
            while candidate < now {
                k += 1;
                candidate = advance_interval(
                    self.start_time,
                    k,
                    *interval,
                    *unit,
                    *timezone,
                    *preserve_hour_across_dst,
                );
            }
            candidate
        } else {
            from
        }
    }

    fn skip_excluded(&self, mut candidate: DateTime<Utc>, calendar: Option<&Calendar>) -> Option<DateTime<Utc>> {
        let Some(calendar) = calendar else {
            return Some(candidate);
        };
        const MAX_ATTEMPTS: u32 = 10_000;
        for _ in 0..MAX_ATTEMPTS {
            if calendar.is_time_included_utc(candidate) {
                return Some(candidate);
            }
            candidate = self.next_pattern_slot_after(candidate, calendar);
            if let Some(end) = self.end_time {
                if candidate > end {
                    return None;
                }
            }
        }
        None
    }

    fn next_pattern_slot_after(&self, excluded: DateTime<Utc>, calendar: &Calendar) -> DateTime<Utc> {
        match &self.schedule {
            TriggerSchedule::Simple { repeat_interval, .. } => excluded + *repeat_interval,
            TriggerSchedule::Cron { expression, .. } => expression
                .next_valid_time_after(excluded.with_timezone(&expression.timezone()))
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|| calendar.next_included_time_utc(excluded)),
            TriggerSchedule::CalendarInterval {
                interval,
                unit,
                timezone,
                preserve_hour_across_dst,
                ..
            } => {
                let mut k = 0i64;
                let mut candidate = self.start_time;
                while candidate <= excluded {
                    k += 1;
                    candidate = advance_interval(
                        self.start_time,
                        k,
                        *interval,
                        *unit,
                        *timezone,
                        *preserve_hour_across_dst,
                    );
                }
                candidate
            }
        }
    }

    /// Re-applies calendar exclusion to the current `nextFireTime`, e.g.
    /// after the named calendar's rules changed. Does not advance the
    /// schedule the way [`Trigger::triggered`] does.
    pub fn recompute_next_fire_time(&mut self, calendar: Option<&Calendar>) {
        if let Some(next) = self.next_fire_time {
            self.next_fire_time = self.skip_excluded(next, calendar);
            self.apply_end_time();
        }
    }

    fn apply_end_time(&mut self) {
        if let (Some(end), Some(next)) = (self.end_time, self.next_fire_time) {
            if next > end {
                self.next_fire_time = None;
            }
        }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next_month_first = if month == 12 {
        chrono::NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        chrono::NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let this_month_first = chrono::NaiveDate::from_ymd_opt(year, month, 1);
    match (this_month_first, next_month_first) {
        (Some(a), Some(b)) => (b - a).num_days() as u32,
        _ => 30,
    }
}

/// Advances `start` by `k * interval` `unit`s, clamping day-of-month for
/// month/year units and optionally preserving wall-clock hour across DST.
fn advance_interval(
    start: DateTime<Utc>,
    k: i64,
    interval: i64,
    unit: IntervalUnit,
    timezone: Tz,
    preserve_hour_across_dst: bool,
) -> DateTime<Utc> {
    let total = k * interval;
    match unit {
        IntervalUnit::Millisecond => start + Duration::milliseconds(total),
        IntervalUnit::Second => start + Duration::seconds(total),
        IntervalUnit::Minute => start + Duration::minutes(total),
        IntervalUnit::Hour => start + Duration::hours(total),
        IntervalUnit::Day => start + Duration::days(total),
        IntervalUnit::Week => start + Duration::weeks(total),
        IntervalUnit::Month | IntervalUnit::Year => {
            let local = start.with_timezone(&timezone);
            let months = if matches!(unit, IntervalUnit::Year) {
                total * 12
            } else {
                total
            };
            let total_months = local.month0() as i64 + months;
            let year = local.year() + total_months.div_euclid(12) as i32;
            let month = total_months.rem_euclid(12) as u32 + 1;
            let day = local.day().min(days_in_month(year, month));
            let naive_date = chrono::NaiveDate::from_ymd_opt(year, month, day)
                .unwrap_or_else(|| chrono::NaiveDate::from_ymd_opt(year, month, 28).expect("valid"));
            let naive = naive_date.and_hms_nano_opt(
                local.hour(),
                local.minute(),
                local.second(),
                local.nanosecond(),
            );
            let Some(naive) = naive else {
                return start;
            };
            let resolved = match timezone.from_local_datetime(&naive) {
                chrono::LocalResult::Single(dt) => dt,
                chrono::LocalResult::Ambiguous(a, _) => a,
                chrono::LocalResult::None => timezone
                    .from_local_datetime(&naive.checked_add_signed(Duration::hours(1)).unwrap_or(naive))
                    .single()
                    .unwrap_or_else(|| timezone.from_utc_datetime(&naive)),
            };
            if preserve_hour_across_dst && resolved.hour() != local.hour() {
                resolved + Duration::hours(local.hour() as i64 - resolved.hour() as i64)
            } else {
                resolved
            }
            .with_timezone(&Utc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::UTC;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn simple_repeat_count_zero_fires_once() {
        let mut t = Trigger::simple(
            TriggerKey::new("t1"),
            JobKey::new("j1"),
            utc(2025, 1, 1, 9, 0, 0),
            RepeatCount::Finite(0),
            Duration::seconds(10),
        );
        let first = t.compute_first_fire_time(None);
        assert_eq!(first, Some(utc(2025, 1, 1, 9, 0, 0)));
        t.triggered(None);
        assert_eq!(t.next_fire_time(), None);
    }

    #[test]
    fn cron_trigger_fires_daily_at_ten() {
        let expr = CronExpression::parse("0 0 10 ? * *", UTC).unwrap();
        let mut t = Trigger::cron(
            TriggerKey::new("t1"),
            JobKey::new("j1"),
            utc(2025, 1, 1, 0, 0, 0),
            expr,
        );
        let first = t.compute_first_fire_time(None).unwrap();
        assert_eq!(first, utc(2025, 1, 1, 10, 0, 0));
        t.triggered(None);
        assert_eq!(t.next_fire_time(), Some(utc(2025, 1, 2, 10, 0, 0)));
        t.triggered(None);
        assert_eq!(t.next_fire_time(), Some(utc(2025, 1, 3, 10, 0, 0)));
    }

    #[test]
    fn calendar_interval_month_clamps_to_last_valid_day() {
        let mut t = Trigger::calendar_interval(
            TriggerKey::new("t1"),
            JobKey::new("j1"),
            utc(2025, 1, 31, 9, 0, 0),
            1,
            IntervalUnit::Month,
            UTC,
        );
        t.compute_first_fire_time(None);
        t.triggered(None);
        assert_eq!(t.next_fire_time(), Some(utc(2025, 2, 28, 9, 0, 0)));
        t.triggered(None);
        assert_eq!(t.next_fire_time(), Some(utc(2025, 3, 31, 9, 0, 0)));
        t.triggered(None);
        assert_eq!(t.next_fire_time(), Some(utc(2025, 4, 30, 9, 0, 0)));
    }

    #[test]
    fn calendar_interval_leap_year_february() {
        let mut t = Trigger::calendar_interval(
            TriggerKey::new("t1"),
            JobKey::new("j1"),
            utc(2024, 1, 31, 9, 0, 0),
            1,
            IntervalUnit::Month,
            UTC,
        );
        t.compute_first_fire_time(None);
        t.triggered(None);
        assert_eq!(t.next_fire_time(), Some(utc(2024, 2, 29, 9, 0, 0)));
    }

    #[test]
    fn holiday_calendar_skips_excluded_day() {
        let weekly = Calendar::weekly([6, 7], UTC);
        let holiday = Calendar::holiday(
            [chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()],
            UTC,
        )
        .with_base(weekly);

        let mut t = Trigger::simple(
            TriggerKey::new("t1"),
            JobKey::new("j1"),
            utc(2024, 12, 30, 9, 0, 0),
            RepeatCount::Infinite,
            Duration::days(1),
        );
        let first = t.compute_first_fire_time(Some(&holiday));
        assert_eq!(first, Some(utc(2024, 12, 30, 9, 0, 0)));
        t.triggered(Some(&holiday));
        assert_eq!(t.next_fire_time(), Some(utc(2024, 12, 31, 9, 0, 0)));
        t.triggered(Some(&holiday));
        // 2025-01-01 is excluded (holiday); 2025-01-02 is a Thursday, included.
        assert_eq!(t.next_fire_time(), Some(utc(2025, 1, 2, 9, 0, 0)));
        t.triggered(Some(&holiday));
        assert_eq!(t.next_fire_time(), Some(utc(2025, 1, 3, 9, 0, 0)));
    }

    #[test]
    fn simple_misfire_fire_now_resets_to_now() {
        let mut t = Trigger::simple(
            TriggerKey::new("t1"),
            JobKey::new("j1"),
            utc(2025, 1, 1, 0, 0, 0),
            RepeatCount::Finite(5),
            Duration::milliseconds(10),
        )
        .with_simple_misfire_instruction(SimpleMisfireInstruction::FireNow);
        t.compute_first_fire_time(None);
        let now = utc(2025, 1, 1, 0, 0, 10);
        t.update_after_misfire(None, now);
        assert_eq!(t.next_fire_time(), Some(now));
    }

    #[test]
    fn end_time_truncates_schedule() {
        let mut t = Trigger::simple(
            TriggerKey::new("t1"),
            JobKey::new("j1"),
            utc(2025, 1, 1, 0, 0, 0),
            RepeatCount::Infinite,
            Duration::days(1),
        )
        .with_end_time(utc(2025, 1, 2, 12, 0, 0));
        t.compute_first_fire_time(None);
        t.triggered(None);
        assert_eq!(t.next_fire_time(), Some(utc(2025, 1, 2, 0, 0, 0)));
        t.triggered(None);
        assert_eq!(t.next_fire_time(), None);
    }
}
