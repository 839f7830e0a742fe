//! Calendars: pluggable exclusion predicates over instants (C2).
//!
//! Every variant answers two queries, [`Calendar::is_time_included`] and
//! [`Calendar::next_included_time`]. A calendar with a base calendar treats
//! the base as a further exclusion: it is included only if both the base
//! and the calendar's own rule include the instant.

use crate::cron::CronExpression;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::collections::HashSet;

/// The exclusion rule a [`Calendar`] applies, independent of any base calendar.
#[derive(Debug, Clone)]
pub enum CalendarKind {
    /// Excludes `(month, day-of-month)` pairs, year-independent.
    Annual(HashSet<(u32, u32)>),
    /// Excludes specific days of the month (1..=31).
    Monthly(HashSet<u32>),
    /// Excludes specific ISO weekdays (1=Monday..7=Sunday).
    Weekly(HashSet<u32>),
    /// Excludes specific calendar dates.
    Holiday(BTreeSet<NaiveDate>),
    /// Excludes instants where the given cron expression is satisfied.
    Cron(CronExpression),
    /// Excludes nothing on its own; useful as a pure base-calendar wrapper.
    Base,
}

/// A stackable exclusion predicate over instants.
#[derive(Debug, Clone)]
pub struct Calendar {
    kind: CalendarKind,
    base: Option<Box<Calendar>>,
    timezone: Tz,
    description: Option<String>,
}

impl Calendar {
    fn new(kind: CalendarKind, timezone: Tz) -> Self {
        Self {
            kind,
            base: None,
            timezone,
            description: None,
        }
    }

    /// A calendar excluding the given `(month, day)` pairs every year.
    pub fn annual(dates: impl IntoIterator<Item = (u32, u32)>, timezone: Tz) -> Self {
        Self::new(CalendarKind::Annual(dates.into_iter().collect()), timezone)
    }

    /// A calendar excluding the given days of the month (1..=31).
    pub fn monthly(days: impl IntoIterator<Item = u32>, timezone: Tz) -> Self {
        Self::new(CalendarKind::Monthly(days.into_iter().collect()), timezone)
    }

    /// A calendar excluding the given ISO weekdays (1=Monday..7=Sunday).
    pub fn weekly(weekdays: impl IntoIterator<Item = u32>, timezone: Tz) -> Self {
        Self::new(CalendarKind::Weekly(weekdays.into_iter().collect()), timezone)
    }

    /// A calendar excluding a specific, sparse set of dates.
    pub fn holiday(dates: impl IntoIterator<Item = NaiveDate>, timezone: Tz) -> Self {
        Self::new(CalendarKind::Holiday(dates.into_iter().collect()), timezone)
    }

    /// A calendar excluding instants where `cron` is satisfied.
    pub fn cron(cron: CronExpression) -> Self {
        let tz = cron.timezone();
        Self::new(CalendarKind::Cron(cron), tz)
    }

    /// A no-op calendar; only useful as a base for stacking.
    pub fn base(timezone: Tz) -> Self {
        Self::new(CalendarKind::Base, timezone)
    }

    /// Stacks `self` on top of `base`: an instant is included only if both
    /// `self` and `base` include it.
    pub fn with_base(mut self, base: Calendar) -> Self {
        self.base = Some(Box::new(base));
        self
    }

    /// Attaches a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// True if `t` is NOT excluded by this calendar or any base calendar.
    pub fn is_time_included(&self, t: DateTime<Tz>) -> bool {
        if let Some(base) = &self.base {
            if !base.is_time_included(t) {
                return false;
            }
        }
        self.own_rule_included(t)
    }

    fn own_rule_included(&self, t: DateTime<Tz>) -> bool {
        let local = t.with_timezone(&self.timezone);
        match &self.kind {
            CalendarKind::Annual(excluded) => !excluded.contains(&(local.month(), local.day())),
            CalendarKind::Monthly(excluded) => !excluded.contains(&local.day()),
            CalendarKind::Weekly(excluded) => {
                !excluded.contains(&local.weekday().number_from_monday())
            }
            CalendarKind::Holiday(dates) => !dates.contains(&local.date_naive()),
            CalendarKind::Cron(cron) => !cron.is_satisfied_by(local),
            CalendarKind::Base => true,
        }
    }

    fn is_day_granular(&self) -> bool {
        matches!(
            self.kind,
            CalendarKind::Annual(_)
                | CalendarKind::Monthly(_)
                | CalendarKind::Weekly(_)
                | CalendarKind::Holiday(_)
        )
    }

    /// The first instant at or after `t` that this calendar (and its base
    /// chain) includes.
    ///
    /// Day-granular calendars walk forward one day at a time from the
    /// start of day. The cron variant alternates between leaping over its
    /// own excluded range and advancing past base-calendar exclusions until
    /// a fixed point is reached, guarding against livelock by always
    /// advancing by at least one second.
    pub fn next_included_time(&self, t: DateTime<Tz>) -> DateTime<Tz> {
        let mut candidate = t;
        loop {
            if self.is_time_included(candidate) {
                return candidate;
            }
            let advanced = self.advance_past_exclusion(candidate);
            candidate = if advanced > candidate {
                advanced
            } else {
                candidate + Duration::seconds(1)
            };
        }
    }

    /// Convenience wrapper for callers that track time in UTC, as triggers do.
    pub fn is_time_included_utc(&self, t: DateTime<Utc>) -> bool {
        self.is_time_included(t.with_timezone(&self.timezone))
    }

    /// Convenience wrapper for callers that track time in UTC, as triggers do.
    pub fn next_included_time_utc(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.next_included_time(t.with_timezone(&self.timezone))
            .with_timezone(&Utc)
    }

    fn advance_past_exclusion(&self, t: DateTime<Tz>) -> DateTime<Tz> {
        if self.is_day_granular() {
            let local = t.with_timezone(&self.timezone);
            let next_day = local.date_naive() + Duration::days(1);
            return start_of_day(next_day, &self.timezone).unwrap_or(t + Duration::seconds(1));
        }
        if let CalendarKind::Cron(cron) = &self.kind {
            if let Some(next) = cron.next_invalid_time_after(t) {
                return next;
            }
        }
        // CalendarKind::Base never excludes on its own; any remaining
        // exclusion must come from the base chain.
        if let Some(base) = &self.base {
            return base.next_included_time(t);
        }
        t + Duration::seconds(1)
    }
}

fn start_of_day(date: NaiveDate, tz: &Tz) -> Option<DateTime<Tz>> {
    use chrono::TimeZone;
    match tz.from_local_datetime(&date.and_hms_opt(0, 0, 0)?) {
        chrono::LocalResult::Single(dt) => Some(dt),
        chrono::LocalResult::Ambiguous(a, _) => Some(a),
        chrono::LocalResult::None => tz
            .from_local_datetime(&date.and_hms_opt(1, 0, 0)?)
            .single(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::UTC;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Tz> {
        UTC.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn annual_excludes_month_day_every_year() {
        let cal = Calendar::annual([(1, 1)], UTC);
        assert!(!cal.is_time_included(at(2025, 1, 1, 9)));
        assert!(!cal.is_time_included(at(2030, 1, 1, 9)));
        assert!(cal.is_time_included(at(2025, 1, 2, 9)));
    }

    #[test]
    fn weekly_excludes_weekends() {
        let cal = Calendar::weekly([6, 7], UTC); // Sat, Sun
        assert!(!cal.is_time_included(at(2025, 1, 4, 9))); // Saturday
        assert!(!cal.is_time_included(at(2025, 1, 5, 9))); // Sunday
        assert!(cal.is_time_included(at(2025, 1, 6, 9))); // Monday
    }

    #[test]
    fn holiday_calendar_stacked_on_weekly_base() {
        let weekly = Calendar::weekly([6, 7], UTC);
        let holiday = Calendar::holiday([NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()], UTC)
            .with_base(weekly);

        // Wed 2024-12-30, Tue 2024-12-31 included.
        assert!(holiday.is_time_included(at(2024, 12, 30, 9)));
        assert!(holiday.is_time_included(at(2024, 12, 31, 9)));
        // New Year's Day excluded by holiday rule.
        assert!(!holiday.is_time_included(at(2025, 1, 1, 9)));
        // Weekend excluded by base.
        assert!(!holiday.is_time_included(at(2025, 1, 4, 9)));
        // Next business day included.
        assert!(holiday.is_time_included(at(2025, 1, 2, 9)));

        let next = holiday.next_included_time(at(2025, 1, 1, 9));
        assert_eq!(next, at(2025, 1, 2, 9));
    }

    #[test]
    fn cron_calendar_excludes_business_hours() {
        let cron = CronExpression::parse("* * 9-17 * * MON-FRI", UTC).unwrap();
        let cal = Calendar::cron(cron);
        assert!(!cal.is_time_included(at(2025, 1, 6, 10))); // Monday 10:00
        assert!(cal.is_time_included(at(2025, 1, 6, 20))); // Monday 20:00

        let next = cal.next_included_time(at(2025, 1, 6, 10));
        assert_eq!(next, at(2025, 1, 6, 18));
    }

    #[test]
    fn next_included_time_terminates_when_already_included() {
        let cal = Calendar::weekly([6, 7], UTC);
        let t = at(2025, 1, 6, 9);
        assert_eq!(cal.next_included_time(t), t);
    }

    #[test]
    fn base_calendar_is_pure_passthrough() {
        let cal = Calendar::base(UTC);
        assert!(cal.is_time_included(at(2025, 1, 1, 0)));
    }
}
