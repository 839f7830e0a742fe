//! Quartz-style cron expression parsing and evaluation (C1).
//!
//! A [`CronExpression`] parses the six-or-seven field format
//! `seconds minutes hours day-of-month month day-of-week [year]` and answers
//! three queries: [`CronExpression::is_satisfied_by`],
//! [`CronExpression::next_valid_time_after`], and
//! [`CronExpression::next_invalid_time_after`] (used by cron-based
//! calendars to jump over excluded ranges).

use crate::error::SchedulerError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Weekday};
use chrono_tz::Tz;
use std::fmt;

/// A fixed-size bitset over a field's legal numeric range (0..=63 fits
/// seconds/minutes/hours/day-of-month/month/day-of-week and years-mod-64
/// is not attempted — years use an explicit sorted list instead).
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn empty() -> Self {
        FieldSet(0)
    }

    fn insert(&mut self, v: u32) {
        self.0 |= 1 << v;
    }

    fn contains(&self, v: u32) -> bool {
        self.0 & (1 << v) != 0
    }

    fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Smallest set member in `[from, max]`, if any.
    fn next_from(&self, from: u32, max: u32) -> Option<u32> {
        (from..=max).find(|&c| self.contains(c))
    }

    /// Smallest set member overall.
    fn min_value(&self, max: u32) -> Option<u32> {
        self.next_from(0, max)
    }
}

const MONTH_NAMES: &[(&str, u32)] = &[
    ("JAN", 1),
    ("FEB", 2),
    ("MAR", 3),
    ("APR", 4),
    ("MAY", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AUG", 8),
    ("SEP", 9),
    ("OCT", 10),
    ("NOV", 11),
    ("DEC", 12),
];

/// Quartz day-of-week numbering: 1=Sunday .. 7=Saturday.
const DOW_NAMES: &[(&str, u32)] = &[
    ("SUN", 1),
    ("MON", 2),
    ("TUE", 3),
    ("WED", 4),
    ("THU", 5),
    ("FRI", 6),
    ("SAT", 7),
];

fn weekday_to_quartz(w: Weekday) -> u32 {
    w.num_days_from_sunday() + 1
}

/// The day-of-month field, including the `L`/`W`/`LW` structural forms.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DomField {
    /// `?` — no constraint; the day-of-week field decides.
    Unspecified,
    /// Concrete set of days (`*` is the full set 1..=31).
    Values(FieldSet),
    /// `L` — the last day of the month.
    LastDay,
    /// `LW` — the last weekday (Mon-Fri) of the month.
    LastWeekday,
    /// `nW` — the weekday nearest to day `n`, without crossing months.
    NearestWeekday(u32),
}

/// The day-of-week field, including the `L`/`#` structural forms.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DowField {
    /// `?` — no constraint; the day-of-month field decides.
    Unspecified,
    /// Concrete set of weekdays, Quartz-numbered 1=Sunday..7=Saturday.
    Values(FieldSet),
    /// `nL` — the last occurrence of weekday `n` in the month.
    LastOccurrence(u32),
    /// `n#k` — the `k`-th occurrence of weekday `n` in the month.
    NthOccurrence(u32, u32),
}

/// A parsed, evaluable cron expression.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    day_of_month: DomField,
    month: FieldSet,
    day_of_week: DowField,
    years: Option<Vec<u32>>,
    timezone: Tz,
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.timezone == other.timezone
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn invalid(field: &str, input: &str, message: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidExpression {
        field: field.to_string(),
        input: input.to_string(),
        message: message.into(),
    }
}

/// Parses one comma-separated field into a [`FieldSet`], supporting
/// `*`, single values, `a-b` ranges, `a/b` and `a-b/c` steps, lists, and
/// (for month/day-of-week) three-letter names.
fn parse_field_set(
    field_name: &str,
    raw: &str,
    min: u32,
    max: u32,
    names: Option<&[(&str, u32)]>,
) -> Result<FieldSet, SchedulerError> {
    let mut set = FieldSet::empty();
    for part in raw.split(',') {
        parse_range_or_step(field_name, part, min, max, names, &mut set)?;
    }
    if set.is_empty() {
        return Err(invalid(field_name, raw, "field resolved to no values"));
    }
    Ok(set)
}

fn resolve_token(
    field_name: &str,
    raw: &str,
    token: &str,
    min: u32,
    max: u32,
    names: Option<&[(&str, u32)]>,
) -> Result<u32, SchedulerError> {
    if let Ok(v) = token.parse::<u32>() {
        return Ok(v);
    }
    if let Some(names) = names {
        let upper = token.to_uppercase();
        if let Some((_, v)) = names.iter().find(|(n, _)| *n == upper) {
            return Ok(*v);
        }
    }
    let _ = (min, max);
    Err(invalid(
        field_name,
        raw,
        format!("unrecognized token '{token}'"),
    ))
}

fn parse_range_or_step(
    field_name: &str,
    part: &str,
    min: u32,
    max: u32,
    names: Option<&[(&str, u32)]>,
    set: &mut FieldSet,
) -> Result<(), SchedulerError> {
    let (range_part, step) = match part.split_once('/') {
        Some((r, s)) => {
            let step: u32 = s
                .parse()
                .map_err(|_| invalid(field_name, part, format!("invalid step '{s}'")))?;
            if step == 0 {
                return Err(invalid(field_name, part, "step must be positive"));
            }
            (r, step)
        }
        None => (part, 1),
    };

    let (start, end) = if range_part == "*" {
        (min, max)
    } else if let Some((a, b)) = range_part.split_once('-') {
        let a = resolve_token(field_name, part, a, min, max, names)?;
        let b = resolve_token(field_name, part, b, min, max, names)?;
        (a, b)
    } else {
        let v = resolve_token(field_name, part, range_part, min, max, names)?;
        if part.contains('/') {
            (v, max)
        } else {
            set.insert(v);
            return validate_range(field_name, part, v, v, min, max);
        }
    };

    validate_range(field_name, part, start, end, min, max)?;

    let mut v = start;
    // Wrapping ranges (e.g. hours 22-3) step through to max then from min.
    loop {
        set.insert(v);
        if v == end {
            break;
        }
        let next = v + step;
        if start <= end {
            if next > end {
                break;
            }
            v = next;
        } else {
            // wrap-around range
            if v + step > max {
                v = min + (v + step - max - 1);
            } else {
                v = v + step;
            }
            if v > end && v < start {
                break;
            }
        }
    }
    Ok(())
}

fn validate_range(
    field_name: &str,
    part: &str,
    start: u32,
    end: u32,
    min: u32,
    max: u32,
) -> Result<(), SchedulerError> {
    if start < min || start > max || end < min || end > max {
        return Err(invalid(
            field_name,
            part,
            format!("value out of range [{min}, {max}]"),
        ));
    }
    Ok(())
}

impl CronExpression {
    /// Parses a cron expression string in the given time zone.
    ///
    /// Accepts six fields (seconds, minutes, hours, day-of-month, month,
    /// day-of-week) or seven with a trailing year field.
    pub fn parse(expr: &str, timezone: Tz) -> Result<Self, SchedulerError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 6 && fields.len() != 7 {
            return Err(invalid(
                "expression",
                expr,
                format!("expected 6 or 7 fields, found {}", fields.len()),
            ));
        }

        let seconds = parse_field_set("seconds", fields[0], 0, 59, None)?;
        let minutes = parse_field_set("minutes", fields[1], 0, 59, None)?;
        let hours = parse_field_set("hours", fields[2], 0, 23, None)?;
        let day_of_month = parse_dom(fields[3])?;
        let month = parse_field_set("month", fields[4], 1, 12, Some(MONTH_NAMES))?;
        let day_of_week = parse_dow(fields[5])?;

        if matches!(day_of_month, DomField::Unspecified) && matches!(day_of_week, DowField::Unspecified)
        {
            return Err(invalid(
                "day-of-month/day-of-week",
                expr,
                "at least one of day-of-month or day-of-week must be constrained",
            ));
        }
        if !matches!(day_of_month, DomField::Unspecified)
            && !matches!(day_of_week, DowField::Unspecified)
            && fields[3] != "*"
            && fields[5] != "*"
            && fields[3] != "?"
            && fields[5] != "?"
        {
            // Both concrete and neither is '?': Quartz OR semantics apply; this
            // is legal, just noted here for readers of the algorithm below.
        }

        let years = if fields.len() == 7 && fields[6] != "*" {
            let set = parse_field_set("year", fields[6], 1970, 2199, None)?;
            Some((1970..=2199).filter(|y| set.contains(*y)).collect())
        } else {
            None
        };

        Ok(Self {
            source: expr.to_string(),
            seconds,
            minutes,
            hours,
            day_of_month,
            month,
            day_of_week,
            years,
            timezone,
        })
    }

    /// The time zone field comparisons are performed in.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The canonical textual form of this expression (the original source,
    /// since the parser does not reformat).
    pub fn to_canonical_string(&self) -> String {
        self.source.clone()
    }

    /// True if `t` (in this expression's time zone) satisfies every field.
    pub fn is_satisfied_by(&self, t: DateTime<Tz>) -> bool {
        let t = t.with_timezone(&self.timezone);
        let naive = t.naive_local();
        self.seconds.contains(naive.second())
            && self.minutes.contains(naive.minute())
            && self.hours.contains(naive.hour())
            && self.month.contains(naive.month())
            && self.day_matches(naive.date())
            && self.year_matches(naive.year())
    }

    fn year_matches(&self, year: i32) -> bool {
        match &self.years {
            None => true,
            Some(years) => year >= 0 && years.contains(&(year as u32)),
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom_ok = self.dom_matches(date);
        let dow_ok = self.dow_matches(date);
        match (&self.day_of_month, &self.day_of_week) {
            (DomField::Unspecified, _) => dow_ok,
            (_, DowField::Unspecified) => dom_ok,
            _ => dom_ok || dow_ok,
        }
    }

    fn dom_matches(&self, date: NaiveDate) -> bool {
        match &self.day_of_month {
            DomField::Unspecified => false,
            DomField::Values(set) => set.contains(date.day()),
            DomField::LastDay => date.day() == last_day_of_month(date.year(), date.month()),
            DomField::LastWeekday => date.day() == last_weekday_of_month(date.year(), date.month()),
            DomField::NearestWeekday(day) => {
                date.day() == nearest_weekday(date.year(), date.month(), *day)
            }
        }
    }

    fn dow_matches(&self, date: NaiveDate) -> bool {
        match &self.day_of_week {
            DowField::Unspecified => false,
            DowField::Values(set) => set.contains(weekday_to_quartz(date.weekday())),
            DowField::LastOccurrence(wd) => {
                weekday_to_quartz(date.weekday()) == *wd
                    && date.day() + 7 > last_day_of_month(date.year(), date.month())
            }
            DowField::NthOccurrence(wd, n) => {
                weekday_to_quartz(date.weekday()) == *wd && ((date.day() - 1) / 7 + 1) == *n
            }
        }
    }

    /// The first instant strictly after `after` that satisfies this
    /// expression, or `None` if the schedule is exhausted (e.g. the year
    /// field has no future members, or `29 FEB` never recurs within the
    /// search horizon).
    pub fn next_valid_time_after(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let after_local = after.with_timezone(&self.timezone).naive_local();
        let start = after_local + Duration::seconds(1);
        let naive = self.next_valid_naive(start)?;
        resolve_local(&self.timezone, naive)
    }

    /// The first instant at or after `after` that does NOT satisfy this
    /// expression. Used by cron-based calendars to leap over excluded
    /// ranges. Bounded to avoid looping forever on expressions that are
    /// (almost) always satisfied.
    pub fn next_invalid_time_after(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
        const MAX_STEPS: u32 = 400_000; // ~4.6 days at 1s resolution
        let mut candidate = after.with_timezone(&self.timezone) + Duration::seconds(1);
        for _ in 0..MAX_STEPS {
            if !self.is_satisfied_by(candidate) {
                return Some(candidate.with_timezone(&after.timezone()));
            }
            candidate += Duration::seconds(1);
        }
        None
    }

    fn next_valid_naive(&self, start: NaiveDateTime) -> Option<NaiveDateTime> {
        let max_year = start.year() + 5;
        let mut candidate = start.with_nanosecond(0)?;
        let mut guard = 0u32;
        loop {
            guard += 1;
            if guard > 200_000 || candidate.year() > max_year {
                return None;
            }

            if !self.year_matches(candidate.year()) {
                candidate = self.advance_year(candidate)?;
                continue;
            }
            if !self.month.contains(candidate.month()) {
                candidate = advance_month(candidate, &self.month)?;
                continue;
            }
            if !self.day_matches(candidate.date()) {
                candidate = advance_day(candidate);
                continue;
            }
            if !self.hours.contains(candidate.hour()) {
                candidate = advance_hour(candidate, &self.hours)?;
                continue;
            }
            if !self.minutes.contains(candidate.minute()) {
                candidate = advance_minute(candidate, &self.minutes)?;
                continue;
            }
            if !self.seconds.contains(candidate.second()) {
                candidate = advance_second(candidate, &self.seconds)?;
                continue;
            }
            return Some(candidate);
        }
    }

    fn advance_year(&self, dt: NaiveDateTime) -> Option<NaiveDateTime> {
        let years = self.years.as_ref()?;
        let next = years.iter().copied().find(|y| *y as i32 > dt.year())?;
        NaiveDate::from_ymd_opt(next as i32, 1, 1)?.and_hms_opt(0, 0, 0)
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next_month_first
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn last_weekday_of_month(year: i32, month: u32) -> u32 {
    let last = last_day_of_month(year, month);
    let mut day = last;
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                return day;
            }
        }
        day -= 1;
    }
}

fn nearest_weekday(year: i32, month: u32, day: u32) -> u32 {
    let last = last_day_of_month(year, month);
    let day = day.min(last);
    let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
        return day;
    };
    match date.weekday() {
        Weekday::Sat => {
            if day > 1 {
                day - 1
            } else {
                (day + 2).min(last)
            }
        }
        Weekday::Sun => {
            if day < last {
                day + 1
            } else {
                day.saturating_sub(2).max(1)
            }
        }
        _ => day,
    }
}

fn advance_second(dt: NaiveDateTime, seconds: &FieldSet) -> Option<NaiveDateTime> {
    match seconds.next_from(dt.second() + 1, 59) {
        Some(s) => dt.with_second(s),
        None => (dt + Duration::minutes(1))
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0)),
    }
}

fn advance_minute(dt: NaiveDateTime, minutes: &FieldSet) -> Option<NaiveDateTime> {
    match minutes.next_from(dt.minute() + 1, 59) {
        Some(m) => dt.with_minute(m)?.with_second(0),
        None => {
            let next_hour = dt + Duration::hours(1);
            next_hour.with_minute(0)?.with_second(0)
        }
    }
}

fn advance_hour(dt: NaiveDateTime, hours: &FieldSet) -> Option<NaiveDateTime> {
    match hours.next_from(dt.hour() + 1, 23) {
        Some(h) => dt.with_hour(h)?.with_minute(0)?.with_second(0),
        None => {
            let next_day = advance_day(dt);
            next_day.with_hour(0)?.with_minute(0)?.with_second(0)
        }
    }
}

fn advance_day(dt: NaiveDateTime) -> NaiveDateTime {
    let next_date = dt.date() + Duration::days(1);
    next_date.and_hms_opt(0, 0, 0).unwrap_or(dt)
}

fn advance_month(dt: NaiveDateTime, months: &FieldSet) -> Option<NaiveDateTime> {
    match months.next_from(dt.month() + 1, 12) {
        Some(m) => NaiveDate::from_ymd_opt(dt.year(), m, 1)?.and_hms_opt(0, 0, 0),
        None => {
            let m = months.min_value(12)?;
            NaiveDate::from_ymd_opt(dt.year() + 1, m, 1)?.and_hms_opt(0, 0, 0)
        }
    }
}

fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt),
        chrono::LocalResult::Ambiguous(a, _) => Some(a),
        chrono::LocalResult::None => {
            // Spring-forward gap: step one second at a time until we land
            // on a representable instant.
            let mut probe = naive + Duration::seconds(1);
            for _ in 0..3600 {
                if let chrono::LocalResult::Single(dt) = tz.from_local_datetime(&probe) {
                    return Some(dt);
                }
                probe += Duration::seconds(1);
            }
            None
        }
    }
}

fn parse_dom(raw: &str) -> Result<DomField, SchedulerError> {
    if raw == "?" {
        return Ok(DomField::Unspecified);
    }
    if raw == "L" {
        return Ok(DomField::LastDay);
    }
    if raw == "LW" || raw == "WL" {
        return Ok(DomField::LastWeekday);
    }
    if let Some(prefix) = raw.strip_suffix('W') {
        let day: u32 = prefix
            .parse()
            .map_err(|_| invalid("day-of-month", raw, "expected 'nW'"))?;
        if !(1..=31).contains(&day) {
            return Err(invalid("day-of-month", raw, "day out of range"));
        }
        return Ok(DomField::NearestWeekday(day));
    }
    parse_field_set("day-of-month", raw, 1, 31, None).map(DomField::Values)
}

fn parse_dow(raw: &str) -> Result<DowField, SchedulerError> {
    if raw == "?" {
        return Ok(DowField::Unspecified);
    }
    if let Some(prefix) = raw.strip_suffix('L') {
        if prefix.is_empty() {
            return Err(invalid("day-of-week", raw, "'L' requires a weekday prefix"));
        }
        let wd = resolve_token("day-of-week", raw, prefix, 1, 7, Some(DOW_NAMES))?;
        return Ok(DowField::LastOccurrence(wd));
    }
    if let Some((wd_part, n_part)) = raw.split_once('#') {
        let wd = resolve_token("day-of-week", raw, wd_part, 1, 7, Some(DOW_NAMES))?;
        let n: u32 = n_part
            .parse()
            .map_err(|_| invalid("day-of-week", raw, "expected 'n#k'"))?;
        if !(1..=5).contains(&n) {
            return Err(invalid("day-of-week", raw, "occurrence must be 1..=5"));
        }
        return Ok(DowField::NthOccurrence(wd, n));
    }
    parse_field_set("day-of-week", raw, 1, 7, Some(DOW_NAMES)).map(DowField::Values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::UTC;

    fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Tz> {
        UTC.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn parses_basic_expression() {
        assert!(CronExpression::parse("0 * * * * ?", UTC).is_ok());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronExpression::parse("0 * * *", UTC).is_err());
    }

    #[test]
    fn rejects_both_dom_and_dow_unspecified() {
        assert!(CronExpression::parse("0 0 10 ? * ?", UTC).is_err());
    }

    #[test]
    fn daily_at_10_fires_on_consecutive_days() {
        let cron = CronExpression::parse("0 0 10 ? * *", UTC).unwrap();
        let start = at(2025, 1, 1, 0, 0, 0);
        let f1 = cron.next_valid_time_after(start).unwrap();
        assert_eq!(f1, at(2025, 1, 1, 10, 0, 0));
        let f2 = cron.next_valid_time_after(f1).unwrap();
        assert_eq!(f2, at(2025, 1, 2, 10, 0, 0));
        let f3 = cron.next_valid_time_after(f2).unwrap();
        assert_eq!(f3, at(2025, 1, 3, 10, 0, 0));
    }

    #[test]
    fn is_satisfied_by_matches_next_valid_time() {
        let cron = CronExpression::parse("30 15 9 ? * MON-FRI", UTC).unwrap();
        let next = cron.next_valid_time_after(at(2025, 6, 1, 0, 0, 0)).unwrap();
        assert!(cron.is_satisfied_by(next));
        assert!(!cron.is_satisfied_by(next - Duration::seconds(1)));
    }

    #[test]
    fn last_day_of_month_handles_february() {
        let cron = CronExpression::parse("0 0 0 L * ?", UTC).unwrap();
        let next = cron.next_valid_time_after(at(2024, 2, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 2, 29, 0, 0, 0)); // 2024 is a leap year
    }

    #[test]
    fn nth_weekday_of_month() {
        // third Friday of each month; Quartz numbering FRI=6
        let cron = CronExpression::parse("0 0 9 ? * 6#3", UTC).unwrap();
        let next = cron.next_valid_time_after(at(2025, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Fri);
        assert_eq!((next.day() - 1) / 7 + 1, 3);
    }

    #[test]
    fn or_semantics_when_both_dom_and_dow_concrete() {
        // Fires on the 1st of the month OR every Monday.
        let cron = CronExpression::parse("0 0 0 1 * MON", UTC).unwrap();
        assert!(cron.is_satisfied_by(at(2025, 3, 1, 0, 0, 0))); // a Saturday, matches dom
        assert!(cron.is_satisfied_by(at(2025, 3, 3, 0, 0, 0))); // a Monday, matches dow
        assert!(!cron.is_satisfied_by(at(2025, 3, 4, 0, 0, 0)));
    }

    #[test]
    fn canonical_round_trip() {
        let src = "0 15 10 ? * MON-FRI";
        let cron = CronExpression::parse(src, UTC).unwrap();
        assert_eq!(cron.to_canonical_string(), src);
        let reparsed = CronExpression::parse(&cron.to_canonical_string(), UTC).unwrap();
        assert_eq!(reparsed.to_canonical_string(), src);
    }

    #[test]
    fn next_invalid_time_after_jumps_out_of_excluded_range() {
        // Satisfied every second of the 9 o'clock hour; invalid time is 10:00:00.
        let cron = CronExpression::parse("* * 9 * * ?", UTC).unwrap();
        let t = at(2025, 1, 1, 9, 0, 0);
        let invalid = cron.next_invalid_time_after(t).unwrap();
        assert_eq!(invalid, at(2025, 1, 1, 10, 0, 0));
    }

    #[test]
    fn monotonic_sequence() {
        let cron = CronExpression::parse("0 */15 * * * ?", UTC).unwrap();
        let mut t = at(2025, 1, 1, 0, 0, 0);
        for _ in 0..50 {
            let next = cron.next_valid_time_after(t).unwrap();
            assert!(next > t);
            t = next;
        }
    }
}
