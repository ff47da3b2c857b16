//! Working-hours schedule
//!
//! Decides whether the gateway connection should exist at a given instant
//! and when that answer next changes. Everything here is a pure function of
//! the configured window and a UTC timestamp; the local wall clock is derived
//! by shifting UTC by a whole-hour GMT offset.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};

use crate::error::{Error, Result};

/// Largest accepted GMT offset in either direction
pub const MAX_OFFSET_HOURS: i32 = 23;

const DEFAULT_WORK_DAYS: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

// ─────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────

/// Source of the current UTC time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ─────────────────────────────────────────────────────────────────
// Schedule Window
// ─────────────────────────────────────────────────────────────────

/// A same-day active window repeated on each work day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow {
    work_days: HashSet<Weekday>,
    start: NaiveTime,
    end: NaiveTime,
    offset_hours: i32,
}

impl ScheduleWindow {
    /// Build a window, rejecting empty day sets, inverted ranges and
    /// out-of-range offsets
    pub fn new(
        work_days: impl IntoIterator<Item = Weekday>,
        start: NaiveTime,
        end: NaiveTime,
        offset_hours: i32,
    ) -> Result<Self> {
        let work_days: HashSet<Weekday> = work_days.into_iter().collect();
        if work_days.is_empty() {
            return Err(Error::Schedule("at least one work day is required".to_string()));
        }
        if start >= end {
            return Err(Error::Schedule(format!(
                "work start {} must be before work end {} (overnight windows are not supported)",
                start.format("%H:%M"),
                end.format("%H:%M")
            )));
        }
        if !(-MAX_OFFSET_HOURS..=MAX_OFFSET_HOURS).contains(&offset_hours) {
            return Err(Error::Schedule(format!(
                "GMT offset {} is outside -{}..={}",
                offset_hours, MAX_OFFSET_HOURS, MAX_OFFSET_HOURS
            )));
        }

        Ok(Self {
            work_days,
            start,
            end,
            offset_hours,
        })
    }

    /// Parse the raw configuration strings (`WORK_DAYS`, `WORK_START`,
    /// `WORK_END`, `GMT_OFFSET`)
    pub fn parse(work_days: &str, start: &str, end: &str, offset: &str) -> Result<Self> {
        let days = parse_work_days(work_days)?;
        let start = parse_time(start)?;
        let end = parse_time(end)?;
        let offset = parse_offset(offset)?;
        Self::new(days, start, end, offset)
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn offset_hours(&self) -> i32 {
        self.offset_hours
    }

    pub fn is_work_day(&self, day: Weekday) -> bool {
        self.work_days.contains(&day)
    }

    /// Work days in calendar order, Monday first
    pub fn work_days(&self) -> Vec<Weekday> {
        let mut days: Vec<Weekday> = self.work_days.iter().copied().collect();
        days.sort_by_key(|d| d.num_days_from_monday());
        days
    }
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self {
            work_days: DEFAULT_WORK_DAYS.into_iter().collect(),
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            offset_hours: 0,
        }
    }
}

impl fmt::Display for ScheduleWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days: Vec<String> = self.work_days().iter().map(|d| d.to_string()).collect();
        write!(
            f,
            "{} {}-{} GMT{:+}",
            days.join(","),
            self.start.format("%H:%M"),
            self.end.format("%H:%M"),
            self.offset_hours
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Schedule Gate
// ─────────────────────────────────────────────────────────────────

/// Answers "should we be connected now" and "when does that change"
#[derive(Debug, Clone)]
pub struct ScheduleGate {
    window: ScheduleWindow,
}

impl ScheduleGate {
    pub fn new(window: ScheduleWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &ScheduleWindow {
        &self.window
    }

    /// True iff the local weekday is a work day and the local time lies
    /// strictly between start and end
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let local = self.to_local(now);
        let time = local.time();
        self.window.is_work_day(local.weekday()) && time > self.window.start && time < self.window.end
    }

    /// The instant at which `is_active` next changes its answer
    ///
    /// While active this is today's end; otherwise the start of the next
    /// work day (today included when its start is still ahead).
    pub fn next_transition(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = self.to_local(now);
        let today = local.date();

        if self.is_active(now) {
            return self.to_utc(today.and_time(self.window.end));
        }

        if self.window.is_work_day(today.weekday()) && local.time() <= self.window.start {
            return self.to_utc(today.and_time(self.window.start));
        }

        (1..=7)
            .map(|ahead| today + Duration::days(ahead))
            .find(|day| self.window.is_work_day(day.weekday()))
            .map(|day| self.local_start_utc(day))
            .unwrap_or_else(|| self.local_start_utc(today + Duration::days(7)))
    }

    /// UTC wall clock shifted into the configured local time
    pub fn to_local(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.naive_utc() + Duration::hours(i64::from(self.window.offset_hours))
    }

    /// Local wall clock shifted back to UTC; exact inverse of `to_local`
    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let naive = local - Duration::hours(i64::from(self.window.offset_hours));
        Utc.from_utc_datetime(&naive)
    }

    fn local_start_utc(&self, day: NaiveDate) -> DateTime<Utc> {
        self.to_utc(day.and_time(self.window.start))
    }

    /// Render an instant in the configured local time, e.g.
    /// `2025-03-24 09:00:00 (GMT+2)`
    pub fn format_local(&self, instant: DateTime<Utc>) -> String {
        format!(
            "{} (GMT{:+})",
            self.to_local(instant).format("%Y-%m-%d %H:%M:%S"),
            self.window.offset_hours
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────

/// Parse `HH:MM`
pub fn parse_time(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    let (hour, minute) = value
        .split_once(':')
        .ok_or_else(|| Error::Schedule(format!("invalid time format: {:?} (expected HH:MM)", value)))?;

    let hour: u32 = hour
        .parse()
        .map_err(|_| Error::Schedule(format!("invalid hour: {:?}", hour)))?;
    let minute: u32 = minute
        .parse()
        .map_err(|_| Error::Schedule(format!("invalid minute: {:?}", minute)))?;

    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| Error::Schedule(format!("time out of range: {:?}", value)))
}

/// Parse a comma-separated weekday list; blank means Monday to Friday
pub fn parse_work_days(value: &str) -> Result<Vec<Weekday>> {
    if value.trim().is_empty() {
        return Ok(DEFAULT_WORK_DAYS.to_vec());
    }

    let mut days = Vec::new();
    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let day = match name.to_lowercase().as_str() {
            "monday" | "mon" => Weekday::Mon,
            "tuesday" | "tue" => Weekday::Tue,
            "wednesday" | "wed" => Weekday::Wed,
            "thursday" | "thu" => Weekday::Thu,
            "friday" | "fri" => Weekday::Fri,
            "saturday" | "sat" => Weekday::Sat,
            "sunday" | "sun" => Weekday::Sun,
            _ => return Err(Error::Schedule(format!("invalid day: {}", name))),
        };
        if !days.contains(&day) {
            days.push(day);
        }
    }

    if days.is_empty() {
        return Err(Error::Schedule("at least one work day is required".to_string()));
    }
    Ok(days)
}

/// Parse a whole-hour offset such as `2`, `-5`, `GMT+3`
pub fn parse_offset(value: &str) -> Result<i32> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("GMT")
        .or_else(|| trimmed.strip_prefix("gmt"))
        .unwrap_or(trimmed)
        .trim();

    if digits.is_empty() {
        return Ok(0);
    }

    let offset: i32 = digits
        .parse()
        .map_err(|_| Error::Schedule(format!("invalid GMT offset: {}", value)))?;

    if !(-MAX_OFFSET_HOURS..=MAX_OFFSET_HOURS).contains(&offset) {
        return Err(Error::Schedule(format!(
            "GMT offset {} is outside -{}..={}",
            offset, MAX_OFFSET_HOURS, MAX_OFFSET_HOURS
        )));
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn monday_window() -> ScheduleGate {
        ScheduleGate::new(ScheduleWindow::parse("monday", "10:00", "11:00", "0").unwrap())
    }

    // 2025-03-24 is a Monday

    #[test]
    fn test_default_window_weekdays() {
        let gate = ScheduleGate::new(ScheduleWindow::default());

        assert!(gate.is_active(utc(2025, 3, 24, 12, 0, 0)));
        assert!(gate.is_active(utc(2025, 3, 28, 16, 59, 59)));
        assert!(!gate.is_active(utc(2025, 3, 29, 12, 0, 0))); // Saturday
        assert!(!gate.is_active(utc(2025, 3, 30, 12, 0, 0))); // Sunday
        assert!(!gate.is_active(utc(2025, 3, 24, 8, 59, 59)));
        assert!(!gate.is_active(utc(2025, 3, 24, 17, 30, 0)));
    }

    #[test]
    fn test_window_bounds_are_exclusive() {
        let gate = ScheduleGate::new(ScheduleWindow::default());

        assert!(!gate.is_active(utc(2025, 3, 24, 9, 0, 0)));
        assert!(gate.is_active(utc(2025, 3, 24, 9, 0, 1)));
        assert!(!gate.is_active(utc(2025, 3, 24, 17, 0, 0)));
    }

    #[test]
    fn test_single_day_scenario() {
        let gate = monday_window();

        let inside = utc(2025, 3, 24, 10, 30, 0);
        assert!(gate.is_active(inside));
        assert_eq!(gate.next_transition(inside), utc(2025, 3, 24, 11, 0, 0));

        let after = utc(2025, 3, 24, 11, 30, 0);
        assert!(!gate.is_active(after));
        assert_eq!(gate.next_transition(after), utc(2025, 3, 31, 10, 0, 0));
    }

    #[test]
    fn test_next_transition_before_start_is_today() {
        let gate = monday_window();
        let early = utc(2025, 3, 24, 7, 0, 0);
        assert_eq!(gate.next_transition(early), utc(2025, 3, 24, 10, 0, 0));

        let at_start = utc(2025, 3, 24, 10, 0, 0);
        assert_eq!(gate.next_transition(at_start), at_start);
    }

    #[test]
    fn test_offset_shifts_window() {
        // GMT+2: local 09:00-17:00 is 07:00-15:00 UTC
        let window = ScheduleWindow::parse("", "09:00", "17:00", "GMT+2").unwrap();
        let gate = ScheduleGate::new(window);

        assert!(gate.is_active(utc(2025, 3, 24, 7, 30, 0)));
        assert!(!gate.is_active(utc(2025, 3, 24, 15, 30, 0)));
        assert_eq!(gate.next_transition(utc(2025, 3, 24, 7, 30, 0)), utc(2025, 3, 24, 15, 0, 0));
    }

    #[test]
    fn test_offset_crosses_day_boundary() {
        // Monday 23:30 UTC is Tuesday 04:30 at GMT+5
        let window = ScheduleWindow::parse("tuesday", "04:00", "05:00", "5").unwrap();
        let gate = ScheduleGate::new(window);

        let now = utc(2025, 3, 24, 23, 30, 0);
        assert!(gate.is_active(now));
        assert_eq!(gate.next_transition(now), utc(2025, 3, 25, 0, 0, 0));

        // Negative offset: Tuesday 02:00 UTC is Monday 21:00 at GMT-5
        let window = ScheduleWindow::parse("monday", "20:00", "22:00", "-5").unwrap();
        let gate = ScheduleGate::new(window);
        assert!(gate.is_active(utc(2025, 3, 25, 2, 0, 0)));
    }

    #[test]
    fn test_local_utc_round_trip() {
        for offset in [-23, -7, 0, 5, 23] {
            let window = ScheduleWindow::new(DEFAULT_WORK_DAYS, parse_time("09:00").unwrap(), parse_time("17:00").unwrap(), offset).unwrap();
            let gate = ScheduleGate::new(window);
            let now = utc(2025, 3, 24, 13, 17, 42);
            assert_eq!(gate.to_utc(gate.to_local(now)), now);
        }
    }

    #[test]
    fn test_next_transition_flips_is_active() {
        let windows = [
            ScheduleWindow::default(),
            ScheduleWindow::parse("monday,wednesday,saturday", "06:15", "18:45", "-7").unwrap(),
            ScheduleWindow::parse("sunday", "00:30", "23:30", "12").unwrap(),
        ];

        for window in windows {
            let gate = ScheduleGate::new(window);
            let mut now = utc(2025, 3, 20, 0, 0, 0);
            let until = utc(2025, 4, 5, 0, 0, 0);

            while now < until {
                let active = gate.is_active(now);
                let next = gate.next_transition(now);
                assert!(next >= now, "transition {next} before {now}");

                let just_after = next + Duration::seconds(1);
                assert_ne!(gate.is_active(just_after), active, "no flip at {next} from {now}");

                let just_before = next - Duration::seconds(1);
                if just_before > now {
                    assert_eq!(gate.is_active(just_before), active, "early flip before {next}");
                }

                now = now + Duration::minutes(37);
            }
        }
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("09:30").unwrap(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(parse_time(" 7:05 ").unwrap(), NaiveTime::from_hms_opt(7, 5, 0).unwrap());
        assert!(parse_time("0930").is_err());
        assert!(parse_time("24:00").is_err());
        assert!(parse_time("12:60").is_err());
        assert!(parse_time("ab:cd").is_err());
    }

    #[test]
    fn test_parse_work_days() {
        assert_eq!(parse_work_days("").unwrap(), DEFAULT_WORK_DAYS.to_vec());
        assert_eq!(
            parse_work_days("Monday, friday,SUN").unwrap(),
            vec![Weekday::Mon, Weekday::Fri, Weekday::Sun]
        );
        assert!(parse_work_days("monday,funday").is_err());
        assert!(parse_work_days(" , ").is_err());
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("").unwrap(), 0);
        assert_eq!(parse_offset("3").unwrap(), 3);
        assert_eq!(parse_offset("-4").unwrap(), -4);
        assert_eq!(parse_offset("GMT+8").unwrap(), 8);
        assert_eq!(parse_offset("gmt-11").unwrap(), -11);
        assert!(parse_offset("24").is_err());
        assert!(parse_offset("+2.5").is_err());
    }

    #[test]
    fn test_window_validation() {
        let nine = parse_time("09:00").unwrap();
        let five = parse_time("17:00").unwrap();

        assert!(ScheduleWindow::new(Vec::<Weekday>::new(), nine, five, 0).is_err());
        assert!(ScheduleWindow::new(DEFAULT_WORK_DAYS, five, nine, 0).is_err());
        assert!(ScheduleWindow::new(DEFAULT_WORK_DAYS, nine, nine, 0).is_err());
        assert!(ScheduleWindow::new(DEFAULT_WORK_DAYS, nine, five, -24).is_err());
    }

    #[test]
    fn test_display_and_format_local() {
        let window = ScheduleWindow::parse("friday,monday", "08:00", "16:30", "2").unwrap();
        assert_eq!(window.to_string(), "Mon,Fri 08:00-16:30 GMT+2");

        let gate = ScheduleGate::new(window);
        assert_eq!(
            gate.format_local(utc(2025, 3, 24, 7, 0, 0)),
            "2025-03-24 09:00:00 (GMT+2)"
        );
    }
}
