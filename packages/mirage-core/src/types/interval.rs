//! Calendar interval value (`interval` type).

use std::fmt;

use chrono::{Duration, Months, NaiveDate, NaiveDateTime};

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

/// Interval split into calendar months, days and sub-day microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

impl Interval {
    pub fn new(months: i32, days: i32, micros: i64) -> Self {
        Self {
            months,
            days,
            micros,
        }
    }

    /// Exact difference between two timestamps, expressed in days and micros.
    pub fn between(later: NaiveDateTime, earlier: NaiveDateTime) -> Self {
        let total = (later - earlier).num_microseconds().unwrap_or(i64::MAX);
        Self {
            months: 0,
            days: (total / MICROS_PER_DAY) as i32,
            micros: total % MICROS_PER_DAY,
        }
    }

    pub fn negate(self) -> Self {
        Self {
            months: -self.months,
            days: -self.days,
            micros: -self.micros,
        }
    }

    pub fn add(self, other: Interval) -> Self {
        Self {
            months: self.months + other.months,
            days: self.days + other.days,
            micros: self.micros + other.micros,
        }
    }

    /// Shifts a timestamp by this interval; `None` when out of range.
    pub fn apply(self, ts: NaiveDateTime) -> Option<NaiveDateTime> {
        let shifted = if self.months >= 0 {
            ts.checked_add_months(Months::new(self.months as u32))?
        } else {
            ts.checked_sub_months(Months::new(self.months.unsigned_abs()))?
        };
        shifted
            .checked_add_signed(Duration::days(self.days as i64))?
            .checked_add_signed(Duration::microseconds(self.micros))
    }

    /// Shifts a date by this interval, producing a timestamp.
    pub fn apply_date(self, date: NaiveDate) -> Option<NaiveDateTime> {
        self.apply(date.and_hms_opt(0, 0, 0)?)
    }

    /// Parses postgres-style interval text: `1 day`, `2 hours 30 minutes`,
    /// `1 year 2 mons`, `01:30:00`, or a combination.
    pub fn parse(text: &str) -> Option<Interval> {
        let mut interval = Interval::default();
        let mut tokens = text.split_whitespace().peekable();
        let mut any = false;
        while let Some(token) = tokens.next() {
            if token.contains(':') {
                interval.micros += parse_clock(token)?;
                any = true;
                continue;
            }
            let amount: f64 = token.parse().ok()?;
            let unit = tokens.next()?.to_ascii_lowercase();
            let unit = unit.trim_end_matches(',');
            match unit.trim_end_matches('s') {
                "year" | "yr" | "y" => interval.months += (amount * 12.0) as i32,
                "mon" | "month" => interval.months += amount as i32,
                "week" | "w" => interval.days += (amount * 7.0) as i32,
                "day" | "d" => interval.days += amount as i32,
                "hour" | "hr" | "h" => interval.micros += (amount * MICROS_PER_HOUR as f64) as i64,
                "minute" | "min" | "m" => {
                    interval.micros += (amount * MICROS_PER_MINUTE as f64) as i64
                }
                "second" | "sec" => interval.micros += (amount * MICROS_PER_SECOND as f64) as i64,
                "millisecond" | "msec" => interval.micros += (amount * 1000.0) as i64,
                _ => return None,
            }
            any = true;
        }
        any.then_some(interval)
    }
}

fn parse_clock(token: &str) -> Option<i64> {
    let negative = token.starts_with('-');
    let parts: Vec<&str> = token.trim_start_matches('-').split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let hours: i64 = parts[0].parse().ok()?;
    let minutes: i64 = parts[1].parse().ok()?;
    let seconds: f64 = match parts.get(2) {
        Some(s) => s.parse().ok()?,
        None => 0.0,
    };
    let micros = hours * MICROS_PER_HOUR
        + minutes * MICROS_PER_MINUTE
        + (seconds * MICROS_PER_SECOND as f64) as i64;
    Some(if negative { -micros } else { micros })
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        let years = self.months / 12;
        let months = self.months % 12;
        if years != 0 {
            parts.push(format!("{} year{}", years, if years.abs() == 1 { "" } else { "s" }));
        }
        if months != 0 {
            parts.push(format!("{} mon{}", months, if months.abs() == 1 { "" } else { "s" }));
        }
        if self.days != 0 {
            parts.push(format!(
                "{} day{}",
                self.days,
                if self.days.abs() == 1 { "" } else { "s" }
            ));
        }
        if self.micros != 0 || parts.is_empty() {
            let sign = if self.micros < 0 { "-" } else { "" };
            let micros = self.micros.abs();
            let hours = micros / MICROS_PER_HOUR;
            let minutes = (micros % MICROS_PER_HOUR) / MICROS_PER_MINUTE;
            let seconds = (micros % MICROS_PER_MINUTE) / MICROS_PER_SECOND;
            let fraction = micros % MICROS_PER_SECOND;
            if fraction == 0 {
                parts.push(format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds));
            } else {
                parts.push(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    sign, hours, minutes, seconds, fraction
                ));
            }
        }
        write!(f, "{}", parts.join(" "))
    }
}
