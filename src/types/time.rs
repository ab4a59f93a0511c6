//! Calendar instants and simulation time windows.

use std::{cmp::Ordering, fmt};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

// -------------------------------------------------------------------------------------------------

/// A calendar instant (year, month, day, hour, minute, second).
///
/// Default-constructed and out-of-range instants are not valid; validity is
/// part of the value and is checked by all consumers before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    instant: Option<NaiveDateTime>,
}

impl Time {
    pub fn new(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        let instant = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second));
        Self { instant }
    }

    pub fn new_not_valid() -> Self {
        Self { instant: None }
    }

    /// The sentinel instant keying result-store entries of time-independent
    /// simulations.
    pub fn no_evolution() -> Self {
        Self::new(1901, 1, 1, 1, 1, 1)
    }

    pub fn from_unix(seconds: i64) -> Self {
        Self {
            instant: chrono::DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.instant.is_some()
    }

    /// Seconds since the Unix epoch, or 0 when not valid.
    pub fn to_unix(&self) -> i64 {
        self.instant.map_or(0, |i| i.and_utc().timestamp())
    }

    /// Returns a new instant shifted by the given amount of seconds.
    /// Shifting an invalid instant yields an invalid instant.
    pub fn add_seconds(&self, seconds: i64) -> Self {
        Self {
            instant: self
                .instant
                .and_then(|i| i.checked_add_signed(chrono::Duration::seconds(seconds))),
        }
    }

    /// Difference `self - other` in seconds; 0 when either side is invalid.
    pub fn diff_seconds(&self, other: &Time) -> f64 {
        match (self.instant, other.instant) {
            (Some(a), Some(b)) => (a - b).num_seconds() as f64,
            _ => 0.0,
        }
    }

    pub fn year(&self) -> i32 {
        self.instant.map_or(0, |i| i.year())
    }

    pub fn month(&self) -> u32 {
        self.instant.map_or(0, |i| i.month())
    }

    pub fn day(&self) -> u32 {
        self.instant.map_or(0, |i| i.day())
    }

    pub fn hour(&self) -> u32 {
        self.instant.map_or(0, |i| i.hour())
    }

    pub fn minute(&self) -> u32 {
        self.instant.map_or(0, |i| i.minute())
    }

    pub fn second(&self) -> u32 {
        self.instant.map_or(0, |i| i.second())
    }
}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.instant, other.instant) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instant {
            Some(i) => write!(f, "{}", i.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "<not valid>"),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// The (start, end) window bounding SSP averaging and time evolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTime {
    pub start: Time,
    pub end: Time,
}

impl SimTime {
    pub fn new(start: Time, end: Time) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start.is_valid() && self.end.is_valid() && self.end >= self.start
    }
}

impl Default for SimTime {
    fn default() -> Self {
        Self {
            start: Time::new_not_valid(),
            end: Time::new_not_valid(),
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity() {
        assert!(Time::new(2012, 6, 1, 12, 0, 0).is_valid());
        assert!(!Time::new(2012, 13, 1, 12, 0, 0).is_valid());
        assert!(!Time::new_not_valid().is_valid());
        assert!(Time::no_evolution().is_valid());
    }

    #[test]
    fn arithmetic_and_ordering() {
        let t = Time::new(2012, 6, 1, 12, 0, 0);
        let later = t.add_seconds(3600);
        assert!(later > t);
        assert_eq!(later.diff_seconds(&t), 3600.0);
        assert_eq!(t.diff_seconds(&later), -3600.0);
        assert!(t.add_seconds(0).is_valid());
    }

    #[test]
    fn invalid_is_unordered() {
        let t = Time::new(2012, 6, 1, 12, 0, 0);
        assert_eq!(t.partial_cmp(&Time::new_not_valid()), None);
    }

    #[test]
    fn sim_time_window() {
        let start = Time::new(2012, 6, 1, 0, 0, 0);
        let end = Time::new(2012, 6, 2, 0, 0, 0);
        assert!(SimTime::new(start, end).is_valid());
        assert!(!SimTime::new(end, start).is_valid());
        assert!(!SimTime::default().is_valid());
    }
}
