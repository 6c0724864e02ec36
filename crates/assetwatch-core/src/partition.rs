//! Partitions definitions.
//!
//! A partitioned asset is materialized one partition key at a time. Static
//! definitions list their keys explicitly; time-window definitions derive one
//! key per closed window between a start instant and "now".

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// An inclusive range of partition keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    /// First key of the range.
    pub start: String,
    /// Last key of the range, inclusive.
    pub end: String,
}

impl PartitionKeyRange {
    /// Creates a range spanning `start..=end`.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// A range containing a single key.
    pub fn single(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            start: key.clone(),
            end: key,
        }
    }
}

/// A fixed, ordered list of partition keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticPartitionsDefinition {
    keys: Vec<String>,
}

impl StaticPartitionsDefinition {
    /// Creates a static definition.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidDefinition` if a key appears twice.
    pub fn new<I, S>(keys: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for key in keys {
            let key = key.into();
            if unique.contains(&key) {
                return Err(DomainError::InvalidDefinition(format!(
                    "duplicate partition key {key}"
                )));
            }
            unique.push(key);
        }
        Ok(Self { keys: unique })
    }

    /// The keys in definition order.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// Length of one time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// One window per hour.
    Hourly,
    /// One window per day.
    Daily,
    /// One window per seven days.
    Weekly,
    /// One window per calendar month.
    Monthly,
}

impl Cadence {
    fn default_format(self) -> &'static str {
        match self {
            Self::Hourly => "%Y-%m-%d-%H:%M",
            Self::Daily | Self::Weekly | Self::Monthly => "%Y-%m-%d",
        }
    }

    fn fixed_width(self) -> Option<TimeDelta> {
        match self {
            Self::Hourly => TimeDelta::try_hours(1),
            Self::Daily => TimeDelta::try_days(1),
            Self::Weekly => TimeDelta::try_weeks(1),
            Self::Monthly => None,
        }
    }
}

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

/// Partitions derived from consecutive time windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindowPartitionsDefinition {
    start: DateTime<Utc>,
    cadence: Cadence,
    format: String,
}

impl TimeWindowPartitionsDefinition {
    /// Windows of `cadence` length starting at `start`, keyed with the
    /// cadence's default format.
    #[must_use]
    pub fn new(start: DateTime<Utc>, cadence: Cadence) -> Self {
        Self {
            start,
            cadence,
            format: cadence.default_format().to_owned(),
        }
    }

    /// Overrides the `strftime` format used to render partition keys.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidDefinition` if `format` contains an
    /// unknown or malformed specifier.
    pub fn with_format(mut self, format: impl Into<String>) -> Result<Self, DomainError> {
        let format = format.into();
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(DomainError::InvalidDefinition(format!(
                "invalid partition key format {format:?}"
            )));
        }
        self.format = format;
        Ok(self)
    }

    /// Start of the first window.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Window length.
    #[must_use]
    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    fn window_start(&self, index: i64) -> Option<DateTime<Utc>> {
        match self.cadence.fixed_width() {
            Some(width) => self.start.checked_add_signed(width.checked_mul(i32::try_from(index).ok()?)?),
            None if index >= 0 => self
                .start
                .checked_add_months(Months::new(u32::try_from(index).ok()?)),
            None => self
                .start
                .checked_sub_months(Months::new(u32::try_from(-index).ok()?)),
        }
    }

    fn index_for_time(&self, at: DateTime<Utc>) -> i64 {
        match self.cadence.fixed_width() {
            Some(width) => {
                let elapsed = at - self.start;
                let mut seconds = elapsed.num_seconds();
                // num_seconds truncates toward zero; floor instead.
                if elapsed < TimeDelta::zero() && elapsed.subsec_nanos() != 0 {
                    seconds -= 1;
                }
                seconds.div_euclid(width.num_seconds())
            }
            None => {
                let months = i64::from(at.year() - self.start.year()) * 12
                    + i64::from(at.month())
                    - i64::from(self.start.month());
                match self.window_start(months) {
                    Some(window_start) if window_start > at => months - 1,
                    _ => months,
                }
            }
        }
    }

    fn window(&self, index: i64) -> Option<TimeWindow> {
        Some(TimeWindow {
            start: self.window_start(index)?,
            end: self.window_start(index + 1)?,
        })
    }

    fn render(&self, at: DateTime<Utc>) -> String {
        at.format(&self.format).to_string()
    }

    fn parse(&self, key: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(key, &self.format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(key, &self.format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .map(|naive| naive.and_utc())
    }

    /// Keys of every window that has fully closed by `now`, oldest first.
    #[must_use]
    pub fn partition_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut keys = Vec::new();
        let mut index = 0;
        while let Some(window) = self.window(index) {
            if window.end > now {
                break;
            }
            keys.push(self.render(window.start));
            index += 1;
        }
        keys
    }

    /// The window a key names, or `None` if the key does not parse or is not
    /// aligned to a window boundary.
    #[must_use]
    pub fn time_window_for_key(&self, key: &str) -> Option<TimeWindow> {
        let at = self.parse(key)?;
        let window = self.window(self.index_for_time(at))?;
        (self.render(window.start) == key).then_some(window)
    }

    /// Key of the window containing `at`. The key may lie outside the set of
    /// valid keys if `at` precedes the start or the window has not closed.
    #[must_use]
    pub fn key_for_time(&self, at: DateTime<Utc>) -> Option<String> {
        self.window_start(self.index_for_time(at))
            .map(|start| self.render(start))
    }
}

/// How an asset is partitioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionsDefinition {
    /// An explicit key list.
    Static(StaticPartitionsDefinition),
    /// Keys derived from time windows.
    TimeWindow(TimeWindowPartitionsDefinition),
}

impl PartitionsDefinition {
    /// All valid keys as of `now`, in definition order.
    #[must_use]
    pub fn partition_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        match self {
            Self::Static(def) => def.keys().to_vec(),
            Self::TimeWindow(def) => def.partition_keys(now),
        }
    }

    /// Returns the time-window definition, if this is one.
    #[must_use]
    pub fn as_time_window(&self) -> Option<&TimeWindowPartitionsDefinition> {
        match self {
            Self::TimeWindow(def) => Some(def),
            Self::Static(_) => None,
        }
    }

    /// Returns `true` for time-window partitioning.
    #[must_use]
    pub fn is_time_window(&self) -> bool {
        matches!(self, Self::TimeWindow(_))
    }

    /// Keys from `range.start` through `range.end`, inclusive.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRequest` if either endpoint is not a valid
    /// key as of `now`, or the endpoints are out of order.
    pub fn keys_in_range(
        &self,
        range: &PartitionKeyRange,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, DomainError> {
        let keys = self.partition_keys(now);
        let position = |key: &str| keys.iter().position(|k| k == key);
        match (position(&range.start), position(&range.end)) {
            (Some(start), Some(end)) if start <= end => Ok(keys[start..=end].to_vec()),
            _ => Err(DomainError::InvalidRequest(format!(
                "[{}...{}] is not a valid partition key range",
                range.start, range.end
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn daily() -> TimeWindowPartitionsDefinition {
        TimeWindowPartitionsDefinition::new(
            Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            Cadence::Daily,
        )
    }

    #[test]
    fn test_unknown_format_specifier_is_rejected() {
        let result = daily().with_format("%Y/%Q");
        assert!(matches!(result, Err(DomainError::InvalidDefinition(_))));
    }

    #[test]
    fn test_custom_format_renders_keys() {
        let now = Utc.with_ymd_and_hms(2024, 7, 3, 12, 0, 0).unwrap();
        let def = daily().with_format("%Y%m%d").unwrap();
        assert_eq!(def.partition_keys(now), vec!["20240701", "20240702"]);
    }

    #[test]
    fn test_static_rejects_duplicate_keys() {
        let result = StaticPartitionsDefinition::new(["a", "b", "a"]);
        assert!(matches!(result, Err(DomainError::InvalidDefinition(_))));
    }

    #[test]
    fn test_daily_keys_only_include_closed_windows() {
        let now = Utc.with_ymd_and_hms(2024, 7, 4, 12, 0, 0).unwrap();
        assert_eq!(
            daily().partition_keys(now),
            vec!["2024-07-01", "2024-07-02", "2024-07-03"]
        );
    }

    #[test]
    fn test_hourly_keys_use_hour_format() {
        let def = TimeWindowPartitionsDefinition::new(
            Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            Cadence::Hourly,
        );
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 2, 30, 0).unwrap();
        assert_eq!(
            def.partition_keys(now),
            vec!["2024-07-01-00:00", "2024-07-01-01:00"]
        );
    }

    #[test]
    fn test_monthly_windows_follow_calendar() {
        let def = TimeWindowPartitionsDefinition::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Cadence::Monthly,
        );
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(def.partition_keys(now), vec!["2024-01-01", "2024-02-01"]);

        let window = def.time_window_for_key("2024-02-01").unwrap();
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_time_window_for_unaligned_key_is_none() {
        let weekly = TimeWindowPartitionsDefinition::new(
            Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            Cadence::Weekly,
        );
        assert!(weekly.time_window_for_key("2024-07-08").is_some());
        assert!(weekly.time_window_for_key("2024-07-09").is_none());
        assert!(weekly.time_window_for_key("not-a-date").is_none());
    }

    #[test]
    fn test_key_for_time_before_start_is_outside_definition() {
        let at = Utc.with_ymd_and_hms(2024, 6, 30, 8, 0, 0).unwrap();
        assert_eq!(daily().key_for_time(at).as_deref(), Some("2024-06-30"));
    }

    #[test]
    fn test_keys_in_range() {
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 0, 0, 0).unwrap();
        let def = PartitionsDefinition::TimeWindow(daily());
        let keys = def
            .keys_in_range(&PartitionKeyRange::new("2024-07-02", "2024-07-04"), now)
            .unwrap();
        assert_eq!(keys, vec!["2024-07-02", "2024-07-03", "2024-07-04"]);

        let err = def
            .keys_in_range(&PartitionKeyRange::new("2024-06-02", "2024-07-04"), now)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(_)));
    }
}
