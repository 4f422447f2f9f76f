//! When jobs run.
//!
//! All times are UTC.
//!
//! | Text | Schedule |
//! |---|---|
//! | `30m`, `2h`, `1d`, `1w` | every N minutes / hours / days / weeks |
//! | `daily@14:30` | every day at 14:30 |

use crate::error::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit of an interval schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
    /// Weeks.
    Weeks,
}

impl IntervalUnit {
    fn duration(self, value: u32) -> Duration {
        let value = i64::from(value);
        match self {
            IntervalUnit::Minutes => Duration::minutes(value),
            IntervalUnit::Hours => Duration::hours(value),
            IntervalUnit::Days => Duration::days(value),
            IntervalUnit::Weeks => Duration::weeks(value),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Hours => "hours",
            IntervalUnit::Days => "days",
            IntervalUnit::Weeks => "weeks",
        }
    }
}

/// A recurring schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Every `value` units after the previous run.
    Interval {
        /// Count of units, at least 1.
        value: u32,
        /// Unit.
        unit: IntervalUnit,
    },
    /// Once a day at a fixed time.
    DailyAt {
        /// Hour, 0 to 23.
        hour: u32,
        /// Minute, 0 to 59.
        minute: u32,
    },
}

impl Schedule {
    /// Every `value` units.
    pub fn every(value: u32, unit: IntervalUnit) -> Self {
        Schedule::Interval { value, unit }
    }

    /// Daily at `hour:minute`.
    pub fn daily_at(hour: u32, minute: u32) -> Self {
        Schedule::DailyAt { hour, minute }
    }

    /// Checks value ranges.
    pub fn validate(&self) -> SchedulerResult<()> {
        match *self {
            Schedule::Interval { value: 0, .. } => Err(SchedulerError::InvalidSchedule(
                "interval must be at least 1".into(),
            )),
            Schedule::DailyAt { hour, minute } if hour > 23 || minute > 59 => Err(
                SchedulerError::InvalidSchedule(format!("{hour:02}:{minute:02} is not a time of day")),
            ),
            _ => Ok(()),
        }
    }

    /// The first run strictly after `after`.
    ///
    /// Interval schedules count from `after`; daily schedules pick today's
    /// slot if it is still ahead, otherwise tomorrow's.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Interval { value, unit } => after + unit.duration(value.max(1)),
            Schedule::DailyAt { hour, minute } => {
                let time = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0)
                    .unwrap_or_default();
                let today = Utc.from_utc_datetime(&after.date_naive().and_time(time));
                if today > after {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
        }
    }

    /// Returns true if a job last planned for `next_run` should run at `now`.
    ///
    /// A job that was never planned is due immediately.
    pub fn is_due(next_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        next_run.map_or(true, |next| next <= now)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Interval { value, unit } => write!(f, "Every {value} {}", unit.as_str()),
            Schedule::DailyAt { hour, minute } => write!(f, "Daily at {hour:02}:{minute:02}"),
        }
    }
}

impl FromStr for Schedule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || SchedulerError::InvalidSchedule(format!("cannot parse {s:?}"));

        let schedule = if let Some(time) = s.strip_prefix("daily@") {
            let (hour, minute) = time.split_once(':').ok_or_else(invalid)?;
            Schedule::DailyAt {
                hour: hour.parse().map_err(|_| invalid())?,
                minute: minute.parse().map_err(|_| invalid())?,
            }
        } else {
            let (split, _) = s.char_indices().last().ok_or_else(invalid)?;
            let (value, unit) = s.split_at(split);
            let unit = match unit {
                "m" => IntervalUnit::Minutes,
                "h" => IntervalUnit::Hours,
                "d" => IntervalUnit::Days,
                "w" => IntervalUnit::Weeks,
                _ => return Err(invalid()),
            };
            Schedule::Interval {
                value: value.parse().map_err(|_| invalid())?,
                unit,
            }
        };
        schedule.validate()?;
        Ok(schedule)
    }
}
