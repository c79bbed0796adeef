// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use chrono::{
    DateTime, Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{
    modules::error::{code::ErrorCode, RollupError, RollupResult},
    raise_error,
};

/// Aggregation bucket size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Daily,
        Granularity::Weekly,
        Granularity::Monthly,
        Granularity::Yearly,
    ];

    pub fn code(&self) -> char {
        match self {
            Granularity::Daily => 'D',
            Granularity::Weekly => 'W',
            Granularity::Monthly => 'M',
            Granularity::Yearly => 'Y',
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Granularity {
    type Err = RollupError;

    fn from_str(s: &str) -> RollupResult<Self> {
        match s {
            "D" => Ok(Granularity::Daily),
            "W" => Ok(Granularity::Weekly),
            "M" => Ok(Granularity::Monthly),
            "Y" => Ok(Granularity::Yearly),
            other => Err(raise_error!(
                format!("Unsupported granularity '{}', expected one of D, W, M, Y", other),
                ErrorCode::InvalidGranularity
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftUnit {
    Hours,
    Days,
    Weeks,
    Months,
}

/// A clock tick, in UTC, at hour resolution.
///
/// Two periods compare equal when they fall in the same hour, so repeated
/// ticks inside one hour are recognised as "no change". Every bucket label
/// and window derived from a period is UTC as well: a daily bucket runs from
/// 00:00 UTC to the next 00:00 UTC, whatever the host time zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    at: NaiveDateTime,
}

impl Period {
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        let hour = NaiveTime::from_hms_opt(at.hour(), 0, 0).unwrap_or(NaiveTime::MIN);
        Self {
            at: at.date().and_time(hour),
        }
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now().naive_utc())
    }

    pub fn from_timestamp(secs: i64) -> RollupResult<Self> {
        DateTime::from_timestamp(secs, 0)
            .map(|dt| Self::from_datetime(dt.naive_utc()))
            .ok_or_else(|| {
                raise_error!(
                    format!("Timestamp {} is out of range", secs),
                    ErrorCode::InvalidParameter
                )
            })
    }

    pub fn timestamp(&self) -> i64 {
        self.at.and_utc().timestamp()
    }

    pub fn date(&self) -> NaiveDate {
        self.at.date()
    }

    pub fn year(&self) -> i32 {
        self.at.year()
    }

    pub fn month(&self) -> u32 {
        self.at.month()
    }

    /// ISO weekday: Monday = 1 ... Sunday = 7.
    pub fn weekday(&self) -> u32 {
        self.at.weekday().number_from_monday()
    }

    /// Label of the bucket containing this period.
    ///
    /// Weekly labels use ISO weeks (`2024 W11`), which start on Monday like
    /// the weekly windows do. The ISO week-year may differ from the calendar
    /// year around January 1st.
    pub fn truncate(&self, granularity: Granularity) -> String {
        let pattern = match granularity {
            Granularity::Daily => "%Y-%m-%d",
            Granularity::Weekly => "%G W%V",
            Granularity::Monthly => "%Y-%m",
            Granularity::Yearly => "%Y",
        };
        self.at.format(pattern).to_string()
    }

    /// Calendar shift. Month shifts keep the day of month, clamped to the
    /// last day of the target month.
    pub fn shift(&self, amount: i32, unit: ShiftUnit) -> Period {
        let shifted = match unit {
            ShiftUnit::Hours => self
                .at
                .checked_add_signed(TimeDelta::hours(i64::from(amount))),
            ShiftUnit::Days => self
                .at
                .checked_add_signed(TimeDelta::days(i64::from(amount))),
            ShiftUnit::Weeks => self
                .at
                .checked_add_signed(TimeDelta::weeks(i64::from(amount))),
            ShiftUnit::Months if amount >= 0 => {
                self.at.checked_add_months(Months::new(amount.unsigned_abs()))
            }
            ShiftUnit::Months => self.at.checked_sub_months(Months::new(amount.unsigned_abs())),
        };
        // Only reachable at the edges of chrono's representable range.
        let at = shifted.unwrap_or(if amount < 0 {
            NaiveDateTime::MIN
        } else {
            NaiveDateTime::MAX
        });
        Period::from_datetime(at)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.at.format("%Y-%m-%dT%H:00"))
    }
}

#[cfg(test)]
pub(crate) fn period(y: i32, m: u32, d: u32, h: u32) -> Period {
    let at = NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(h, 0, 0))
        .unwrap();
    Period::from_datetime(at)
}
