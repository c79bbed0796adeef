// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::modules::period::{Granularity, Period};

/// Half-open `[start, stop)` interval in UNIX seconds (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: i64,
    pub stop: i64,
}

impl Window {
    fn between(start: NaiveDateTime, stop: NaiveDateTime) -> Self {
        Self {
            start: start.and_utc().timestamp(),
            stop: stop.and_utc().timestamp(),
        }
    }

    #[cfg(test)]
    pub fn contains(&self, ts: i64) -> bool {
        self.start <= ts && ts < self.stop
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn first_of_month(year: i32, month: u32) -> NaiveDateTime {
    // Day 1 exists in every month; the fallback only covers years outside chrono's range.
    midnight(NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN))
}

/// Window aggregated for the bucket of `reference` at `granularity`.
///
/// Weeks run Monday 00:00 to the following Monday 00:00, matching the ISO
/// week labels produced by [`Period::truncate`].
pub fn resolve(granularity: Granularity, reference: &Period) -> Window {
    let day = midnight(reference.date());
    match granularity {
        Granularity::Daily => Window::between(day, day + TimeDelta::days(1)),
        Granularity::Weekly => {
            let start = day + TimeDelta::days(1 - i64::from(reference.weekday()));
            Window::between(start, start + TimeDelta::days(7))
        }
        Granularity::Monthly => {
            let start = first_of_month(reference.year(), reference.month());
            let stop = if reference.month() == 12 {
                first_of_month(reference.year() + 1, 1)
            } else {
                first_of_month(reference.year(), reference.month() + 1)
            };
            Window::between(start, stop)
        }
        Granularity::Yearly => {
            let year = reference.year();
            Window::between(first_of_month(year, 1), first_of_month(year + 1, 1))
        }
    }
}
