// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashSet;

use crate::modules::period::{Granularity, Period, ShiftUnit};

pub const DAILY_HORIZON: i32 = 7;
pub const WEEKLY_HORIZON: i32 = 4;
pub const MONTHLY_HORIZON: i32 = 12;

/// Bucket labels that survive pruning for one granularity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Retention {
    KeepAll,
    Keep(AHashSet<String>),
}

impl Retention {
    pub fn retains(&self, label: &str) -> bool {
        match self {
            Retention::KeepAll => true,
            Retention::Keep(labels) => labels.contains(label),
        }
    }
}

fn sliding(reference: &Period, granularity: Granularity, unit: ShiftUnit, horizon: i32) -> Retention {
    Retention::Keep(
        (0..horizon)
            .map(|delta| reference.shift(-delta, unit).truncate(granularity))
            .collect(),
    )
}

/// The reference bucket and its predecessors inside the horizon; yearly buckets are never pruned.
pub fn labels_to_keep(granularity: Granularity, reference: &Period) -> Retention {
    match granularity {
        Granularity::Daily => sliding(reference, granularity, ShiftUnit::Days, DAILY_HORIZON),
        Granularity::Weekly => sliding(reference, granularity, ShiftUnit::Weeks, WEEKLY_HORIZON),
        Granularity::Monthly => sliding(reference, granularity, ShiftUnit::Months, MONTHLY_HORIZON),
        Granularity::Yearly => Retention::KeepAll,
    }
}
