// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use tracing::{debug, warn};

use crate::{
    modules::{
        error::RollupResult,
        kpi::{
            retention::labels_to_keep,
            store::ValueStore,
            value::AggregateValue,
            window, Kpi,
        },
        period::{Granularity, Period, ShiftUnit},
    },
    utc_now,
};

/// Granularities recomputed on every tick that advances the period.
pub const TICK_GRANULARITIES: [Granularity; 3] =
    [Granularity::Daily, Granularity::Weekly, Granularity::Monthly];

/// Position of the processor in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    /// Period of the most recent tick.
    pub current_period: Period,
    /// Day label of the last tick that ran the yearly recompute.
    pub current_day: String,
}

impl Cursor {
    pub fn new(now: Period) -> Self {
        Self {
            current_period: now,
            current_day: now.truncate(Granularity::Daily),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    NoUpdate,
    /// Aggregates were written; the cursor to install once the writes are committed.
    Updated(Cursor),
}

/// What one recompute did to a series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecomputeReport {
    pub pruned: usize,
    pub created: bool,
    pub value: u64,
}

/// Turns raw events into rolling per-bucket aggregates for a fixed set of KPIs.
///
/// Stateless between calls: the cursor is passed in and a new one handed back,
/// so a failed tick leaves the caller's cursor untouched.
pub struct Processor {
    kpis: Vec<Box<dyn Kpi>>,
}

impl Processor {
    pub fn new(kpis: Vec<Box<dyn Kpi>>) -> Self {
        Self { kpis }
    }

    pub fn kpi_ids(&self) -> Vec<&str> {
        self.kpis.iter().map(|kpi| kpi.unique_id()).collect()
    }

    /// Handles a clock tick at `now`.
    ///
    /// When the period advanced, the buckets of the period that just closed are
    /// recomputed at D/W/M, and at Y as well when the day changed. A clock that
    /// went backwards is ignored; the cursor only ever moves forward.
    pub fn process_tick<S: ValueStore>(
        &self,
        cursor: &Cursor,
        now: Period,
        store: &S,
    ) -> RollupResult<TickOutcome> {
        if now == cursor.current_period {
            return Ok(TickOutcome::NoUpdate);
        }
        if now < cursor.current_period {
            warn!(
                "Clock went back from {} to {}, waiting for it to catch up",
                cursor.current_period, now
            );
            return Ok(TickOutcome::NoUpdate);
        }

        let period_to_compute = cursor.current_period;
        self.settle_closed_buckets(store, &period_to_compute)?;
        self.recompute_all(store, &period_to_compute, &TICK_GRANULARITIES)?;

        let now_day = now.truncate(Granularity::Daily);
        if now_day != cursor.current_day {
            debug!(
                "Day changed from {} to {}, recomputing yearly aggregates",
                cursor.current_day, now_day
            );
            self.recompute_all(store, &period_to_compute, &[Granularity::Yearly])?;
        }

        store.set_last_current_period(&now)?;
        Ok(TickOutcome::Updated(Cursor {
            current_period: now,
            current_day: now_day,
        }))
    }

    /// Catches up the stored aggregates after a restart.
    ///
    /// Replays, against the last persisted period, the work a tick would have
    /// done for it. The cursor is left alone; the next live tick advances it.
    pub fn restore_from_db<S: ValueStore>(&self, cursor: &Cursor, store: &S) -> RollupResult<()> {
        let Some(last_period) = store.get_last_current_period()? else {
            debug!("No persisted period, nothing to restore");
            return Ok(());
        };

        if last_period != cursor.current_period {
            debug!("Replaying D/W/M aggregates for {}", last_period);
            self.settle_closed_buckets(store, &last_period)?;
            self.recompute_all(store, &last_period, &TICK_GRANULARITIES)?;
        }

        if last_period.truncate(Granularity::Daily) != cursor.current_day {
            debug!("Replaying yearly aggregates for {}", last_period);
            self.recompute_all(store, &last_period, &[Granularity::Yearly])?;
        }
        Ok(())
    }

    /// Recomputes, once more, every bucket that closed right before `reference`.
    ///
    /// Events for the last minutes of a bucket may be stored after the tick
    /// that first closed it, so each bucket gets a second pass one period later.
    fn settle_closed_buckets<S: ValueStore>(&self, store: &S, reference: &Period) -> RollupResult<()> {
        let previous = reference.shift(-1, ShiftUnit::Hours);
        for granularity in Granularity::ALL {
            if previous.truncate(granularity) == reference.truncate(granularity) {
                continue;
            }
            debug!(
                "Settling {} bucket {} closed before {}",
                granularity,
                previous.truncate(granularity),
                reference
            );
            for kpi in &self.kpis {
                self.recompute_and_prune(store, &previous, kpi.as_ref(), granularity)?;
            }
        }
        Ok(())
    }

    fn recompute_all<S: ValueStore>(
        &self,
        store: &S,
        reference: &Period,
        granularities: &[Granularity],
    ) -> RollupResult<()> {
        for kpi in &self.kpis {
            for granularity in granularities {
                self.recompute_and_prune(store, reference, kpi.as_ref(), *granularity)?;
            }
        }
        Ok(())
    }

    /// Brings the series of `kpi` at `granularity` in line with `reference`.
    ///
    /// Prune pass: buckets outside the retention horizon are deleted, and so
    /// are all but one of any rows sharing the reference bucket. Upsert pass:
    /// the reference bucket is recomputed over its window and updated, or
    /// created when absent. Afterwards exactly one row holds the reference
    /// bucket.
    pub fn recompute_and_prune<S: ValueStore>(
        &self,
        store: &S,
        reference: &Period,
        kpi: &dyn Kpi,
        granularity: Granularity,
    ) -> RollupResult<RecomputeReport> {
        let kpi_id = kpi.unique_id();
        let current_bucket = reference.truncate(granularity);
        let retention = labels_to_keep(granularity, reference);

        let mut report = RecomputeReport::default();
        let mut current_rows = 0usize;
        for existing in store.get_values(kpi_id, granularity)? {
            if !retention.retains(&existing.bucket) {
                debug!(
                    "Pruning {} {} bucket {}",
                    kpi_id, granularity, existing.bucket
                );
                store.delete_value(kpi_id, granularity, &existing.bucket)?;
                report.pruned += 1;
            } else if existing.bucket == current_bucket {
                current_rows += 1;
                if current_rows > 1 {
                    debug!(
                        "Removing duplicate {} {} bucket {}",
                        kpi_id, granularity, existing.bucket
                    );
                    store.delete_value(kpi_id, granularity, &existing.bucket)?;
                    report.pruned += 1;
                }
            }
        }

        let window = window::resolve(granularity, reference);
        report.value = kpi.compute(granularity, window, store)?;
        let value = AggregateValue {
            kpi_id: kpi_id.to_string(),
            granularity,
            bucket: current_bucket,
            value: report.value,
            updated_at: utc_now!(),
        };
        if current_rows == 0 {
            store.add_value(value)?;
            report.created = true;
        } else {
            store.update_value(value)?;
        }
        Ok(report)
    }
}
