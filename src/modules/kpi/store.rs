// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use itertools::Itertools;
use native_db::transaction::RwTransaction;

use crate::{
    modules::{
        error::{code::ErrorCode, RollupResult},
        ingest::{VisitEvent, VisitEventKey},
        kpi::value::{
            series_key, value_key, AggregateValue, AggregateValueKey, ProcessorMarker,
            CURRENT_PERIOD_MARKER,
        },
        period::{Granularity, Period},
    },
    raise_error, utc_now,
};

/// Read access to the raw events KPIs are computed from.
pub trait EventSource {
    /// Events with `start <= ts < stop`.
    fn events_between(&self, start: i64, stop: i64) -> RollupResult<Vec<VisitEvent>>;
}

/// Everything the processor reads and writes while handling a tick.
///
/// Values are keyed by `(kpi_id, granularity, bucket)`. `add_value` fails with
/// `AlreadyExists` when the key is taken; `update_value` and `delete_value`
/// fail with `ResourceNotFound` when it is absent.
pub trait ValueStore: EventSource {
    fn get_values(&self, kpi_id: &str, granularity: Granularity)
        -> RollupResult<Vec<AggregateValue>>;

    fn add_value(&self, value: AggregateValue) -> RollupResult<()>;

    fn update_value(&self, value: AggregateValue) -> RollupResult<()>;

    fn delete_value(&self, kpi_id: &str, granularity: Granularity, bucket: &str)
        -> RollupResult<()>;

    fn get_last_current_period(&self) -> RollupResult<Option<Period>>;

    fn set_last_current_period(&self, period: &Period) -> RollupResult<()>;
}

/// [`ValueStore`] over one `native_db` read-write transaction.
///
/// Nothing is visible to other readers until the owner commits the transaction.
pub struct TransactionStore<'a, 'db> {
    rw: &'a RwTransaction<'db>,
}

impl<'a, 'db> TransactionStore<'a, 'db> {
    pub fn new(rw: &'a RwTransaction<'db>) -> Self {
        Self { rw }
    }

    fn find(
        &self,
        kpi_id: &str,
        granularity: Granularity,
        bucket: &str,
    ) -> RollupResult<Option<AggregateValue>> {
        self.rw
            .get()
            .primary::<AggregateValue>(value_key(kpi_id, granularity, bucket))
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))
    }

    fn not_found(kpi_id: &str, granularity: Granularity, bucket: &str) -> RollupResult<()> {
        Err(raise_error!(
            format!(
                "No value stored for kpi '{}' at {} bucket '{}'",
                kpi_id, granularity, bucket
            ),
            ErrorCode::ResourceNotFound
        ))
    }
}

impl EventSource for TransactionStore<'_, '_> {
    fn events_between(&self, start: i64, stop: i64) -> RollupResult<Vec<VisitEvent>> {
        if start >= stop {
            return Ok(Vec::new());
        }
        self.rw
            .scan()
            .secondary::<VisitEvent>(VisitEventKey::ts)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?
            .range(start..stop)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))
    }
}

impl ValueStore for TransactionStore<'_, '_> {
    fn get_values(
        &self,
        kpi_id: &str,
        granularity: Granularity,
    ) -> RollupResult<Vec<AggregateValue>> {
        self.rw
            .scan()
            .secondary::<AggregateValue>(AggregateValueKey::series)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?
            .start_with(series_key(kpi_id, granularity))
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))
    }

    fn add_value(&self, value: AggregateValue) -> RollupResult<()> {
        if self
            .find(&value.kpi_id, value.granularity, &value.bucket)?
            .is_some()
        {
            return Err(raise_error!(
                format!(
                    "A value already exists for kpi '{}' at {} bucket '{}'",
                    value.kpi_id, value.granularity, value.bucket
                ),
                ErrorCode::AlreadyExists
            ));
        }
        self.rw
            .insert(value)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))
    }

    fn update_value(&self, value: AggregateValue) -> RollupResult<()> {
        let Some(current) = self.find(&value.kpi_id, value.granularity, &value.bucket)? else {
            return Self::not_found(&value.kpi_id, value.granularity, &value.bucket);
        };
        self.rw
            .update(current, value)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))
    }

    fn delete_value(
        &self,
        kpi_id: &str,
        granularity: Granularity,
        bucket: &str,
    ) -> RollupResult<()> {
        let Some(current) = self.find(kpi_id, granularity, bucket)? else {
            return Self::not_found(kpi_id, granularity, bucket);
        };
        self.rw
            .remove(current)
            .map(|_| ())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))
    }

    fn get_last_current_period(&self) -> RollupResult<Option<Period>> {
        let marker: Option<ProcessorMarker> = self
            .rw
            .get()
            .primary(CURRENT_PERIOD_MARKER.to_string())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        marker
            .map(|marker| Period::from_timestamp(marker.period))
            .transpose()
    }

    fn set_last_current_period(&self, period: &Period) -> RollupResult<()> {
        self.rw
            .upsert(ProcessorMarker {
                name: CURRENT_PERIOD_MARKER.to_string(),
                period: period.timestamp(),
                updated_at: utc_now!(),
            })
            .map(|_| ())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))
    }
}
