// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::cell::{Cell, RefCell};

use crate::{
    modules::{
        error::{code::ErrorCode, RollupResult},
        ingest::{VisitEvent, VisitKind},
        kpi::{
            store::{EventSource, ValueStore},
            value::AggregateValue,
        },
        period::{Granularity, Period},
    },
    raise_error,
};

/// Test double for [`ValueStore`].
///
/// Rows live in a plain vector so a test can seed duplicate buckets, which the
/// real store refuses. Every mutating call is counted.
#[derive(Default)]
pub struct MemoryStore {
    values: RefCell<Vec<AggregateValue>>,
    events: RefCell<Vec<VisitEvent>>,
    marker: RefCell<Option<Period>>,
    writes: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_visit(&self, ts: i64, kind: VisitKind, content: &str) {
        let mut events = self.events.borrow_mut();
        let id = events.len() as u64 + 1;
        events.push(VisitEvent {
            id,
            ts,
            kind,
            content: content.to_string(),
            item: (kind == VisitKind::ContentItem).then(|| format!("/item/{}", id)),
        });
    }

    /// Inserts a row without the key check.
    pub fn seed(&self, value: AggregateValue) {
        self.values.borrow_mut().push(value);
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }

    pub fn labels(&self, kpi_id: &str, granularity: Granularity) -> Vec<String> {
        let mut labels: Vec<String> = self
            .values
            .borrow()
            .iter()
            .filter(|v| v.kpi_id == kpi_id && v.granularity == granularity)
            .map(|v| v.bucket.clone())
            .collect();
        labels.sort();
        labels
    }

    pub fn value_of(&self, kpi_id: &str, granularity: Granularity, bucket: &str) -> Option<u64> {
        self.values
            .borrow()
            .iter()
            .find(|v| v.kpi_id == kpi_id && v.granularity == granularity && v.bucket == bucket)
            .map(|v| v.value)
    }

    /// `(kpi, granularity, bucket, value)` of every row, sorted, without write timestamps.
    pub fn snapshot(&self) -> Vec<(String, Granularity, String, u64)> {
        let mut rows: Vec<_> = self
            .values
            .borrow()
            .iter()
            .map(|v| (v.kpi_id.clone(), v.granularity, v.bucket.clone(), v.value))
            .collect();
        rows.sort();
        rows
    }

    fn position(&self, kpi_id: &str, granularity: Granularity, bucket: &str) -> Option<usize> {
        self.values
            .borrow()
            .iter()
            .position(|v| v.kpi_id == kpi_id && v.granularity == granularity && v.bucket == bucket)
    }

    fn count_write(&self) {
        self.writes.set(self.writes.get() + 1);
    }
}

impl EventSource for MemoryStore {
    fn events_between(&self, start: i64, stop: i64) -> RollupResult<Vec<VisitEvent>> {
        Ok(self
            .events
            .borrow()
            .iter()
            .filter(|e| start <= e.ts && e.ts < stop)
            .cloned()
            .collect())
    }
}

impl ValueStore for MemoryStore {
    fn get_values(
        &self,
        kpi_id: &str,
        granularity: Granularity,
    ) -> RollupResult<Vec<AggregateValue>> {
        Ok(self
            .values
            .borrow()
            .iter()
            .filter(|v| v.kpi_id == kpi_id && v.granularity == granularity)
            .cloned()
            .collect())
    }

    fn add_value(&self, value: AggregateValue) -> RollupResult<()> {
        if self
            .position(&value.kpi_id, value.granularity, &value.bucket)
            .is_some()
        {
            return Err(raise_error!(
                format!("duplicate bucket {}", value.bucket),
                ErrorCode::AlreadyExists
            ));
        }
        self.count_write();
        self.values.borrow_mut().push(value);
        Ok(())
    }

    fn update_value(&self, value: AggregateValue) -> RollupResult<()> {
        let index = self
            .position(&value.kpi_id, value.granularity, &value.bucket)
            .ok_or_else(|| {
                raise_error!(
                    format!("missing bucket {}", value.bucket),
                    ErrorCode::ResourceNotFound
                )
            })?;
        self.count_write();
        self.values.borrow_mut()[index] = value;
        Ok(())
    }

    fn delete_value(
        &self,
        kpi_id: &str,
        granularity: Granularity,
        bucket: &str,
    ) -> RollupResult<()> {
        let index = self
            .position(kpi_id, granularity, bucket)
            .ok_or_else(|| {
                raise_error!(
                    format!("missing bucket {}", bucket),
                    ErrorCode::ResourceNotFound
                )
            })?;
        self.count_write();
        self.values.borrow_mut().remove(index);
        Ok(())
    }

    fn get_last_current_period(&self) -> RollupResult<Option<Period>> {
        Ok(*self.marker.borrow())
    }

    fn set_last_current_period(&self, period: &Period) -> RollupResult<()> {
        self.count_write();
        *self.marker.borrow_mut() = Some(*period);
        Ok(())
    }
}
