// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::modules::period::Granularity;
#[cfg(test)]
use crate::modules::{database::filter_by_secondary_key_impl, error::RollupResult};
#[cfg(test)]
use std::sync::Arc;

/// Name of the single marker row holding the last processed period.
pub const CURRENT_PERIOD_MARKER: &str = "current_period";

/// Persisted aggregate of one KPI for one bucket.
///
/// The primary key is `kpi_id|granularity|bucket`, so the store itself refuses
/// a second row for the same bucket.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db(primary_key(pk -> String), secondary_key(series -> String))]
pub struct AggregateValue {
    pub kpi_id: String,
    pub granularity: Granularity,
    /// Bucket label, e.g. `2024-03-15`, `2024 W11`, `2024-03` or `2024`.
    pub bucket: String,
    pub value: u64,
    /// Last write, in UNIX milliseconds.
    pub updated_at: i64,
}

pub fn series_key(kpi_id: &str, granularity: Granularity) -> String {
    format!("{}|{}|", kpi_id, granularity.code())
}

pub fn value_key(kpi_id: &str, granularity: Granularity, bucket: &str) -> String {
    format!("{}{}", series_key(kpi_id, granularity), bucket)
}

impl AggregateValue {
    fn pk(&self) -> String {
        value_key(&self.kpi_id, self.granularity, &self.bucket)
    }

    fn series(&self) -> String {
        series_key(&self.kpi_id, self.granularity)
    }
}

#[cfg(test)]
impl AggregateValue {
    pub fn new(kpi_id: &str, granularity: Granularity, bucket: String, value: u64) -> Self {
        Self {
            kpi_id: kpi_id.to_string(),
            granularity,
            bucket,
            value,
            updated_at: crate::utc_now!(),
        }
    }

    /// Every stored bucket of one KPI at one granularity.
    pub async fn list_series(
        database: &Arc<Database<'static>>,
        kpi_id: &str,
        granularity: Granularity,
    ) -> RollupResult<Vec<AggregateValue>> {
        let mut values: Vec<AggregateValue> = filter_by_secondary_key_impl(
            database,
            AggregateValueKey::series,
            series_key(kpi_id, granularity),
        )
        .await?;
        values.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(values)
    }
}

/// Bookkeeping row written in the same transaction as the aggregates it describes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[native_model(id = 2, version = 1)]
#[native_db]
pub struct ProcessorMarker {
    #[primary_key]
    pub name: String,
    /// Period start, in UNIX seconds.
    pub period: i64,
    pub updated_at: i64,
}
