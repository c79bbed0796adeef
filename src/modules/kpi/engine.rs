// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::Database;
use std::{
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::{
    modules::{
        context::{Initialize, RollupTask},
        database::{manager::DB_MANAGER, with_rw_transaction_impl},
        error::{code::ErrorCode, RollupResult},
        ingest::task::LogIngestor,
        kpi::{
            catalog::build_kpis,
            processor::{Cursor, Processor, TickOutcome},
            store::TransactionStore,
        },
        period::Period,
        scheduler::periodic::PeriodicTask,
        settings::cli::SETTINGS,
    },
    raise_error,
};

static KPI_ENGINE: OnceLock<KpiEngine> = OnceLock::new();

/// Drives the processor against the kpi database and owns the live cursor.
pub struct KpiEngine {
    processor: Arc<Processor>,
    cursor: Mutex<Cursor>,
}

impl KpiEngine {
    pub fn new(processor: Processor, now: Period) -> Self {
        Self {
            processor: Arc::new(processor),
            cursor: Mutex::new(Cursor::new(now)),
        }
    }

    pub fn get() -> RollupResult<&'static KpiEngine> {
        KPI_ENGINE.get().ok_or_else(|| {
            raise_error!(
                "Kpi engine is not initialized".into(),
                ErrorCode::InternalError
            )
        })
    }

    pub fn cursor(&self) -> RollupResult<Cursor> {
        self.cursor
            .lock()
            .map(|cursor| cursor.clone())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))
    }

    fn install(&self, next: Cursor) -> RollupResult<()> {
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        *cursor = next;
        Ok(())
    }

    pub async fn restore(&self, database: &Arc<Database<'static>>) -> RollupResult<()> {
        let cursor = self.cursor()?;
        let processor = self.processor.clone();
        with_rw_transaction_impl(database, move |rw| {
            processor.restore_from_db(&cursor, &TransactionStore::new(rw))
        })
        .await
    }

    /// Runs one tick in its own transaction and installs the new cursor once it is committed.
    pub async fn tick(
        &self,
        database: &Arc<Database<'static>>,
        now: Period,
    ) -> RollupResult<TickOutcome> {
        let cursor = self.cursor()?;
        if now == cursor.current_period {
            debug!("Still in period {}, no kpi update", now);
            return Ok(TickOutcome::NoUpdate);
        }

        let processor = self.processor.clone();
        let outcome = with_rw_transaction_impl(database, move |rw| {
            processor.process_tick(&cursor, now, &TransactionStore::new(rw))
        })
        .await?;

        if let TickOutcome::Updated(next) = &outcome {
            info!(
                "Kpi aggregates updated, period advanced to {} ({} kpis)",
                next.current_period,
                self.processor.kpi_ids().len()
            );
            self.install(next.clone())?;
        }
        Ok(outcome)
    }

    /// Stores pending access-log events, then ticks, so a bucket is never closed
    /// ahead of events the log already holds for it.
    pub async fn ingest_and_tick(
        &self,
        ingestor: Option<&LogIngestor>,
        database: &Arc<Database<'static>>,
        now: Period,
    ) -> RollupResult<TickOutcome> {
        if let Some(ingestor) = ingestor {
            if let Err(error) = ingestor.drain(database).await {
                warn!("Access log ingestion failed, ticking without it: {:#?}", error);
            }
        }
        self.tick(database, now).await
    }
}

impl Initialize for KpiEngine {
    async fn initialize() -> RollupResult<()> {
        let ids = SETTINGS.kpi_ids();
        let processor = Processor::new(build_kpis(&ids)?);
        info!("Tracking kpis: {}", processor.kpi_ids().join(", "));

        let engine = KpiEngine::new(processor, Period::now());
        engine.restore(DB_MANAGER.kpi_db()).await?;
        KPI_ENGINE.set(engine).map_err(|_| {
            raise_error!(
                "Kpi engine is already initialized".into(),
                ErrorCode::InternalError
            )
        })
    }
}

pub struct KpiTickTask;

impl RollupTask for KpiTickTask {
    fn start() {
        let periodic_task = PeriodicTask::new("kpi-rollup-tick");
        periodic_task.start(
            run_tick,
            Duration::from_secs(SETTINGS.rollup_tick_interval_secs),
            false,
            true,
        );
    }
}

async fn run_tick() -> RollupResult<()> {
    KpiEngine::get()?
        .ingest_and_tick(LogIngestor::get(), DB_MANAGER.kpi_db(), Period::now())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{
        database::{in_memory_database, list_all_impl},
        ingest::{config::sample_config, converter::LogConverter, VisitEvent, VisitKind},
        kpi::{
            catalog::{build_kpi, TOTAL_VISITS},
            store::EventSource,
            value::{AggregateValue, ProcessorMarker},
            window::Window,
            Kpi,
        },
        period::{period, Granularity},
    };

    struct FailingKpi;

    impl Kpi for FailingKpi {
        fn unique_id(&self) -> &str {
            "failing"
        }

        fn compute(
            &self,
            granularity: Granularity,
            _window: Window,
            _events: &dyn EventSource,
        ) -> RollupResult<u64> {
            match granularity {
                Granularity::Monthly => Err(raise_error!(
                    "query failed".into(),
                    ErrorCode::StorageError
                )),
                _ => Ok(1),
            }
        }
    }

    async fn seed_visit(database: &Arc<Database<'static>>, ts: i64) {
        crate::modules::database::batch_insert_impl(
            database,
            vec![VisitEvent {
                id: ts as u64,
                ts,
                kind: VisitKind::ContentHome,
                content: "Wikipedia".into(),
                item: None,
            }],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_tick_commits_aggregates_and_advances_cursor() {
        let db = in_memory_database();
        seed_visit(&db, period(2024, 3, 15, 14).timestamp() + 5).await;
        let engine = KpiEngine::new(
            Processor::new(vec![build_kpi(TOTAL_VISITS).unwrap()]),
            period(2024, 3, 15, 14),
        );

        let outcome = engine.tick(&db, period(2024, 3, 15, 14)).await.unwrap();
        assert_eq!(outcome, TickOutcome::NoUpdate);

        engine.tick(&db, period(2024, 3, 15, 15)).await.unwrap();
        assert_eq!(engine.cursor().unwrap().current_period, period(2024, 3, 15, 15));

        let daily = AggregateValue::list_series(&db, TOTAL_VISITS, Granularity::Daily)
            .await
            .unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].value, 1);
        let markers: Vec<ProcessorMarker> = list_all_impl(&db).await.unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].period, period(2024, 3, 15, 15).timestamp());
    }

    #[tokio::test]
    async fn test_failed_tick_leaves_store_and_cursor_untouched() {
        let db = in_memory_database();
        let kpis: Vec<Box<dyn Kpi>> = vec![build_kpi(TOTAL_VISITS).unwrap(), Box::new(FailingKpi)];
        let engine = KpiEngine::new(Processor::new(kpis), period(2024, 3, 15, 14));

        let err = engine.tick(&db, period(2024, 3, 15, 15)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageError);
        assert_eq!(engine.cursor().unwrap().current_period, period(2024, 3, 15, 14));

        let values: Vec<AggregateValue> = list_all_impl(&db).await.unwrap();
        assert!(values.is_empty());
        let markers: Vec<ProcessorMarker> = list_all_impl(&db).await.unwrap();
        assert!(markers.is_empty());
    }

    #[tokio::test]
    async fn test_log_is_drained_before_the_day_closes() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"msg":"handled request","ts":{},"request":{{"host":"nomad.renaud.test","uri":"/"}}}}"#,
            period(2024, 3, 15, 23).timestamp() + 3550
        )
        .unwrap();
        file.flush().unwrap();
        let ingestor = LogIngestor::new(file.path(), LogConverter::new(sample_config()));
        let db = in_memory_database();
        let engine = KpiEngine::new(
            Processor::new(vec![build_kpi(TOTAL_VISITS).unwrap()]),
            period(2024, 3, 15, 23),
        );

        engine
            .ingest_and_tick(Some(&ingestor), &db, period(2024, 3, 16, 0))
            .await
            .unwrap();

        let daily = AggregateValue::list_series(&db, TOTAL_VISITS, Granularity::Daily)
            .await
            .unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].bucket, "2024-03-15");
        assert_eq!(daily[0].value, 1);
    }

    #[tokio::test]
    async fn test_ingestion_failure_does_not_block_the_tick() {
        let ingestor = LogIngestor::new("/nonexistent/access.log", LogConverter::new(sample_config()));
        let db = in_memory_database();
        let engine = KpiEngine::new(
            Processor::new(vec![build_kpi(TOTAL_VISITS).unwrap()]),
            period(2024, 3, 15, 14),
        );

        let outcome = engine
            .ingest_and_tick(Some(&ingestor), &db, period(2024, 3, 15, 15))
            .await
            .unwrap();
        assert!(matches!(outcome, TickOutcome::Updated(_)));
    }

    #[tokio::test]
    async fn test_restart_replays_from_persisted_marker() {
        let db = in_memory_database();
        let before = KpiEngine::new(
            Processor::new(vec![build_kpi(TOTAL_VISITS).unwrap()]),
            period(2024, 3, 15, 22),
        );
        before.tick(&db, period(2024, 3, 15, 23)).await.unwrap();

        // Visit logged after the last tick, then the process restarts the next day.
        seed_visit(&db, period(2024, 3, 15, 23).timestamp() + 30).await;
        let after = KpiEngine::new(
            Processor::new(vec![build_kpi(TOTAL_VISITS).unwrap()]),
            period(2024, 3, 16, 3),
        );
        after.restore(&db).await.unwrap();

        let daily = AggregateValue::list_series(&db, TOTAL_VISITS, Granularity::Daily)
            .await
            .unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].bucket, "2024-03-15");
        assert_eq!(daily[0].value, 1);
        let yearly = AggregateValue::list_series(&db, TOTAL_VISITS, Granularity::Yearly)
            .await
            .unwrap();
        assert_eq!(yearly.len(), 1);
        assert_eq!(yearly[0].value, 1);
    }
}
