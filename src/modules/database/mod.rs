use crate::modules::error::RollupResult;
use crate::modules::ingest::{task::IngestOffset, VisitEvent};
use crate::modules::kpi::value::{AggregateValue, ProcessorMarker};
use crate::raise_error;
#[cfg(test)]
use db_type::{KeyOptions, ToKeyDefinition};
#[cfg(test)]
use itertools::Itertools;
use native_db::*;
use std::sync::{Arc, LazyLock};
use transaction::RwTransaction;

use super::error::code::ErrorCode;
pub mod manager;

pub static KPI_MODELS: LazyLock<Models> = LazyLock::new(|| {
    let mut adapter = ModelsAdapter::new();
    adapter.register_kpi_models();
    adapter.models
});

pub struct ModelsAdapter {
    pub models: Models,
}

impl ModelsAdapter {
    pub fn new() -> Self {
        ModelsAdapter {
            models: Models::new(),
        }
    }

    pub fn register_model<T: ToInput>(&mut self) {
        self.models.define::<T>().expect("failed to define model ");
    }

    pub fn register_kpi_models(&mut self) {
        self.register_model::<AggregateValue>();
        self.register_model::<ProcessorMarker>();
        self.register_model::<VisitEvent>();
        self.register_model::<IngestOffset>();
    }
}

/// Runs `work` inside one read-write transaction, committing only when it succeeds.
///
/// On error the transaction is dropped and every write made by `work` is discarded.
pub async fn with_rw_transaction_impl<R: Send + 'static>(
    database: &Arc<Database<'static>>,
    work: impl FnOnce(&RwTransaction) -> RollupResult<R> + Send + 'static,
) -> RollupResult<R> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let rw = db
            .rw_transaction()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        let result = work(&rw)?;
        rw.commit()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        Ok(result)
    })
    .await
    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
}

#[cfg(test)]
pub async fn batch_insert_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
    batch: Vec<T>,
) -> RollupResult<()> {
    if batch.is_empty() {
        return Ok(());
    }
    with_rw_transaction_impl(database, move |rw| {
        for item in batch {
            rw.insert(item)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        }
        Ok(())
    })
    .await
}

pub async fn async_find_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
    key: impl ToKey + Send + 'static,
) -> RollupResult<Option<T>> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let r_transaction = db
            .r_transaction()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        let entity: Option<T> = r_transaction
            .get()
            .primary(key)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        Ok(entity)
    })
    .await
    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
}

#[cfg(test)]
pub async fn list_all_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
) -> RollupResult<Vec<T>> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let r_transaction = db
            .r_transaction()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        let entities: Vec<T> = r_transaction
            .scan()
            .primary()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?
            .all()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        Ok(entities)
    })
    .await
    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
}

#[cfg(test)]
pub async fn filter_by_secondary_key_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
    key_def: impl ToKeyDefinition<KeyOptions> + Send + 'static,
    start_with: impl ToKey + Send + 'static,
) -> RollupResult<Vec<T>> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let r_transaction = db
            .r_transaction()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        let entities: Vec<T> = r_transaction
            .scan()
            .secondary(key_def)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?
            .start_with(start_with)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        Ok(entities)
    })
    .await
    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
}

#[cfg(test)]
pub(crate) fn in_memory_database() -> Arc<Database<'static>> {
    Arc::new(Builder::new().create_in_memory(&KPI_MODELS).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ingest::VisitKind;

    fn visit(id: u64, ts: i64) -> VisitEvent {
        VisitEvent {
            id,
            ts,
            kind: VisitKind::ContentHome,
            content: "Wikipedia".into(),
            item: None,
        }
    }

    #[tokio::test]
    async fn test_failed_transaction_is_not_committed() {
        let db = in_memory_database();
        let result: RollupResult<()> = with_rw_transaction_impl(&db, |rw| {
            rw.insert(visit(1, 100))
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
            Err(raise_error!("boom".into(), ErrorCode::InternalError))
        })
        .await;
        assert!(result.is_err());
        let stored: Vec<VisitEvent> = list_all_impl(&db).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_batch_insert_and_find() {
        let db = in_memory_database();
        batch_insert_impl(&db, vec![visit(1, 100), visit(2, 200)])
            .await
            .unwrap();
        let found: Option<VisitEvent> = async_find_impl(&db, 2u64).await.unwrap();
        assert_eq!(found.map(|v| v.ts), Some(200));
        let all: Vec<VisitEvent> = list_all_impl(&db).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rolls_back_whole_batch() {
        let db = in_memory_database();
        batch_insert_impl(&db, vec![visit(1, 100)]).await.unwrap();
        let result = batch_insert_impl(&db, vec![visit(2, 200), visit(1, 300)]).await;
        assert!(result.is_err());
        let all: Vec<VisitEvent> = list_all_impl(&db).await.unwrap();
        assert_eq!(all, vec![visit(1, 100)]);
    }
}
