//! Integration tests for the rusqlite-backed lite backend

mod common;

use std::sync::Arc;

use common::{
    SampleRow, SampleRowMapping, bulk_operations_data, bulk_operations_scenario,
    drop_table_scenario, sample_context, single_operations_data, single_operations_scenario,
    timestamp_range_scenario,
};
use repokit_core::context::{RepositoryContext, RepositoryLifecycle, RepositorySlot};
use repokit_core::repository::{Repository, RepositoryEngine};
use repokit_core::storage::{LiteAdapter, LiteConnectionProvider};
use repokit_core::{ErrorKind, Result};
use tempfile::TempDir;

type LiteSampleRepository = RepositoryEngine<SampleRowMapping, LiteAdapter<SampleRow>>;

struct SampleContext {
    context: RepositoryContext<LiteConnectionProvider>,
    samples: RepositorySlot<LiteSampleRepository>,
}

impl SampleContext {
    fn new(folder: &std::path::Path) -> Self {
        let context = sample_context(folder, LiteConnectionProvider::default());
        let samples = context.slot();
        Self { context, samples }
    }

    async fn sample_repository(&self) -> Result<Arc<LiteSampleRepository>> {
        self.context
            .repository(&self.samples, |connection| {
                RepositoryEngine::new(LiteAdapter::new(connection), SampleRowMapping)
            })
            .await
    }
}

/// Helper to create a set-up context in a temporary folder
async fn create_test_context() -> (TempDir, SampleContext) {
    let temp_dir = TempDir::new().unwrap();
    let context = SampleContext::new(temp_dir.path());
    context.context.setup().await.unwrap();
    (temp_dir, context)
}

#[tokio::test]
async fn test_drop_table() {
    let (_temp_dir, context) = create_test_context().await;

    drop_table_scenario(context.sample_repository().await.unwrap().as_ref()).await;

    context.context.delete().await.unwrap();
}

#[tokio::test]
async fn test_single_operations() {
    let (_temp_dir, context) = create_test_context().await;

    single_operations_scenario(context.sample_repository().await.unwrap().as_ref()).await;

    context.context.delete().await.unwrap();
}

#[tokio::test]
async fn test_bulk_operations() {
    let (_temp_dir, context) = create_test_context().await;

    bulk_operations_scenario(context.sample_repository().await.unwrap().as_ref()).await;

    context.context.delete().await.unwrap();
}

#[tokio::test]
async fn test_timestamps_across_calendar_range() {
    let (_temp_dir, context) = create_test_context().await;

    timestamp_range_scenario(context.sample_repository().await.unwrap().as_ref()).await;

    context.context.delete().await.unwrap();
}

#[tokio::test]
async fn test_upsert_batch_replaces_existing_rows() {
    let (_temp_dir, context) = create_test_context().await;
    let repo = context.sample_repository().await.unwrap();
    repo.insert(&bulk_operations_data(2)).await.unwrap();

    let mut batch = bulk_operations_data(3);
    for sample in &mut batch {
        sample.sample_string = format!("{} - UPSERTED", sample.sample_string);
    }
    repo.upsert(&batch).await.unwrap();

    assert_eq!(repo.get().await.unwrap(), batch);
}

#[tokio::test]
async fn test_large_batch_round_trips() {
    let (_temp_dir, context) = create_test_context().await;
    let repo = context.sample_repository().await.unwrap();

    // large enough to convert on the blocking pool
    let mut samples = bulk_operations_data(200);
    samples.sort_by(|a, b| a.id.cmp(&b.id));
    repo.insert(&samples).await.unwrap();

    assert_eq!(repo.get().await.unwrap(), samples);

    repo.remove_all().await.unwrap();
    assert_eq!(repo.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_items_fail_not_found() {
    let (_temp_dir, context) = create_test_context().await;
    let repo = context.sample_repository().await.unwrap();
    let ghost = single_operations_data(7);

    let err = repo.update_item(&ghost).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = repo.remove(&[ghost]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_stale_repository_fails_after_reset() {
    let (_temp_dir, context) = create_test_context().await;
    let stale = context.sample_repository().await.unwrap();
    stale.insert_item(&single_operations_data(1)).await.unwrap();

    context.context.reset().await.unwrap();

    let err = stale.get().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);

    let reopened = context.sample_repository().await.unwrap();
    assert_eq!(reopened.get().await.unwrap().len(), 1);
}
