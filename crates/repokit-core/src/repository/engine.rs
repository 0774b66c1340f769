//! Generic repository engine
//!
//! Implements [`Repository`] once for every backend. The engine owns the
//! per-instance initialization gate, validates identifiers, converts models
//! to records (offloading large batches to the blocking pool), and wraps each
//! storage call in the adapter's retry policy.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::traits::{RecordMapping, Repository, StorageAdapter};
use crate::config::RepokitConfig;
use crate::error::Result;
use crate::record::{Record, validate_id, validate_ids};
use crate::retry::RetryPolicy;

/// Batches at or above this size are converted on the blocking pool
pub const DEFAULT_BULK_OFFLOAD_THRESHOLD: usize = 64;

type InitGate = Arc<OnceCell<()>>;

/// [`Repository`] implementation shared by every backend
pub struct RepositoryEngine<M, A>
where
    M: RecordMapping,
    A: StorageAdapter<M::Record>,
{
    adapter: A,
    mapping: Arc<M>,
    retry_policy: RetryPolicy,
    bulk_offload_threshold: usize,
    // Swapped for a fresh cell whenever the table is dropped
    init: Mutex<InitGate>,
}

impl<M, A> RepositoryEngine<M, A>
where
    M: RecordMapping,
    A: StorageAdapter<M::Record>,
{
    /// Create an engine using the adapter's retry policy
    pub fn new(adapter: A, mapping: M) -> Self {
        let retry_policy = adapter.retry_policy();
        Self {
            adapter,
            mapping: Arc::new(mapping),
            retry_policy,
            bulk_offload_threshold: DEFAULT_BULK_OFFLOAD_THRESHOLD,
            init: Mutex::new(Arc::new(OnceCell::new())),
        }
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the batch size at which conversions leave the async executor
    pub fn with_bulk_offload_threshold(mut self, threshold: usize) -> Self {
        self.bulk_offload_threshold = threshold.max(1);
        self
    }

    /// Apply retry and engine settings from a loaded configuration
    pub fn configured(self, config: &RepokitConfig) -> Self {
        self.with_retry_policy(config.retry.policy())
            .with_bulk_offload_threshold(config.engine.bulk_offload_threshold)
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn mapping(&self) -> &M {
        &self.mapping
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Whether the table has been initialized since construction or the last drop
    pub fn is_initialized(&self) -> bool {
        self.current_gate().initialized()
    }

    // ========== Queries ==========

    /// Models whose record matches `predicate`, ordered by id
    pub async fn query<P>(&self, predicate: P) -> Result<Vec<M::Model>>
    where
        P: Fn(&M::Record) -> bool + Send + Sync,
    {
        self.ensure_initialized().await?;
        let records = self
            .retry_policy
            .execute("query", || self.adapter.query(&predicate))
            .await?;
        self.to_models(records).await
    }

    /// Models whose record matches `predicate`, grouped by `key`
    pub async fn query_grouped<K, P, G>(
        &self,
        predicate: P,
        key: G,
    ) -> Result<BTreeMap<K, Vec<M::Model>>>
    where
        K: Ord + Send + 'static,
        P: Fn(&M::Record) -> bool + Send + Sync,
        G: Fn(&M::Record) -> K + Send + Sync,
    {
        self.ensure_initialized().await?;
        let groups = self
            .retry_policy
            .execute("query_grouped", || {
                self.adapter.query_grouped(&predicate, &key)
            })
            .await?;

        let mut models = BTreeMap::new();
        for (group, records) in groups {
            models.insert(group, self.to_models(records).await?);
        }
        Ok(models)
    }

    /// First model (by id) whose record matches `predicate`
    pub async fn query_scalar<P>(&self, predicate: P) -> Result<Option<M::Model>>
    where
        P: Fn(&M::Record) -> bool + Send + Sync,
    {
        self.ensure_initialized().await?;
        let record = self
            .retry_policy
            .execute("query_scalar", || self.adapter.query_scalar(&predicate))
            .await?;
        record.map(|r| self.mapping.to_model(r)).transpose()
    }

    /// Number of stored items
    pub async fn count(&self) -> Result<usize> {
        self.ensure_initialized().await?;
        self.retry_policy
            .execute("count", || self.adapter.count())
            .await
    }

    // ========== Internals ==========

    fn current_gate(&self) -> InitGate {
        let gate = self.init.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&gate)
    }

    fn rearm(&self) {
        let mut gate = self.init.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *gate = Arc::new(OnceCell::new());
    }

    /// Run the adapter's initialize exactly once per gate
    ///
    /// Concurrent callers wait on the same attempt. A failed attempt is not
    /// memoized, so the next caller tries again.
    async fn ensure_initialized(&self) -> Result<()> {
        let gate = self.current_gate();
        gate.get_or_try_init(|| async {
            debug!(
                backend = self.adapter.backend(),
                table = self.adapter.table(),
                "Initializing table"
            );
            self.retry_policy
                .execute("initialize", || self.adapter.initialize())
                .await
        })
        .await?;
        Ok(())
    }

    async fn to_records(&self, models: &[M::Model]) -> Result<Vec<M::Record>> {
        if models.len() < self.bulk_offload_threshold {
            return self.mapping.to_records(models);
        }
        let mapping = Arc::clone(&self.mapping);
        let models = models.to_vec();
        tokio::task::spawn_blocking(move || mapping.to_records(&models)).await?
    }

    async fn to_models(&self, records: Vec<M::Record>) -> Result<Vec<M::Model>> {
        if records.len() < self.bulk_offload_threshold {
            return self.mapping.to_models(records);
        }
        let mapping = Arc::clone(&self.mapping);
        tokio::task::spawn_blocking(move || mapping.to_models(records)).await?
    }
}

#[async_trait]
impl<M, A> Repository<M::Model> for RepositoryEngine<M, A>
where
    M: RecordMapping,
    A: StorageAdapter<M::Record>,
{
    async fn initialize(&self) -> Result<()> {
        self.ensure_initialized().await
    }

    async fn get(&self) -> Result<Vec<M::Model>> {
        self.ensure_initialized().await?;
        let records = self
            .retry_policy
            .execute("get", || self.adapter.get_all())
            .await?;
        self.to_models(records).await
    }

    async fn get_item(&self, id: &str) -> Result<Option<M::Model>> {
        let id = validate_id(id)?;
        self.ensure_initialized().await?;
        let record = self
            .retry_policy
            .execute("get_item", || self.adapter.get_by_id(id))
            .await?;
        record.map(|r| self.mapping.to_model(r)).transpose()
    }

    async fn insert(&self, items: &[M::Model]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let records = self.to_records(items).await?;
        validate_ids(&records)?;
        self.ensure_initialized().await?;
        debug!(table = self.adapter.table(), count = records.len(), "Inserting items");
        self.retry_policy
            .execute("insert", || self.adapter.insert_all(&records))
            .await
    }

    async fn insert_item(&self, item: &M::Model) -> Result<()> {
        let record = self.mapping.to_record(item)?;
        validate_id(record.id())?;
        self.ensure_initialized().await?;
        self.retry_policy
            .execute("insert_item", || self.adapter.insert(&record))
            .await
    }

    async fn update(&self, items: &[M::Model]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let records = self.to_records(items).await?;
        validate_ids(&records)?;
        self.ensure_initialized().await?;
        debug!(table = self.adapter.table(), count = records.len(), "Updating items");
        self.retry_policy
            .execute("update", || self.adapter.update_all(&records))
            .await
    }

    async fn update_item(&self, item: &M::Model) -> Result<()> {
        let record = self.mapping.to_record(item)?;
        validate_id(record.id())?;
        self.ensure_initialized().await?;
        self.retry_policy
            .execute("update_item", || self.adapter.update(&record))
            .await
    }

    async fn upsert(&self, items: &[M::Model]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let records = self.to_records(items).await?;
        validate_ids(&records)?;
        self.ensure_initialized().await?;
        debug!(table = self.adapter.table(), count = records.len(), "Upserting items");
        self.retry_policy
            .execute("upsert", || self.adapter.upsert_all(&records))
            .await
    }

    async fn upsert_item(&self, item: &M::Model) -> Result<()> {
        let record = self.mapping.to_record(item)?;
        validate_id(record.id())?;
        self.ensure_initialized().await?;
        self.retry_policy
            .execute("upsert_item", || self.adapter.upsert(&record))
            .await
    }

    async fn remove(&self, items: &[M::Model]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let records = self.to_records(items).await?;
        validate_ids(&records)?;
        self.ensure_initialized().await?;
        debug!(table = self.adapter.table(), count = records.len(), "Removing items");
        self.retry_policy
            .execute("remove", || self.adapter.remove_all_items(&records))
            .await
    }

    async fn remove_item(&self, item: &M::Model) -> Result<()> {
        let record = self.mapping.to_record(item)?;
        validate_id(record.id())?;
        self.ensure_initialized().await?;
        self.retry_policy
            .execute("remove_item", || self.adapter.remove(&record))
            .await
    }

    async fn remove_all(&self) -> Result<()> {
        self.ensure_initialized().await?;
        self.retry_policy
            .execute("remove_all", || self.adapter.remove_all())
            .await
    }

    async fn drop_table(&self) -> Result<()> {
        self.rearm();
        self.retry_policy
            .execute("drop_table", || self.adapter.drop_table())
            .await?;
        // Calls that raced the drop may have re-armed against the old table
        self.rearm();
        info!(
            backend = self.adapter.backend(),
            table = self.adapter.table(),
            "Dropped table"
        );
        Ok(())
    }
}
