//! Repository trait definitions
//!
//! Three seams make up a repository:
//! - [`Repository`]: the public CRUD contract callers program against
//! - [`RecordMapping`]: conversion between a domain model and its record
//! - [`StorageAdapter`]: raw CRUD against one backend for one record type

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::record::Record;
use crate::retry::RetryPolicy;

/// Public CRUD contract over domain models of type `T`
///
/// Every operation ensures the backing table exists before touching storage.
#[async_trait]
pub trait Repository<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Ensure the backing table exists; idempotent
    async fn initialize(&self) -> Result<()>;

    /// Get all items, ordered by id ascending
    async fn get(&self) -> Result<Vec<T>>;

    /// Get an item by id, `None` if absent
    async fn get_item(&self, id: &str) -> Result<Option<T>>;

    /// Insert new items; a duplicate id fails the batch
    async fn insert(&self, items: &[T]) -> Result<()>;

    /// Insert a new item
    async fn insert_item(&self, item: &T) -> Result<()>;

    /// Update existing items by id; a missing id fails the batch
    async fn update(&self, items: &[T]) -> Result<()>;

    /// Update an existing item by id
    async fn update_item(&self, item: &T) -> Result<()>;

    /// Insert each item if absent, otherwise update it
    async fn upsert(&self, items: &[T]) -> Result<()>;

    /// Insert the item if absent, otherwise update it
    async fn upsert_item(&self, item: &T) -> Result<()>;

    /// Remove items by id; a missing id fails the batch
    async fn remove(&self, items: &[T]) -> Result<()>;

    /// Remove an item by id
    async fn remove_item(&self, item: &T) -> Result<()>;

    /// Remove every item
    async fn remove_all(&self) -> Result<()>;

    /// Destroy the backing table; the next operation recreates it
    async fn drop_table(&self) -> Result<()>;
}

/// Conversion between a domain model and its storage record
///
/// Conversions are pure. Failures surface as [`Error::Conversion`] and are
/// never retried.
pub trait RecordMapping: Send + Sync + 'static {
    /// Application-facing type
    type Model: Clone + Send + Sync + 'static;
    /// Storage-facing type
    type Record: Record;

    fn to_model(&self, record: Self::Record) -> Result<Self::Model>;

    fn to_record(&self, model: &Self::Model) -> Result<Self::Record>;

    fn to_models(&self, records: Vec<Self::Record>) -> Result<Vec<Self::Model>> {
        records.into_iter().map(|r| self.to_model(r)).collect()
    }

    fn to_records(&self, models: &[Self::Model]) -> Result<Vec<Self::Record>> {
        models.iter().map(|m| self.to_record(m)).collect()
    }
}

/// Raw CRUD against one backend for one record type
///
/// Implementations perform I/O only; argument validation, conversion,
/// initialization ordering and retries belong to the engine.
#[async_trait]
pub trait StorageAdapter<R: Record>: Send + Sync {
    /// Short backend name used in logs and errors
    fn backend(&self) -> &'static str;

    /// Table (or collection) name
    fn table(&self) -> &str;

    /// Retry policy for this backend
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    // ========== Table lifecycle ==========

    /// Create the table if it does not exist; "already exists" is not an error
    async fn initialize(&self) -> Result<()>;

    /// Destroy the table
    async fn drop_table(&self) -> Result<()>;

    // ========== Reads ==========

    /// All records ordered by id ascending
    async fn get_all(&self) -> Result<Vec<R>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<R>>;

    async fn count(&self) -> Result<usize> {
        Ok(self.get_all().await?.len())
    }

    /// Records matching `predicate`, ordered by id
    async fn query(
        &self,
        predicate: &(dyn for<'r> Fn(&'r R) -> bool + Send + Sync),
    ) -> Result<Vec<R>> {
        let records = self.get_all().await?;
        Ok(records.into_iter().filter(|r| predicate(r)).collect())
    }

    /// Records matching `predicate`, grouped by `key`
    async fn query_grouped<K>(
        &self,
        predicate: &(dyn for<'r> Fn(&'r R) -> bool + Send + Sync),
        key: &(dyn for<'r> Fn(&'r R) -> K + Send + Sync),
    ) -> Result<BTreeMap<K, Vec<R>>>
    where
        K: Ord + Send + 'static,
    {
        let mut groups: BTreeMap<K, Vec<R>> = BTreeMap::new();
        for record in self.query(predicate).await? {
            groups.entry(key(&record)).or_default().push(record);
        }
        Ok(groups)
    }

    /// First record (by id) matching `predicate`
    async fn query_scalar(
        &self,
        predicate: &(dyn for<'r> Fn(&'r R) -> bool + Send + Sync),
    ) -> Result<Option<R>> {
        Ok(self.query(predicate).await?.into_iter().next())
    }

    // ========== Writes ==========

    async fn insert(&self, record: &R) -> Result<()>;

    async fn insert_all(&self, records: &[R]) -> Result<()> {
        let _ = records;
        Err(self.unsupported("insert_all"))
    }

    async fn update(&self, record: &R) -> Result<()>;

    async fn update_all(&self, records: &[R]) -> Result<()> {
        let _ = records;
        Err(self.unsupported("update_all"))
    }

    async fn upsert(&self, record: &R) -> Result<()>;

    async fn upsert_all(&self, records: &[R]) -> Result<()> {
        let _ = records;
        Err(self.unsupported("upsert_all"))
    }

    async fn remove(&self, record: &R) -> Result<()>;

    async fn remove_all_items(&self, records: &[R]) -> Result<()> {
        let _ = records;
        Err(self.unsupported("remove_all_items"))
    }

    async fn remove_all(&self) -> Result<()>;

    /// Error for an operation this adapter does not provide
    fn unsupported(&self, operation: &'static str) -> Error {
        Error::Unsupported {
            backend: self.backend(),
            operation,
        }
    }
}
