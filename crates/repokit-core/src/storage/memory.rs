//! In-memory storage adapter
//!
//! Records live in a map keyed by id behind an async read/write lock. Every
//! mutation holds the write lock for its whole batch, and batches are checked
//! before any item is applied, so a failing batch leaves the table untouched.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::Record;
use crate::repository::StorageAdapter;

struct MemoryTable<R> {
    exists: bool,
    rows: HashMap<String, R>,
}

/// Map-backed adapter; the table exists only after `initialize`
pub struct MemoryAdapter<R: Record + Clone> {
    table: String,
    state: RwLock<MemoryTable<R>>,
}

impl<R: Record + Clone> MemoryAdapter<R> {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            state: RwLock::new(MemoryTable {
                exists: false,
                rows: HashMap::new(),
            }),
        }
    }

    fn missing(&self) -> Error {
        Error::TableMissing {
            table: self.table.clone(),
        }
    }

    fn check(&self, table: &MemoryTable<R>) -> Result<()> {
        if table.exists {
            Ok(())
        } else {
            Err(self.missing())
        }
    }
}

fn sorted<R: Record>(mut records: Vec<R>) -> Vec<R> {
    records.sort_by(|a, b| a.id().cmp(b.id()));
    records
}

#[async_trait]
impl<R: Record + Clone> StorageAdapter<R> for MemoryAdapter<R> {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.exists {
            state.exists = true;
            debug!(table = %self.table, "Created in-memory table");
        }
        Ok(())
    }

    async fn drop_table(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.rows.clear();
        state.exists = false;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<R>> {
        let state = self.state.read().await;
        self.check(&state)?;
        Ok(sorted(state.rows.values().cloned().collect()))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<R>> {
        let state = self.state.read().await;
        self.check(&state)?;
        Ok(state.rows.get(id).cloned())
    }

    async fn count(&self) -> Result<usize> {
        let state = self.state.read().await;
        self.check(&state)?;
        Ok(state.rows.len())
    }

    async fn query(
        &self,
        predicate: &(dyn for<'r> Fn(&'r R) -> bool + Send + Sync),
    ) -> Result<Vec<R>> {
        let state = self.state.read().await;
        self.check(&state)?;
        Ok(sorted(
            state.rows.values().filter(|r| predicate(r)).cloned().collect(),
        ))
    }

    async fn query_scalar(
        &self,
        predicate: &(dyn for<'r> Fn(&'r R) -> bool + Send + Sync),
    ) -> Result<Option<R>> {
        let state = self.state.read().await;
        self.check(&state)?;
        Ok(state
            .rows
            .values()
            .filter(|r| predicate(r))
            .min_by(|a, b| a.id().cmp(b.id()))
            .cloned())
    }

    async fn insert(&self, record: &R) -> Result<()> {
        self.insert_all(std::slice::from_ref(record)).await
    }

    async fn insert_all(&self, records: &[R]) -> Result<()> {
        let mut state = self.state.write().await;
        self.check(&state)?;

        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if state.rows.contains_key(record.id()) || !seen.insert(record.id()) {
                return Err(Error::conflict(record.id()));
            }
        }
        for record in records {
            state.rows.insert(record.id().to_string(), record.clone());
        }
        Ok(())
    }

    async fn update(&self, record: &R) -> Result<()> {
        self.update_all(std::slice::from_ref(record)).await
    }

    async fn update_all(&self, records: &[R]) -> Result<()> {
        let mut state = self.state.write().await;
        self.check(&state)?;

        if let Some(missing) = records.iter().find(|r| !state.rows.contains_key(r.id())) {
            return Err(Error::not_found(missing.id()));
        }
        for record in records {
            state.rows.insert(record.id().to_string(), record.clone());
        }
        Ok(())
    }

    async fn upsert(&self, record: &R) -> Result<()> {
        self.upsert_all(std::slice::from_ref(record)).await
    }

    async fn upsert_all(&self, records: &[R]) -> Result<()> {
        let mut state = self.state.write().await;
        self.check(&state)?;

        for record in records {
            state.rows.insert(record.id().to_string(), record.clone());
        }
        Ok(())
    }

    async fn remove(&self, record: &R) -> Result<()> {
        self.remove_all_items(std::slice::from_ref(record)).await
    }

    async fn remove_all_items(&self, records: &[R]) -> Result<()> {
        let mut state = self.state.write().await;
        self.check(&state)?;

        if let Some(missing) = records.iter().find(|r| !state.rows.contains_key(r.id())) {
            return Err(Error::not_found(missing.id()));
        }
        for record in records {
            state.rows.remove(record.id());
        }
        Ok(())
    }

    async fn remove_all(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.check(&state)?;
        state.rows.clear();
        Ok(())
    }
}
