//! Connection-less repository store
//!
//! The in-memory backend needs no connection, so its lifecycle only forgets
//! cached repositories. Data held by a forgotten repository goes with it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::slot::{RepositorySlot, SlotRegistry};
use super::RepositoryLifecycle;
use crate::error::Result;

/// Lifecycle owner for repositories that hold their own storage
#[derive(Default)]
pub struct RepositoryStore {
    slots: SlotRegistry,
}

impl RepositoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot whose cached repository is cleared on every reset
    pub fn slot<E: Send + Sync + 'static>(&self) -> RepositorySlot<E> {
        self.slots.slot()
    }

    /// The slot's cached repository, built on first access
    pub fn repository<E, F>(&self, slot: &RepositorySlot<E>, build: F) -> Arc<E>
    where
        E: Send + Sync + 'static,
        F: FnOnce() -> E,
    {
        slot.get_or_build(build)
    }

    fn forget(&self, operation: &'static str) {
        self.slots.invalidate_all();
        debug!(operation, "Cleared in-memory repositories");
    }
}

#[async_trait]
impl RepositoryLifecycle for RepositoryStore {
    async fn setup(&self) -> Result<()> {
        self.forget("setup");
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.forget("reset");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.forget("delete");
        Ok(())
    }
}
