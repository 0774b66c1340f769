//! Repokit Core Library
//!
//! A backend-agnostic repository layer. This crate provides:
//! - The `Repository` CRUD contract and the generic engine implementing it
//! - Lazy, exactly-once table initialization per repository
//! - Retry with exponential backoff on transient storage failures
//! - Repository contexts owning one datastore connection, and a
//!   connection-less store for in-memory repositories
//! - Storage adapters: SQLite via sqlx, SQLite via rusqlite, and in-memory

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod record;
pub mod repository;
pub mod retry;
pub mod storage;

pub use error::{Error, ErrorKind, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::RepokitConfig;
    pub use crate::context::{
        ConnectionProvider, RepositoryContext, RepositoryLifecycle, RepositorySlot,
        RepositoryStore,
    };
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::record::Record;
    pub use crate::repository::{RecordMapping, Repository, RepositoryEngine, StorageAdapter};
    pub use crate::retry::RetryPolicy;
    pub use crate::storage::{
        LiteAdapter, LiteConnectionProvider, MemoryAdapter, RelationalAdapter,
        RelationalConnectionProvider, TableRecord,
    };
}
