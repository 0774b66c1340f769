//! Repository lifecycle owners
//!
//! # Key Concepts
//!
//! - **RepositoryContext**: owns one datastore connection and the repositories
//!   built on it
//! - **RepositoryStore**: the same lifecycle for backends without a connection
//! - **RepositorySlot**: a lazily built repository cleared on every reset
//! - **ConnectionProvider**: opens and closes a backend's connection
//!
//! # Usage
//!
//! ```rust,ignore
//! use repokit_core::context::{RepositoryContext, RepositoryLifecycle};
//! use repokit_core::storage::{LiteAdapter, LiteConnectionProvider};
//!
//! let context = RepositoryContext::new(folder, "samples", LiteConnectionProvider::default())?;
//! let samples = context.slot();
//!
//! let repo = context
//!     .repository(&samples, |conn| RepositoryEngine::new(LiteAdapter::new(conn), SampleMapping))
//!     .await?;
//! repo.insert_item(&sample).await?;
//!
//! context.delete().await?;
//! ```

mod connection;
mod repository_context;
mod slot;
mod store;

use async_trait::async_trait;

use crate::error::Result;

pub use connection::{ConnectionProvider, ConnectionState};
pub use repository_context::{
    ContextOptions, DEFAULT_FILE_EXTENSION, DEFAULT_SETTLE_DELAY, RepositoryContext,
};
pub use slot::RepositorySlot;
pub use store::RepositoryStore;

/// Lifecycle shared by connection-owning contexts and the in-memory store
#[async_trait]
pub trait RepositoryLifecycle: Send + Sync {
    /// Reset, then open a fresh connection where there is one
    async fn setup(&self) -> Result<()>;

    /// Close the connection if open and forget cached repositories
    async fn reset(&self) -> Result<()>;

    /// Reset, then remove the datastore
    async fn delete(&self) -> Result<()>;
}
