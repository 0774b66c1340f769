//! Storage layer - storage adapters and their connection providers
//!
//! # Architecture
//!
//! - `schema`: table descriptions, neutral SQL values and rows
//! - `relational`: SQLite through an sqlx pool, transaction-batched writes
//! - `lite`: SQLite through a single rusqlite connection
//! - `memory`: concurrent in-process map
//!
//! # Usage
//!
//! ```ignore
//! use repokit_core::storage::{RelationalAdapter, RelationalConnectionProvider};
//!
//! let context = RepositoryContext::new(folder, "samples", RelationalConnectionProvider::default())?;
//! let pool = context.connection().await?;
//! let engine = RepositoryEngine::new(RelationalAdapter::<SampleRow>::new(pool), SampleMapping);
//! ```

pub mod lite;
pub mod memory;
pub mod relational;
pub mod schema;

// Re-export commonly used types
pub use lite::{LiteAdapter, LiteConnection, LiteConnectionProvider, LiteOptions};
pub use memory::MemoryAdapter;
pub use relational::{RelationalAdapter, RelationalConnectionProvider, RelationalOptions};
pub use schema::{
    Column, ColumnType, SqlRow, SqlValue, TableRecord, TableSchema, timestamp_from_sql,
    timestamp_to_sql,
};
