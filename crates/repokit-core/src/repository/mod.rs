//! Repository contract and the generic engine behind it

mod engine;
mod traits;

pub use engine::{DEFAULT_BULK_OFFLOAD_THRESHOLD, RepositoryEngine};
pub use traits::{RecordMapping, Repository, StorageAdapter};
