//! Record identity contract
//!
//! Every storage-facing record carries a unique, caller-assigned string id
//! that doubles as its primary key. The id never changes once assigned.

use crate::error::{Error, Result};

/// A storage-facing representation of a domain model, keyed by id
pub trait Record: Send + Sync + 'static {
    /// The record's primary key
    fn id(&self) -> &str;
}

/// Reject blank or whitespace-only identifiers
pub fn validate_id(id: &str) -> Result<&str> {
    if id.trim().is_empty() {
        return Err(Error::invalid("id cannot be null or whitespace"));
    }
    Ok(id)
}

/// Validate the id of every record in a batch before any of it is written
pub fn validate_ids<R: Record>(records: &[R]) -> Result<()> {
    for record in records {
        validate_id(record.id())?;
    }
    Ok(())
}
