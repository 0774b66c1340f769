//! Connection providers and connection state

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Opens and closes the backend connection a context owns
#[async_trait]
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Handle shared by the context and every engine built from it
    type Connection: Clone + Send + Sync + 'static;

    /// Short backend name used in logs
    fn backend(&self) -> &'static str;

    /// Open a connection to the datastore file at `path`, creating it if needed
    async fn open(&self, path: &Path) -> Result<Self::Connection>;

    /// Release a connection; handles still held by engines stop working
    async fn close(&self, connection: Self::Connection) -> Result<()>;
}

/// Whether a context currently holds a live connection
#[derive(Debug, Clone)]
pub enum ConnectionState<C> {
    Closed,
    Open(C),
}

impl<C> Default for ConnectionState<C> {
    fn default() -> Self {
        ConnectionState::Closed
    }
}

impl<C> ConnectionState<C> {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open(_))
    }

    /// The live connection, if any
    pub fn connection(&self) -> Option<&C> {
        match self {
            ConnectionState::Open(connection) => Some(connection),
            ConnectionState::Closed => None,
        }
    }

    /// Move the connection out, leaving the state closed
    pub fn take(&mut self) -> Option<C> {
        match std::mem::take(self) {
            ConnectionState::Open(connection) => Some(connection),
            ConnectionState::Closed => None,
        }
    }
}
