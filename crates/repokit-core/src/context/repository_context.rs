//! Connection-owning repository context
//!
//! A [`RepositoryContext`] owns the single live connection to one datastore
//! file and the lazily built repositories that share it. Resetting closes the
//! connection and forgets every cached repository; the next access reopens.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionProvider, ConnectionState};
use super::slot::{RepositorySlot, SlotRegistry};
use super::RepositoryLifecycle;
use crate::error::{Error, Result};

/// Default pause after deleting a datastore file
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Default datastore file extension
pub const DEFAULT_FILE_EXTENSION: &str = "db3";

/// Datastore naming and deletion settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    /// Pause after the datastore file is removed, letting the filesystem settle
    pub settle_delay: Duration,
    /// Extension appended to the datastore name, without the dot
    pub file_extension: String,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
        }
    }
}

/// Owns one datastore connection and the repositories built on it
pub struct RepositoryContext<P: ConnectionProvider> {
    provider: Arc<P>,
    folder: PathBuf,
    name: String,
    path: PathBuf,
    options: ContextOptions,
    state: Mutex<ConnectionState<P::Connection>>,
    slots: SlotRegistry,
}

impl<P: ConnectionProvider> RepositoryContext<P> {
    /// Create a context for `{folder}/{name}.db3`; nothing is opened yet
    pub fn new(folder: impl AsRef<Path>, name: &str, provider: P) -> Result<Self> {
        Self::with_options(folder, name, provider, ContextOptions::default())
    }

    pub fn with_options(
        folder: impl AsRef<Path>,
        name: &str,
        provider: P,
        options: ContextOptions,
    ) -> Result<Self> {
        let folder = folder.as_ref();
        if folder.to_string_lossy().trim().is_empty() {
            return Err(Error::invalid("folder path cannot be null or whitespace"));
        }
        if name.trim().is_empty() {
            return Err(Error::invalid("datastore name cannot be null or whitespace"));
        }

        let path = folder.join(format!("{name}.{}", options.file_extension));
        Ok(Self {
            provider: Arc::new(provider),
            folder: folder.to_path_buf(),
            name: name.to_string(),
            path,
            options,
            state: Mutex::new(ConnectionState::Closed),
            slots: SlotRegistry::default(),
        })
    }

    pub fn datastore_name(&self) -> &str {
        &self.name
    }

    pub fn datastore_folder(&self) -> &Path {
        &self.folder
    }

    /// Full path of the datastore file
    pub fn datastore_path(&self) -> &Path {
        &self.path
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.is_open()
    }

    /// Create a slot whose cached repository is cleared on every reset
    pub fn slot<E: Send + Sync + 'static>(&self) -> RepositorySlot<E> {
        self.slots.slot()
    }

    /// The live connection, opening one if the context is closed
    pub async fn connection(&self) -> Result<P::Connection> {
        let mut state = self.state.lock().await;
        self.connection_locked(&mut state).await
    }

    /// The slot's cached repository, built from the live connection on first access
    pub async fn repository<E, F>(&self, slot: &RepositorySlot<E>, build: F) -> Result<Arc<E>>
    where
        E: Send + Sync + 'static,
        F: FnOnce(P::Connection) -> E,
    {
        if let Some(engine) = slot.get() {
            return Ok(engine);
        }
        // a reset cannot slip in between reading the connection and caching the engine
        let mut state = self.state.lock().await;
        let connection = self.connection_locked(&mut state).await?;
        Ok(slot.get_or_build(|| build(connection)))
    }

    /// Best-effort reset that logs failures instead of returning them
    pub async fn close(self) {
        if let Err(e) = self.reset().await {
            error!(
                backend = self.provider.backend(),
                path = %self.path.display(),
                error = %e,
                "Failed to close repository context"
            );
        }
    }

    async fn connection_locked(
        &self,
        state: &mut ConnectionState<P::Connection>,
    ) -> Result<P::Connection> {
        if let Some(connection) = state.connection() {
            return Ok(connection.clone());
        }
        self.open_locked(state).await
    }

    async fn open_locked(
        &self,
        state: &mut ConnectionState<P::Connection>,
    ) -> Result<P::Connection> {
        let connection = self.provider.open(&self.path).await?;
        *state = ConnectionState::Open(connection.clone());
        info!(
            backend = self.provider.backend(),
            path = %self.path.display(),
            "Opened datastore connection"
        );
        Ok(connection)
    }

    async fn close_locked(&self, state: &mut ConnectionState<P::Connection>) -> Result<()> {
        self.slots.invalidate_all();
        if let Some(connection) = state.take() {
            self.provider.close(connection).await?;
            info!(
                backend = self.provider.backend(),
                path = %self.path.display(),
                "Closed datastore connection"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl<P: ConnectionProvider> RepositoryLifecycle for RepositoryContext<P> {
    async fn setup(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.close_locked(&mut state).await?;
        self.open_locked(&mut state).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.close_locked(&mut state).await
    }

    async fn delete(&self) -> Result<()> {
        self.reset().await?;

        let mut removed = false;
        for path in datastore_files(&self.path) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed {
            info!(path = %self.path.display(), "Deleted datastore");
        } else {
            debug!(path = %self.path.display(), "No datastore file to delete");
        }

        tokio::time::sleep(self.options.settle_delay).await;
        Ok(())
    }
}

/// The datastore file plus SQLite's WAL sidecars
fn datastore_files(path: &Path) -> Vec<PathBuf> {
    let mut files = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_os_string();
        sidecar.push(suffix);
        files.push(PathBuf::from(sidecar));
    }
    files
}

impl<P: ConnectionProvider> Drop for RepositoryContext<P> {
    fn drop(&mut self) {
        self.slots.invalidate_all();
        let Some(connection) = self.state.get_mut().take() else {
            return;
        };

        let provider = Arc::clone(&self.provider);
        let path = self.path.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match provider.close(connection).await {
                        Ok(()) => debug!(path = %path.display(), "Closed connection of dropped context"),
                        Err(e) => error!(
                            path = %path.display(),
                            error = %e,
                            "Failed to close connection of dropped context"
                        ),
                    }
                });
            }
            Err(_) => warn!(
                path = %path.display(),
                "Repository context dropped outside a runtime; connection released without closing"
            ),
        }
    }
}
