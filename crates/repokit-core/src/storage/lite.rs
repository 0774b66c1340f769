//! Lightweight SQLite adapter over a single rusqlite connection
//!
//! rusqlite is synchronous, so every call hops onto the blocking pool and
//! takes the connection's mutex there. Bulk writes prepare one cached
//! statement and run it for every record inside a single transaction.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OpenFlags, OptionalExtension, ToSql, params_from_iter};
use tracing::{debug, info};

use super::schema::{SqlRow, SqlValue, TableRecord, TableSchema, bind_values};
use crate::context::ConnectionProvider;
use crate::error::{Error, Result};
use crate::repository::StorageAdapter;

/// Default time a statement waits on a locked database
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for [`LiteConnectionProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteOptions {
    pub busy_timeout: Duration,
    pub wal: bool,
}

impl Default for LiteOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            wal: true,
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v.as_slice())),
        })
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Integer(v) => SqlValue::Integer(v),
            Value::Real(v) => SqlValue::Real(v),
            Value::Text(v) => SqlValue::Text(v),
            Value::Blob(v) => SqlValue::Blob(v),
        }
    }
}

/// Shared handle to one rusqlite connection
///
/// Clones share the connection. Once closed, every call fails with
/// [`Error::ConnectionClosed`].
#[derive(Debug, Clone)]
pub struct LiteConnection {
    inner: Arc<Mutex<Option<Connection>>>,
    path: Arc<PathBuf>,
}

impl LiteConnection {
    fn new(connection: Connection, path: PathBuf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(connection))),
            path: Arc::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let connection = guard.as_mut().ok_or(Error::ConnectionClosed)?;
            f(connection)
        })
        .await?
    }

    /// Take the connection out of the handle and close it
    async fn shutdown(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let taken = inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            match taken {
                Some(connection) => connection.close().map_err(|(_, e)| Error::from(e)),
                None => Ok(()),
            }
        })
        .await?
    }
}

/// Opens and closes [`LiteConnection`]s for a repository context
#[derive(Debug, Clone, Default)]
pub struct LiteConnectionProvider {
    options: LiteOptions,
}

impl LiteConnectionProvider {
    pub fn new(options: LiteOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ConnectionProvider for LiteConnectionProvider {
    type Connection = LiteConnection;

    fn backend(&self) -> &'static str {
        "lite"
    }

    async fn open(&self, path: &Path) -> Result<LiteConnection> {
        let path = path.to_path_buf();
        let options = self.options.clone();

        let connection = tokio::task::spawn_blocking({
            let path = path.clone();
            move || -> Result<Connection> {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let connection = Connection::open_with_flags(
                    &path,
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                        | OpenFlags::SQLITE_OPEN_CREATE
                        | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
                )?;
                connection.busy_timeout(options.busy_timeout)?;
                if options.wal {
                    let mode: String = connection.pragma_update_and_check(
                        None,
                        "journal_mode",
                        "WAL",
                        |row| row.get(0),
                    )?;
                    debug!(journal_mode = %mode, "Configured journal mode");
                }
                Ok(connection)
            }
        })
        .await??;

        info!(path = %path.display(), "Opened lite connection");
        Ok(LiteConnection::new(connection, path))
    }

    async fn close(&self, connection: LiteConnection) -> Result<()> {
        connection.shutdown().await
    }
}

/// [`StorageAdapter`] for a [`TableRecord`] over a shared [`LiteConnection`]
pub struct LiteAdapter<R> {
    connection: LiteConnection,
    schema: TableSchema,
    _record: PhantomData<fn() -> R>,
}

fn read_row(schema: &TableSchema, row: &rusqlite::Row<'_>) -> rusqlite::Result<SqlRow> {
    let mut decoded = SqlRow::new();
    for (index, name) in schema.column_names().into_iter().enumerate() {
        let value: Value = row.get(index)?;
        decoded.push(name, value.into());
    }
    Ok(decoded)
}

impl<R: TableRecord> LiteAdapter<R> {
    pub fn new(connection: LiteConnection) -> Self {
        Self {
            connection,
            schema: R::schema(),
            _record: PhantomData,
        }
    }

    pub fn connection(&self) -> &LiteConnection {
        &self.connection
    }

    /// Execute one statement; with `require_match`, touching no row is `NotFound`
    async fn execute_one(
        &self,
        sql: String,
        id: &str,
        values: Vec<SqlValue>,
        require_match: bool,
    ) -> Result<()> {
        let id = id.to_string();
        self.connection
            .call(move |conn| {
                let changed = conn
                    .prepare_cached(&sql)?
                    .execute(params_from_iter(values.iter()))?;
                if require_match && changed == 0 {
                    return Err(Error::not_found(id));
                }
                Ok(())
            })
            .await
    }

    /// Execute one cached statement per entry inside a single transaction
    async fn execute_batch(
        &self,
        operation: &'static str,
        sql: String,
        batch: Vec<(String, Vec<SqlValue>)>,
        require_match: bool,
    ) -> Result<()> {
        let count = batch.len();
        self.connection
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare_cached(&sql)?;
                    for (id, values) in &batch {
                        let changed = stmt.execute(params_from_iter(values.iter()))?;
                        if require_match && changed == 0 {
                            // tx rolls back on drop
                            return Err(Error::not_found(id.as_str()));
                        }
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        debug!(table = self.schema.name, operation, count, "Committed batch");
        Ok(())
    }

    fn full_rows(records: &[R]) -> Vec<(String, Vec<SqlValue>)> {
        records
            .iter()
            .map(|r| (r.id().to_string(), bind_values(r)))
            .collect()
    }

    fn id_rows(records: &[R]) -> Vec<(String, Vec<SqlValue>)> {
        records
            .iter()
            .map(|r| (r.id().to_string(), vec![SqlValue::from(r.id())]))
            .collect()
    }
}

#[async_trait]
impl<R: TableRecord> StorageAdapter<R> for LiteAdapter<R> {
    fn backend(&self) -> &'static str {
        "lite"
    }

    fn table(&self) -> &str {
        self.schema.name
    }

    async fn initialize(&self) -> Result<()> {
        let sql = self.schema.create_table_sql();
        self.connection
            .call(move |conn| match conn.execute(&sql, []) {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("already exists") => {
                    Ok(())
                }
                Err(e) => Err(e.into()),
            })
            .await
    }

    async fn drop_table(&self) -> Result<()> {
        let sql = self.schema.drop_table_sql();
        self.connection
            .call(move |conn| {
                conn.execute(&sql, [])?;
                Ok(())
            })
            .await
    }

    async fn get_all(&self) -> Result<Vec<R>> {
        let sql = self.schema.select_all_sql();
        let schema = self.schema;
        let rows = self
            .connection
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt
                    .query_map([], |row| read_row(&schema, row))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(R::from_row).collect()
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<R>> {
        let sql = self.schema.select_by_id_sql();
        let schema = self.schema;
        let id = id.to_string();
        let row = self
            .connection
            .call(move |conn| {
                let row = conn
                    .prepare_cached(&sql)?
                    .query_row([id.as_str()], |row| read_row(&schema, row))
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(R::from_row).transpose()
    }

    async fn count(&self) -> Result<usize> {
        let sql = self.schema.count_sql();
        let count = self
            .connection
            .call(move |conn| Ok(conn.query_row(&sql, [], |row| row.get::<_, i64>(0))?))
            .await?;
        usize::try_from(count).map_err(|_| Error::conversion(format!("invalid row count {count}")))
    }

    async fn insert(&self, record: &R) -> Result<()> {
        self.execute_one(self.schema.insert_sql(), record.id(), bind_values(record), false)
            .await
    }

    async fn insert_all(&self, records: &[R]) -> Result<()> {
        self.execute_batch("insert", self.schema.insert_sql(), Self::full_rows(records), false)
            .await
    }

    async fn update(&self, record: &R) -> Result<()> {
        self.execute_one(self.schema.update_sql(), record.id(), bind_values(record), true)
            .await
    }

    async fn update_all(&self, records: &[R]) -> Result<()> {
        self.execute_batch("update", self.schema.update_sql(), Self::full_rows(records), true)
            .await
    }

    async fn upsert(&self, record: &R) -> Result<()> {
        self.execute_one(
            self.schema.insert_or_replace_sql(),
            record.id(),
            bind_values(record),
            false,
        )
        .await
    }

    async fn upsert_all(&self, records: &[R]) -> Result<()> {
        self.execute_batch(
            "upsert",
            self.schema.insert_or_replace_sql(),
            Self::full_rows(records),
            false,
        )
        .await
    }

    async fn remove(&self, record: &R) -> Result<()> {
        self.execute_one(
            self.schema.delete_by_id_sql(),
            record.id(),
            vec![SqlValue::from(record.id())],
            true,
        )
        .await
    }

    async fn remove_all_items(&self, records: &[R]) -> Result<()> {
        self.execute_batch("remove", self.schema.delete_by_id_sql(), Self::id_rows(records), true)
            .await
    }

    async fn remove_all(&self) -> Result<()> {
        let sql = self.schema.delete_all_sql();
        self.connection
            .call(move |conn| {
                conn.execute(&sql, [])?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::record::Record;
    use crate::storage::schema::Column;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    struct Reading {
        id: String,
        value: f64,
        raw: Vec<u8>,
    }

    const READINGS: TableSchema =
        TableSchema::new("readings", &[Column::real("value"), Column::blob("raw")]);

    impl Record for Reading {
        fn id(&self) -> &str {
            &self.id
        }
    }

    impl TableRecord for Reading {
        fn schema() -> TableSchema {
            READINGS
        }

        fn to_values(&self) -> Vec<SqlValue> {
            vec![self.value.into(), self.raw.clone().into()]
        }

        fn from_row(row: SqlRow) -> Result<Self> {
            Ok(Self {
                id: row.id()?,
                value: row.get_f64("value")?,
                raw: row.get_bytes("raw")?,
            })
        }
    }

    fn reading(id: &str, value: f64) -> Reading {
        Reading {
            id: id.to_string(),
            value,
            raw: id.as_bytes().to_vec(),
        }
    }

    async fn create_test_adapter() -> (TempDir, LiteAdapter<Reading>) {
        let dir = TempDir::new().unwrap();
        let connection = LiteConnectionProvider::default()
            .open(&dir.path().join("readings.db3"))
            .await
            .unwrap();
        let adapter = LiteAdapter::new(connection);
        adapter.initialize().await.unwrap();
        (dir, adapter)
    }

    #[tokio::test]
    async fn test_open_enables_wal() {
        let (_dir, adapter) = create_test_adapter().await;
        let mode: String = adapter
            .connection()
            .call(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_single_operations() {
        let (_dir, adapter) = create_test_adapter().await;

        adapter.insert(&reading("1", 1.5)).await.unwrap();
        adapter.update(&reading("1", 2.5)).await.unwrap();
        assert_eq!(adapter.get_by_id("1").await.unwrap(), Some(reading("1", 2.5)));

        adapter.upsert(&reading("2", 3.0)).await.unwrap();
        assert_eq!(adapter.count().await.unwrap(), 2);

        adapter.remove(&reading("1", 0.0)).await.unwrap();
        assert_eq!(adapter.get_by_id("1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let (_dir, adapter) = create_test_adapter().await;

        let err = adapter.update(&reading("9", 1.0)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { ref id } if id == "9"));

        let err = adapter.remove(&reading("9", 1.0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_conflict() {
        let (_dir, adapter) = create_test_adapter().await;
        adapter.insert(&reading("1", 1.0)).await.unwrap();

        let err = adapter.insert(&reading("1", 1.0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_table_untouched() {
        let (_dir, adapter) = create_test_adapter().await;
        adapter
            .insert_all(&[reading("1", 1.0), reading("2", 2.0)])
            .await
            .unwrap();

        let err = adapter
            .insert_all(&[reading("3", 3.0), reading("1", 1.0)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(adapter.count().await.unwrap(), 2);

        let err = adapter
            .update_all(&[reading("1", 10.0), reading("7", 7.0)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(adapter.get_by_id("1").await.unwrap().unwrap().value, 1.0);
    }

    #[tokio::test]
    async fn test_closed_connection_fails_every_call() {
        let (_dir, adapter) = create_test_adapter().await;
        let provider = LiteConnectionProvider::default();

        provider.close(adapter.connection().clone()).await.unwrap();
        assert!(adapter.connection().is_closed());

        let err = adapter.get_all().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionClosed);

        // closing twice is harmless
        provider.close(adapter.connection().clone()).await.unwrap();
    }
}
