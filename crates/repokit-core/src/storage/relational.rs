//! Relational SQLite adapter backed by an sqlx connection pool
//!
//! Single writes run directly against the pool. Multi-item writes run inside
//! one transaction that commits once; any failing item rolls the whole batch
//! back.

use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use super::schema::{ColumnType, ID_COLUMN, SqlRow, SqlValue, TableRecord, TableSchema, bind_values};
use crate::context::ConnectionProvider;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::repository::StorageAdapter;

/// Default pool size; SQLite serializes writers anyway
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1;

/// Default time a connection waits on a locked database
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool settings for [`RelationalConnectionProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationalOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub wal: bool,
}

impl Default for RelationalOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            wal: true,
        }
    }
}

/// Opens and closes [`SqlitePool`]s for a repository context
#[derive(Debug, Clone, Default)]
pub struct RelationalConnectionProvider {
    options: RelationalOptions,
}

impl RelationalConnectionProvider {
    pub fn new(options: RelationalOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RelationalOptions {
        &self.options
    }
}

#[async_trait]
impl ConnectionProvider for RelationalConnectionProvider {
    type Connection = SqlitePool;

    fn backend(&self) -> &'static str {
        "relational"
    }

    async fn open(&self, path: &Path) -> Result<SqlitePool> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let journal_mode = if self.options.wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };
        let connect_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(journal_mode)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.options.max_connections)
            .connect_with(connect_options)
            .await?;

        info!(path = %path.display(), "Opened relational connection pool");
        Ok(pool)
    }

    async fn close(&self, connection: SqlitePool) -> Result<()> {
        connection.close().await;
        Ok(())
    }
}

/// [`StorageAdapter`] for a [`TableRecord`] over a shared [`SqlitePool`]
pub struct RelationalAdapter<R> {
    pool: SqlitePool,
    schema: TableSchema,
    _record: PhantomData<fn() -> R>,
}

impl<R: TableRecord> RelationalAdapter<R> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            schema: R::schema(),
            _record: PhantomData,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn decode(&self, row: &SqliteRow) -> Result<R> {
        R::from_row(decode_row(&self.schema, row)?)
    }

    /// Run one statement per record in a single transaction
    ///
    /// When `require_match` is set, a statement that touches no row fails the
    /// batch with `NotFound` for that record's id.
    async fn execute_batch(
        &self,
        operation: &'static str,
        sql: &str,
        records: &[R],
        values: impl Fn(&R) -> Vec<SqlValue>,
        require_match: bool,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            let result = bind_all(sql, values(record)).execute(&mut *tx).await?;
            if require_match && result.rows_affected() == 0 {
                // dropping the transaction rolls it back
                return Err(Error::not_found(record.id()));
            }
        }
        tx.commit().await?;

        debug!(
            table = self.schema.name,
            operation,
            count = records.len(),
            "Committed batch"
        );
        Ok(())
    }
}

fn bind_all(sql: &str, values: Vec<SqlValue>) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    values
        .into_iter()
        .fold(sqlx::query(sql), |query, value| match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Integer(v) => query.bind(v),
            SqlValue::Real(v) => query.bind(v),
            SqlValue::Text(v) => query.bind(v),
            SqlValue::Blob(v) => query.bind(v),
        })
}

fn decode_row(schema: &TableSchema, row: &SqliteRow) -> Result<SqlRow> {
    let mut decoded = SqlRow::new();
    decoded.push(ID_COLUMN, SqlValue::Text(row.try_get::<String, _>(ID_COLUMN)?));

    for column in schema.columns {
        let value = match column.ty {
            ColumnType::Integer => row
                .try_get::<Option<i64>, _>(column.name)?
                .map(SqlValue::Integer),
            ColumnType::Real => row
                .try_get::<Option<f64>, _>(column.name)?
                .map(SqlValue::Real),
            ColumnType::Text => row
                .try_get::<Option<String>, _>(column.name)?
                .map(SqlValue::Text),
            ColumnType::Blob => row
                .try_get::<Option<Vec<u8>>, _>(column.name)?
                .map(SqlValue::Blob),
        };
        decoded.push(column.name, value.unwrap_or(SqlValue::Null));
    }
    Ok(decoded)
}

fn id_value<R: Record>(record: &R) -> Vec<SqlValue> {
    vec![SqlValue::Text(record.id().to_string())]
}

#[async_trait]
impl<R: TableRecord> StorageAdapter<R> for RelationalAdapter<R> {
    fn backend(&self) -> &'static str {
        "relational"
    }

    fn table(&self) -> &str {
        self.schema.name
    }

    async fn initialize(&self) -> Result<()> {
        match sqlx::query(&self.schema.create_table_sql())
            .execute(&self.pool)
            .await
        {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.message().contains("already exists") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn drop_table(&self) -> Result<()> {
        sqlx::query(&self.schema.drop_table_sql())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<R>> {
        let rows = sqlx::query(&self.schema.select_all_sql())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| self.decode(row)).collect()
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<R>> {
        let row = sqlx::query(&self.schema.select_by_id_sql())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|row| self.decode(row)).transpose()
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(&self.schema.count_sql())
            .fetch_one(&self.pool)
            .await?;
        usize::try_from(count).map_err(|_| Error::conversion(format!("invalid row count {count}")))
    }

    async fn insert(&self, record: &R) -> Result<()> {
        bind_all(&self.schema.insert_sql(), bind_values(record))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_all(&self, records: &[R]) -> Result<()> {
        self.execute_batch("insert", &self.schema.insert_sql(), records, bind_values, false)
            .await
    }

    async fn update(&self, record: &R) -> Result<()> {
        let result = bind_all(&self.schema.update_sql(), bind_values(record))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(record.id()));
        }
        Ok(())
    }

    async fn update_all(&self, records: &[R]) -> Result<()> {
        self.execute_batch("update", &self.schema.update_sql(), records, bind_values, true)
            .await
    }

    async fn upsert(&self, record: &R) -> Result<()> {
        bind_all(&self.schema.upsert_sql(), bind_values(record))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_all(&self, records: &[R]) -> Result<()> {
        self.execute_batch("upsert", &self.schema.upsert_sql(), records, bind_values, false)
            .await
    }

    async fn remove(&self, record: &R) -> Result<()> {
        let result = bind_all(&self.schema.delete_by_id_sql(), id_value(record))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(record.id()));
        }
        Ok(())
    }

    async fn remove_all_items(&self, records: &[R]) -> Result<()> {
        self.execute_batch("remove", &self.schema.delete_by_id_sql(), records, id_value, true)
            .await
    }

    async fn remove_all(&self) -> Result<()> {
        sqlx::query(&self.schema.delete_all_sql())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::schema::Column;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        qty: i64,
        name: Option<String>,
    }

    const ITEMS: TableSchema =
        TableSchema::new("items", &[Column::integer("qty"), Column::text("name")]);

    impl Record for Item {
        fn id(&self) -> &str {
            &self.id
        }
    }

    impl TableRecord for Item {
        fn schema() -> TableSchema {
            ITEMS
        }

        fn to_values(&self) -> Vec<SqlValue> {
            vec![self.qty.into(), self.name.clone().into()]
        }

        fn from_row(row: SqlRow) -> Result<Self> {
            Ok(Self {
                id: row.id()?,
                qty: row.get_i64("qty")?,
                name: row.get_opt_string("name")?,
            })
        }
    }

    fn item(id: &str, qty: i64) -> Item {
        Item {
            id: id.to_string(),
            qty,
            name: Some(format!("item {id}")),
        }
    }

    async fn create_test_adapter() -> (TempDir, RelationalAdapter<Item>) {
        let dir = TempDir::new().unwrap();
        let pool = RelationalConnectionProvider::default()
            .open(&dir.path().join("nested").join("items.db3"))
            .await
            .unwrap();
        let adapter = RelationalAdapter::new(pool);
        adapter.initialize().await.unwrap();
        (dir, adapter)
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let (dir, _adapter) = create_test_adapter().await;
        assert!(dir.path().join("nested").join("items.db3").exists());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (_dir, adapter) = create_test_adapter().await;
        adapter.initialize().await.unwrap();
        assert_eq!(adapter.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_null_column_round_trips() {
        let (_dir, adapter) = create_test_adapter().await;
        let unnamed = Item {
            id: "1".to_string(),
            qty: 3,
            name: None,
        };

        adapter.insert(&unnamed).await.unwrap();
        assert_eq!(adapter.get_by_id("1").await.unwrap(), Some(unnamed));
        assert_eq!(adapter.get_by_id("2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_conflict() {
        let (_dir, adapter) = create_test_adapter().await;
        adapter.insert(&item("1", 1)).await.unwrap();

        let err = adapter.insert(&item("1", 2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_batch_with_missing_id_rolls_back() {
        let (_dir, adapter) = create_test_adapter().await;
        adapter
            .insert_all(&[item("1", 1), item("2", 2)])
            .await
            .unwrap();

        let err = adapter
            .update_all(&[item("1", 10), item("9", 90)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { ref id } if id == "9"));
        assert_eq!(adapter.get_by_id("1").await.unwrap().unwrap().qty, 1);

        let err = adapter
            .remove_all_items(&[item("2", 2), item("9", 9)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(adapter.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_batch_inserts_and_updates() {
        let (_dir, adapter) = create_test_adapter().await;
        adapter.insert(&item("1", 1)).await.unwrap();

        adapter
            .upsert_all(&[item("1", 100), item("2", 200)])
            .await
            .unwrap();

        let all = adapter.get_all().await.unwrap();
        assert_eq!(all, vec![item("1", 100), item("2", 200)]);
    }

    #[tokio::test]
    async fn test_closed_pool_reports_connection_closed() {
        let (_dir, adapter) = create_test_adapter().await;
        RelationalConnectionProvider::default()
            .close(adapter.pool().clone())
            .await
            .unwrap();

        let err = adapter.get_all().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
    }
}
