//! Table descriptions shared by the SQL adapters
//!
//! A [`TableRecord`] describes its table once; both SQL backends derive
//! their statements and row decoding from that description. The `id` column
//! is implicit: it is always the first column, `TEXT PRIMARY KEY NOT NULL`.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::record::Record;

/// Name of the implicit primary key column
pub const ID_COLUMN: &str = "id";

/// Storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// A non-key column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Integer,
        }
    }

    pub const fn real(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Real,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Text,
        }
    }

    pub const fn blob(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Blob,
        }
    }
}

/// Table name plus its non-key columns, in bind order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
}

impl TableSchema {
    pub const fn new(name: &'static str, columns: &'static [Column]) -> Self {
        Self { name, columns }
    }

    /// Every column name, `id` first
    pub fn column_names(&self) -> Vec<&'static str> {
        std::iter::once(ID_COLUMN)
            .chain(self.columns.iter().map(|c| c.name))
            .collect()
    }

    fn column_list(&self) -> String {
        self.column_names()
            .iter()
            .map(|name| quote(name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn placeholders(&self) -> String {
        (1..=self.columns.len() + 1)
            .map(|n| format!("?{n}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ========== Statements ==========

    pub fn create_table_sql(&self) -> String {
        let mut defs = vec![format!("{} TEXT PRIMARY KEY NOT NULL", quote(ID_COLUMN))];
        defs.extend(
            self.columns
                .iter()
                .map(|c| format!("{} {}", quote(c.name), c.ty.as_sql())),
        );
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(self.name),
            defs.join(", ")
        )
    }

    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote(self.name))
    }

    pub fn select_all_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} ORDER BY {}",
            self.column_list(),
            quote(self.name),
            quote(ID_COLUMN)
        )
    }

    pub fn select_by_id_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            self.column_list(),
            quote(self.name),
            quote(ID_COLUMN)
        )
    }

    /// Binds `id` as `?1` followed by the columns
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(self.name),
            self.column_list(),
            self.placeholders()
        )
    }

    /// Same bind order as [`Self::insert_sql`]
    pub fn insert_or_replace_sql(&self) -> String {
        format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote(self.name),
            self.column_list(),
            self.placeholders()
        )
    }

    /// Same bind order as [`Self::insert_sql`]
    pub fn update_sql(&self) -> String {
        if self.columns.is_empty() {
            // Nothing to set; still touches the row so rows_affected reports existence
            return format!(
                "UPDATE {} SET {id} = {id} WHERE {id} = ?1",
                quote(self.name),
                id = quote(ID_COLUMN)
            );
        }
        let assignments = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", quote(c.name), i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {} WHERE {} = ?1",
            quote(self.name),
            assignments,
            quote(ID_COLUMN)
        )
    }

    /// Same bind order as [`Self::insert_sql`]
    pub fn upsert_sql(&self) -> String {
        let on_conflict = if self.columns.is_empty() {
            "DO NOTHING".to_string()
        } else {
            let assignments = self
                .columns
                .iter()
                .map(|c| format!("{name} = excluded.{name}", name = quote(c.name)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("DO UPDATE SET {assignments}")
        };
        format!(
            "{} ON CONFLICT({}) {}",
            self.insert_sql(),
            quote(ID_COLUMN),
            on_conflict
        )
    }

    pub fn delete_by_id_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote(self.name),
            quote(ID_COLUMN)
        )
    }

    pub fn delete_all_sql(&self) -> String {
        format!("DELETE FROM {}", quote(self.name))
    }

    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", quote(self.name))
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Backend-neutral column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "NULL",
            SqlValue::Integer(_) => "INTEGER",
            SqlValue::Real(_) => "REAL",
            SqlValue::Text(_) => "TEXT",
            SqlValue::Blob(_) => "BLOB",
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Integer(i64::from(value))
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Integer(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// A decoded row, addressed by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    values: Vec<(&'static str, SqlValue)>,
}

impl SqlRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: &'static str, value: SqlValue) {
        self.values.push((column, value));
    }

    pub fn get(&self, column: &str) -> Result<&SqlValue> {
        self.values
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
            .ok_or_else(|| Error::conversion(format!("column '{column}' missing from row")))
    }

    pub fn id(&self) -> Result<String> {
        self.get_string(ID_COLUMN)
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.get(column)? {
            SqlValue::Integer(v) => Ok(*v),
            other => Err(mismatch(column, "INTEGER", other)),
        }
    }

    pub fn get_i32(&self, column: &str) -> Result<i32> {
        let value = self.get_i64(column)?;
        i32::try_from(value)
            .map_err(|_| Error::conversion(format!("column '{column}' value {value} overflows i32")))
    }

    pub fn get_bool(&self, column: &str) -> Result<bool> {
        Ok(self.get_i64(column)? != 0)
    }

    pub fn get_f64(&self, column: &str) -> Result<f64> {
        match self.get(column)? {
            SqlValue::Real(v) => Ok(*v),
            SqlValue::Integer(v) => Ok(*v as f64),
            other => Err(mismatch(column, "REAL", other)),
        }
    }

    pub fn get_string(&self, column: &str) -> Result<String> {
        match self.get(column)? {
            SqlValue::Text(v) => Ok(v.clone()),
            other => Err(mismatch(column, "TEXT", other)),
        }
    }

    /// Text column that may be NULL
    pub fn get_opt_string(&self, column: &str) -> Result<Option<String>> {
        match self.get(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(v) => Ok(Some(v.clone())),
            other => Err(mismatch(column, "TEXT", other)),
        }
    }

    pub fn get_bytes(&self, column: &str) -> Result<Vec<u8>> {
        match self.get(column)? {
            SqlValue::Blob(v) => Ok(v.clone()),
            other => Err(mismatch(column, "BLOB", other)),
        }
    }

    /// Timestamp stored as ticks by [`timestamp_to_sql`]
    pub fn get_timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        timestamp_from_sql(self.get_i64(column)?)
    }
}

fn mismatch(column: &str, expected: &str, found: &SqlValue) -> Error {
    Error::conversion(format!(
        "column '{column}' expected {expected}, found {}",
        found.type_name()
    ))
}

/// A record that can be stored in a SQL table
pub trait TableRecord: Record + Sized {
    fn schema() -> TableSchema;

    /// Values for the non-key columns, in schema order
    fn to_values(&self) -> Vec<SqlValue>;

    fn from_row(row: SqlRow) -> Result<Self>;
}

/// Bind values for insert-shaped statements: `id` then the columns
pub fn bind_values<R: TableRecord>(record: &R) -> Vec<SqlValue> {
    let mut values = Vec::with_capacity(R::schema().columns.len() + 1);
    values.push(SqlValue::Text(record.id().to_string()));
    values.extend(record.to_values());
    values
}

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: u32 = 100;
/// Ticks between 0001-01-01T00:00:00Z and the Unix epoch
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Encode a timestamp as 100 ns ticks since 0001-01-01T00:00:00Z
///
/// Precision below one tick is truncated.
pub fn timestamp_to_sql(timestamp: &DateTime<Utc>) -> Result<i64> {
    let sub_ticks = i64::from(timestamp.timestamp_subsec_nanos() / NANOS_PER_TICK);
    timestamp
        .timestamp()
        .checked_mul(TICKS_PER_SECOND)
        .and_then(|ticks| ticks.checked_add(UNIX_EPOCH_TICKS))
        .and_then(|ticks| ticks.checked_add(sub_ticks))
        .ok_or_else(|| Error::conversion(format!("timestamp {timestamp} is out of range")))
}

/// Decode a timestamp stored by [`timestamp_to_sql`]
pub fn timestamp_from_sql(ticks: i64) -> Result<DateTime<Utc>> {
    let since_epoch = i128::from(ticks) - i128::from(UNIX_EPOCH_TICKS);
    let per_second = i128::from(TICKS_PER_SECOND);
    let seconds = i64::try_from(since_epoch.div_euclid(per_second))
        .map_err(|_| Error::conversion(format!("tick count {ticks} is out of range")))?;
    // rem_euclid keeps the sub-second part below 10^7, so this fits a u32
    let nanos = since_epoch.rem_euclid(per_second) as u32 * NANOS_PER_TICK;
    DateTime::from_timestamp(seconds, nanos)
        .ok_or_else(|| Error::conversion(format!("tick count {ticks} is out of range")))
}
