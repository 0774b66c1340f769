//! Shared fixtures and contract scenarios for the backend integration tests

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use repokit_core::context::{ContextOptions, ConnectionProvider, RepositoryContext};
use repokit_core::record::Record;
use repokit_core::repository::{RecordMapping, Repository};
use repokit_core::storage::{
    Column, SqlRow, SqlValue, TableRecord, TableSchema, timestamp_from_sql, timestamp_to_sql,
};
use repokit_core::Result;

/// Application-facing model shared by every backend
#[derive(Debug, Clone, PartialEq)]
pub struct SampleModel {
    pub id: String,
    pub sample_int: i32,
    pub sample_string: String,
    pub timestamp: DateTime<Utc>,
}

/// Current time at the 100 ns tick precision the SQL backends store
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(7)
}

pub fn single_operations_data(index: usize) -> SampleModel {
    SampleModel {
        id: index.to_string(),
        sample_int: index as i32,
        sample_string: format!("Test item {index}"),
        timestamp: now(),
    }
}

pub fn bulk_operations_data(count: usize) -> Vec<SampleModel> {
    (1..=count).map(single_operations_data).collect()
}

// ========== SQL backends ==========

const SAMPLE_TABLE: TableSchema = TableSchema::new(
    "sample",
    &[
        Column::text("sample_string"),
        Column::integer("sample_int"),
        Column::integer("timestamp_ticks"),
    ],
);

/// Row shape stored by both SQL adapters
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub id: String,
    pub sample_string: String,
    pub sample_int: i32,
    pub timestamp_ticks: i64,
}

impl Record for SampleRow {
    fn id(&self) -> &str {
        &self.id
    }
}

impl TableRecord for SampleRow {
    fn schema() -> TableSchema {
        SAMPLE_TABLE
    }

    fn to_values(&self) -> Vec<SqlValue> {
        vec![
            self.sample_string.clone().into(),
            self.sample_int.into(),
            self.timestamp_ticks.into(),
        ]
    }

    fn from_row(row: SqlRow) -> Result<Self> {
        Ok(Self {
            id: row.id()?,
            sample_string: row.get_string("sample_string")?,
            sample_int: row.get_i32("sample_int")?,
            timestamp_ticks: row.get_i64("timestamp_ticks")?,
        })
    }
}

pub struct SampleRowMapping;

impl RecordMapping for SampleRowMapping {
    type Model = SampleModel;
    type Record = SampleRow;

    fn to_model(&self, record: SampleRow) -> Result<SampleModel> {
        Ok(SampleModel {
            id: record.id,
            sample_int: record.sample_int,
            sample_string: record.sample_string,
            timestamp: timestamp_from_sql(record.timestamp_ticks)?,
        })
    }

    fn to_record(&self, model: &SampleModel) -> Result<SampleRow> {
        Ok(SampleRow {
            id: model.id.clone(),
            sample_string: model.sample_string.clone(),
            sample_int: model.sample_int,
            timestamp_ticks: timestamp_to_sql(&model.timestamp)?,
        })
    }
}

// ========== In-memory backend ==========

/// Record kept by the in-memory adapter
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySampleRecord {
    pub id: String,
    pub sample_int: i32,
    pub sample_string: String,
    pub timestamp: DateTime<Utc>,
}

impl Record for MemorySampleRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

pub struct MemorySampleMapping;

impl RecordMapping for MemorySampleMapping {
    type Model = SampleModel;
    type Record = MemorySampleRecord;

    fn to_model(&self, record: MemorySampleRecord) -> Result<SampleModel> {
        Ok(SampleModel {
            id: record.id,
            sample_int: record.sample_int,
            sample_string: record.sample_string,
            timestamp: record.timestamp,
        })
    }

    fn to_record(&self, model: &SampleModel) -> Result<MemorySampleRecord> {
        Ok(MemorySampleRecord {
            id: model.id.clone(),
            sample_int: model.sample_int,
            sample_string: model.sample_string.clone(),
            timestamp: model.timestamp,
        })
    }
}

// ========== Contexts ==========

/// Context for a datastore under `folder` that does not pause after deletion
pub fn sample_context<P: ConnectionProvider>(folder: &Path, provider: P) -> RepositoryContext<P> {
    let options = ContextOptions {
        settle_delay: Duration::ZERO,
        ..Default::default()
    };
    RepositoryContext::with_options(folder, "sample", provider, options).unwrap()
}

// ========== Contract scenarios ==========

fn validate(item: Option<SampleModel>, comparison: &SampleModel, operation: &str) {
    let item = item.unwrap_or_else(|| {
        panic!("{operation} returned successfully but the item is missing")
    });
    assert_eq!(item.id, comparison.id, "id not persisted by {operation}");
    assert_eq!(
        item.sample_int, comparison.sample_int,
        "sample_int not persisted by {operation}"
    );
    assert_eq!(
        item.sample_string, comparison.sample_string,
        "sample_string not persisted by {operation}"
    );
    assert_eq!(
        item.timestamp, comparison.timestamp,
        "timestamp not persisted by {operation}"
    );
}

/// Operations keep working after the table is dropped
pub async fn drop_table_scenario(repo: &impl Repository<SampleModel>) {
    let sample = single_operations_data(0);

    repo.insert_item(&sample).await.unwrap();
    validate(repo.get_item(&sample.id).await.unwrap(), &sample, "insert_item");

    repo.drop_table().await.unwrap();
    assert!(repo.get().await.unwrap().is_empty());

    repo.insert_item(&sample).await.unwrap();
    validate(repo.get_item(&sample.id).await.unwrap(), &sample, "insert_item");
}

/// Insert, update, upsert (existing and new) and remove of single items
pub async fn single_operations_scenario(repo: &impl Repository<SampleModel>) {
    let sample = single_operations_data(0);

    repo.insert_item(&sample).await.unwrap();
    let mut item = repo.get_item(&sample.id).await.unwrap().unwrap();
    validate(Some(item.clone()), &sample, "insert_item");

    item.sample_int += 1;
    item.sample_string = format!("{} - UPDATED", item.sample_string);
    item.timestamp = now();
    repo.update_item(&item).await.unwrap();
    let mut updated = repo.get_item(&sample.id).await.unwrap().unwrap();
    validate(Some(updated.clone()), &item, "update_item");

    updated.sample_string = updated.sample_string.replace("UPDATED", "UPSERTED");
    repo.upsert_item(&updated).await.unwrap();
    validate(repo.get_item(&sample.id).await.unwrap(), &updated, "upsert_item");

    let new_item = SampleModel {
        id: format!("{}_new_upsert", sample.id),
        sample_int: 1,
        sample_string: "UPSERTED ITEM".to_string(),
        timestamp: now(),
    };
    repo.upsert_item(&new_item).await.unwrap();
    validate(repo.get_item(&new_item.id).await.unwrap(), &new_item, "upsert_item");
    assert_eq!(repo.get().await.unwrap().len(), 2);

    repo.remove_item(&updated).await.unwrap();
    assert!(repo.get_item(&sample.id).await.unwrap().is_none());
}

/// Insert, update and remove of item batches
pub async fn bulk_operations_scenario(repo: &impl Repository<SampleModel>) {
    let samples = bulk_operations_data(5);

    repo.insert(&samples).await.unwrap();
    let mut persisted = repo.get().await.unwrap();
    assert_eq!(persisted.len(), samples.len());
    for (item, sample) in persisted.iter().zip(&samples) {
        validate(Some(item.clone()), sample, "insert");
    }

    let updated_at = now();
    for item in &mut persisted {
        item.sample_int += 1;
        item.sample_string = format!("{} - UPDATED", item.sample_string);
        item.timestamp = updated_at;
    }
    repo.update(&persisted).await.unwrap();

    let updated = repo.get().await.unwrap();
    for (item, expected) in updated.iter().zip(&persisted) {
        validate(Some(item.clone()), expected, "update");
    }

    repo.remove(&updated).await.unwrap();
    assert!(repo.get().await.unwrap().is_empty());
}

/// Timestamps across the whole calendar survive a store and read back
pub async fn timestamp_range_scenario(repo: &impl Repository<SampleModel>) {
    let moments = [
        Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(1600, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap(),
    ];

    for (index, timestamp) in moments.into_iter().enumerate() {
        let mut sample = single_operations_data(index);
        sample.timestamp = timestamp;

        repo.insert_item(&sample).await.unwrap();
        validate(repo.get_item(&sample.id).await.unwrap(), &sample, "insert_item");
    }
}
