//! `SQLite` record store.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::sync::core::config::StorageConfig;
use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::core::ids::MemoryId;
use crate::sync::core::record::{MemoryRecord, MemoryUpdate};
use crate::sync::storage::memory_store::{MemoryStore, StoreFuture};

const COLUMNS: &str = "id, url, title, content, summary, domain, device_id, version, \
                       created_at, updated_at, processed, processing_error";

/// `SQLite` implementation of the record store.
pub struct SqliteMemoryStore {
    conn: Connection,
    table: String,
}

impl SqliteMemoryStore {
    /// Open (or create) the store at the configured path.
    ///
    /// # Errors
    /// Returns an error if no path is configured or the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> SyncResult<Self> {
        let path = config.sqlite_path.as_ref().ok_or_else(|| {
            SyncError::InvalidConfig("storage.sqlite_path is not set".to_string())
        })?;
        let conn = Connection::open(path).await?;
        Self::with_connection(conn, config.memory_table.clone()).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory(config: &StorageConfig) -> SyncResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn, config.memory_table.clone()).await
    }

    async fn with_connection(conn: Connection, table: String) -> SyncResult<Self> {
        let table_name = table.clone();
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    url TEXT NOT NULL,
                    title TEXT NOT NULL,
                    content TEXT NOT NULL,
                    summary TEXT,
                    domain TEXT NOT NULL,
                    device_id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    processed INTEGER NOT NULL,
                    processing_error TEXT
                );
                CREATE INDEX IF NOT EXISTS {table_name}_url ON {table_name}(url);
                CREATE INDEX IF NOT EXISTS {table_name}_updated_at ON {table_name}(updated_at);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }

    async fn select_one(
        &self,
        filter: &'static str,
        param: String,
    ) -> SyncResult<Option<MemoryRecord>> {
        let table = self.table.clone();
        let record = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!("SELECT {COLUMNS} FROM {table} WHERE {filter} = ?1"),
                        rusqlite::params![param],
                        row_to_record,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }
}

/// Timestamps are stored as nanoseconds so records read back compare equal.
fn to_nanos(at: DateTime<Utc>) -> rusqlite::Result<i64> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| rusqlite::Error::ToSqlConversionFailure("timestamp out of range".into()))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let version: i64 = row.get(7)?;
    let created_at: i64 = row.get(8)?;
    let updated_at: i64 = row.get(9)?;
    Ok(MemoryRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        summary: row.get(4)?,
        domain: row.get(5)?,
        device_id: row.get(6)?,
        version: u64::try_from(version)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(7, version))?,
        created_at: Utc.timestamp_nanos(created_at),
        updated_at: Utc.timestamp_nanos(updated_at),
        processed: row.get(10)?,
        processing_error: row.get(11)?,
    })
}

fn write_record(
    conn: &rusqlite::Connection,
    table: &str,
    record: &MemoryRecord,
) -> rusqlite::Result<()> {
    let version = i64::try_from(record.version)
        .map_err(|_| rusqlite::Error::ToSqlConversionFailure("version out of range".into()))?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {table} ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        rusqlite::params![
            record.id,
            record.url,
            record.title,
            record.content,
            record.summary,
            record.domain,
            record.device_id,
            version,
            to_nanos(record.created_at)?,
            to_nanos(record.updated_at)?,
            record.processed,
            record.processing_error,
        ],
    )?;
    Ok(())
}

impl MemoryStore for SqliteMemoryStore {
    fn get_by_id(&self, id: MemoryId) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>> {
        Box::pin(async move { self.select_one("id", id.to_string()).await })
    }

    fn get_by_url(&self, url: String) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>> {
        Box::pin(async move { self.select_one("url", url).await })
    }

    fn create(&self, record: MemoryRecord) -> StoreFuture<'_, SyncResult<MemoryRecord>> {
        Box::pin(async move {
            let table = self.table.clone();
            let stored = record.clone();
            self.conn
                .call(move |conn| {
                    write_record(conn, &table, &stored)?;
                    Ok(())
                })
                .await?;
            Ok(record)
        })
    }

    fn update_fields(
        &self,
        id: MemoryId,
        update: MemoryUpdate,
    ) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let record = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let current = tx
                        .query_row(
                            &format!("SELECT {COLUMNS} FROM {table} WHERE id = ?1"),
                            rusqlite::params![id],
                            row_to_record,
                        )
                        .optional()?;
                    let Some(mut record) = current else {
                        return Ok(None);
                    };
                    record.apply(update);
                    write_record(&tx, &table, &record)?;
                    tx.commit()?;
                    Ok(Some(record))
                })
                .await?;
            Ok(record)
        })
    }

    fn get_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> StoreFuture<'_, SyncResult<Vec<MemoryRecord>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let since = to_nanos(since)?;
            let records = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLUMNS} FROM {table} WHERE updated_at > ?1 ORDER BY updated_at ASC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![since], row_to_record)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(records)
        })
    }

    fn get_most_recent(&self, limit: usize) -> StoreFuture<'_, SyncResult<Vec<MemoryRecord>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let records = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLUMNS} FROM {table} ORDER BY updated_at DESC LIMIT ?1"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![limit], row_to_record)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(records)
        })
    }

    fn delete(&self, id: MemoryId) -> StoreFuture<'_, SyncResult<bool>> {
        Box::pin(async move {
            let table = self.table.clone();
            let deleted = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        &format!("DELETE FROM {table} WHERE id = ?1"),
                        rusqlite::params![id],
                    )?;
                    Ok(changed > 0)
                })
                .await?;
            Ok(deleted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::sync::core::ids::DeviceId;
    use crate::sync::core::record::NewMemory;

    async fn store() -> SqliteMemoryStore {
        SqliteMemoryStore::open_in_memory(&StorageConfig::default())
            .await
            .unwrap()
    }

    fn record(url: &str) -> MemoryRecord {
        MemoryRecord::from_new(NewMemory {
            url: url.to_string(),
            title: "T".to_string(),
            content: "C".to_string(),
            device_id: DeviceId::new("laptop").unwrap(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_back_exactly() {
        let store = store().await;
        let created = store.create(record("https://x.com/a")).await.unwrap();

        assert_eq!(store.get_by_id(created.id).await.unwrap(), Some(created.clone()));
        assert_eq!(
            store.get_by_url("https://x.com/a".to_string()).await.unwrap(),
            Some(created)
        );
    }

    #[tokio::test]
    async fn test_update_fields_persists() {
        let store = store().await;
        let created = store.create(record("https://x.com/a")).await.unwrap();

        let updated = store
            .update_fields(
                created.id,
                MemoryUpdate::recapture("New".to_string(), "Body".to_string()),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(store.get_by_id(created.id).await.unwrap(), Some(updated));

        let missing = store
            .update_fields(MemoryId::new(), MemoryUpdate::default())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delta_and_bootstrap_queries() {
        let store = store().await;
        let first = store.create(record("https://x.com/1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let watermark = Utc::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.create(record("https://x.com/2")).await.unwrap();

        assert_eq!(store.get_updated_since(watermark).await.unwrap(), vec![second.clone()]);
        assert_eq!(
            store.get_most_recent(5).await.unwrap(),
            vec![second, first.clone()]
        );

        assert!(store.delete(first.id).await.unwrap());
        assert!(store.get_by_id(first.id).await.unwrap().is_none());
    }
}
