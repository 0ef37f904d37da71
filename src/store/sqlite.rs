//! SQLite-backed bucket store
//!
//! Buckets and their events live in two tables; the `(collection,
//! bucket_key)` pair is unique, and event rows carry a per-bucket
//! sequence number so append order survives the round-trip. The
//! lookup-then-write of an append runs inside one transaction, which
//! keeps a concurrent redesign of the run loop from losing updates.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use super::{Bucket, BucketStore};
use crate::error::HarvestError;
use crate::extract::EventRecord;

/// SQL schema for the bucket store
const SCHEMA_SQL: &str = r#"
-- One row per (collection, bucket_key)
CREATE TABLE IF NOT EXISTS buckets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    bucket_key TEXT NOT NULL,
    UNIQUE(collection, bucket_key)
);

CREATE INDEX IF NOT EXISTS idx_buckets_collection ON buckets(collection);

-- Ordered events within a bucket
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bucket_id INTEGER NOT NULL REFERENCES buckets(id),
    seq INTEGER NOT NULL,
    occurred_at TEXT NOT NULL,
    source_ref TEXT NOT NULL,
    summary TEXT NOT NULL,
    image_ref TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_bucket ON events(bucket_id, seq);
"#;

/// Bucket store on a local SQLite file.
#[derive(Clone)]
pub struct SqliteBucketStore {
    pool: SqlitePool,
}

impl SqliteBucketStore {
    /// Open the database at `path`, creating file and schema if missing.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("Failed to initialize database schema")?;

        Ok(Self { pool })
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn bucket_id(&self, collection: &str, key: &str) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM buckets WHERE collection = ? AND bucket_key = ?")
                .bind(collection)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query bucket")?;
        Ok(row.map(|(id,)| id))
    }

    async fn events_for(&self, bucket_id: i64) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(
            "SELECT occurred_at, source_ref, summary, image_ref \
             FROM events WHERE bucket_id = ? ORDER BY seq",
        )
        .bind(bucket_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query events")?;

        Ok(rows
            .into_iter()
            .map(|row| EventRecord {
                occurred_at: row.get("occurred_at"),
                source_ref: row.get("source_ref"),
                summary: row.get("summary"),
                image_ref: row.get("image_ref"),
            })
            .collect())
    }
}

#[async_trait]
impl BucketStore for SqliteBucketStore {
    async fn find_bucket(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Bucket>, HarvestError> {
        let Some(id) = self.bucket_id(collection, key).await? else {
            return Ok(None);
        };
        let events = self.events_for(id).await?;
        Ok(Some(Bucket {
            bucket_key: key.to_string(),
            target: collection.to_string(),
            events,
        }))
    }

    async fn insert_bucket(&self, collection: &str, bucket: Bucket) -> Result<(), HarvestError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let result = sqlx::query("INSERT INTO buckets (collection, bucket_key) VALUES (?, ?)")
            .bind(collection)
            .bind(&bucket.bucket_key)
            .execute(&mut *tx)
            .await
            .context("Failed to insert bucket")?;
        let bucket_id = result.last_insert_rowid();

        for (seq, event) in bucket.events.iter().enumerate() {
            sqlx::query(
                "INSERT INTO events (bucket_id, seq, occurred_at, source_ref, summary, image_ref) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(bucket_id)
            .bind(seq as i64)
            .bind(&event.occurred_at)
            .bind(&event.source_ref)
            .bind(&event.summary)
            .bind(&event.image_ref)
            .execute(&mut *tx)
            .await
            .context("Failed to insert event")?;
        }

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }

    async fn append_events(
        &self,
        collection: &str,
        key: &str,
        events: &[EventRecord],
    ) -> Result<(), HarvestError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let (bucket_id,): (i64,) =
            sqlx::query_as("SELECT id FROM buckets WHERE collection = ? AND bucket_key = ?")
                .bind(collection)
                .bind(key)
                .fetch_one(&mut *tx)
                .await
                .context("Bucket to append to does not exist")?;

        let (next_seq,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(seq) + 1, 0) FROM events WHERE bucket_id = ?")
                .bind(bucket_id)
                .fetch_one(&mut *tx)
                .await
                .context("Failed to compute next sequence number")?;

        for (offset, event) in events.iter().enumerate() {
            sqlx::query(
                "INSERT INTO events (bucket_id, seq, occurred_at, source_ref, summary, image_ref) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(bucket_id)
            .bind(next_seq + offset as i64)
            .bind(&event.occurred_at)
            .bind(&event.source_ref)
            .bind(&event.summary)
            .bind(&event.image_ref)
            .execute(&mut *tx)
            .await
            .context("Failed to append event")?;
        }

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }

    async fn list_buckets(&self, collection: &str) -> Result<Vec<Bucket>, HarvestError> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, bucket_key FROM buckets WHERE collection = ? ORDER BY id")
                .bind(collection)
                .fetch_all(&self.pool)
                .await
                .context("Failed to list buckets")?;

        let mut buckets = Vec::with_capacity(rows.len());
        for (id, bucket_key) in rows {
            let events = self.events_for(id).await?;
            buckets.push(Bucket {
                bucket_key,
                target: collection.to_string(),
                events,
            });
        }
        Ok(buckets)
    }
}
