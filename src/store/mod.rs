//! Time-bucketed persistence for harvested batches
//!
//! Batches are reconciled against a per-target collection keyed by a
//! coarse wall-clock second, not by content identity: a second write
//! landing in the same second appends to the existing bucket, and a write
//! in a new second creates a new bucket. Buckets are append-only.

mod memory;
mod sqlite;

pub use memory::MemoryBucketStore;
pub use sqlite::SqliteBucketStore;

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::HarvestError;
use crate::extract::{EventRecord, HarvestBatch};

/// Bucket key format: wall-clock time at one-second resolution,
/// fixed-width.
pub const BUCKET_KEY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The persisted unit: all events written under one `(collection, key)`.
///
/// At most one bucket exists per exact key per collection. Buckets are
/// created on first write, appended to by later writes within the same
/// key, and never deleted or otherwise mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Creation-time key at one-second granularity
    pub bucket_key: String,

    /// Target name, lowercased
    pub target: String,

    /// Ordered events; earlier writes first
    pub events: Vec<EventRecord>,
}

/// Persistence capability the writer reconciles through.
///
/// The writer's find-then-insert-or-append branch spans separate calls, so
/// implementations enforce key uniqueness themselves: `insert_bucket`
/// rejects a key that already exists, and `append_events` computes its
/// insertion point atomically (the SQLite store runs it in one
/// transaction). A concurrent create race surfaces as an insert error,
/// never a lost update.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Look up the bucket with this exact key, if any.
    async fn find_bucket(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Bucket>, HarvestError>;

    /// Create a new bucket. The key must not already exist in the
    /// collection.
    async fn insert_bucket(&self, collection: &str, bucket: Bucket) -> Result<(), HarvestError>;

    /// Append events to an existing bucket, after its current events.
    async fn append_events(
        &self,
        collection: &str,
        key: &str,
        events: &[EventRecord],
    ) -> Result<(), HarvestError>;

    /// All buckets of a collection, oldest first.
    async fn list_buckets(&self, collection: &str) -> Result<Vec<Bucket>, HarvestError>;
}

/// Current wall-clock bucket key.
#[must_use]
pub fn bucket_key_now() -> String {
    Local::now().format(BUCKET_KEY_FORMAT).to_string()
}

/// Persist a batch for `target` under the current wall-clock bucket key.
///
/// An empty batch is still written as an empty-events bucket. Returns the
/// key the batch landed under.
pub async fn write_batch<S: BucketStore + ?Sized>(
    store: &S,
    target: &str,
    events: HarvestBatch,
) -> Result<String, HarvestError> {
    let key = bucket_key_now();
    write_batch_with_key(store, target, events, &key).await?;
    Ok(key)
}

/// Persist a batch under an explicit bucket key.
///
/// Append-or-create: if a bucket with this key already exists in the
/// target's collection the incoming events go after its current ones,
/// otherwise a new bucket is created. The key only merges writes that
/// land in the same second; it does not deduplicate repeated content
/// across keys.
pub async fn write_batch_with_key<S: BucketStore + ?Sized>(
    store: &S,
    target: &str,
    events: HarvestBatch,
    key: &str,
) -> Result<(), HarvestError> {
    let collection = target.trim().to_lowercase();
    let count = events.len();

    match store.find_bucket(&collection, key).await? {
        Some(_) => {
            store.append_events(&collection, key, &events).await?;
            info!(
                "Appended {} events to existing bucket '{}' in '{}'",
                count, key, collection
            );
        }
        None => {
            store
                .insert_bucket(
                    &collection,
                    Bucket {
                        bucket_key: key.to_string(),
                        target: collection.clone(),
                        events,
                    },
                )
                .await?;
            info!(
                "Created bucket '{}' in '{}' with {} events",
                key, collection, count
            );
        }
    }
    Ok(())
}
