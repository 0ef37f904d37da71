//! In-memory bucket store for tests and dry runs

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Bucket, BucketStore};
use crate::error::HarvestError;
use crate::extract::EventRecord;

/// Bucket store backed by a map of collection name to bucket list.
///
/// Buckets keep insertion order, which doubles as oldest-first for
/// `list_buckets`.
#[derive(Default)]
pub struct MemoryBucketStore {
    collections: RwLock<HashMap<String, Vec<Bucket>>>,
}

impl MemoryBucketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn find_bucket(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Bucket>, HarvestError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|buckets| buckets.iter().find(|b| b.bucket_key == key))
            .cloned())
    }

    async fn insert_bucket(&self, collection: &str, bucket: Bucket) -> Result<(), HarvestError> {
        let mut collections = self.collections.write().await;
        let buckets = collections.entry(collection.to_string()).or_default();
        if buckets.iter().any(|b| b.bucket_key == bucket.bucket_key) {
            return Err(HarvestError::Storage(anyhow::anyhow!(
                "bucket '{}' already exists in '{}'",
                bucket.bucket_key,
                collection
            )));
        }
        buckets.push(bucket);
        Ok(())
    }

    async fn append_events(
        &self,
        collection: &str,
        key: &str,
        events: &[EventRecord],
    ) -> Result<(), HarvestError> {
        let mut collections = self.collections.write().await;
        let bucket = collections
            .get_mut(collection)
            .and_then(|buckets| buckets.iter_mut().find(|b| b.bucket_key == key))
            .ok_or_else(|| {
                HarvestError::Storage(anyhow::anyhow!(
                    "no bucket '{}' in collection '{}'",
                    key,
                    collection
                ))
            })?;
        bucket.events.extend_from_slice(events);
        Ok(())
    }

    async fn list_buckets(&self, collection: &str) -> Result<Vec<Bucket>, HarvestError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }
}
