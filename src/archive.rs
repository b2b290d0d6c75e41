//! Date/time-partitioned JSON archival of validated batches.
//!
//! One cycle writes at most one object per record kind, under a key that is
//! a pure function of kind and the cycle timestamp. Retries with the same
//! timestamp overwrite the object instead of duplicating it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::records::RecordKind;

/// Seam over the blob backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()>;
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
}

/// S3-backed [`ObjectStore`].
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(config: &aws_config::SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .content_type("application/json")
            .send()
            .await?;

        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await?;

        Ok(resp
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect())
    }
}

/// Writes validated batches as one JSON array per partition key.
pub struct BlobArchiver<O: ObjectStore> {
    store: O,
}

impl<O: ObjectStore> BlobArchiver<O> {
    pub fn new(store: O) -> Self {
        Self { store }
    }

    /// Object key for a batch: day partition plus a second-resolution
    /// object name, `transit/{kind}/{YYYYMMDD}/{YYYYMMDD_HHMMSS}.json`.
    pub fn partition_key(kind: RecordKind, timestamp: DateTime<Utc>) -> String {
        format!(
            "transit/{}/{}/{}.json",
            kind.as_str(),
            timestamp.format("%Y%m%d"),
            timestamp.format("%Y%m%d_%H%M%S"),
        )
    }

    /// Uploads one batch and returns its object key. Empty input writes
    /// nothing and returns `Ok(None)`. The caller supplies one stable
    /// timestamp per invocation; re-archiving under it overwrites.
    pub async fn archive<T: Serialize>(
        &self,
        records: &[T],
        kind: RecordKind,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<String>> {
        if records.is_empty() {
            debug!(kind = kind.as_str(), "No records to archive");
            return Ok(None);
        }

        let key = Self::partition_key(kind, timestamp);
        let body = serde_json::to_vec(records)?;

        self.store.put_object(&key, body).await?;
        info!(kind = kind.as_str(), count = records.len(), key, "Batch archived");

        Ok(Some(key))
    }

    /// Lists the archived object keys for one day.
    pub async fn list_partitions(&self, kind: RecordKind, date: NaiveDate) -> Result<Vec<String>> {
        let prefix = format!("transit/{}/{}/", kind.as_str(), date.format("%Y%m%d"));
        self.store.list_objects(&prefix).await
    }
}
