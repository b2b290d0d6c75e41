//! Key-value persistence of validated records.
//!
//! Items are addressed by the pk/sk contract in [`crate::records`], stamped
//! with a `record_type` discriminator, and written in chunks of at most
//! [`BATCH_MAX_ITEMS`]. Every write is an idempotent snapshot upsert, so
//! overlapping invocations and next-tick retries land on the same keys.
//!
//! Numbers cross the wire as exact decimal strings (`AttributeValue::N`)
//! rather than binary floats, recursively through nested values, and are
//! parsed back to native numbers on read.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::records::{RecordKind, StoreRecord};

/// DynamoDB's per-call item ceiling for batch writes.
pub const BATCH_MAX_ITEMS: usize = 25;

/// Hard cap on items returned by a cross-route scan.
pub const MAX_SCAN_ITEMS: usize = 5_000;

pub type Item = HashMap<String, AttributeValue>;

/// Seam over the key-value backend.
#[async_trait]
pub trait KeyValueTable: Send + Sync {
    /// Writes up to [`BATCH_MAX_ITEMS`] items; returns how many landed.
    async fn put_items(&self, items: Vec<Item>) -> Result<usize>;

    /// Items of one partition, most recent first.
    async fn query_partition(&self, pk: &str, limit: usize) -> Result<Vec<Item>>;

    /// Best-effort paged scan filtered by `record_type`, capped at `limit`.
    async fn scan_by_type(&self, record_type: &str, limit: usize) -> Result<Vec<Item>>;
}

/// DynamoDB-backed [`KeyValueTable`].
pub struct DynamoTable {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl DynamoTable {
    pub fn new(config: &aws_config::SdkConfig, table_name: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_dynamodb::Client::new(config),
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl KeyValueTable for DynamoTable {
    async fn put_items(&self, items: Vec<Item>) -> Result<usize> {
        let total = items.len();

        let mut requests = Vec::with_capacity(total);
        for item in items {
            let put = PutRequest::builder().set_item(Some(item)).build()?;
            requests.push(WriteRequest::builder().put_request(put).build());
        }

        let resp = self
            .client
            .batch_write_item()
            .request_items(&self.table_name, requests)
            .send()
            .await?;

        let unprocessed = resp
            .unprocessed_items()
            .and_then(|tables| tables.get(&self.table_name))
            .map_or(0, Vec::len);
        if unprocessed > 0 {
            // No in-invocation retry: the next tick rewrites the same keys.
            warn!(unprocessed, table = %self.table_name, "Batch left items unprocessed");
        }

        Ok(total - unprocessed)
    }

    async fn query_partition(&self, pk: &str, limit: usize) -> Result<Vec<Item>> {
        let resp = self
            .client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression("pk = :pk")
            .expression_attribute_values(":pk", AttributeValue::S(pk.to_string()))
            .scan_index_forward(false)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .send()
            .await?;

        Ok(resp.items().to_vec())
    }

    async fn scan_by_type(&self, record_type: &str, limit: usize) -> Result<Vec<Item>> {
        let cap = limit.min(MAX_SCAN_ITEMS);
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let remaining = cap - items.len();
            if remaining == 0 {
                break;
            }

            let resp = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("record_type = :t")
                .expression_attribute_values(":t", AttributeValue::S(record_type.to_string()))
                .limit(i32::try_from(remaining).unwrap_or(i32::MAX))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await?;

            items.extend(resp.items().iter().cloned());

            match resp.last_evaluated_key() {
                Some(key) if items.len() < cap => start_key = Some(key.clone()),
                _ => break,
            }
        }

        items.truncate(cap);
        debug!(record_type, count = items.len(), "Scan complete");
        Ok(items)
    }
}

/// Chunked, idempotent upserts plus the downstream read contract.
pub struct RecordStore<T: KeyValueTable + 'static> {
    table: Arc<T>,
    write_concurrency: usize,
}

impl<T: KeyValueTable + 'static> RecordStore<T> {
    pub fn new(table: T, write_concurrency: usize) -> Self {
        Self {
            table: Arc::new(table),
            write_concurrency: write_concurrency.max(1),
        }
    }

    /// Upserts one batch; returns how many items were written. Chunks are
    /// dispatched concurrently under a semaphore; a failed chunk or item is
    /// logged and counted out without aborting the rest.
    pub async fn upsert<R: StoreRecord>(&self, records: &[R]) -> usize {
        if records.is_empty() {
            return 0;
        }

        let mut items = Vec::with_capacity(records.len());
        for record in records {
            match to_item(record) {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(error = %e, record_type = R::RECORD_TYPE, "Record not representable as an item, skipping");
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.write_concurrency));
        let mut tasks = Vec::new();

        for chunk in items.chunks(BATCH_MAX_ITEMS) {
            let chunk = chunk.to_vec();
            let table = Arc::clone(&self.table);
            let semaphore = Arc::clone(&semaphore);

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();

                match table.put_items(chunk).await {
                    Ok(written) => written,
                    Err(e) => {
                        error!(error = %e, "Chunk write failed");
                        0
                    }
                }
            }));
        }

        let mut written = 0;
        for task in tasks {
            written += task.await.unwrap_or(0);
        }

        info!(
            written,
            total = records.len(),
            record_type = R::RECORD_TYPE,
            "Batch upsert complete"
        );
        written
    }

    /// Most-recent-first by route, or a capped best-effort scan across
    /// routes when no route filter is given.
    pub async fn query_recent(
        &self,
        kind: RecordKind,
        route_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let items = match route_id {
            Some(route) => {
                self.table
                    .query_partition(&kind.partition_key(route), limit)
                    .await?
            }
            None => self.table.scan_by_type(kind.record_type(), limit).await?,
        };

        Ok(items.iter().map(item_to_json).collect())
    }
}

/// Builds the stored item for a record: addressing keys, the type
/// discriminator, then every record field.
pub fn to_item<R: StoreRecord>(record: &R) -> Result<Item> {
    let value = serde_json::to_value(record)?;
    let Value::Object(fields) = value else {
        anyhow::bail!("record did not serialize to an object");
    };

    let mut item = Item::new();
    item.insert("pk".to_string(), AttributeValue::S(record.partition_key()));
    item.insert("sk".to_string(), AttributeValue::S(record.sort_key()));
    item.insert(
        "record_type".to_string(),
        AttributeValue::S(R::RECORD_TYPE.to_string()),
    );

    for (name, field) in fields {
        item.insert(name, to_attribute_value(&field));
    }

    Ok(item)
}

/// JSON → attribute value. Numbers keep their exact shortest decimal
/// rendering, so measurement-like floats round-trip without binary drift.
pub fn to_attribute_value(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => {
            AttributeValue::L(values.iter().map(to_attribute_value).collect())
        }
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute_value(v)))
                .collect(),
        ),
    }
}

/// Inverse of [`to_attribute_value`], for reads. Binary and set values have
/// no JSON equivalent here and come back as null.
pub fn from_attribute_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::N(n) => n
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| n.parse::<f64>().map(Value::from))
            .unwrap_or(Value::Null),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::L(values) => {
            Value::Array(values.iter().map(from_attribute_value).collect())
        }
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_attribute_value(v)))
                .collect(),
        ),
        _ => Value::Null,
    }
}

/// Renders a stored item back as JSON for downstream consumers.
pub fn item_to_json(item: &Item) -> Value {
    Value::Object(
        item.iter()
            .map(|(k, v)| (k.clone(), from_attribute_value(v)))
            .collect(),
    )
}
