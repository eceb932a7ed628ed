//! Run records: one DynamoDB row per processed image, keyed by the image's file name.
//!
//! Rows are written with `put_item`, so processing the same image again replaces the
//! previous row. That overwrite is what keeps redelivered messages harmless here.

use aws_sdk_dynamodb as dynamo_db;
use dynamo_db::error::SdkError;
use dynamo_db::operation::put_item::PutItemError;
use dynamo_db::types::AttributeValue;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use tracing::info;

use crate::error::{PipelineError, Result};

const IMAGE_ID: &str = "ImageID";
const STATUS: &str = "Status";
const SOURCE_KEY: &str = "SourceKey";
const PROCESSED_KEY: &str = "ProcessedKey";
const PROCESSED_SIZE: &str = "ProcessedSize";
const TARGET_WIDTH: &str = "TargetWidth";
const PROCESSING_TIMESTAMP: &str = "ProcessingTimestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Processed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Processed => "processed",
            RunStatus::Error => "error",
        }
    }
}

impl FromStr for RunStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "processed" => Ok(RunStatus::Processed),
            "error" => Ok(RunStatus::Error),
            other => Err(PipelineError::metadata_read(format!(
                "unknown run status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    /// Base name of the source key; the table's partition key.
    pub object_id: String,
    pub status: RunStatus,
    pub source_key: String,
    pub destination_key: String,
    pub output_size: u64,
    pub target_width: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

impl RunRecord {
    pub fn to_item(&self) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (IMAGE_ID.to_string(), AttributeValue::S(self.object_id.clone())),
            (
                STATUS.to_string(),
                AttributeValue::S(self.status.as_str().to_string()),
            ),
            (SOURCE_KEY.to_string(), AttributeValue::S(self.source_key.clone())),
            (
                PROCESSED_KEY.to_string(),
                AttributeValue::S(self.destination_key.clone()),
            ),
            (
                PROCESSED_SIZE.to_string(),
                AttributeValue::N(self.output_size.to_string()),
            ),
            (
                TARGET_WIDTH.to_string(),
                AttributeValue::N(self.target_width.to_string()),
            ),
            (
                PROCESSING_TIMESTAMP.to_string(),
                AttributeValue::N(self.timestamp.to_string()),
            ),
        ])
    }

    pub fn from_item(item: &HashMap<String, AttributeValue>) -> Result<RunRecord> {
        Ok(RunRecord {
            object_id: string_attr(item, IMAGE_ID)?,
            status: string_attr(item, STATUS)?.parse()?,
            source_key: string_attr(item, SOURCE_KEY)?,
            destination_key: string_attr(item, PROCESSED_KEY)?,
            output_size: number_attr(item, PROCESSED_SIZE)?,
            target_width: number_attr(item, TARGET_WIDTH)?,
            timestamp: number_attr(item, PROCESSING_TIMESTAMP)?,
        })
    }
}

fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> Result<String> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .cloned()
        .ok_or_else(|| {
            PipelineError::metadata_read(format!("attribute '{}' missing or not a string", name))
        })
}

fn number_attr<T: FromStr>(item: &HashMap<String, AttributeValue>, name: &str) -> Result<T> {
    item.get(name)
        .and_then(|value| value.as_n().ok())
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| {
            PipelineError::metadata_read(format!("attribute '{}' missing or not a number", name))
        })
}

/// Port for the metadata store: upsert and lookup by object id.
pub trait MetadataStore: Send + Sync {
    fn put(&self, record: &RunRecord) -> impl Future<Output = Result<()>> + Send;

    /// Writes `record` only when no row exists for its object id, atomically.
    /// Returns whether the row was written.
    fn put_if_absent(&self, record: &RunRecord) -> impl Future<Output = Result<bool>> + Send;

    fn get(&self, object_id: &str) -> impl Future<Output = Result<Option<RunRecord>>> + Send;
}

#[derive(Clone)]
pub struct DynamoMetadataStore {
    client: dynamo_db::Client,
    table: String,
}

impl DynamoMetadataStore {
    pub fn new(client: dynamo_db::Client, table: impl Into<String>) -> Self {
        DynamoMetadataStore {
            client,
            table: table.into(),
        }
    }
}

impl MetadataStore for DynamoMetadataStore {
    async fn put(&self, record: &RunRecord) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(record.to_item()))
            .send()
            .await
            .map_err(|err| {
                PipelineError::metadata(format!(
                    "put_item into {} failed for '{}': {}",
                    self.table, record.object_id, err
                ))
            })?;

        Ok(())
    }

    async fn put_if_absent(&self, record: &RunRecord) -> Result<bool> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(record.to_item()))
            .condition_expression(format!("attribute_not_exists({})", IMAGE_ID))
            .send()
            .await;

        conditional_put_outcome(result, &self.table, &record.object_id)
    }

    async fn get(&self, object_id: &str) -> Result<Option<RunRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(IMAGE_ID, AttributeValue::S(object_id.to_string()))
            .send()
            .await
            .map_err(|err| {
                PipelineError::metadata_read(format!(
                    "get_item from {} failed for '{}': {}",
                    self.table, object_id, err
                ))
            })?;

        output.item().map(RunRecord::from_item).transpose()
    }
}

/// A failed `attribute_not_exists` condition means another writer got there first.
fn conditional_put_outcome<T>(
    result: std::result::Result<T, SdkError<PutItemError>>,
    table: &str,
    object_id: &str,
) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(err)
            if err
                .as_service_error()
                .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
        {
            Ok(false)
        }
        Err(err) => Err(PipelineError::metadata(format!(
            "conditional put_item into {} failed for '{}': {}",
            table, object_id, err
        ))),
    }
}

pub struct RunRecorder<M> {
    store: M,
}

impl<M> RunRecorder<M>
where
    M: MetadataStore,
{
    pub fn new(store: M) -> Self {
        RunRecorder { store }
    }

    pub fn store(&self) -> &M {
        &self.store
    }

    pub async fn record(&self, record: &RunRecord) -> Result<()> {
        self.store.put(record).await?;
        info!(
            object_id = %record.object_id,
            status = record.status.as_str(),
            "Metadata saved"
        );

        Ok(())
    }

    /// Records `record` unless the object already has a row. Returns whether it was written.
    pub async fn record_if_absent(&self, record: &RunRecord) -> Result<bool> {
        let written = self.store.put_if_absent(record).await?;
        if written {
            info!(
                object_id = %record.object_id,
                status = record.status.as_str(),
                "Metadata saved"
            );
        }

        Ok(written)
    }

    pub async fn lookup(&self, object_id: &str) -> Result<Option<RunRecord>> {
        self.store.get(object_id).await
    }
}
