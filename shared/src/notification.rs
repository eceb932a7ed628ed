//! Decoding of queued storage-change notifications.
//!
//! A queued message body either carries the S3 event itself or an SNS envelope whose
//! `Message` is the S3 event serialized once more. Object keys arrive form-encoded.

use aws_lambda_events::event::s3::{S3Event, S3EventRecord};
use percent_encoding::percent_decode_str;
use serde_json::Value;

use crate::error::{PipelineError, Result};

const TEST_EVENT: &str = "s3:TestEvent";

/// One changed object, with its key already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub bucket: String,
    pub key: String,
}

impl TryFrom<S3EventRecord> for Notification {
    type Error = PipelineError;

    fn try_from(record: S3EventRecord) -> Result<Self> {
        let bucket = record
            .s3
            .bucket
            .name
            .ok_or_else(|| PipelineError::malformed("S3 record has no bucket name"))?;
        let key = record
            .s3
            .object
            .key
            .ok_or_else(|| PipelineError::malformed("S3 record has no object key"))?;

        Ok(Notification {
            bucket,
            key: decode_key(&key)?,
        })
    }
}

/// Decodes a raw message body into its notifications, in the order they appear.
pub fn decode(body: &str) -> Result<Vec<Notification>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PipelineError::malformed(format!("message body is not JSON: {}", e)))?;

    decode_value(value, true)
}

fn decode_value(value: Value, allow_envelope: bool) -> Result<Vec<Notification>> {
    if value.get("Records").is_some() {
        let event: S3Event = serde_json::from_value(value)
            .map_err(|e| PipelineError::malformed(format!("invalid S3 event: {}", e)))?;

        return event
            .records
            .into_iter()
            .map(Notification::try_from)
            .collect();
    }

    if value.get("Event").and_then(Value::as_str) == Some(TEST_EVENT) {
        tracing::info!("Ignoring S3 test event");
        return Ok(vec![]);
    }

    match value.get("Message").and_then(Value::as_str) {
        Some(inner) if allow_envelope => {
            let inner: Value = serde_json::from_str(inner).map_err(|e| {
                PipelineError::malformed(format!("envelope message is not JSON: {}", e))
            })?;

            decode_value(inner, false)
        }
        _ => Err(PipelineError::malformed(
            "expected an S3 event with 'Records' or an envelope with a 'Message'",
        )),
    }
}

/// Reverses the form encoding S3 applies to keys in event payloads (`+` is a space).
pub fn decode_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");

    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| {
            PipelineError::malformed(format!("object key '{}' is not UTF-8: {}", raw, e))
        })
}
