//! In-memory collaborators for tests.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{PipelineError, Result};
use crate::record::{MetadataStore, RunRecord};
use crate::transfer::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), StoredObject>>>,
    gets: Arc<AtomicUsize>,
    fail_puts: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                content_type: None,
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }
}

impl ObjectStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);

        self.object(bucket, key)
            .map(|object| object.body)
            .ok_or_else(|| PipelineError::not_found(bucket, key))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(PipelineError::transfer(format!("put to {} refused", key)));
        }

        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject { body, content_type },
        );

        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryMetadata {
    rows: Arc<Mutex<HashMap<String, RunRecord>>>,
    fail_puts: Arc<AtomicBool>,
    concurrent_write: Arc<Mutex<Option<RunRecord>>>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn row(&self, object_id: &str) -> Option<RunRecord> {
        self.rows.lock().unwrap().get(object_id).cloned()
    }

    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    /// Lands `record` just before the next conditional write, as another invocation would.
    pub fn write_before_next_conditional_put(&self, record: RunRecord) {
        *self.concurrent_write.lock().unwrap() = Some(record);
    }
}

impl MetadataStore for MemoryMetadata {
    async fn put(&self, record: &RunRecord) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(PipelineError::metadata("table unavailable"));
        }

        self.rows
            .lock()
            .unwrap()
            .insert(record.object_id.clone(), record.clone());

        Ok(())
    }

    async fn put_if_absent(&self, record: &RunRecord) -> Result<bool> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(PipelineError::metadata("table unavailable"));
        }

        let mut rows = self.rows.lock().unwrap();
        if let Some(other) = self.concurrent_write.lock().unwrap().take() {
            rows.insert(other.object_id.clone(), other);
        }
        if rows.contains_key(&record.object_id) {
            return Ok(false);
        }
        rows.insert(record.object_id.clone(), record.clone());

        Ok(true)
    }

    async fn get(&self, object_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.row(object_id))
    }
}

/// Writes a PNG gradient of the given size, whatever the file name says.
pub fn write_test_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);

    image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
    .save_with_format(&path, image::ImageFormat::Png)
    .unwrap();

    path
}

/// PNG bytes as an uploaded object would carry them.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(vec![]);

    image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]))
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();

    bytes.into_inner()
}

/// One S3 event record as the storage service sends it.
pub fn s3_record(bucket: &str, key: &str) -> Value {
    json!({
        "eventVersion": "2.1",
        "eventSource": "aws:s3",
        "awsRegion": "eu-west-1",
        "eventTime": "2026-10-19T12:00:00.000Z",
        "eventName": "ObjectCreated:Put",
        "userIdentity": { "principalId": "AWS:AIDAEXAMPLE" },
        "requestParameters": { "sourceIPAddress": "203.0.113.10" },
        "responseElements": {
            "x-amz-request-id": "C3D13FE58DE4C810",
            "x-amz-id-2": "FMyUVURIY8/IgAtTv8xRjskZQpcIZ9KG4V5Wp6S7S/JRWeUWerMUE5JgHvANOjpD"
        },
        "s3": {
            "s3SchemaVersion": "1.0",
            "configurationId": "image-uploads",
            "bucket": {
                "name": bucket,
                "ownerIdentity": { "principalId": "A3NL1KOZZKExample" },
                "arn": format!("arn:aws:s3:::{}", bucket)
            },
            "object": {
                "key": key,
                "size": 1024,
                "eTag": "d41d8cd98f00b204e9800998ecf8427e",
                "sequencer": "0055AED6DCD90281E5"
            }
        }
    })
}

/// An S3 event carrying one record per key.
pub fn s3_event(bucket: &str, keys: &[&str]) -> Value {
    json!({
        "Records": keys.iter().map(|key| s3_record(bucket, key)).collect::<Vec<_>>()
    })
}
