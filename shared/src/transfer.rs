//! Moving objects between the bucket and local scratch storage.

use aws_sdk_s3 as s3;
use s3::error::SdkError;
use s3::operation::get_object::GetObjectError;
use s3::primitives::ByteStream;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};

/// Port for the object store, keyed by (bucket, key).
pub trait ObjectStore: Send + Sync {
    fn get(&self, bucket: &str, key: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Overwrites any object already stored at `key`.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<String>,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: s3::Client) -> Self {
        S3ObjectStore { client }
    }
}

impl ObjectStore for S3ObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| get_error(err, bucket, key))?;

        let data = output.body.collect().await.map_err(|err| {
            PipelineError::transfer(format!(
                "Failed to read body of s3://{}/{}: {}",
                bucket, key, err
            ))
        })?;

        Ok(data.into_bytes().to_vec())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type)
            .send()
            .await
            .map_err(|err| {
                PipelineError::transfer(format!(
                    "S3 put_object failed for s3://{}/{}: {}",
                    bucket, key, err
                ))
            })?;

        Ok(())
    }
}

/// A missing key is its own error so the failure row can say what went wrong.
fn get_error(err: SdkError<GetObjectError>, bucket: &str, key: &str) -> PipelineError {
    match err.as_service_error() {
        Some(e) if e.is_no_such_key() => PipelineError::not_found(bucket, key),
        _ => PipelineError::transfer(format!(
            "S3 get_object failed for s3://{}/{}: {}",
            bucket, key, err
        )),
    }
}

/// Scratch files belonging to one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferContext {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub bucket: String,
    pub key: String,
}

impl TransferContext {
    /// Removes both scratch files. Files that were never written are ignored.
    pub async fn cleanup(&self) {
        for path in [&self.source_path, &self.output_path] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove scratch file")
                }
            }
        }
    }
}

pub struct ObjectTransfer<S> {
    store: S,
    scratch_dir: PathBuf,
}

impl<S> ObjectTransfer<S>
where
    S: ObjectStore,
{
    pub fn new(store: S, scratch_dir: impl Into<PathBuf>) -> Self {
        ObjectTransfer {
            store,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Downloads `s3://bucket/key` to `<scratch>/<base name>`.
    pub async fn fetch(&self, bucket: &str, key: &str) -> Result<TransferContext> {
        let file_name = base_name(key)?;
        let ctx = TransferContext {
            source_path: self.scratch_dir.join(file_name),
            output_path: self.scratch_dir.join(format!("resized-{}", file_name)),
            bucket: bucket.to_string(),
            key: key.to_string(),
        };

        let bytes = self.store.get(bucket, key).await?;
        debug!(path = %ctx.source_path.display(), size = bytes.len(), "Downloading file");

        fs::write(&ctx.source_path, &bytes).await.map_err(|e| {
            PipelineError::transfer(format!(
                "Failed to write {}: {}",
                ctx.source_path.display(),
                e
            ))
        })?;

        Ok(ctx)
    }

    /// Uploads a local file to `s3://bucket/destination_key`, replacing what is there.
    pub async fn publish(
        &self,
        local_path: &Path,
        bucket: &str,
        destination_key: &str,
    ) -> Result<()> {
        let body = fs::read(local_path).await.map_err(|e| {
            PipelineError::transfer(format!("Failed to read {}: {}", local_path.display(), e))
        })?;
        let content_type = image::ImageFormat::from_path(local_path)
            .ok()
            .map(|format| format.to_mime_type().to_string());

        self.store.put(bucket, destination_key, body, content_type).await?;
        info!(bucket = %bucket, key = %destination_key, "Uploaded processed file");

        Ok(())
    }
}

/// Final `/`-separated segment of a key; this is also the run record id.
pub fn base_name(key: &str) -> Result<&str> {
    match key.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." => Ok(name),
        _ => Err(PipelineError::malformed(format!(
            "object key '{}' has no usable file name",
            key
        ))),
    }
}

/// `processed/` + `uploads/photo.JPG` gives `processed/photo.JPG`, never a double slash.
pub fn destination_key(prefix: &str, key: &str) -> Result<String> {
    Ok(format!("{}/{}", prefix.trim_end_matches('/'), base_name(key)?))
}
