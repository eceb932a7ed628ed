//! Errors raised while processing a batch of storage notifications.
//!
//! None of these are recovered inside a batch. They bubble up to the trigger so the
//! queue's own retry and dead-letter policy decides what happens next.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The queued message is not a storage-change notification we understand.
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    #[error("Object s3://{bucket}/{key} not found")]
    ObjectNotFound { bucket: String, key: String },

    #[error("Transfer failed: {0}")]
    TransferFailure(String),

    /// The fetched object could not be decoded as an image.
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Transform failed: {0}")]
    TransformFailure(String),

    #[error("Metadata write failed: {0}")]
    MetadataWriteFailure(String),

    /// A run record could not be read back, or the stored row is not a run record.
    #[error("Metadata read failed: {0}")]
    MetadataReadFailure(String),

    /// Only raised at startup.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl PipelineError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedNotification(msg.into())
    }

    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::TransferFailure(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Self::TransformFailure(msg.into())
    }

    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::MetadataWriteFailure(msg.into())
    }

    pub fn metadata_read(msg: impl Into<String>) -> Self {
        Self::MetadataReadFailure(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
