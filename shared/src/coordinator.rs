//! Drives one invocation: every notification of every queued message, in order.
//!
//! Under [`FailurePolicy::AbortBatch`] the first error ends the batch and the whole
//! invocation is reported as failed, so the queue redrives all of its messages.
//! Notifications that already completed are simply processed again on redelivery;
//! publish and record both overwrite.

use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{Config, FailurePolicy};
use crate::error::{PipelineError, Result};
use crate::guard::should_skip;
use crate::image::transform_blocking;
use crate::notification::{decode, Notification};
use crate::record::{MetadataStore, RunRecord, RunRecorder, RunStatus};
use crate::transfer::{base_name, destination_key, ObjectStore, ObjectTransfer};

/// Collaborators opened once per process and reused by every warm invocation.
pub struct PipelineContext<S, M> {
    pub config: Config,
    pub transfer: ObjectTransfer<S>,
    pub recorder: RunRecorder<M>,
}

impl<S, M> PipelineContext<S, M>
where
    S: ObjectStore,
    M: MetadataStore,
{
    pub fn new(config: Config, store: S, metadata: M) -> Self {
        let transfer = ObjectTransfer::new(store, config.scratch_dir.clone());

        PipelineContext {
            config,
            transfer,
            recorder: RunRecorder::new(metadata),
        }
    }
}

/// One message as handed over by the queue trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message_id: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decoded,
    Skipped,
    Fetched,
    Transformed,
    Published,
    Recorded,
    Done,
    Errored,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Skipped | Stage::Done | Stage::Errored)
    }

    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;

        match (self, next) {
            (from, Errored) => !from.is_terminal(),
            (Received, Decoded)
            | (Decoded, Skipped)
            | (Decoded, Fetched)
            | (Fetched, Transformed)
            | (Transformed, Published)
            | (Published, Recorded)
            | (Recorded, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Decoded => "decoded",
            Stage::Skipped => "skipped",
            Stage::Fetched => "fetched",
            Stage::Transformed => "transformed",
            Stage::Published => "published",
            Stage::Recorded => "recorded",
            Stage::Done => "done",
            Stage::Errored => "errored",
        };

        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Processed(RunRecord),
    Skipped,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    /// Ids of messages that failed; only filled under `ReportItemFailures`.
    pub failed_message_ids: Vec<String>,
}

impl BatchSummary {
    pub fn completed(&self) -> usize {
        self.processed + self.skipped
    }
}

/// The invocation failed; the trigger must redeliver the batch.
#[derive(Error, Debug)]
#[error("batch failed at stage '{stage}' after {completed} completed notification(s): {error}")]
pub struct BatchFailed {
    #[source]
    pub error: PipelineError,
    /// Last stage the failing notification reached.
    pub stage: Stage,
    /// Notifications that reached `Done` or `Skipped` before the failure.
    pub completed: usize,
    pub message_id: Option<String>,
}

struct MessageFailure {
    error: PipelineError,
    stage: Stage,
}

pub async fn process_batch<S, M>(
    ctx: &PipelineContext<S, M>,
    messages: &[QueuedMessage],
) -> std::result::Result<BatchSummary, BatchFailed>
where
    S: ObjectStore,
    M: MetadataStore,
{
    info!("Received event with {} message(s)", messages.len());
    let mut summary = BatchSummary::default();

    for message in messages {
        let Err(failure) = process_message(ctx, message, &mut summary).await else {
            continue;
        };

        error!(
            message_id = message.message_id.as_deref().unwrap_or("n/a"),
            body = message.body.as_deref().unwrap_or(""),
            stage = %failure.stage,
            error = %failure.error,
            "Error processing message"
        );

        match (ctx.config.failure_policy, &message.message_id) {
            (FailurePolicy::ReportItemFailures, Some(id)) => {
                summary.failed_message_ids.push(id.clone());
            }
            _ => {
                return Err(BatchFailed {
                    error: failure.error,
                    stage: failure.stage,
                    completed: summary.completed(),
                    message_id: message.message_id.clone(),
                })
            }
        }
    }

    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed_message_ids.len(),
        "Processing completed"
    );

    Ok(summary)
}

async fn process_message<S, M>(
    ctx: &PipelineContext<S, M>,
    message: &QueuedMessage,
    summary: &mut BatchSummary,
) -> std::result::Result<(), MessageFailure>
where
    S: ObjectStore,
    M: MetadataStore,
{
    let notifications = message
        .body
        .as_deref()
        .ok_or_else(|| PipelineError::malformed("message has no body"))
        .and_then(decode)
        .map_err(|error| MessageFailure {
            error,
            stage: Stage::Received,
        })?;
    debug!(count = notifications.len(), "Parsed S3 event from message");

    for notification in &notifications {
        let span = info_span!(
            "notification",
            bucket = %notification.bucket,
            key = %notification.key
        );
        let mut run = NotificationRun::new(notification);

        match run.process(ctx).instrument(span).await {
            Ok(Outcome::Processed(_)) => summary.processed += 1,
            Ok(Outcome::Skipped) => summary.skipped += 1,
            Err(error) => {
                return Err(MessageFailure {
                    error,
                    stage: run.stage,
                })
            }
        }
    }

    Ok(())
}

/// State of one notification as it moves through the pipeline.
struct NotificationRun<'a> {
    notification: &'a Notification,
    stage: Stage,
}

impl<'a> NotificationRun<'a> {
    fn new(notification: &'a Notification) -> Self {
        NotificationRun {
            notification,
            stage: Stage::Received,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "{} -> {}",
            self.stage,
            next
        );
        info!(from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
    }

    async fn process<S, M>(&mut self, ctx: &PipelineContext<S, M>) -> Result<Outcome>
    where
        S: ObjectStore,
        M: MetadataStore,
    {
        self.advance(Stage::Decoded);
        let Notification { bucket, key } = self.notification;
        let prefix = &ctx.config.destination_prefix;

        if should_skip(key, prefix) {
            warn!("File is already in the destination prefix. Skipping.");
            self.advance(Stage::Skipped);
            return Ok(Outcome::Skipped);
        }

        let object_id = base_name(key)?.to_string();
        let destination = destination_key(prefix, key)?;

        info!("Processing file: s3://{}/{}", bucket, key);
        match self.run_steps(ctx, &object_id, &destination).await {
            Ok(record) => {
                self.advance(Stage::Done);
                Ok(Outcome::Processed(record))
            }
            Err(error) => {
                // `stage` stays at the last step reached so the failure can name it.
                debug_assert!(self.stage.can_advance_to(Stage::Errored));
                info!(to = %Stage::Errored, failed_after = %self.stage, "Stage transition");
                if !matches!(error, PipelineError::MetadataWriteFailure(_)) {
                    record_failure(ctx, &object_id, key, &destination).await;
                }

                Err(error)
            }
        }
    }

    async fn run_steps<S, M>(
        &mut self,
        ctx: &PipelineContext<S, M>,
        object_id: &str,
        destination: &str,
    ) -> Result<RunRecord>
    where
        S: ObjectStore,
        M: MetadataStore,
    {
        let Notification { bucket, key } = self.notification;
        let target_width = ctx.config.transform.target_width;

        let files = ctx.transfer.fetch(bucket, key).await?;
        self.advance(Stage::Fetched);

        let result: Result<RunRecord> = async {
            let size = transform_blocking(
                files.source_path.clone(),
                files.output_path.clone(),
                target_width,
            )
            .await?;
            info!(size, target_width, "Resized image");
            self.advance(Stage::Transformed);

            ctx.transfer.publish(&files.output_path, bucket, destination).await?;
            self.advance(Stage::Published);

            let record = RunRecord {
                object_id: object_id.to_string(),
                status: RunStatus::Processed,
                source_key: key.clone(),
                destination_key: destination.to_string(),
                output_size: size,
                target_width,
                timestamp: chrono::Utc::now().timestamp(),
            };
            ctx.recorder.record(&record).await?;
            self.advance(Stage::Recorded);

            Ok::<_, PipelineError>(record)
        }
        .await;

        files.cleanup().await;
        result
    }
}

/// Leaves an `error` row for objects that have none yet. The write is conditional, so a
/// `processed` row, even one landing concurrently, keeps describing its destination object.
async fn record_failure<S, M>(
    ctx: &PipelineContext<S, M>,
    object_id: &str,
    key: &str,
    destination: &str,
) where
    S: ObjectStore,
    M: MetadataStore,
{
    let record = RunRecord {
        object_id: object_id.to_string(),
        status: RunStatus::Error,
        source_key: key.to_string(),
        destination_key: destination.to_string(),
        output_size: 0,
        target_width: ctx.config.transform.target_width,
        timestamp: chrono::Utc::now().timestamp(),
    };

    match ctx.recorder.record_if_absent(&record).await {
        Ok(true) => {}
        Ok(false) => debug!(object_id, "Run record already present, keeping it"),
        Err(e) => warn!(object_id, error = %e, "Could not record failed run"),
    }
}
