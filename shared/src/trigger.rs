//! Glue between the SQS trigger and the batch coordinator.

use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse, SqsEvent, SqsMessage};

use crate::coordinator::{process_batch, BatchFailed, PipelineContext, QueuedMessage};
use crate::record::MetadataStore;
use crate::transfer::ObjectStore;

impl From<SqsMessage> for QueuedMessage {
    fn from(message: SqsMessage) -> Self {
        QueuedMessage {
            message_id: message.message_id,
            body: message.body,
        }
    }
}

/// Runs one SQS delivery through the pipeline. The response lists failed message ids
/// only under `FailurePolicy::ReportItemFailures`, and is empty otherwise.
pub async fn handle_sqs_event<S, M>(
    ctx: &PipelineContext<S, M>,
    event: SqsEvent,
) -> Result<SqsBatchResponse, BatchFailed>
where
    S: ObjectStore,
    M: MetadataStore,
{
    let messages: Vec<QueuedMessage> = event
        .records
        .into_iter()
        .map(QueuedMessage::from)
        .collect();
    let summary = process_batch(ctx, &messages).await?;

    Ok(SqsBatchResponse {
        batch_item_failures: summary
            .failed_message_ids
            .into_iter()
            .map(|item_identifier| BatchItemFailure { item_identifier })
            .collect(),
    })
}
