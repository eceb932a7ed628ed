#![recursion_limit = "256"]

use aws_lambda_events::event::sqs::{SqsBatchResponse, SqsEvent};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use shared::{
    config::{get_clients, Config},
    coordinator::PipelineContext,
    record::DynamoMetadataStore,
    transfer::S3ObjectStore,
    trigger::handle_sqs_event,
};

type Context = PipelineContext<S3ObjectStore, DynamoMetadataStore>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        // disable printing the name of the module in every log line.
        .with_target(false)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        .init();

    // Fail the cold start, before any message is read, if the environment is incomplete.
    let cfg = Config::from_env().map_err(|e| {
        tracing::error!("FATAL: {}", e);
        e
    })?;
    let (s3, dynamo) = get_clients().await;
    let metadata = DynamoMetadataStore::new(dynamo, cfg.table_name.clone());
    let ctx = PipelineContext::new(cfg, S3ObjectStore::new(s3), metadata);

    run(service_fn(|event| process_images(event, &ctx))).await
}

async fn process_images(
    event: LambdaEvent<SqsEvent>,
    ctx: &Context,
) -> Result<SqsBatchResponse, Error> {
    // An error here fails the invocation, leaving the messages on the queue for redrive.
    Ok(handle_sqs_event(ctx, event.payload).await?)
}
