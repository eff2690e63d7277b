//! dbrelay-consumer: Kafka-driven mutation applier
//!
//! Provisions the primary and dead-letter topics, connects the ledger
//! database, then consumes the primary topic with one worker per partition.
//! Every record is applied at most once in effect; records that cannot be
//! applied are routed to `<topic>-dlq`.
//!
//! ## Architecture
//! ```text
//! [Primary Topic] -> [PartitionDispatcher] -> [MutationConsumer] -> [Database]
//!                                                    |
//!                                                    v
//!                                              [Dead-Letter Topic]
//!
//! [Status API :4100] <- /health, /metrics
//! ```
//!
//! ## Configuration
//! - `--config <path>` or DBRELAY_CONFIG: YAML config file
//! - DBRELAY__SECTION__KEY: per-key overrides
//! - KAFKA_BROKER_LIST, KAFKA_WRITING_DB_TOPIC, DATABASE_URL, SERVER_PORT, ...

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use dbrelay::bus::{
    KafkaBusConfig, KafkaMutationSource, KafkaPublisher, KafkaTopicAdmin, MessagePublisher,
    PartitionDispatcher,
};
use dbrelay::config::Config;
use dbrelay::consumer::MutationConsumer;
use dbrelay::dlq::BusDeadLetterPublisher;
use dbrelay::handlers::status::{self, StatusState};
use dbrelay::ledger::init_ledger;
use dbrelay::metrics::ConsumerMetrics;
use dbrelay::provision::{ensure_topics, pipeline_topics};
use dbrelay::utils::bootstrap::{
    connect_with_retry, init_tracing, parse_config_path, shutdown_signal,
};

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        brokers = %config.kafka.bootstrap_servers,
        topic = %config.kafka.topic,
        group_id = %config.kafka.group_id,
        "Starting dbrelay-consumer"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let metrics = Arc::new(ConsumerMetrics::new());

    let status_state = StatusState::new(metrics.clone(), vec![config.kafka.topic.clone()]);
    let server_config = config.server.clone();
    let server_shutdown = wait_for_shutdown(shutdown_rx.clone());
    let server = tokio::spawn(async move {
        if let Err(e) = status::serve(status_state, &server_config, server_shutdown).await {
            error!(error = %e, "Status server failed");
        }
    });

    match run_pipeline(&config, metrics, shutdown_rx.clone()).await {
        Ok(()) => {}
        Err(e) if config.startup.fail_fast => {
            error!(error = %e, "Consumer failed");
            return Err(e);
        }
        Err(e) => {
            warn!(error = %e, "Consumer not running; status server stays up");
            wait_for_shutdown(shutdown_rx).await;
        }
    }

    if let Err(e) = server.await {
        error!(error = %e, "Status server task panicked");
    }
    info!("dbrelay-consumer stopped");
    Ok(())
}

/// Provision, connect and consume until shutdown. Returns once the
/// dispatcher has drained; a stopped partition worker is an error.
async fn run_pipeline(
    config: &Config,
    metrics: Arc<ConsumerMetrics>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), BoxError> {
    let bus_config = KafkaBusConfig::from_config(&config.kafka);

    let admin = KafkaTopicAdmin::new(&bus_config)?;
    let topics = pipeline_topics(&config.kafka);
    connect_with_retry("kafka", config.database.connect_retries, || {
        ensure_topics(&admin, &topics)
    })
    .await?;

    let ledger = init_ledger(&config.database).await?;

    let publisher = Arc::new(KafkaPublisher::new(&bus_config)?);
    let dead_letters = Arc::new(BusDeadLetterPublisher::new(
        publisher.clone() as Arc<dyn MessagePublisher>
    ));
    let consumer = Arc::new(
        MutationConsumer::new(ledger, dead_letters, metrics).with_config(config.ledger.clone()),
    );

    let source = KafkaMutationSource::new(&bus_config)?;
    source.subscribe()?;
    let dispatcher = PartitionDispatcher::new(consumer, source.committer())
        .with_queue_depth(config.kafka.queue_depth);

    info!("Consumer running, press Ctrl+C to exit");
    let consumed = source
        .run(
            dispatcher,
            wait_for_shutdown(shutdown),
            config.startup.shutdown_grace(),
        )
        .await;

    if let Err(e) = publisher.flush().await {
        warn!(error = %e, "Failed to flush producer");
    }
    consumed?;
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    // A closed channel means the signal task is gone; treat as shutdown.
    let _ = rx.wait_for(|stopped| *stopped).await;
}
