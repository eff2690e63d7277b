//! Mutation pipeline step definitions.

use std::collections::HashMap;
use std::sync::Arc;

use cucumber::{given, then, when, World};
use dbrelay::bus::ProcessOutcome;
use dbrelay::consumer::MutationConsumer;
use dbrelay::dlq::{ChannelDeadLetterPublisher, DeadLetter};
use dbrelay::ledger::{LedgerConfig, LedgerStore, NewLedgerRecord, SqliteLedgerStore};
use dbrelay::message::{BrokerEnvelope, MutationMessage};
use dbrelay::metrics::ConsumerMetrics;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc::UnboundedReceiver;

const TOPIC: &str = "writing_db_topic";
const INGRESSION_TS: i64 = 1_700_000_000_000;

/// Consumer, ledger and dead-letter channel for one scenario.
struct Pipeline {
    consumer: MutationConsumer,
    ledger: Arc<SqliteLedgerStore>,
    dead_letters: UnboundedReceiver<DeadLetter>,
    metrics: Arc<ConsumerMetrics>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("consumer", &"<MutationConsumer>")
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

/// Test context for mutation pipeline scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct MutationPipelineWorld {
    pipeline: Option<Pipeline>,
    envelopes: HashMap<String, BrokerEnvelope>,
    last_outcome: Option<ProcessOutcome>,
    last_dead_letter: Option<DeadLetter>,
}

impl MutationPipelineWorld {
    fn new() -> Self {
        Self {
            pipeline: None,
            envelopes: HashMap::new(),
            last_outcome: None,
            last_dead_letter: None,
        }
    }

    fn pipeline(&self) -> &Pipeline {
        self.pipeline.as_ref().expect("Pipeline not initialized")
    }

    fn pipeline_mut(&mut self) -> &mut Pipeline {
        self.pipeline.as_mut().expect("Pipeline not initialized")
    }

    async fn start(&mut self, config: LedgerConfig) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create SQLite pool");
        let ledger = Arc::new(SqliteLedgerStore::new(pool));
        ledger.migrate().await.expect("Failed to run migrations");
        sqlx::query("CREATE TABLE t (v INTEGER NOT NULL)")
            .execute(ledger.pool())
            .await
            .expect("Failed to create table t");

        let (publisher, dead_letters) = ChannelDeadLetterPublisher::new();
        let metrics = Arc::new(ConsumerMetrics::new());
        let consumer = MutationConsumer::new(ledger.clone(), Arc::new(publisher), metrics.clone())
            .with_config(config);

        self.pipeline = Some(Pipeline {
            consumer,
            ledger,
            dead_letters,
            metrics,
        });
    }

    async fn deliver(&mut self, envelope: BrokerEnvelope) {
        if let Some(key) = &envelope.key {
            self.envelopes.insert(key.clone(), envelope.clone());
        }
        self.last_outcome = Some(self.pipeline().consumer.process(&envelope).await);
    }

    async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql)
            .fetch_one(self.pipeline().ledger.pool())
            .await
            .expect("Count query failed")
    }
}

fn envelope(key: Option<&str>, body: serde_json::Value) -> BrokerEnvelope {
    BrokerEnvelope::new(TOPIC, key.map(str::to_string), body.to_string())
        .with_timestamp(INGRESSION_TS)
}

fn insert_body(value: i64) -> serde_json::Value {
    json!({"text": "INSERT INTO t(v) VALUES($1)", "values": [value]})
}

// --- Given steps ---

#[given("a mutation consumer backed by a SQLite ledger")]
async fn given_consumer(world: &mut MutationPipelineWorld) {
    world.start(LedgerConfig::default()).await;
}

#[given("a mutation consumer backed by a SQLite ledger that marks failed applies")]
async fn given_consumer_marking_failures(world: &mut MutationPipelineWorld) {
    world.start(LedgerConfig { mark_failed: true }).await;
}

#[given(expr = "a pending ledger row for a mutation with key {string} inserting {int}")]
async fn given_pending_row(world: &mut MutationPipelineWorld, key: String, value: i64) {
    let envelope = envelope(Some(&key), insert_body(value));
    let message = MutationMessage::parse(&envelope, INGRESSION_TS).expect("Invalid message");
    world
        .pipeline()
        .ledger
        .insert(&NewLedgerRecord::from_message(&message))
        .await
        .expect("Failed to insert pending row");
    world.envelopes.insert(key, envelope);
}

// --- When steps ---

#[when(expr = "a mutation with key {string} inserting {int} is delivered")]
async fn when_insert_delivered(world: &mut MutationPipelineWorld, key: String, value: i64) {
    world.deliver(envelope(Some(&key), insert_body(value))).await;
}

#[when(expr = "a mutation with key {string} running {string} is delivered")]
async fn when_statement_delivered(world: &mut MutationPipelineWorld, key: String, text: String) {
    world
        .deliver(envelope(Some(&key), json!({"text": text, "values": [1]})))
        .await;
}

#[when(expr = "a message with key {string} and no values is delivered")]
async fn when_no_values_delivered(world: &mut MutationPipelineWorld, key: String) {
    world
        .deliver(envelope(
            Some(&key),
            json!({"text": "INSERT INTO t(v) VALUES($1)"}),
        ))
        .await;
}

#[when(expr = "a message with key {string} and no text is delivered")]
async fn when_no_text_delivered(world: &mut MutationPipelineWorld, key: String) {
    world
        .deliver(envelope(Some(&key), json!({"values": [1]})))
        .await;
}

#[when("a message without a key is delivered")]
async fn when_keyless_delivered(world: &mut MutationPipelineWorld) {
    world.deliver(envelope(None, insert_body(1))).await;
}

#[when(expr = "the message with key {string} is delivered again")]
async fn when_redelivered(world: &mut MutationPipelineWorld, key: String) {
    let envelope = world
        .envelopes
        .get(&key)
        .cloned()
        .expect("No message delivered for key");
    world.deliver(envelope).await;
}

// --- Then steps ---

#[then(expr = "the outcome is {string}")]
async fn then_outcome(world: &mut MutationPipelineWorld, expected: String) {
    let outcome = world.last_outcome.expect("No message processed");
    assert_eq!(outcome.as_str(), expected);
}

#[then(expr = "table t contains {int} row(s)")]
async fn then_table_rows(world: &mut MutationPipelineWorld, expected: i64) {
    assert_eq!(world.count("SELECT COUNT(*) FROM t").await, expected);
}

#[then(expr = "the ledger has {int} record(s)")]
async fn then_ledger_rows(world: &mut MutationPipelineWorld, expected: i64) {
    assert_eq!(
        world.count("SELECT COUNT(*) FROM db_change_log").await,
        expected
    );
}

#[then(expr = "the ledger status for {string} is {string}")]
async fn then_ledger_status(world: &mut MutationPipelineWorld, key: String, expected: String) {
    let record = world
        .pipeline()
        .ledger
        .get(&key)
        .await
        .expect("Ledger lookup failed")
        .expect("Ledger record missing");
    assert_eq!(record.status.as_str(), expected);
}

#[then(expr = "no ledger record exists for {string}")]
async fn then_no_ledger_record(world: &mut MutationPipelineWorld, key: String) {
    let record = world
        .pipeline()
        .ledger
        .get(&key)
        .await
        .expect("Ledger lookup failed");
    assert!(record.is_none(), "Unexpected ledger record for {}", key);
}

#[then(expr = "a dead letter for {string} is published with error kind {string}")]
async fn then_dead_letter(world: &mut MutationPipelineWorld, key: String, kind: String) {
    let dead_letter = world
        .pipeline_mut()
        .dead_letters
        .try_recv()
        .expect("No dead letter published");
    assert_eq!(dead_letter.envelope.key.as_deref(), Some(key.as_str()));
    assert_eq!(dead_letter.topic(), format!("{}-dlq", TOPIC));
    assert_eq!(
        dead_letter.metadata.get("error_kind").map(String::as_str),
        Some(kind.as_str())
    );
    world.last_dead_letter = Some(dead_letter);
}

#[then("the dead letter carries the original message")]
async fn then_dead_letter_intact(world: &mut MutationPipelineWorld) {
    let dead_letter = world
        .last_dead_letter
        .as_ref()
        .expect("No dead letter captured");
    let key = dead_letter
        .envelope
        .key
        .as_ref()
        .expect("Dead letter without key");
    let original = world.envelopes.get(key).expect("No original message");
    assert_eq!(&dead_letter.envelope, original);
}

#[then("no dead letter is published")]
async fn then_no_dead_letter(world: &mut MutationPipelineWorld) {
    assert!(world.pipeline_mut().dead_letters.try_recv().is_err());
}

#[then(expr = "the metrics show {int} received, {int} processed and {int} error(s)")]
async fn then_metrics(
    world: &mut MutationPipelineWorld,
    received: u64,
    processed: u64,
    errors: u64,
) {
    let snapshot = world.pipeline().metrics.snapshot();
    assert_eq!(snapshot.received, received);
    assert_eq!(snapshot.processed, processed);
    assert_eq!(snapshot.errors, errors);
}
