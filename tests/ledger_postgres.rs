//! PostgreSQL ledger integration tests using testcontainers.
//!
//! Run with: cargo test --test ledger_postgres --features postgres -- --nocapture
//!
//! These tests spin up PostgreSQL in a container, run migrations, and check
//! the LedgerStore contract plus the uuid key and modified_at trigger.

mod ledger;

use std::time::Duration;

use dbrelay::config::{DatabaseConfig, DatabaseType};
use dbrelay::ledger::{init_ledger, LedgerError, LedgerStore, NewLedgerRecord, PostgresLedgerStore};
use serde_json::json;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};

/// Start PostgreSQL container.
///
/// Returns (container, connection_string) where connection_string is suitable
/// for sqlx PgPool connection.
async fn start_postgres() -> (testcontainers::ContainerAsync<GenericImage>, String) {
    // PostgreSQL prints "database system is ready to accept connections" twice:
    // once during initial setup and once when fully ready.
    let image = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout(
            "database system is ready to accept connections",
        ));

    let container = image
        .with_env_var("POSTGRES_USER", "dbrelay")
        .with_env_var("POSTGRES_PASSWORD", "dbrelay")
        .with_env_var("POSTGRES_DB", "dbrelay")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start postgres container");

    tokio::time::sleep(Duration::from_secs(1)).await;

    let host_port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get mapped port");

    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let connection_string = format!("postgres://dbrelay:dbrelay@{}:{}/dbrelay", host, host_port);

    println!("PostgreSQL available at: {}", connection_string);

    (container, connection_string)
}

/// Connect, migrate and create the probe table.
async fn connect_and_migrate(connection_string: &str) -> PostgresLedgerStore {
    let pool = sqlx::PgPool::connect(connection_string)
        .await
        .expect("Failed to connect to PostgreSQL");

    let store = PostgresLedgerStore::new(pool);
    store.migrate().await.expect("Failed to run migrations");
    sqlx::query(ledger::CREATE_PROBE_TABLE)
        .execute(store.pool())
        .await
        .expect("Failed to create probe table");
    store
}

#[tokio::test]
async fn test_postgres_ledger_store() {
    println!("=== PostgreSQL LedgerStore Tests ===");
    println!("Starting PostgreSQL container...");

    let (_container, connection_string) = start_postgres().await;
    let store = connect_and_migrate(&connection_string).await;

    println!("Running LedgerStore tests...");
    run_ledger_store_tests!(&store);

    println!("Running PostgreSQL-specific tests...");

    let result = store
        .insert(&NewLedgerRecord {
            id: "not-a-uuid".to_string(),
            topic: "writing_db_topic".to_string(),
            ingression_ts: 1,
            headers: json!({}),
            message: json!({}),
        })
        .await;
    assert!(
        matches!(result, Err(LedgerError::InvalidKey(_))),
        "non-uuid keys must be rejected, got {:?}",
        result
    );
    println!("  test_non_uuid_key_rejected: PASSED");

    let data_type: String = sqlx::query_scalar(
        "SELECT data_type FROM information_schema.columns \
         WHERE table_name = 'db_change_log' AND column_name = 'id'",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(data_type, "uuid");
    println!("  test_id_column_is_uuid: PASSED");

    let config = DatabaseConfig {
        database_type: DatabaseType::Postgres,
        url: Some(connection_string.clone()),
        connect_retries: 0,
        ..DatabaseConfig::default()
    };
    let ledger = init_ledger(&config).await.expect("init_ledger should succeed");
    assert!(ledger
        .get(&uuid::Uuid::new_v4().to_string())
        .await
        .unwrap()
        .is_none());
    println!("  test_init_ledger_reruns_migrations: PASSED");

    println!("=== All PostgreSQL LedgerStore tests PASSED ===");
}
