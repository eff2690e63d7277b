//! LedgerStore interface tests.
//!
//! These tests verify the contract of the LedgerStore trait. Ids are UUIDs so
//! every backend accepts them; each test uses fresh ids and its own probe
//! values, so the tests can share one database.

use std::time::Duration;

use dbrelay::ledger::{LedgerError, LedgerStatus, LedgerStore, NewLedgerRecord};
use dbrelay::message::Statement;
use serde_json::json;
use uuid::Uuid;

const TOPIC: &str = "writing_db_topic";

fn new_record(ingression_ts: i64) -> NewLedgerRecord {
    NewLedgerRecord {
        id: Uuid::new_v4().to_string(),
        topic: TOPIC.to_string(),
        ingression_ts,
        headers: json!({"source": "web"}),
        message: json!({"text": "INSERT INTO ledger_probe(v) VALUES($1)", "values": [1]}),
    }
}

fn probe_insert(v: i64) -> Statement {
    Statement::new("INSERT INTO ledger_probe(v) VALUES($1)", vec![json!(v)])
}

fn probe_delete(v: i64) -> Statement {
    Statement::new("DELETE FROM ledger_probe WHERE v = $1", vec![json!(v)])
}

// =============================================================================
// Lookup tests
// =============================================================================

pub async fn test_get_missing<S: LedgerStore>(store: &S) {
    let result = store
        .get(&Uuid::new_v4().to_string())
        .await
        .expect("get should succeed");
    assert!(result.is_none(), "missing id should be None");
}

pub async fn test_insert_and_get<S: LedgerStore>(store: &S) {
    let record = new_record(1_700_000_000_000);
    store.insert(&record).await.expect("insert should succeed");

    let stored = store
        .get(&record.id)
        .await
        .expect("get should succeed")
        .expect("record should exist");

    assert_eq!(stored.id, record.id);
    assert_eq!(stored.topic, TOPIC);
    assert_eq!(stored.ingression_ts, 1_700_000_000_000);
    assert_eq!(stored.status, LedgerStatus::Pending);
    assert_eq!(stored.headers, record.headers);
    assert_eq!(stored.message, record.message);
    assert!(stored.created_at.is_some(), "created_at should default");
    assert!(stored.modified_at.is_some(), "modified_at should default");
}

pub async fn test_find_matches_full_identity<S: LedgerStore>(store: &S) {
    let record = new_record(42);
    store.insert(&record).await.unwrap();

    assert!(store.find(&record.id, TOPIC, 42).await.unwrap().is_some());
    assert!(store.find(&record.id, "other_topic", 42).await.unwrap().is_none());
    assert!(store.find(&record.id, TOPIC, 43).await.unwrap().is_none());
}

// =============================================================================
// Insert tests
// =============================================================================

pub async fn test_insert_duplicate_key<S: LedgerStore>(store: &S) {
    let record = new_record(1);
    store.insert(&record).await.unwrap();

    let mut again = record.clone();
    again.ingression_ts = 2;
    let result = store.insert(&again).await;

    match result {
        Err(LedgerError::DuplicateKey { id }) => assert_eq!(id, record.id),
        other => panic!("expected DuplicateKey, got {:?}", other),
    }
}

// =============================================================================
// Apply tests
// =============================================================================

pub async fn test_apply_marks_success<S: LedgerStore>(store: &S) {
    let record = new_record(1);
    store.insert(&record).await.unwrap();

    let rows = store
        .apply(&record.id, &probe_insert(1001))
        .await
        .expect("apply should succeed");

    assert_eq!(rows, 1);
    let stored = store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LedgerStatus::Success);
}

pub async fn test_apply_failure_leaves_pending<S: LedgerStore>(store: &S) {
    let record = new_record(1);
    store.insert(&record).await.unwrap();

    let statement = Statement::new("INSERT INTO no_such_table(v) VALUES($1)", vec![json!(1)]);
    let result = store.apply(&record.id, &statement).await;

    assert!(
        matches!(result, Err(LedgerError::Mutation(_))),
        "expected Mutation error, got {:?}",
        result
    );
    let stored = store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LedgerStatus::Pending);
}

pub async fn test_apply_unknown_id_rolls_back<S: LedgerStore>(store: &S) {
    let result = store
        .apply(&Uuid::new_v4().to_string(), &probe_insert(1002))
        .await;
    assert!(
        matches!(result, Err(LedgerError::NotFound { .. })),
        "expected NotFound, got {:?}",
        result
    );

    // The probe insert must not have survived the failed transaction.
    let record = new_record(1);
    store.insert(&record).await.unwrap();
    let deleted = store.apply(&record.id, &probe_delete(1002)).await.unwrap();
    assert_eq!(deleted, 0, "rolled back insert should leave no row");
}

// =============================================================================
// Status tests
// =============================================================================

pub async fn test_set_status<S: LedgerStore>(store: &S) {
    let record = new_record(1);
    store.insert(&record).await.unwrap();

    store
        .set_status(&record.id, LedgerStatus::Failed)
        .await
        .expect("set_status should succeed");

    let stored = store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LedgerStatus::Failed);
    assert!(!stored.status.is_applied());
}

pub async fn test_set_status_missing<S: LedgerStore>(store: &S) {
    let result = store
        .set_status(&Uuid::new_v4().to_string(), LedgerStatus::Failed)
        .await;
    assert!(matches!(result, Err(LedgerError::NotFound { .. })));
}

pub async fn test_update_touches_modified_at<S: LedgerStore>(store: &S) {
    let record = new_record(1);
    store.insert(&record).await.unwrap();
    let before = store.get(&record.id).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    store
        .set_status(&record.id, LedgerStatus::Failed)
        .await
        .unwrap();
    let after = store.get(&record.id).await.unwrap().unwrap();

    assert_eq!(after.created_at, before.created_at);
    assert!(
        after.modified_at > before.modified_at,
        "modified_at should advance on update"
    );
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all LedgerStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_ledger_store_tests {
    ($store:expr) => {
        use $crate::ledger::ledger_store_tests::*;

        test_get_missing($store).await;
        println!("  test_get_missing: PASSED");

        test_insert_and_get($store).await;
        println!("  test_insert_and_get: PASSED");

        test_find_matches_full_identity($store).await;
        println!("  test_find_matches_full_identity: PASSED");

        test_insert_duplicate_key($store).await;
        println!("  test_insert_duplicate_key: PASSED");

        test_apply_marks_success($store).await;
        println!("  test_apply_marks_success: PASSED");

        test_apply_failure_leaves_pending($store).await;
        println!("  test_apply_failure_leaves_pending: PASSED");

        test_apply_unknown_id_rolls_back($store).await;
        println!("  test_apply_unknown_id_rolls_back: PASSED");

        test_set_status($store).await;
        println!("  test_set_status: PASSED");

        test_set_status_missing($store).await;
        println!("  test_set_status_missing: PASSED");

        test_update_touches_modified_at($store).await;
        println!("  test_update_touches_modified_at: PASSED");
    };
}
