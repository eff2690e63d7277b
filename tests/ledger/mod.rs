//! Shared ledger store integration tests.
//!
//! Tests the LedgerStore contract against every implementation. Each backend
//! test binary connects, migrates, creates the probe table and runs
//! `run_ledger_store_tests!`.

pub mod ledger_store_tests;

/// Table the contract tests mutate through `LedgerStore::apply`.
pub const CREATE_PROBE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS ledger_probe (v BIGINT NOT NULL)";
