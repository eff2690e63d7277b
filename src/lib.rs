//! dbrelay - asynchronous write-through mutation pipeline.
//!
//! Producers defer database writes by publishing parameterized statements to a
//! partitioned Kafka topic. The consumer applies each statement exactly once in
//! effect despite at-least-once delivery, using a durable dedup ledger and a
//! dead-letter topic for messages it cannot apply.

pub mod bus;
pub mod config;
pub mod consumer;
pub mod dlq;
pub mod handlers;
pub mod ledger;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod provision;
pub mod utils;
