//! Mutation message types.
//!
//! A producer defers a database write by publishing a parameterized statement
//! to the primary topic. The consumer sees each delivered record as a
//! [`BrokerEnvelope`] and validates it into a [`MutationMessage`] before anything
//! touches the database.
//!
//! ## Wire Format
//!
//! - Record key: ledger/dedup key (UUID string)
//! - Record value: JSON `{"text": "<statement>", "values": [<params>...]}`
//! - Record headers: opaque string map, copied into the ledger
//! - Record timestamp: ingestion timestamp in epoch milliseconds

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result type for message validation.
pub type Result<T> = std::result::Result<T, MessageError>;

/// Reasons a delivered record cannot be turned into a mutation.
///
/// Every variant is terminal: the record is dead-lettered and never retried
/// through the primary topic.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed message: key is missing")]
    MissingKey,

    #[error("Malformed message: payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Malformed message: payload must be a JSON object")]
    PayloadNotObject,

    #[error("Malformed message: statement text is missing")]
    MissingText,

    #[error("Malformed message: bind values are missing")]
    MissingValues,

    #[error("Malformed message: bind values must be an array")]
    ValuesNotArray,
}

/// A parameterized SQL statement: template plus positional bind values.
///
/// Placeholders follow the target database's syntax (`$1`, `$2`, ... for
/// PostgreSQL; SQLite accepts the same form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// Statement template.
    pub text: String,
    /// Positional bind parameters, in placeholder order.
    pub values: Vec<Value>,
}

impl Statement {
    /// Create a new statement.
    pub fn new(text: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            text: text.into(),
            values,
        }
    }

    /// Validate a decoded payload into a statement.
    ///
    /// Mirrors the producer contract: `text` must be a non-empty string and
    /// `values` must be present as an array (an empty array is fine).
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let object = payload.as_object().ok_or(MessageError::PayloadNotObject)?;

        let text = match object.get("text") {
            Some(Value::String(text)) if !text.is_empty() => text.clone(),
            _ => return Err(MessageError::MissingText),
        };

        let values = match object.get("values") {
            None | Some(Value::Null) => return Err(MessageError::MissingValues),
            Some(Value::Array(values)) => values.clone(),
            Some(_) => return Err(MessageError::ValuesNotArray),
        };

        Ok(Self { text, values })
    }

    /// Serialize into the JSON payload carried by the primary topic.
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "text": self.text,
            "values": self.values,
        })
    }
}

/// One record as delivered by the broker.
///
/// This is the envelope that is dead-lettered verbatim, so its serialized form
/// is part of the dead-letter topic contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEnvelope {
    /// Topic the record was read from.
    pub topic: String,
    /// Record key, if the producer set one.
    pub key: Option<String>,
    /// Record headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Raw record value.
    pub message: String,
    /// Producer-assigned timestamp in epoch milliseconds.
    #[serde(rename = "ingressionTs")]
    pub ingression_ts: Option<i64>,
}

impl BrokerEnvelope {
    /// Build an envelope for a record with the given key and raw value.
    pub fn new(topic: impl Into<String>, key: Option<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key,
            headers: BTreeMap::new(),
            message: message.into(),
            ingression_ts: None,
        }
    }

    /// Set the ingestion timestamp.
    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.ingression_ts = Some(millis);
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A validated mutation, ready for ledger lookup and apply.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationMessage {
    /// Ledger id and dedup key.
    pub key: String,
    /// Topic the mutation arrived on.
    pub topic: String,
    /// Ingestion timestamp in epoch milliseconds.
    pub ingression_ts: i64,
    /// Producer headers.
    pub headers: BTreeMap<String, String>,
    /// Payload snapshot as received, stored in the ledger.
    pub payload: Value,
    /// The statement to execute.
    pub statement: Statement,
}

impl MutationMessage {
    /// Validate an envelope.
    ///
    /// `now_millis` supplies the ingestion timestamp when the record carries none.
    pub fn parse(envelope: &BrokerEnvelope, now_millis: i64) -> Result<Self> {
        let key = match envelope.key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => return Err(MessageError::MissingKey),
        };

        let payload: Value = serde_json::from_str(&envelope.message)?;
        let statement = Statement::from_payload(&payload)?;

        Ok(Self {
            key,
            topic: envelope.topic.clone(),
            ingression_ts: envelope.ingression_ts.unwrap_or(now_millis),
            headers: envelope.headers.clone(),
            payload,
            statement,
        })
    }
}
