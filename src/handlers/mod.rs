//! HTTP handlers exposed by the consumer binary.

pub mod status;
