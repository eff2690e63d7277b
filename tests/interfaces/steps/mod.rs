//! Cucumber step definitions for interface tests.

pub mod mutation_pipeline;
