//! Interface tests for the mutation pipeline using Cucumber.
//!
//! Scenarios drive `MutationConsumer` against an in-memory SQLite ledger and
//! an in-memory dead-letter channel:
//!
//! ```bash
//! cargo test --test interfaces --features sqlite
//! ```

mod steps;

use cucumber::World;
use steps::mutation_pipeline::MutationPipelineWorld;

#[tokio::main]
async fn main() {
    println!("\n=== Running Mutation Pipeline Interface Tests ===\n");
    MutationPipelineWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/mutation_pipeline.feature")
        .await;
}
