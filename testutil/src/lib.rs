/// Testing utilities for the signature aggregator
///
/// Provides:
/// - Test data generators
/// - Validator fixtures backed by real BLS keys
/// - In-memory transport and ledger collaborators
/// - Tracing setup for tests

pub mod fixtures;
pub mod generators;
pub mod mock_ledger;
pub mod mock_network;

pub use fixtures::*;
pub use generators::*;
pub use mock_ledger::MockLedger;
pub use mock_network::{MockNetwork, NodeBehavior};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a test subscriber honouring `RUST_LOG`; later calls are no-ops
pub fn init_test_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "signature_aggregator=debug".into());
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
