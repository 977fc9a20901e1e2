//! Common test utilities shared across the `modelhub-foundation` integration tests.
//!
//! Not a test binary of its own; declared with `mod common;` in each test file.

#![allow(dead_code)]

pub mod mock_model;

/// Route library logs to the test output, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
