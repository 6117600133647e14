//! Shared fixtures for tests.

use std::sync::Once;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::classes::register_builtin_classes;

static INIT: Once = Once::new();

/// Install a test-writer subscriber filtered by `RUST_LOG`, default
/// `dbtree=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        // Another test harness may already have installed a subscriber
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "dbtree=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Tracing plus the built-in classes. Safe to call from every test.
pub fn setup() {
    init_tracing();
    register_builtin_classes().expect("register built-in classes");
}

/// Integer key bytes.
pub const fn ukey(key: u64) -> [u8; 8] {
    key.to_le_bytes()
}

/// Value derived from an integer key.
pub fn uval(key: u64) -> Vec<u8> {
    format!("value-{key}").into_bytes()
}
