//! Shared fixtures for integration tests

#![allow(dead_code)]

use bastion_authz::{
    ActionRegistry, AuthorizationConfig, AuthorizationEngine, AvailableAction, InMemoryStore,
};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Registry with `doc` (read, write, delete / create, list) and `folder` (read)
pub fn registry() -> Arc<ActionRegistry> {
    let registry = ActionRegistry::new();
    registry.register(
        "doc",
        vec![
            AvailableAction::new("read").with_name("en", "Read"),
            AvailableAction::new("write").with_name("en", "Write"),
            AvailableAction::new("delete").with_name("en", "Delete"),
        ],
        vec![
            AvailableAction::new("create").with_name("en", "Create"),
            AvailableAction::new("list").with_name("en", "List"),
        ],
    );
    registry.register("folder", vec![AvailableAction::new("read")], vec![]);
    Arc::new(registry)
}

/// Engine over a fresh in-memory store, returning the store for inspection
pub async fn engine(config: AuthorizationConfig) -> (InMemoryStore, AuthorizationEngine) {
    init_tracing();
    let store = InMemoryStore::new();
    let engine = AuthorizationEngine::with_cel(Arc::new(store.clone()), registry(), config)
        .await
        .unwrap();
    (store, engine)
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
