//! Shared setup for the database-backed tests.
//!
//! Every test needs a reachable PostgreSQL in TEST_DATABASE_URL and is
//! skipped otherwise. Each test works in its own schema and drops it at the end.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use usb_configdb::pool::PoolManager;
use usb_configdb::schema::{MigrationRunner, SeedRunner};

static SCHEMA_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn test_manager(label: &str) -> Option<PoolManager> {
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        println!("Skipping {} - no TEST_DATABASE_URL provided", label);
        return None;
    };

    let schema = format!(
        "usb_test_{}_{}",
        std::process::id(),
        SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst)
    );
    Some(PoolManager::connect(&database_url, &schema, 2).expect("pool config"))
}

pub async fn drop_schema(manager: &PoolManager) {
    let client = manager.client().await.unwrap();
    client
        .batch_execute(&format!(r#"DROP SCHEMA IF EXISTS "{}" CASCADE"#, manager.schema()))
        .await
        .unwrap();
}

pub async fn bootstrap(manager: &PoolManager) {
    MigrationRunner::new().run_migrations(manager).await.unwrap();
    SeedRunner::new().run_seed_if_empty(manager).await.unwrap();
}
