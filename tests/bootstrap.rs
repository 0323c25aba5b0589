//! Database-backed checks of migration, seeding and the stores.

mod common;

use std::collections::BTreeMap;

use common::{bootstrap, drop_schema, test_manager};
use usb_configdb::error::StoreError;
use usb_configdb::schema::{MigrationRunner, SeedRunner};
use usb_configdb::store::{
    BrokerConfiguration, CatalogService, ConfigStore, Dial, Instance, InstanceStore, Plan,
};

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let Some(manager) = test_manager("migration test") else {
        return;
    };

    let runner = MigrationRunner::new();
    let first = runner.run_migrations(&manager).await.unwrap();
    assert_eq!(first, runner.migrations().len());

    let second = runner.run_migrations(&manager).await.unwrap();
    assert_eq!(second, 0);

    let client = manager.client().await.unwrap();
    let tables: Vec<String> = client
        .query(
            "SELECT table_name::text FROM information_schema.tables WHERE table_schema = $1 ORDER BY 1",
            &[&manager.schema()],
        )
        .await
        .unwrap()
        .iter()
        .map(|row| row.get(0))
        .collect();
    assert_eq!(
        tables,
        vec![
            "Config",
            "Dials",
            "Instances",
            "Plans",
            "Services",
            "_usb_schema_migrations"
        ]
    );

    let indexes: Vec<String> = client
        .query(
            "SELECT indexname::text FROM pg_indexes WHERE schemaname = $1 AND indexname LIKE 'fk_%' ORDER BY 1",
            &[&manager.schema()],
        )
        .await
        .unwrap()
        .iter()
        .map(|row| row.get(0))
        .collect();
    assert_eq!(
        indexes,
        vec![
            "fk_Dials_Instances1_idx",
            "fk_Dials_Plans1_idx",
            "fk_Services_Instances1_idx"
        ]
    );

    let status = runner.status(&manager).await.unwrap();
    assert!(status.iter().all(|s| s.applied && s.checksum_matches));

    drop(client);
    drop_schema(&manager).await;
}

#[tokio::test]
async fn test_default_seed_lookups() {
    let Some(manager) = test_manager("seed test") else {
        return;
    };

    MigrationRunner::new().run_migrations(&manager).await.unwrap();

    let seeder = SeedRunner::new();
    let result = seeder.run_seed_if_empty(&manager).await.unwrap();
    assert!(!result.skipped);
    assert_eq!(result.statements_executed, 2);
    assert_eq!(result.rows_inserted, 16);

    let again = seeder.run_seed_if_empty(&manager).await.unwrap();
    assert!(again.skipped);

    let validation = seeder.validate_seed(&manager).await.unwrap();
    assert!(validation.is_complete(), "missing: {:?}", validation.missing);

    let store = ConfigStore::new(&manager);
    assert_eq!(
        store.get_value("LISTEN", "BROKER_API").await.unwrap().as_deref(),
        Some(":54053")
    );
    assert_eq!(
        store.get_value("API", "CLOUD_CONTROLLER").await.unwrap().as_deref(),
        Some("http://api.192.168.77.77.nip.io")
    );
    assert_eq!(store.get_value("NOPE", "BROKER_API").await.unwrap(), None);

    let uaa = store.uaa_auth().await.unwrap();
    assert_eq!(uaa.adminscope, "usb.management.admin");
    assert!(uaa.public_key.starts_with("-----BEGIN PUBLIC KEY-----"));

    drop_schema(&manager).await;
}

#[tokio::test]
async fn test_forced_seed_duplicates_rows() {
    let Some(manager) = test_manager("forced seed test") else {
        return;
    };

    bootstrap(&manager).await;
    SeedRunner::new().run_seed(&manager).await.unwrap();

    let entries = ConfigStore::new(&manager).list_entries(None).await.unwrap();
    assert_eq!(entries.len(), 32);

    drop_schema(&manager).await;
}

#[tokio::test]
async fn test_failed_seed_rolls_back() {
    let Some(manager) = test_manager("seed rollback test") else {
        return;
    };

    MigrationRunner::new().run_migrations(&manager).await.unwrap();

    let seeder = SeedRunner::with_script(
        r#"INSERT INTO "Config" VALUES ('A', '1', 'BROKER_API');
           INSERT INTO "Missing" VALUES ('B', '2', 'BROKER_API');"#,
    );
    match seeder.run_seed(&manager).await {
        Err(StoreError::SeedFailed { statement, .. }) => assert_eq!(statement, 2),
        other => panic!("expected SeedFailed, got {:?}", other),
    }

    let entries = ConfigStore::new(&manager).list_entries(None).await.unwrap();
    assert!(entries.is_empty());

    drop_schema(&manager).await;
}

#[tokio::test]
async fn test_config_store_round_trip() {
    let Some(manager) = test_manager("config store test") else {
        return;
    };

    bootstrap(&manager).await;
    let store = ConfigStore::new(&manager);

    store.set_value("LISTEN", "BROKER_API", ":6000").await.unwrap();
    assert_eq!(
        store.get_value("LISTEN", "BROKER_API").await.unwrap().as_deref(),
        Some(":6000")
    );
    assert_eq!(store.list_entries(Some("BROKER_API")).await.unwrap().len(), 5);

    assert!(store.set_value("LISTEN", "BROKER_API", &"x".repeat(1001)).await.is_err());

    assert_eq!(store.delete_value("LISTEN", "BROKER_API").await.unwrap(), 1);
    assert!(matches!(
        store.delete_value("LISTEN", "BROKER_API").await,
        Err(StoreError::NotFound { .. })
    ));

    // Non-overwriting save only fills the gap left by the delete
    let mut config = store.load_configuration().await.unwrap();
    config.broker_api.listen = ":7000".to_string();
    assert_eq!(store.save_configuration(&config, false).await.unwrap(), 1);
    assert_eq!(
        store.get_value("LISTEN", "BROKER_API").await.unwrap().as_deref(),
        Some(":7000")
    );

    let reloaded: BrokerConfiguration = store.load_configuration().await.unwrap();
    assert_eq!(reloaded.broker_api.listen, ":7000");
    assert_eq!(reloaded.management_api.broker_name, "usb");

    drop_schema(&manager).await;
}

#[tokio::test]
async fn test_instance_store_round_trip() {
    let Some(manager) = test_manager("instance store test") else {
        return;
    };

    bootstrap(&manager).await;
    let store = InstanceStore::new(&manager);

    let mut dials = BTreeMap::new();
    dials.insert(
        "dial-1".to_string(),
        Dial {
            plan: Plan {
                id: "plan-1".to_string(),
                name: "small".to_string(),
                description: "Small plan".to_string(),
                free: true,
                metadata: Some(serde_json::json!({"bullets": ["1 GB"]})),
            },
            configuration: Some(serde_json::json!({"max_dbs": 10})),
        },
    );

    let instance = Instance {
        name: "mysql-driver".to_string(),
        target_url: "http://10.0.0.5:8080".to_string(),
        authentication_key: "s3cret".to_string(),
        ca_cert: None,
        skip_ssl: true,
        dials,
        service: Some(CatalogService {
            id: "svc-1".to_string(),
            name: "mysql".to_string(),
            description: "MySQL databases".to_string(),
            bindable: true,
            plan_updateable: false,
            tags: vec!["sql".to_string()],
            requires: vec!["syslog_drain".to_string()],
            metadata: None,
            dashboard_client: None,
        }),
    };

    store.set_instance("inst-1", &instance).await.unwrap();

    assert_eq!(store.load_instance("inst-1").await.unwrap(), instance);
    assert_eq!(store.list_instance_guids().await.unwrap(), vec!["inst-1"]);
    assert!(store.instance_name_exists("mysql-driver").await.unwrap());

    let (plan, dial_id, instance_id) = store.get_plan("plan-1").await.unwrap();
    assert_eq!(plan.name, "small");
    assert_eq!(dial_id, "dial-1");
    assert_eq!(instance_id, "inst-1");

    let (service, owner) = store.get_service("svc-1").await.unwrap();
    assert_eq!(service.requires, vec!["syslog_drain"]);
    assert_eq!(owner, "inst-1");

    store.delete_dial("dial-1").await.unwrap();
    assert!(matches!(
        store.get_plan("plan-1").await,
        Err(StoreError::NotFound { .. })
    ));

    store.delete_instance("inst-1").await.unwrap();
    assert!(matches!(
        store.load_instance("inst-1").await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.get_service("svc-1").await,
        Err(StoreError::NotFound { .. })
    ));

    drop_schema(&manager).await;
}

#[tokio::test]
async fn test_configuration_carries_instances() {
    let Some(manager) = test_manager("configuration instances test") else {
        return;
    };

    bootstrap(&manager).await;
    let store = ConfigStore::new(&manager);

    let mut dials = BTreeMap::new();
    dials.insert(
        "dial-a".to_string(),
        Dial {
            plan: Plan {
                id: "plan-a".to_string(),
                name: "default".to_string(),
                ..Plan::default()
            },
            configuration: None,
        },
    );
    let instance = Instance {
        name: "redis-driver".to_string(),
        target_url: "http://10.0.0.6:8080".to_string(),
        authentication_key: "k".to_string(),
        dials,
        ..Instance::default()
    };

    let mut config = store.load_configuration().await.unwrap();
    assert!(config.instances.is_empty());
    config.instances.insert("inst-a".to_string(), instance.clone());

    // Config rows already match the seed, so only the instance is new
    assert_eq!(store.save_configuration(&config, false).await.unwrap(), 0);
    let loaded = store.load_configuration().await.unwrap();
    assert_eq!(loaded.instances.get("inst-a"), Some(&instance));

    // Without overwrite an existing instance is left alone
    let mut renamed = config.clone();
    renamed.instances.get_mut("inst-a").unwrap().name = "renamed".to_string();
    store.save_configuration(&renamed, false).await.unwrap();
    assert_eq!(
        InstanceStore::new(&manager).get_instance("inst-a").await.unwrap().name,
        "redis-driver"
    );

    // Overwrite replaces the instance and its dials
    renamed.instances.get_mut("inst-a").unwrap().dials.clear();
    store.save_configuration(&renamed, true).await.unwrap();
    let reloaded = store.load_configuration().await.unwrap();
    let stored = &reloaded.instances["inst-a"];
    assert_eq!(stored.name, "renamed");
    assert!(stored.dials.is_empty());
    assert!(matches!(
        InstanceStore::new(&manager).get_plan("plan-a").await,
        Err(StoreError::NotFound { .. })
    ));
    assert_eq!(reloaded.broker_api.listen, ":54053");

    drop_schema(&manager).await;
}
