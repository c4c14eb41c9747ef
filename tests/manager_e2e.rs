//! End-to-end manager tests: multi-source routing, aggregation,
//! caching, and persistence against a real backend.

use std::sync::Arc;

use fleetfacts::{
    CustomFactsDocument, DocumentCollector, FactQuery, FactsManager, ImportOptions, JsonStore,
    LocalCollector, ManagerConfig, MergePolicy, RemoteExecCollector, StaticProvider,
};

fn write_file(dir: &tempfile::TempDir, name: &str, json: &serde_json::Value) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string_pretty(json).unwrap()).unwrap();
    path.display().to_string()
}

/// A manager wired to every source variant plus a JSON storage backend.
fn fleet_manager(dir: &tempfile::TempDir) -> FactsManager {
    let remote = Arc::new(
        StaticProvider::new()
            .with("web-01", "hostname", "web-01.fleet")
            .with("web-01", "os.name", "linux")
            .with("web-01", "os.version", "6.1")
            .with("web-01", "cpu.cores", 8i64)
            .with("web-01", "memory.total", 68_719_476_736i64)
            .with(
                "web-01",
                "network.ips",
                vec!["127.0.0.1".to_string(), "10.0.0.5".to_string()],
            ),
    );
    let local = Arc::new(StaticProvider::new().with("local", "os.name", "linux"));

    let config_path = write_file(
        dir,
        "fleet.json",
        &serde_json::json!({
            "defaults": {"deploy.user": "ops"},
            "web-01": {"deploy.port": 2222}
        }),
    );
    let state_path = write_file(
        dir,
        "state.json",
        &serde_json::json!([
            {"server": "web-01", "region": "eu-1", "provider": "metal"}
        ]),
    );

    let storage = Arc::new(JsonStore::open(dir.path().join("facts.json")).unwrap());

    FactsManager::new(ManagerConfig::default())
        .with_collector(Arc::new(RemoteExecCollector::new(remote, 300)))
        .with_collector(Arc::new(LocalCollector::new(local, 300)))
        .with_collector(Arc::new(DocumentCollector::static_config(&config_path, 0).unwrap()))
        .with_collector(Arc::new(DocumentCollector::infra_state(&state_path, 0).unwrap()))
        .with_storage(storage)
}

#[test]
fn test_collect_all_spans_every_source() {
    let dir = tempfile::tempdir().unwrap();
    let manager = fleet_manager(&dir);

    let outcome = manager.collect_all_facts("web-01").unwrap();
    assert!(!outcome.from_cache);

    let facts = &outcome.facts;
    // Remote execution facts.
    assert_eq!(facts.get("hostname").unwrap().value.as_string(), Some("web-01.fleet"));
    // Static-config facts, defaults and server section both visible.
    assert_eq!(facts.get("config.deploy.user").unwrap().value.as_string(), Some("ops"));
    assert_eq!(facts.get("config.deploy.port").unwrap().value.as_int(), Some(2222));
    // Infrastructure-state facts.
    assert_eq!(facts.get("infra.region").unwrap().value.as_string(), Some("eu-1"));

    // The local provider knows nothing about web-01: that failure is
    // soft and recorded, not fatal.
    assert_eq!(outcome.source_errors.len(), 1);

    // A repeat is served from cache.
    assert!(manager.collect_all_facts("web-01").unwrap().from_cache);
}

#[test]
fn test_collect_all_unknown_server_fails_when_every_source_fails() {
    let dir = tempfile::tempdir().unwrap();
    let manager = fleet_manager(&dir);

    let err = manager.collect_all_facts("ghost").unwrap_err();
    assert!(err.is_all_sources_failed());
}

#[test]
fn test_collect_specific_routes_only_classified_sources() {
    let dir = tempfile::tempdir().unwrap();
    let manager = fleet_manager(&dir);

    let keys: Vec<String> = ["config.deploy.user", "infra.region"]
        .iter()
        .map(|s| (*s).to_string())
        .collect();

    let outcome = manager.collect_specific_facts("web-01", &keys).unwrap();
    assert_eq!(outcome.facts.len(), 2);
    assert!(outcome.source_errors.is_empty());

    // Second call hits the all-or-nothing cache path.
    assert!(manager.collect_specific_facts("web-01", &keys).unwrap().from_cache);
}

#[test]
fn test_get_fact_routes_to_document_source() {
    let dir = tempfile::tempdir().unwrap();
    let manager = fleet_manager(&dir);

    let fact = manager.get_fact("web-01", "infra.provider").unwrap();
    assert_eq!(fact.value.as_string(), Some("metal"));

    assert!(manager.get_fact("web-01", "unclassified.key").unwrap_err().is_not_found());
}

#[test]
fn test_persist_and_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let manager = fleet_manager(&dir);

    let machine_id = manager.persist("web-01").unwrap();
    assert!(machine_id.starts_with("machine-"));

    // Persisting again keeps the identity stable.
    manager.clear_cache();
    assert_eq!(manager.persist("web-01").unwrap(), machine_id);

    let rehydrated = manager.load_persisted(&machine_id).unwrap().unwrap();
    assert_eq!(rehydrated.get("hostname").unwrap().value.as_string(), Some("web-01.fleet"));
    assert_eq!(rehydrated.get("os.name").unwrap().value.as_string(), Some("linux"));
    assert_eq!(rehydrated.get("cpu.cores").unwrap().value.as_int(), Some(8));
    // The loopback address was skipped for the primary IP.
    assert_eq!(
        rehydrated.get("network.primary_ip").unwrap().value.as_string(),
        Some("10.0.0.5")
    );

    assert!(manager.load_persisted("machine-unknown").unwrap().is_none());
}

#[test]
fn test_tags_flow_from_overrides_into_queries() {
    let dir = tempfile::tempdir().unwrap();
    let manager = fleet_manager(&dir);
    manager.collect_all_facts("web-01").unwrap();

    let document: CustomFactsDocument = serde_json::from_value(serde_json::json!({
        "web-01": {
            "overrides": {
                "tags": {"role": "web", "environment": "production"}
            },
            "source": "inventory"
        }
    }))
    .unwrap();
    manager
        .import_custom_facts(document, &ImportOptions::default())
        .unwrap();

    // Tag overrides landed in the persisted record's tag map.
    let by_role = manager
        .query_persisted(&FactQuery::any().with_tag("role", "web"))
        .unwrap();
    assert_eq!(by_role.len(), 1);
    assert_eq!(by_role[0].machine_name, "web-01");

    let by_environment = manager
        .query_persisted(&FactQuery::any().with_environment("production"))
        .unwrap();
    assert_eq!(by_environment.len(), 1);

    // Conjunction with a non-matching tag finds nothing.
    let none = manager
        .query_persisted(
            &FactQuery::any()
                .with_tag("role", "database")
                .with_environment("production"),
        )
        .unwrap();
    assert!(none.is_empty());

    // Delete by predicate removes the record.
    assert_eq!(
        manager
            .delete_persisted(&FactQuery::any().with_tag("role", "web"))
            .unwrap(),
        1
    );
    assert!(manager.load_persisted("anything").unwrap().is_none());
}

#[test]
fn test_import_with_append_policy_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let manager = fleet_manager(&dir);

    let first: CustomFactsDocument = serde_json::from_value(serde_json::json!({
        "web-01": {"custom": {"application": {"port": 8080}}}
    }))
    .unwrap();
    manager
        .import_custom_facts(first, &ImportOptions::default())
        .unwrap();

    let second: CustomFactsDocument = serde_json::from_value(serde_json::json!({
        "web-01": {"custom": {"application": {"port": 9090}}}
    }))
    .unwrap();
    let options = ImportOptions {
        policy: MergePolicy::Append,
        ..ImportOptions::default()
    };
    manager.import_custom_facts(second, &options).unwrap();

    let outcome = manager.collect_all_facts("web-01").unwrap();
    assert!(outcome.from_cache);
    // The original fact kept its key; the colliding import was appended.
    assert_eq!(
        outcome.facts.get("custom.application.port").unwrap().value.as_int(),
        Some(8080)
    );
    let appended = outcome.facts.get("custom.application.port_1").unwrap();
    assert_eq!(appended.value.as_int(), Some(9090));
    assert_eq!(
        appended.metadata.get("original_key").and_then(fleetfacts::Value::as_string),
        Some("custom.application.port")
    );
}
