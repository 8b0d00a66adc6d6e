// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn current_version_passes_through() {
    let registry = MigrationRegistry::new();
    let snapshot = json!({"v": 2, "seq": 1, "state": {}});
    let migrated = registry.migrate_to(snapshot.clone(), 2).unwrap();
    assert_eq!(migrated, snapshot);
}

#[test]
fn v1_gets_route_handles_and_nodes() {
    let registry = MigrationRegistry::new();
    let snapshot = json!({
        "v": 1,
        "seq": 7,
        "state": {"analyses": {}, "tasks": {}, "machines": {}}
    });

    let migrated = registry.migrate_to(snapshot, 2).unwrap();
    assert_eq!(migrated["v"], 2);
    assert!(migrated["state"]["route_handles"].is_object());
    assert!(migrated["state"]["node_tasks"].is_object());
    assert!(migrated["state"]["nodes"].is_object());
}

#[test]
fn missing_version_defaults_to_v1() {
    let registry = MigrationRegistry::new();
    let snapshot = json!({"seq": 1, "state": {}});
    let migrated = registry.migrate_to(snapshot, 2).unwrap();
    assert_eq!(migrated["v"], 2);
}

#[test]
fn newer_snapshot_is_refused() {
    let registry = MigrationRegistry::new();
    let snapshot = json!({"v": 99, "seq": 1, "state": {}});
    let err = registry.migrate_to(snapshot, 2).unwrap_err();
    assert!(matches!(err, MigrationError::TooNew(99, 2)));
}

#[test]
fn v1_without_state_object_fails() {
    let registry = MigrationRegistry::new();
    let snapshot = json!({"v": 1, "seq": 1});
    let err = registry.migrate_to(snapshot, 2).unwrap_err();
    assert!(matches!(err, MigrationError::Failed { from: 1, to: 2, .. }));
}
