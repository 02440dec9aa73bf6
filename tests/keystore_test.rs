// ABOUTME: Integration tests for the versioned tenant key store
// ABOUTME: Covers store/get/list/delete, master-key wrapping, and backup/restore
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use acs_server::errors::AppError;
use acs_server::keystore::KeyStore;

use common::{init_test_logging, test_keystore, test_master_key};

fn material(seed: u8) -> Vec<u8> {
    vec![seed; 32]
}

#[tokio::test]
async fn store_then_get_specific_and_latest() {
    init_test_logging();
    let (store, _dir) = test_keystore().await;

    store.store("t1", &material(1), "1").await.unwrap();
    store.store("t1", &material(2), "2").await.unwrap();

    let v1 = store.get("t1", Some("1")).await.unwrap();
    assert_eq!(v1.key_material, material(1));
    assert_eq!(v1.version, "1");
    assert_eq!(v1.algorithm, "AES-256-GCM");

    let latest = store.get("t1", None).await.unwrap();
    assert_eq!(latest.version, "2");
    assert_eq!(latest.key_material, material(2));
}

#[tokio::test]
async fn versions_list_descending_numerically() {
    init_test_logging();
    let (store, _dir) = test_keystore().await;

    for version in ["1", "2", "10", "3"] {
        store.store("t1", &material(9), version).await.unwrap();
    }
    let versions = store.list_versions("t1").await.unwrap();
    assert_eq!(versions, ["10", "3", "2", "1"]);
}

#[tokio::test]
async fn absent_tenant_and_version_report_not_found() {
    init_test_logging();
    let (store, _dir) = test_keystore().await;

    assert!(matches!(
        store.get("ghost", None).await,
        Err(AppError::NotFound(_))
    ));

    store.store("t1", &material(1), "1").await.unwrap();
    assert!(matches!(
        store.get("t1", Some("7")).await,
        Err(AppError::NotFound(_))
    ));
    assert!(store.list_versions("ghost").await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_shreds_and_is_idempotent() {
    init_test_logging();
    let (store, _dir) = test_keystore().await;

    store.store("t1", &material(1), "1").await.unwrap();
    store.store("t1", &material(2), "2").await.unwrap();

    store.delete("t1", "1").await.unwrap();
    assert!(matches!(
        store.get("t1", Some("1")).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(store.list_versions("t1").await.unwrap(), ["2"]);

    // Deleting again is a no-op
    store.delete("t1", "1").await.unwrap();
}

#[tokio::test]
async fn wrong_master_key_yields_invalid_format() {
    init_test_logging();
    let dir = tempfile::TempDir::new().unwrap();

    let writer = KeyStore::open(dir.path(), test_master_key()).await.unwrap();
    writer.store("t1", &material(5), "1").await.unwrap();

    // Same files, different master key
    let reader = KeyStore::open(dir.path(), test_master_key()).await.unwrap();
    assert!(matches!(
        reader.get("t1", Some("1")).await,
        Err(AppError::InvalidFormat(_))
    ));
}

#[tokio::test]
async fn key_files_are_wrapped_not_plaintext() {
    init_test_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), test_master_key()).await.unwrap();
    store.store("t1", &material(7), "1").await.unwrap();

    let raw = std::fs::read_to_string(dir.path().join("t1").join("key_v1.json")).unwrap();
    // The on-disk form is base64 of IV‖ciphertext, never the JSON document
    assert!(!raw.contains("key_id"));
    assert!(!raw.contains("AES-256-GCM"));
}

#[tokio::test]
async fn backup_then_restore_recovers_deleted_versions() {
    init_test_logging();
    let (store, _dir) = test_keystore().await;

    store.store("t1", &material(1), "1").await.unwrap();
    store.store("t1", &material(2), "2").await.unwrap();
    store.backup("t1").await.unwrap();

    store.delete("t1", "1").await.unwrap();
    store.delete("t1", "2").await.unwrap();
    assert!(store.list_versions("t1").await.unwrap().is_empty());

    store.restore("t1").await.unwrap();
    let versions = store.list_versions("t1").await.unwrap();
    assert_eq!(versions, ["2", "1"]);
    assert_eq!(store.get("t1", Some("1")).await.unwrap().key_material, material(1));
}

#[tokio::test]
async fn restore_without_backup_reports_not_found() {
    init_test_logging();
    let (store, _dir) = test_keystore().await;
    assert!(matches!(
        store.restore("t1").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        store.backup("t1").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn tenants_are_isolated_on_disk() {
    init_test_logging();
    let (store, _dir) = test_keystore().await;

    store.store("t1", &material(1), "1").await.unwrap();
    store.store("t2", &material(2), "1").await.unwrap();

    assert_eq!(store.get("t1", None).await.unwrap().key_material, material(1));
    assert_eq!(store.get("t2", None).await.unwrap().key_material, material(2));
}
