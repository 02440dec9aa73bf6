// ABOUTME: Shared test utilities: keystores, engines, in-process workers, gateway resources
// ABOUTME: Reduces duplication across integration tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

//! Shared test utilities for `acs_server` integration tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use acs_server::auth::AuthManager;
use acs_server::commands::Command;
use acs_server::config::{
    generate_master_key, CredentialSeed, GatewayConfig, TenantSeed, WorkerConfig,
};
use acs_server::encryption::EncryptionEngine;
use acs_server::errors::AppResult;
use acs_server::gateway::{GatewayServer, ServerResources};
use acs_server::keystore::KeyStore;
use acs_server::rpc::{self, CommandEnvelope, RpcChannel, RpcChannelPool};
use acs_server::worker::WorkerServer;

static INIT_LOGGER: Once = Once::new();

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

/// Initialize quiet logging once per test process
pub fn init_test_logging() {
    INIT_LOGGER.call_once(acs_server::logging::init_for_tests);
}

/// Decoded random master key for one test
pub fn test_master_key() -> [u8; 32] {
    use base64::Engine as _;
    let encoded = generate_master_key();
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap()
        .try_into()
        .unwrap()
}

/// A key store rooted in a fresh temp directory
pub async fn test_keystore() -> (Arc<KeyStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path(), test_master_key()).await.unwrap();
    (Arc::new(store), dir)
}

/// An encryption engine over a fresh key store
pub async fn test_engine() -> (EncryptionEngine, TempDir) {
    let (store, dir) = test_keystore().await;
    (EncryptionEngine::new(store), dir)
}

/// An in-process tenant worker bound to an ephemeral port
pub struct TestWorker {
    pub tenant_id: String,
    pub port: u16,
    pub endpoint: String,
    pub channel: Arc<RpcChannel>,
    handle: JoinHandle<()>,
}

impl Drop for TestWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start a worker in-process (no subprocess, same RPC surface)
pub async fn spawn_worker(tenant_id: &str, keys_dir: &Path, master_key: [u8; 32]) -> TestWorker {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = WorkerServer::new(WorkerConfig {
        tenant_id: tenant_id.to_owned(),
        port,
        key_store_dir: keys_dir.to_path_buf(),
        master_key,
        buffer_capacity: 1024,
        enqueue_timeout_secs: 5,
    })
    .await
    .unwrap();
    let router = server.router();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let endpoint = format!("http://127.0.0.1:{port}");
    let pool = RpcChannelPool::new(Duration::from_secs(10));
    let channel = pool.get_or_create(&endpoint).unwrap();
    TestWorker {
        tenant_id: tenant_id.to_owned(),
        port,
        endpoint,
        channel,
        handle,
    }
}

/// Send a typed command over a raw channel
pub async fn call<C: Command>(
    channel: &RpcChannel,
    command: &C,
    correlation_id: &str,
) -> AppResult<C::Output> {
    let envelope = CommandEnvelope {
        command_type: C::TYPE_ID.to_owned(),
        command_data: rpc::encode(command)?,
        correlation_id: correlation_id.to_owned(),
    };
    let response = channel.call(&envelope).await?;
    rpc::decode(&response.into_result()?)
}

pub fn tenant_seed(id: &str) -> TenantSeed {
    TenantSeed {
        tenant_id: id.to_owned(),
        display_name: id.to_uppercase(),
        database_url: format!("sqlite://{id}.db"),
        is_active: true,
        settings: HashMap::new(),
    }
}

/// Gateway resources over seeded tenants; no worker binary is configured,
/// so any dispatch that actually reaches for a worker fails `WorkerUnavailable`.
pub fn gateway_resources(tenants: &[&str], keys_dir: &Path) -> Arc<ServerResources> {
    let mut config: GatewayConfig = serde_json::from_str("{}").unwrap();
    config.master_key = Some(generate_master_key());
    config.jwt_secret = Some(TEST_JWT_SECRET.to_owned());
    config.key_store_dir = keys_dir.to_path_buf();
    config.worker_binary = Some("/nonexistent/acs-worker-test-stub".into());
    config.worker_startup_probes = 1;
    config.tenants = tenants.iter().map(|id| tenant_seed(id)).collect();
    config.credentials = vec![CredentialSeed {
        username: "alice".to_owned(),
        password: "wonder".to_owned(),
        user_id: "u-alice".to_owned(),
        tenant_id: "t1".to_owned(),
        roles: vec!["Member".to_owned()],
    }];
    ServerResources::new(config).unwrap()
}

/// A gateway router ready for `tower::ServiceExt::oneshot`
pub fn gateway_router(resources: &Arc<ServerResources>) -> axum::Router {
    GatewayServer::new(Arc::clone(resources)).router()
}

/// Auth manager sharing the gateway test secret
pub fn test_auth() -> AuthManager {
    AuthManager::new(TEST_JWT_SECRET, 3600, Vec::new())
}

/// Issue a token whose principal lives in `tenant_id`
pub fn token_for(tenant_id: &str) -> String {
    test_auth()
        .issue_token("u-test", tenant_id, vec!["Member".to_owned()], None)
        .unwrap()
}
