// ABOUTME: Gateway and worker configuration loaded from a JSON file merged over environment
// ABOUTME: Owns master key decoding, port range, timeouts, and the seed tenant catalog
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Environment variable carrying the base64 master key (32 bytes)
pub const MASTER_KEY_ENV: &str = "ACS_MASTER_KEY";
/// Environment variable carrying the JWT signing secret
pub const JWT_SECRET_ENV: &str = "ACS_JWT_SECRET";
/// Environment variable a worker reads its tenant from
pub const TENANT_ID_ENV: &str = "TENANT_ID";
/// Environment variable a worker reads its RPC port from
pub const RPC_PORT_ENV: &str = "RPC_PORT";

/// Seeded tenant catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSeed {
    /// Opaque tenant identifier
    pub tenant_id: String,
    /// Human-readable name
    #[serde(default)]
    pub display_name: String,
    /// Connection string for the tenant database (handed to the worker)
    #[serde(default)]
    pub database_url: String,
    /// Inactive tenants resolve but never get a worker
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Free-form per-tenant settings
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

/// Seeded gateway login credential (the real identity store is external)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSeed {
    /// Login name
    pub username: String,
    /// Plaintext password (development seeding only)
    pub password: String,
    /// Stable user id issued into tokens
    pub user_id: String,
    /// Home tenant for the principal
    pub tenant_id: String,
    /// Roles issued into tokens
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listen port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// `development` or `production`; gates the dev default tenant
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Base64 master key; `ACS_MASTER_KEY` overrides
    #[serde(default)]
    pub master_key: Option<String>,
    /// JWT shared secret; `ACS_JWT_SECRET` overrides
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Issued token lifetime in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    /// Key store base directory
    #[serde(default = "default_key_store_dir")]
    pub key_store_dir: PathBuf,
    /// Worker binary path; defaults to `acs-worker` next to the gateway binary
    #[serde(default)]
    pub worker_binary: Option<PathBuf>,
    /// First port handed to workers
    #[serde(default = "default_min_port")]
    pub min_port: u16,
    /// Last port handed to workers
    #[serde(default = "default_max_port")]
    pub max_port: u16,
    /// Tenant used when no resolution source applies (development only)
    #[serde(default)]
    pub dev_default_tenant: Option<String>,
    /// Command buffer capacity applied to spawned workers
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Seconds `enqueue` waits for space before failing `Overloaded`
    #[serde(default = "default_enqueue_timeout")]
    pub enqueue_timeout_secs: u64,
    /// Per-command RPC deadline in seconds
    #[serde(default = "default_rpc_deadline")]
    pub rpc_deadline_secs: u64,
    /// Health probe timeout in seconds
    #[serde(default = "default_health_probe_timeout")]
    pub health_probe_timeout_secs: u64,
    /// Number of 1 s startup health probes before `WorkerStartupTimeout`
    #[serde(default = "default_startup_probes")]
    pub worker_startup_probes: u32,
    /// Seconds a health observation stays fresh enough to route on
    #[serde(default = "default_liveness_window")]
    pub liveness_window_secs: u64,
    /// Seconds allowed for a graceful worker stop before force kill
    #[serde(default = "default_graceful_stop")]
    pub graceful_stop_secs: u64,
    /// Seed tenant catalog
    #[serde(default)]
    pub tenants: Vec<TenantSeed>,
    /// Seed login credentials
    #[serde(default)]
    pub credentials: Vec<CredentialSeed>,
}

impl GatewayConfig {
    /// Load configuration: JSON file (when given) with environment overrides.
    ///
    /// # Errors
    /// Returns `StorageFailure` when the file cannot be read,
    /// `InvalidFormat` when it does not parse, and `Internal` when the
    /// master key or JWT secret is absent or malformed (fatal at startup).
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| AppError::storage(format!("failed to read config {}: {e}", p.display())))?;
                serde_json::from_str::<Self>(&raw)
                    .map_err(|e| AppError::invalid_format(format!("config parse error: {e}")))?
            }
            None => serde_json::from_str::<Self>("{}")
                .map_err(|e| AppError::internal(format!("default config: {e}")))?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var(MASTER_KEY_ENV) {
            self.master_key = Some(v);
        }
        if let Ok(v) = env::var(JWT_SECRET_ENV) {
            self.jwt_secret = Some(v);
        }
        if let Ok(v) = env::var("ACS_HTTP_PORT") {
            if let Ok(port) = v.parse() {
                self.http_port = port;
            }
        }
        if let Ok(v) = env::var("ACS_KEY_STORE_DIR") {
            self.key_store_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("ACS_ENVIRONMENT") {
            self.environment = v;
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.min_port > self.max_port {
            return Err(AppError::internal(format!(
                "invalid port range {}..{}",
                self.min_port, self.max_port
            )));
        }
        if self.is_production() && self.dev_default_tenant.is_some() {
            return Err(AppError::internal(
                "dev_default_tenant must not be set in production",
            ));
        }
        // Decoding failures surface at startup, not on first use
        self.decoded_master_key()?;
        self.require_jwt_secret()?;
        Ok(())
    }

    /// Whether the gateway runs with production settings
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Decode the 32-byte master key; absence is fatal
    ///
    /// # Errors
    /// Returns `Internal` when the key is absent, not base64, or not 32 bytes.
    pub fn decoded_master_key(&self) -> AppResult<[u8; 32]> {
        decode_master_key(self.master_key.as_deref())
    }

    /// JWT secret; absence is fatal
    ///
    /// # Errors
    /// Returns `Internal` when no secret is configured.
    pub fn require_jwt_secret(&self) -> AppResult<String> {
        self.jwt_secret
            .clone()
            .ok_or_else(|| AppError::internal(format!("{JWT_SECRET_ENV} is not set")))
    }

    /// Resolve the worker binary: configured path, or `acs-worker` beside the
    /// currently running executable, or plain `acs-worker` from `PATH`.
    #[must_use]
    pub fn resolved_worker_binary(&self) -> PathBuf {
        if let Some(path) = &self.worker_binary {
            return path.clone();
        }
        env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|d| d.join("acs-worker")))
            .filter(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("acs-worker"))
    }
}

/// Worker configuration, assembled from CLI arguments and environment
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Tenant this worker is dedicated to
    pub tenant_id: String,
    /// RPC listen port
    pub port: u16,
    /// Key store base directory
    pub key_store_dir: PathBuf,
    /// Decoded master key
    pub master_key: [u8; 32],
    /// Command buffer capacity
    pub buffer_capacity: usize,
    /// Seconds `enqueue` waits for space before failing `Overloaded`
    pub enqueue_timeout_secs: u64,
}

impl WorkerConfig {
    /// Assemble worker configuration. CLI values win over `TENANT_ID` /
    /// `RPC_PORT`; the master key always comes from the environment.
    ///
    /// # Errors
    /// Returns `Internal` when tenant, port, or master key cannot be determined.
    pub fn from_env(tenant_arg: Option<String>, port_arg: Option<u16>) -> AppResult<Self> {
        let tenant_id = tenant_arg
            .or_else(|| env::var(TENANT_ID_ENV).ok())
            .ok_or_else(|| AppError::internal(format!("{TENANT_ID_ENV} is not set")))?;
        let port = match port_arg {
            Some(p) => p,
            None => env::var(RPC_PORT_ENV)
                .ok()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| AppError::internal(format!("{RPC_PORT_ENV} is not set")))?,
        };
        let master_key = decode_master_key(env::var(MASTER_KEY_ENV).ok().as_deref())?;
        let key_store_dir = env::var("ACS_KEY_STORE_DIR")
            .map_or_else(|_| default_key_store_dir(), PathBuf::from);
        let buffer_capacity = env::var("ACS_BUFFER_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_buffer_capacity);
        Ok(Self {
            tenant_id,
            port,
            key_store_dir,
            master_key,
            buffer_capacity,
            enqueue_timeout_secs: default_enqueue_timeout(),
        })
    }
}

fn decode_master_key(encoded: Option<&str>) -> AppResult<[u8; 32]> {
    let encoded =
        encoded.ok_or_else(|| AppError::internal(format!("{MASTER_KEY_ENV} is not set")))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| AppError::internal(format!("master key is not valid base64: {e}")))?;
    <[u8; 32]>::try_from(bytes)
        .map_err(|b| AppError::internal(format!("master key must be 32 bytes, got {}", b.len())))
}

/// Generate a fresh base64 master key (setup tooling and tests)
#[must_use]
pub fn generate_master_key() -> String {
    use rand::RngCore as _;
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

const fn default_true() -> bool {
    true
}
const fn default_http_port() -> u16 {
    8080
}
fn default_environment() -> String {
    "development".to_owned()
}
const fn default_token_ttl() -> u64 {
    3600
}
fn default_key_store_dir() -> PathBuf {
    PathBuf::from("data/keys")
}
const fn default_min_port() -> u16 {
    5001
}
const fn default_max_port() -> u16 {
    5100
}
const fn default_buffer_capacity() -> usize {
    10_000
}
const fn default_enqueue_timeout() -> u64 {
    5
}
const fn default_rpc_deadline() -> u64 {
    30
}
const fn default_health_probe_timeout() -> u64 {
    5
}
const fn default_startup_probes() -> u32 {
    30
}
const fn default_liveness_window() -> u64 {
    30
}
const fn default_graceful_stop() -> u64 {
    5
}
