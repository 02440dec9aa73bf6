// ABOUTME: Versioned per-tenant key files wrapped with the process master key
// ABOUTME: Provides store/get/list/delete plus timestamped backup and restore
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

//! # Key store
//!
//! Tenant keys live as one file per version under
//! `<base>/<tenantId>/key_v<version>.json`. Each file holds
//! `base64(IV ‖ ciphertext)` where the ciphertext is the AES-256-GCM wrap of
//! the key document JSON under the process master key. All operations are
//! serialized by one mutex; the store is constructed once per process.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::errors::{AppError, AppResult};

/// Data-layer algorithm identifier written into key documents
pub const KEY_ALGORITHM: &str = "AES-256-GCM";

const KEY_FILE_PREFIX: &str = "key_v";
const KEY_FILE_SUFFIX: &str = ".json";
const BACKUP_DIR: &str = "backups";
const KEY_LIFETIME_DAYS: i64 = 365;

/// Plaintext key document persisted (wrapped) per version
#[derive(Debug, Serialize, Deserialize)]
struct KeyDocument {
    key_id: String,
    key: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    algorithm: String,
    is_active: bool,
}

/// A decoded tenant key; material is zeroized on drop
pub struct TenantKey {
    /// Owning tenant
    pub tenant_id: String,
    /// Monotonic version string, starting at `"1"`
    pub version: String,
    /// 256-bit symmetric key material
    pub key_material: Vec<u8>,
    /// Algorithm identifier
    pub algorithm: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
    /// Whether the version was active when stored
    pub is_active: bool,
}

impl Drop for TenantKey {
    fn drop(&mut self) {
        self.key_material.zeroize();
    }
}

impl Clone for TenantKey {
    fn clone(&self) -> Self {
        Self {
            tenant_id: self.tenant_id.clone(),
            version: self.version.clone(),
            key_material: self.key_material.clone(),
            algorithm: self.algorithm.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            is_active: self.is_active,
        }
    }
}

impl std::fmt::Debug for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantKey")
            .field("tenant_id", &self.tenant_id)
            .field("version", &self.version)
            .field("key_material", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// File-backed store of master-key-wrapped tenant keys
pub struct KeyStore {
    base_dir: PathBuf,
    master_key: [u8; 32],
    rng: SystemRandom,
    // Serializes every file operation in this process
    lock: Mutex<()>,
}

impl KeyStore {
    /// Open (creating if needed) the store rooted at `base_dir`.
    ///
    /// The directory is restricted to the process owner on a best-effort
    /// basis.
    ///
    /// # Errors
    /// Returns `StorageFailure` when the base directory cannot be created.
    pub async fn open(base_dir: impl Into<PathBuf>, master_key: [u8; 32]) -> AppResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await.map_err(|e| {
            AppError::storage(format!(
                "failed to create key store dir {}: {e}",
                base_dir.display()
            ))
        })?;
        restrict_permissions(&base_dir).await;
        info!(dir = %base_dir.display(), "key store opened");
        Ok(Self {
            base_dir,
            master_key,
            rng: SystemRandom::new(),
            lock: Mutex::new(()),
        })
    }

    /// Write a key version file.
    ///
    /// # Errors
    /// Returns `StorageFailure` on I/O failure and `Internal` when the wrap
    /// fails.
    pub async fn store(
        &self,
        tenant_id: &str,
        key_material: &[u8],
        version: &str,
    ) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();
        let document = KeyDocument {
            key_id: format!("{tenant_id}-v{version}"),
            key: BASE64.encode(key_material),
            created_at: now,
            expires_at: now + Duration::days(KEY_LIFETIME_DAYS),
            algorithm: KEY_ALGORITHM.to_owned(),
            is_active: true,
        };
        let plaintext = serde_json::to_vec(&document)
            .map_err(|e| AppError::internal(format!("key document serialization: {e}")))?;
        let wrapped = self.wrap(&plaintext)?;

        let tenant_dir = self.base_dir.join(tenant_id);
        fs::create_dir_all(&tenant_dir)
            .await
            .map_err(|e| AppError::storage(format!("failed to create tenant key dir: {e}")))?;
        restrict_permissions(&tenant_dir).await;

        let path = tenant_dir.join(key_file_name(version));
        fs::write(&path, wrapped).await.map_err(|e| {
            AppError::storage(format!("failed to write {}: {e}", path.display()))
        })?;
        debug!(tenant_id, version, "stored tenant key");
        Ok(())
    }

    /// Read a key version; `None` returns the highest-numbered version.
    ///
    /// # Errors
    /// `NotFound` when the tenant or version has no file; `InvalidFormat`
    /// when unwrap or JSON parse fails; `StorageFailure` on I/O failure.
    pub async fn get(&self, tenant_id: &str, version: Option<&str>) -> AppResult<TenantKey> {
        let _guard = self.lock.lock().await;
        let version = match version {
            Some(v) => v.to_owned(),
            None => self
                .versions_unlocked(tenant_id)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| AppError::not_found(format!("no keys for tenant {tenant_id}")))?,
        };

        let path = self.base_dir.join(tenant_id).join(key_file_name(&version));
        let wrapped = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::not_found(format!(
                    "key version {version} for tenant {tenant_id}"
                )))
            }
            Err(e) => {
                return Err(AppError::storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let plaintext = self.unwrap(wrapped.trim())?;
        let document: KeyDocument = serde_json::from_slice(&plaintext)
            .map_err(|e| AppError::invalid_format(format!("key document parse: {e}")))?;
        let key_material = BASE64
            .decode(&document.key)
            .map_err(|e| AppError::invalid_format(format!("key material base64: {e}")))?;

        Ok(TenantKey {
            tenant_id: tenant_id.to_owned(),
            version,
            key_material,
            algorithm: document.algorithm,
            created_at: document.created_at,
            expires_at: document.expires_at,
            is_active: document.is_active,
        })
    }

    /// Version strings present for a tenant, descending numerically.
    ///
    /// # Errors
    /// Returns `StorageFailure` on I/O failure; an absent tenant directory
    /// yields an empty list.
    pub async fn list_versions(&self, tenant_id: &str) -> AppResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.versions_unlocked(tenant_id).await
    }

    /// Shred and remove a key version file; idempotent.
    ///
    /// The file is overwritten twice with random bytes and once with zeros
    /// before unlinking (best-effort secure delete).
    ///
    /// # Errors
    /// Returns `StorageFailure` on I/O failure.
    pub async fn delete(&self, tenant_id: &str, version: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let path = self.base_dir.join(tenant_id).join(key_file_name(version));
        let len = match fs::metadata(&path).await {
            Ok(meta) => meta.len() as usize,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(AppError::storage(format!(
                    "failed to stat {}: {e}",
                    path.display()
                )))
            }
        };

        for pass in 0..3u8 {
            let mut buf = vec![0u8; len.max(1)];
            if pass < 2 {
                self.rng
                    .fill(&mut buf)
                    .map_err(|_| AppError::internal("rng failure during shred"))?;
            }
            fs::write(&path, &buf).await.map_err(|e| {
                AppError::storage(format!("shred pass failed for {}: {e}", path.display()))
            })?;
        }
        fs::remove_file(&path)
            .await
            .map_err(|e| AppError::storage(format!("failed to unlink {}: {e}", path.display())))?;
        info!(tenant_id, version, "deleted tenant key version");
        Ok(())
    }

    /// Copy all of a tenant's key files into a timestamp-named backup
    /// directory; returns the directory path.
    ///
    /// # Errors
    /// Returns `NotFound` when the tenant has no keys and `StorageFailure`
    /// on I/O failure.
    pub async fn backup(&self, tenant_id: &str) -> AppResult<PathBuf> {
        let _guard = self.lock.lock().await;
        let versions = self.versions_unlocked(tenant_id).await?;
        if versions.is_empty() {
            return Err(AppError::not_found(format!(
                "no keys to back up for tenant {tenant_id}"
            )));
        }

        let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let backup_dir = self
            .base_dir
            .join(BACKUP_DIR)
            .join(tenant_id)
            .join(&stamp);
        fs::create_dir_all(&backup_dir)
            .await
            .map_err(|e| AppError::storage(format!("failed to create backup dir: {e}")))?;

        let tenant_dir = self.base_dir.join(tenant_id);
        for version in &versions {
            let name = key_file_name(version);
            fs::copy(tenant_dir.join(&name), backup_dir.join(&name))
                .await
                .map_err(|e| AppError::storage(format!("backup copy failed: {e}")))?;
        }
        info!(tenant_id, backup = %backup_dir.display(), "backed up tenant keys");
        Ok(backup_dir)
    }

    /// Restore a tenant's key files from the most recent backup, overwriting
    /// current files.
    ///
    /// # Errors
    /// Returns `NotFound` when no backup exists and `StorageFailure` on I/O
    /// failure.
    pub async fn restore(&self, tenant_id: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let backups_root = self.base_dir.join(BACKUP_DIR).join(tenant_id);
        let mut stamps = Vec::new();
        let mut entries = match fs::read_dir(&backups_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::not_found(format!(
                    "no backups for tenant {tenant_id}"
                )))
            }
            Err(e) => return Err(AppError::storage(format!("failed to list backups: {e}"))),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::storage(format!("failed to list backups: {e}")))?
        {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    stamps.push(name.to_owned());
                }
            }
        }
        // Timestamp-named directories sort lexicographically by recency
        stamps.sort();
        let latest = stamps
            .pop()
            .ok_or_else(|| AppError::not_found(format!("no backups for tenant {tenant_id}")))?;

        let source = backups_root.join(&latest);
        let tenant_dir = self.base_dir.join(tenant_id);
        fs::create_dir_all(&tenant_dir)
            .await
            .map_err(|e| AppError::storage(format!("failed to create tenant key dir: {e}")))?;

        let mut restored = 0usize;
        let mut files = fs::read_dir(&source)
            .await
            .map_err(|e| AppError::storage(format!("failed to read backup dir: {e}")))?;
        while let Some(entry) = files
            .next_entry()
            .await
            .map_err(|e| AppError::storage(format!("failed to read backup dir: {e}")))?
        {
            let name = entry.file_name();
            fs::copy(entry.path(), tenant_dir.join(&name))
                .await
                .map_err(|e| AppError::storage(format!("restore copy failed: {e}")))?;
            restored += 1;
        }
        info!(tenant_id, backup = %latest, restored, "restored tenant keys");
        Ok(())
    }

    async fn versions_unlocked(&self, tenant_id: &str) -> AppResult<Vec<String>> {
        let tenant_dir = self.base_dir.join(tenant_id);
        let mut entries = match fs::read_dir(&tenant_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::storage(format!(
                    "failed to list {}: {e}",
                    tenant_dir.display()
                )))
            }
        };

        let mut versions: Vec<(u64, String)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::storage(format!("failed to list tenant keys: {e}")))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(version) = name
                .strip_prefix(KEY_FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(KEY_FILE_SUFFIX))
            else {
                continue;
            };
            match version.parse::<u64>() {
                Ok(n) => versions.push((n, version.to_owned())),
                Err(_) => warn!(tenant_id, file = name, "ignoring non-numeric key version"),
            }
        }
        versions.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(versions.into_iter().map(|(_, v)| v).collect())
    }

    fn wrap(&self, plaintext: &[u8]) -> AppResult<String> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.master_key)
            .map_err(|_| AppError::internal("failed to build master wrap key"))?;
        let key = LessSafeKey::new(unbound);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| AppError::internal("rng failure generating wrap nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut ciphertext = plaintext.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut ciphertext)
            .map_err(|_| AppError::internal("master wrap failed"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    fn unwrap(&self, wrapped: &str) -> AppResult<Vec<u8>> {
        let combined = BASE64
            .decode(wrapped)
            .map_err(|e| AppError::invalid_format(format!("wrapped key base64: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(AppError::invalid_format("wrapped key too short"));
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| AppError::invalid_format("wrapped key nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let unbound = UnboundKey::new(&AES_256_GCM, &self.master_key)
            .map_err(|_| AppError::internal("failed to build master wrap key"))?;
        let key = LessSafeKey::new(unbound);

        let mut buffer = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| AppError::invalid_format("master unwrap failed"))?;
        Ok(plaintext.to_vec())
    }
}

fn key_file_name(version: &str) -> String {
    format!("{KEY_FILE_PREFIX}{version}{KEY_FILE_SUFFIX}")
}

async fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if let Err(e) = fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await {
            warn!(path = %path.display(), error = %e, "could not restrict key dir permissions");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}
