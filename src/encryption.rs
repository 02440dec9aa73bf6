// ABOUTME: Per-tenant AES-256-GCM field encryption with versioned keys and integrity checksums
// ABOUTME: Caches unwrapped keys with a 30-minute TTL and supports rotation with legacy decryption
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::keystore::{KeyStore, KEY_ALGORITHM};

const KEY_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
const LATEST: &str = "latest";

/// An encrypted at-rest field with its integrity checksum
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedField {
    /// Entity the field belongs to
    pub entity_id: String,
    /// Field name within the entity
    pub field_name: String,
    /// Base64 ciphertext (GCM tag appended)
    pub ciphertext: String,
    /// Base64 12-byte IV
    pub iv: String,
    /// Key version that produced the ciphertext
    pub key_version: String,
    /// Algorithm identifier
    pub algorithm: String,
    /// Encryption time
    pub encrypted_at: DateTime<Utc>,
    /// `base64(SHA-256(ciphertext:keyVersion:fieldName:entityId))`
    pub checksum: String,
}

struct CachedKey {
    material: Vec<u8>,
    version: String,
    cached_at: Instant,
}

impl CachedKey {
    fn is_fresh(&self) -> bool {
        self.cached_at.elapsed() < KEY_CACHE_TTL
    }
}

/// Per-tenant encryption engine over the key store
pub struct EncryptionEngine {
    store: Arc<KeyStore>,
    // One mutex covers cache lookups and the fall-through KeyStore reads
    cache: Mutex<HashMap<(String, String), CachedKey>>,
    rng: SystemRandom,
}

impl EncryptionEngine {
    /// Build an engine over an opened key store
    #[must_use]
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            rng: SystemRandom::new(),
        }
    }

    /// Encrypt a string for a tenant with its active key: `base64(IV ‖ ciphertext)`.
    ///
    /// # Errors
    /// Propagates key store failures; `Internal` on cipher failures.
    pub async fn encrypt(&self, plaintext: &str, tenant_id: &str) -> AppResult<String> {
        let (material, _) = self.key_for(tenant_id, None).await?;
        let (iv, ciphertext) = self.seal(&material, plaintext.as_bytes())?;
        let mut combined = Vec::with_capacity(iv.len() + ciphertext.len());
        combined.extend_from_slice(&iv);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Decrypt a `base64(IV ‖ ciphertext)` string.
    ///
    /// Tries the active key first, then retained legacy versions, so blobs
    /// written before a rotation still decrypt.
    ///
    /// # Errors
    /// `InvalidFormat` when no retained key opens the blob.
    pub async fn decrypt(&self, encoded: &str, tenant_id: &str) -> AppResult<String> {
        let combined = BASE64
            .decode(encoded)
            .map_err(|e| AppError::invalid_format(format!("encrypted blob base64: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(AppError::invalid_format("encrypted blob too short"));
        }
        let (iv, ciphertext) = combined.split_at(NONCE_LEN);

        let (material, version) = self.key_for(tenant_id, None).await?;
        if let Ok(plain) = open(&material, iv, ciphertext) {
            return utf8(plain);
        }

        for legacy in self.store.list_versions(tenant_id).await? {
            if legacy == version {
                continue;
            }
            let (material, _) = self.key_for(tenant_id, Some(&legacy)).await?;
            if let Ok(plain) = open(&material, iv, ciphertext) {
                debug!(tenant_id, version = %legacy, "decrypted with legacy key version");
                return utf8(plain);
            }
        }
        Err(AppError::invalid_format(
            "no retained key version decrypts this blob",
        ))
    }

    /// Encrypt one field of one entity, producing the versioned at-rest form.
    ///
    /// # Errors
    /// Propagates key store failures; `Internal` on cipher failures.
    pub async fn encrypt_field(
        &self,
        plaintext: &str,
        field_name: &str,
        entity_id: &str,
        tenant_id: &str,
    ) -> AppResult<EncryptedField> {
        let (material, version) = self.key_for(tenant_id, None).await?;
        let (iv, ciphertext) = self.seal(&material, plaintext.as_bytes())?;
        let ciphertext_b64 = BASE64.encode(&ciphertext);
        let checksum = field_checksum(&ciphertext_b64, &version, field_name, entity_id);
        Ok(EncryptedField {
            entity_id: entity_id.to_owned(),
            field_name: field_name.to_owned(),
            ciphertext: ciphertext_b64,
            iv: BASE64.encode(&iv),
            key_version: version,
            algorithm: KEY_ALGORITHM.to_owned(),
            encrypted_at: Utc::now(),
            checksum,
        })
    }

    /// Decrypt a field after re-verifying its checksum. Decryption uses the
    /// key version embedded in the field, never the active version.
    ///
    /// # Errors
    /// `IntegrityViolation` on checksum mismatch or authentication failure;
    /// `NotFound` when the embedded key version no longer exists.
    pub async fn decrypt_field(
        &self,
        field: &EncryptedField,
        tenant_id: &str,
    ) -> AppResult<String> {
        let expected = field_checksum(
            &field.ciphertext,
            &field.key_version,
            &field.field_name,
            &field.entity_id,
        );
        if expected != field.checksum {
            warn!(
                tenant_id,
                entity_id = %field.entity_id,
                field = %field.field_name,
                "encrypted field failed checksum verification"
            );
            return Err(AppError::IntegrityViolation(format!(
                "checksum mismatch for field {} of entity {}",
                field.field_name, field.entity_id
            )));
        }

        let (material, _) = self.key_for(tenant_id, Some(&field.key_version)).await?;
        let iv = BASE64
            .decode(&field.iv)
            .map_err(|_| AppError::IntegrityViolation("field IV is not valid base64".into()))?;
        let ciphertext = BASE64
            .decode(&field.ciphertext)
            .map_err(|_| AppError::IntegrityViolation("field ciphertext is not valid base64".into()))?;

        let plain = open(&material, &iv, &ciphertext).map_err(|_| {
            AppError::IntegrityViolation(format!(
                "authentication failed for field {} of entity {}",
                field.field_name, field.entity_id
            ))
        })?;
        utf8(plain)
    }

    /// Rotate the tenant's key: store version N+1, retain version N for
    /// legacy decryption, and drop the tenant's cache entries. Background
    /// re-encryption of existing fields is an external collaborator.
    ///
    /// # Errors
    /// Propagates key store failures.
    pub async fn rotate_keys(&self, tenant_id: &str) -> AppResult<String> {
        let (_, current) = self.key_for(tenant_id, None).await?;
        let next: u64 = current
            .parse::<u64>()
            .map_err(|_| AppError::invalid_format(format!("non-numeric key version {current}")))?
            + 1;
        let next = next.to_string();

        let mut material = vec![0u8; 32];
        self.rng
            .fill(&mut material)
            .map_err(|_| AppError::internal("rng failure generating rotated key"))?;
        self.store.store(tenant_id, &material, &next).await?;

        self.invalidate_tenant(tenant_id).await;
        info!(
            tenant_id,
            from = %current,
            to = %next,
            "rotated tenant key; existing fields re-encrypt in the background"
        );
        Ok(next)
    }

    /// Encrypt-then-decrypt a random probe and compare. Never fails; any
    /// error reports as `false`.
    pub async fn validate_key_integrity(&self, tenant_id: &str) -> bool {
        let mut probe = [0u8; 24];
        if self.rng.fill(&mut probe).is_err() {
            return false;
        }
        let probe = hex::encode(probe);
        match self.encrypt(&probe, tenant_id).await {
            Ok(blob) => match self.decrypt(&blob, tenant_id).await {
                Ok(round_tripped) => round_tripped == probe,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    /// Drop all cached keys for a tenant
    pub async fn invalidate_tenant(&self, tenant_id: &str) {
        let mut cache = self.cache.lock().await;
        cache.retain(|(tenant, _), _| tenant != tenant_id);
    }

    /// Resolve key material for a tenant. `None` means the active (latest)
    /// version; a missing latest key triggers one-time generation of
    /// version `"1"`.
    async fn key_for(
        &self,
        tenant_id: &str,
        version: Option<&str>,
    ) -> AppResult<(Vec<u8>, String)> {
        let slot = (
            tenant_id.to_owned(),
            version.unwrap_or(LATEST).to_owned(),
        );

        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(&slot) {
            if entry.is_fresh() {
                return Ok((entry.material.clone(), entry.version.clone()));
            }
            cache.remove(&slot);
        }

        let key = match self.store.get(tenant_id, version).await {
            Ok(key) => key,
            Err(AppError::NotFound(_)) if version.is_none() => {
                self.generate_initial_key(tenant_id).await?;
                self.store.get(tenant_id, None).await?
            }
            Err(e) => return Err(e),
        };

        let material = key.key_material.clone();
        let resolved = key.version.clone();
        cache.insert(
            slot,
            CachedKey {
                material: material.clone(),
                version: resolved.clone(),
                cached_at: Instant::now(),
            },
        );
        // The concrete version is cached too so field decryption after a
        // "latest" lookup does not re-read the store
        cache.insert(
            (tenant_id.to_owned(), resolved.clone()),
            CachedKey {
                material: material.clone(),
                version: resolved.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok((material, resolved))
    }

    async fn generate_initial_key(&self, tenant_id: &str) -> AppResult<()> {
        let mut material = vec![0u8; 32];
        self.rng
            .fill(&mut material)
            .map_err(|_| AppError::internal("rng failure generating tenant key"))?;
        self.store.store(tenant_id, &material, "1").await?;
        info!(tenant_id, "generated initial tenant key");
        Ok(())
    }

    fn seal(&self, material: &[u8], plaintext: &[u8]) -> AppResult<(Vec<u8>, Vec<u8>)> {
        let unbound = UnboundKey::new(&AES_256_GCM, material)
            .map_err(|_| AppError::internal("failed to build tenant data key"))?;
        let key = LessSafeKey::new(unbound);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| AppError::internal("rng failure generating data nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut ciphertext = plaintext.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut ciphertext)
            .map_err(|_| AppError::internal("field encryption failed"))?;
        Ok((nonce_bytes.to_vec(), ciphertext))
    }
}

fn open(material: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, ()> {
    let nonce_bytes: [u8; NONCE_LEN] = iv.try_into().map_err(|_| ())?;
    let unbound = UnboundKey::new(&AES_256_GCM, material).map_err(|_| ())?;
    let key = LessSafeKey::new(unbound);
    let mut buffer = ciphertext.to_vec();
    let plain = key
        .open_in_place(Nonce::assume_unique_for_key(nonce_bytes), Aad::empty(), &mut buffer)
        .map_err(|_| ())?;
    Ok(plain.to_vec())
}

fn utf8(bytes: Vec<u8>) -> AppResult<String> {
    String::from_utf8(bytes)
        .map_err(|e| AppError::invalid_format(format!("decrypted data is not UTF-8: {e}")))
}

fn field_checksum(ciphertext_b64: &str, key_version: &str, field_name: &str, entity_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ciphertext_b64.as_bytes());
    hasher.update(b":");
    hasher.update(key_version.as_bytes());
    hasher.update(b":");
    hasher.update(field_name.as_bytes());
    hasher.update(b":");
    hasher.update(entity_id.as_bytes());
    BASE64.encode(hasher.finalize())
}
