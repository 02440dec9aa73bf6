// ABOUTME: In-memory tenant catalog seeded from configuration
// ABOUTME: The single source of truth for tenant existence; O(1) lookups via dashmap
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use dashmap::DashMap;

use super::{TenantDescriptor, TenantId};
use crate::config::TenantSeed;
use crate::errors::{AppError, AppResult};

/// Static/dynamic catalog of tenants
#[derive(Default)]
pub struct TenantRegistry {
    tenants: DashMap<String, TenantDescriptor>,
}

impl TenantRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded from configuration entries.
    ///
    /// # Errors
    /// Returns `InvalidFormat` when a seeded tenant id is malformed.
    pub fn from_seeds(seeds: Vec<TenantSeed>) -> AppResult<Self> {
        let registry = Self::new();
        for seed in seeds {
            let descriptor = TenantDescriptor::from_seed(seed)?;
            registry
                .tenants
                .insert(descriptor.tenant_id.as_str().to_owned(), descriptor);
        }
        Ok(registry)
    }

    /// Add a tenant.
    ///
    /// # Errors
    /// Returns `BadCommandPayload` when the tenant already exists.
    pub fn add(&self, descriptor: TenantDescriptor) -> AppResult<()> {
        let key = descriptor.tenant_id.as_str().to_owned();
        match self.tenants.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::bad_payload(format!(
                "tenant {} already exists",
                descriptor.tenant_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(descriptor);
                Ok(())
            }
        }
    }

    /// Replace an existing tenant's descriptor.
    ///
    /// # Errors
    /// Returns `UnknownTenant` when the tenant is absent.
    pub fn update(&self, descriptor: TenantDescriptor) -> AppResult<()> {
        let key = descriptor.tenant_id.as_str().to_owned();
        match self.tenants.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                slot.insert(descriptor);
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(_) => {
                Err(AppError::unknown_tenant(descriptor.tenant_id.as_str()))
            }
        }
    }

    /// Remove a tenant; idempotent.
    pub fn delete(&self, tenant_id: &TenantId) {
        self.tenants.remove(tenant_id.as_str());
    }

    /// Look up a tenant.
    ///
    /// # Errors
    /// Returns `UnknownTenant` when the tenant is absent.
    pub fn get(&self, tenant_id: &TenantId) -> AppResult<TenantDescriptor> {
        self.tenants
            .get(tenant_id.as_str())
            .map(|entry| entry.clone())
            .ok_or_else(|| AppError::unknown_tenant(tenant_id.as_str()))
    }

    /// Whether the tenant exists
    #[must_use]
    pub fn contains(&self, tenant_id: &TenantId) -> bool {
        self.tenants.contains_key(tenant_id.as_str())
    }

    /// Snapshot of all descriptors
    #[must_use]
    pub fn list(&self) -> Vec<TenantDescriptor> {
        let mut all: Vec<TenantDescriptor> =
            self.tenants.iter().map(|entry| entry.clone()).collect();
        all.sort_by(|a, b| a.tenant_id.as_str().cmp(b.tenant_id.as_str()));
        all
    }

    /// Number of registered tenants
    #[must_use]
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
