// ABOUTME: Tenant identity and catalog types shared by the gateway and workers
// ABOUTME: Validates tenant ids and defines the descriptor stored in the registry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::TenantSeed;
use crate::errors::AppError;

/// Tenant catalog with O(1) lookups
pub mod registry;
/// Request-to-tenant resolution and cross-tenant access validation
pub mod resolver;

pub use registry::TenantRegistry;
pub use resolver::{ResolutionSource, ResolvedTenant, TenantResolver};

#[allow(clippy::unwrap_used)] // the pattern is a literal
static TENANT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-zA-Z][a-zA-Z0-9_-]*$").unwrap());

/// Validated opaque tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a tenant id.
    ///
    /// # Errors
    /// Returns `InvalidFormat` when the id does not match
    /// `^[a-zA-Z][a-zA-Z0-9_-]*$`.
    pub fn new(id: impl Into<String>) -> Result<Self, AppError> {
        let id = id.into();
        if TENANT_ID_PATTERN.is_match(&id) {
            Ok(Self(id))
        } else {
            Err(AppError::invalid_format(format!(
                "invalid tenant id: {id:?}"
            )))
        }
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Catalog entry for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantDescriptor {
    /// Validated tenant id
    pub tenant_id: TenantId,
    /// Human-readable name
    pub display_name: String,
    /// Connection string for the tenant database (passed through to the worker)
    pub database_url: String,
    /// Inactive tenants resolve but are never routed to a worker
    pub is_active: bool,
    /// Catalog insertion time
    pub created_at: DateTime<Utc>,
    /// Free-form per-tenant settings
    pub settings: HashMap<String, String>,
}

impl TenantDescriptor {
    /// Build a descriptor from a configuration seed entry.
    ///
    /// # Errors
    /// Returns `InvalidFormat` when the seeded id is malformed.
    pub fn from_seed(seed: TenantSeed) -> Result<Self, AppError> {
        Ok(Self {
            tenant_id: TenantId::new(seed.tenant_id)?,
            display_name: seed.display_name,
            database_url: seed.database_url,
            is_active: seed.is_active,
            created_at: Utc::now(),
            settings: seed.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn accepts_well_formed_ids() {
        for id in ["t1", "acme", "Tenant_9", "a-b-c", "Z"] {
            assert!(TenantId::new(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        for id in ["", "1tenant", "-lead", "_lead", "has space", "dot.dot", "a/b"] {
            assert!(TenantId::new(id).is_err(), "{id:?} should be invalid");
        }
    }

    #[test]
    fn serde_round_trip_validates() {
        let id: TenantId = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(id.as_str(), "acme");
        assert!(serde_json::from_str::<TenantId>("\"9bad\"").is_err());
    }
}
