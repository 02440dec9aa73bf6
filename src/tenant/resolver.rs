// ABOUTME: Tenant resolution from HTTP requests and cross-tenant access validation
// ABOUTME: Tries header, subdomain, path, query, then claim sources before the dev default
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::sync::Arc;

use axum::http::{header::HOST, HeaderMap, Uri};

use super::{TenantId, TenantRegistry};
use crate::auth::{Claims, CROSS_TENANT_ALL, SYSTEM_ADMINISTRATOR_ROLE};
use crate::errors::{AppError, AppResult};

/// Request header carrying an explicit tenant id
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
/// Query parameter carrying an explicit tenant id
pub const TENANT_ID_QUERY: &str = "tenantId";

/// Where a tenant id was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// `X-Tenant-ID` header
    Header,
    /// First hostname label
    Subdomain,
    /// `/tenants/<id>/…` path prefix
    Path,
    /// `tenantId` query parameter
    Query,
    /// `tenant_id` claim on the principal
    Claim,
    /// Configured development default
    DevDefault,
}

/// A resolved tenant plus the source that produced it
#[derive(Debug, Clone)]
pub struct ResolvedTenant {
    /// Validated, registry-checked tenant id
    pub tenant_id: TenantId,
    /// Source that yielded the id
    pub source: ResolutionSource,
}

/// Resolves the tenant for each request and validates cross-tenant access
pub struct TenantResolver {
    registry: Arc<TenantRegistry>,
    dev_default: Option<TenantId>,
}

impl TenantResolver {
    /// Build a resolver over the catalog. `dev_default` must be `None` in
    /// production (enforced at config load).
    #[must_use]
    pub fn new(registry: Arc<TenantRegistry>, dev_default: Option<TenantId>) -> Self {
        Self {
            registry,
            dev_default,
        }
    }

    /// Resolve the tenant for a request.
    ///
    /// Sources are tried in order: header, subdomain, path, query, claim,
    /// dev default. A malformed value in one source falls through to the
    /// next; a well-formed id absent from the registry fails immediately.
    ///
    /// # Errors
    /// `UnknownTenant` when a resolved id is not in the catalog;
    /// `TenantRequired` when no source applies.
    pub fn resolve(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        claims: Option<&Claims>,
    ) -> AppResult<ResolvedTenant> {
        let candidates = [
            (header_candidate(headers), ResolutionSource::Header),
            (subdomain_candidate(headers, uri), ResolutionSource::Subdomain),
            (path_candidate(uri), ResolutionSource::Path),
            (query_candidate(uri), ResolutionSource::Query),
            (claim_candidate(claims), ResolutionSource::Claim),
            (
                self.dev_default.as_ref().map(|t| t.as_str().to_owned()),
                ResolutionSource::DevDefault,
            ),
        ];

        for (candidate, source) in candidates {
            let Some(raw) = candidate else { continue };
            let Ok(tenant_id) = TenantId::new(raw) else {
                continue;
            };
            if !self.registry.contains(&tenant_id) {
                return Err(AppError::unknown_tenant(tenant_id.as_str()));
            }
            return Ok(ResolvedTenant { tenant_id, source });
        }

        Err(AppError::tenant_required(
            "no tenant id in header, host, path, query, or principal",
        ))
    }

    /// Validate that a principal may act on a resolved tenant.
    ///
    /// Permitted when the principal's home tenant matches, it holds the
    /// `SystemAdministrator` role, an `accessible_tenant` claim names the
    /// tenant, or `cross_tenant_access` is `all`.
    ///
    /// # Errors
    /// Returns `CrossTenantDenied` otherwise.
    pub fn validate_access(tenant_id: &TenantId, claims: &Claims) -> AppResult<()> {
        let target = tenant_id.as_str();
        if claims.tenant_id.as_deref() == Some(target)
            || claims.has_role(SYSTEM_ADMINISTRATOR_ROLE)
            || claims.accessible_tenants.iter().any(|t| t == target)
            || claims.cross_tenant_access.as_deref() == Some(CROSS_TENANT_ALL)
        {
            return Ok(());
        }
        Err(AppError::cross_tenant_denied(format!(
            "principal of tenant {:?} may not act on tenant {target}",
            claims.tenant_id.as_deref().unwrap_or("<none>")
        )))
    }
}

fn header_candidate(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TENANT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn subdomain_candidate(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| uri.host().map(str::to_owned))?;
    let hostname = host.split(':').next().unwrap_or(&host);
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() < 3 {
        return None;
    }
    let first = labels[0];
    if first.eq_ignore_ascii_case("www") || first.eq_ignore_ascii_case("api") {
        return None;
    }
    Some(first.to_owned())
}

fn path_candidate(uri: &Uri) -> Option<String> {
    let mut segments = uri.path().split('/').filter(|s| !s.is_empty());
    if segments.next()? != "tenants" {
        return None;
    }
    segments.next().map(str::to_owned)
}

fn query_candidate(uri: &Uri) -> Option<String> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TENANT_ID_QUERY)
        .map(|(_, value)| value.to_owned())
        .filter(|v| !v.is_empty())
}

fn claim_candidate(claims: Option<&Claims>) -> Option<String> {
    claims.and_then(|c| c.tenant_id.clone())
}
