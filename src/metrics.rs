// ABOUTME: Per-tenant request counters and latency tracking for the gateway
// ABOUTME: Flags requests slower than one second and feeds the health surface
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

/// Requests slower than this are flagged slow
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(1);

const NO_TENANT: &str = "(unresolved)";

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    errors: AtomicU64,
    slow: AtomicU64,
    total_duration_ms: AtomicU64,
}

/// Point-in-time view of one tenant's traffic
#[derive(Debug, Clone, Serialize)]
pub struct TenantMetrics {
    /// Tenant id, or `(unresolved)` for requests without one
    pub tenant_id: String,
    /// Total requests observed
    pub requests: u64,
    /// Responses with status >= 400
    pub errors: u64,
    /// Requests flagged slow (> 1 s)
    pub slow: u64,
    /// Mean duration in milliseconds
    pub avg_duration_ms: u64,
}

/// Gateway-wide request metrics keyed by tenant
#[derive(Default)]
pub struct RequestMetrics {
    per_tenant: DashMap<String, Counters>,
}

impl RequestMetrics {
    /// Fresh registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request
    pub fn record(
        &self,
        tenant_id: Option<&str>,
        method: &str,
        path: &str,
        status: u16,
        duration: Duration,
    ) {
        let key = tenant_id.unwrap_or(NO_TENANT);
        let counters = self.per_tenant.entry(key.to_owned()).or_default();
        counters.requests.fetch_add(1, Ordering::Relaxed);
        counters
            .total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        if status >= 400 {
            counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        if duration > SLOW_REQUEST_THRESHOLD {
            counters.slow.fetch_add(1, Ordering::Relaxed);
            warn!(
                tenant_id = key,
                method,
                path,
                status,
                duration_ms = duration.as_millis() as u64,
                "slow request"
            );
        }
    }

    /// Snapshot every tenant's counters, sorted by tenant id
    #[must_use]
    pub fn snapshot(&self) -> Vec<TenantMetrics> {
        let mut all: Vec<TenantMetrics> = self
            .per_tenant
            .iter()
            .map(|entry| {
                let requests = entry.requests.load(Ordering::Relaxed);
                let total_ms = entry.total_duration_ms.load(Ordering::Relaxed);
                TenantMetrics {
                    tenant_id: entry.key().clone(),
                    requests,
                    errors: entry.errors.load(Ordering::Relaxed),
                    slow: entry.slow.load(Ordering::Relaxed),
                    avg_duration_ms: if requests == 0 { 0 } else { total_ms / requests },
                }
            })
            .collect();
        all.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        all
    }
}
