// ABOUTME: Correlation context carried across async boundaries via a tokio task-local
// ABOUTME: Provides ingress capture from HTTP headers, child scope derivation, and response echo
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

//! # Correlation context
//!
//! Every logical request carries an immutable-on-capture snapshot of its
//! correlation identifiers. The snapshot is bound to the current task tree
//! with [`scope`]; any code running under that scope (including across
//! suspension points) reads it back with [`current`] without explicit
//! passing. Futures handed to `tokio::spawn` start a fresh task tree and
//! must be wrapped in [`scope`] again.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;

use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound/outbound header carrying the correlation id
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Inbound/outbound header carrying the per-request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Inbound/outbound header carrying the trace id
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Immutable-on-capture identifiers for one logical request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationContext {
    /// Correlation id tying together everything spawned by one logical operation
    pub correlation_id: String,
    /// Per-HTTP-request id
    pub request_id: String,
    /// Trace id (W3C-style 32 hex chars when generated locally)
    pub trace_id: String,
    /// Span id for the current unit of work
    pub span_id: String,
    /// Correlation id of the parent scope, if this is a derived context
    pub parent_id: Option<String>,
    /// Authenticated user, when known
    pub user_id: Option<String>,
    /// Resolved tenant, when known
    pub tenant_id: Option<String>,
    /// Session id from the principal, when known
    pub session_id: Option<String>,
    /// Capture time (UTC)
    pub timestamp: DateTime<Utc>,
    /// Free-form request properties (method, path, remote IP, user agent)
    pub properties: HashMap<String, String>,
}

impl CorrelationContext {
    /// Fresh context with generated correlation/request/trace ids
    #[must_use]
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            request_id: Uuid::new_v4().to_string(),
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
            parent_id: None,
            user_id: None,
            tenant_id: None,
            session_id: None,
            timestamp: Utc::now(),
            properties: HashMap::new(),
        }
    }

    /// Capture a context at HTTP ingress, honoring inbound correlation headers
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut ctx = Self::new();
        if let Some(v) = header_str(headers, CORRELATION_ID_HEADER) {
            ctx.correlation_id = v;
        }
        if let Some(v) = header_str(headers, REQUEST_ID_HEADER) {
            ctx.request_id = v;
        }
        if let Some(v) = header_str(headers, TRACE_ID_HEADER) {
            ctx.trace_id = v;
        }
        ctx
    }

    /// Derive a child context: same request/user/tenant, fresh correlation id,
    /// `parent_id` pointing at this context
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            request_id: self.request_id.clone(),
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_id: Some(self.correlation_id.clone()),
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            properties: HashMap::new(),
        }
    }

    /// Copy with the tenant id set
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Copy with principal identifiers set
    #[must_use]
    pub fn with_principal(mut self, user_id: impl Into<String>, session_id: Option<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.session_id = session_id;
        self
    }

    /// Copy with a request property recorded
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Write the three correlation headers onto an outbound response
    pub fn apply_response_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in [
            (CORRELATION_ID_HEADER, &self.correlation_id),
            (REQUEST_ID_HEADER, &self.request_id),
            (TRACE_ID_HEADER, &self.trace_id),
        ] {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        }
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn new_span_id() -> String {
    let id = Uuid::new_v4();
    hex::encode(&id.as_bytes()[..8])
}

tokio::task_local! {
    static CURRENT: RefCell<CorrelationContext>;
}

/// Context bound to the current task tree, or a fresh one when unbound.
///
/// Never returns an absent context: code running outside a [`scope`] (for
/// example a detached maintenance task) gets fresh identifiers.
#[must_use]
pub fn current() -> CorrelationContext {
    CURRENT
        .try_with(|c| c.borrow().clone())
        .unwrap_or_else(|_| CorrelationContext::new())
}

/// Tenant id from the bound context, if any
#[must_use]
pub fn current_tenant() -> Option<String> {
    CURRENT
        .try_with(|c| c.borrow().tenant_id.clone())
        .ok()
        .flatten()
}

/// Run `fut` with `ctx` installed for the task and all its descendants.
///
/// The previous binding (if the caller was itself inside a scope) is
/// restored on every exit path, including panics and cancellation.
pub async fn scope<F>(ctx: CorrelationContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(RefCell::new(ctx), fut).await
}

/// Replace the context for the remainder of the enclosing [`scope`].
///
/// No-op outside a scope; ingress code must establish a scope first.
pub fn install(ctx: CorrelationContext) {
    let _ = CURRENT.try_with(|c| {
        *c.borrow_mut() = ctx;
    });
}
