// ABOUTME: Gateway middlewares for correlation capture, bearer auth, and request metrics
// ABOUTME: Public paths skip verification; every response echoes the correlation headers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::bearer_token;
use crate::correlation::{self, CorrelationContext};
use crate::errors::AppError;
use crate::gateway::ServerResources;

/// Paths that skip bearer-token verification
#[must_use]
pub fn is_public_path(path: &str) -> bool {
    matches!(path, "/health" | "/auth/login" | "/auth/refresh") || path.starts_with("/docs")
}

/// Outermost layer: capture the correlation context at ingress, bind it for
/// the whole request, and echo the three correlation headers on the response.
pub async fn correlation_middleware(request: Request, next: Next) -> Response {
    let mut ctx = CorrelationContext::from_headers(request.headers())
        .with_property("method", request.method().as_str())
        .with_property("path", request.uri().path());
    if let Some(agent) = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
    {
        ctx = ctx.with_property("user_agent", agent);
    }
    if let Some(remote) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        ctx = ctx.with_property("remote_ip", remote);
    }

    let echo = ctx.clone();
    let mut response = correlation::scope(ctx, next.run(request)).await;
    echo.apply_response_headers(response.headers_mut());
    response
}

/// Verify the bearer token, attach the claims to the request, and enrich the
/// correlation context with the principal. Public paths pass through.
pub async fn auth_middleware(
    State(resources): State<Arc<ServerResources>>,
    mut request: Request,
    next: Next,
) -> Response {
    if is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);
    let Some(token) = token else {
        return AppError::unauthenticated("missing bearer token").into_response();
    };

    match resources.auth.validate_token(token) {
        Ok(claims) => {
            let ctx = correlation::current()
                .with_principal(claims.sub.clone(), claims.session_id.clone());
            correlation::install(ctx);
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Record method, path, status, duration, and tenant for every non-excluded
/// request; durations over one second are flagged by the metrics registry.
pub async fn metrics_middleware(
    State(resources): State<Arc<ServerResources>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    if path == "/health" {
        return next.run(request).await;
    }
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    // The handler installs the resolved tenant into the shared scope
    let tenant = correlation::current_tenant();
    resources.metrics.record(
        tenant.as_deref(),
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );
    response
}
