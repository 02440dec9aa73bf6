// ABOUTME: Command ingress routes: resolve the tenant, validate access, dispatch to the worker
// ABOUTME: The single CQRS entry point for both path-scoped and header-resolved requests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::Claims;
use crate::correlation;
use crate::errors::{AppError, AppResult};
use crate::gateway::ServerResources;
use crate::tenant::TenantResolver;

#[derive(Debug, Deserialize)]
struct CommandRequest {
    command_type: String,
    #[serde(default)]
    payload: Value,
}

/// Command ingress routes
pub fn routes(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/commands", post(handle_command))
        .route("/tenants/:tenant_id/commands", post(handle_command))
        .with_state(resources)
}

async fn handle_command(
    State(resources): State<Arc<ServerResources>>,
    claims: Option<Extension<Claims>>,
    headers: HeaderMap,
    uri: Uri,
    Json(request): Json<CommandRequest>,
) -> AppResult<Json<Value>> {
    let claims = claims
        .map(|Extension(c)| c)
        .ok_or_else(|| AppError::unauthenticated("no authenticated principal"))?;

    // Resolution always precedes dispatch; the resolved tenant becomes
    // authoritative for everything downstream of this request
    let resolved = resources
        .resolver
        .resolve(&headers, &uri, Some(&claims))?;
    TenantResolver::validate_access(&resolved.tenant_id, &claims)?;

    let ctx = correlation::current().with_tenant(resolved.tenant_id.as_str());
    let correlation_id = ctx.correlation_id.clone();
    correlation::install(ctx);

    debug!(
        tenant_id = %resolved.tenant_id,
        source = ?resolved.source,
        command_type = %request.command_type,
        "dispatching command"
    );
    let result = resources
        .dispatcher
        .dispatch_json(&resolved.tenant_id, &request.command_type, request.payload)
        .await?;

    Ok(Json(json!({
        "tenant_id": resolved.tenant_id.as_str(),
        "command_type": request.command_type,
        "result": result,
        "correlation_id": correlation_id,
    })))
}
