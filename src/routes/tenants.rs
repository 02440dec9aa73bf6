// ABOUTME: Tenant catalog management and worker lifecycle endpoints
// ABOUTME: The whole surface requires the SystemAdministrator role
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde_json::{json, Value};

use crate::auth::{Claims, SYSTEM_ADMINISTRATOR_ROLE};
use crate::commands::RotateTenantKeys;
use crate::config::TenantSeed;
use crate::correlation;
use crate::errors::{AppError, AppResult};
use crate::gateway::ServerResources;
use crate::tenant::{TenantDescriptor, TenantId};

/// Tenant management routes
pub fn routes(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/tenants", get(handle_list).post(handle_create))
        .route("/tenants/:tenant_id", delete(handle_delete).put(handle_update))
        .route("/tenants/:tenant_id/workers/start", post(handle_start_worker))
        .route("/tenants/:tenant_id/workers/stop", post(handle_stop_worker))
        .route("/tenants/:tenant_id/keys/rotate", post(handle_rotate_keys))
        .with_state(resources)
}

fn require_admin(claims: Option<&Extension<Claims>>) -> AppResult<&Claims> {
    let Extension(claims) = claims.ok_or_else(|| {
        AppError::unauthenticated("no authenticated principal")
    })?;
    if claims.has_role(SYSTEM_ADMINISTRATOR_ROLE) {
        Ok(claims)
    } else {
        Err(AppError::cross_tenant_denied(
            "tenant management requires the SystemAdministrator role",
        ))
    }
}

// The metrics layer reads the tenant back out of the correlation scope
// after the handler returns
fn install_tenant(tenant_id: &TenantId) {
    correlation::install(correlation::current().with_tenant(tenant_id.as_str()));
}

async fn handle_list(
    State(resources): State<Arc<ServerResources>>,
    claims: Option<Extension<Claims>>,
) -> AppResult<Json<Vec<TenantDescriptor>>> {
    require_admin(claims.as_ref())?;
    Ok(Json(resources.registry.list()))
}

async fn handle_create(
    State(resources): State<Arc<ServerResources>>,
    claims: Option<Extension<Claims>>,
    Json(seed): Json<TenantSeed>,
) -> AppResult<Json<TenantDescriptor>> {
    require_admin(claims.as_ref())?;
    let descriptor = TenantDescriptor::from_seed(seed)?;
    install_tenant(&descriptor.tenant_id);
    resources.registry.add(descriptor.clone())?;
    Ok(Json(descriptor))
}

async fn handle_update(
    State(resources): State<Arc<ServerResources>>,
    Path(tenant_id): Path<String>,
    claims: Option<Extension<Claims>>,
    Json(seed): Json<TenantSeed>,
) -> AppResult<Json<TenantDescriptor>> {
    require_admin(claims.as_ref())?;
    if seed.tenant_id != tenant_id {
        return Err(AppError::bad_payload("tenant id in path and body differ"));
    }
    let descriptor = TenantDescriptor::from_seed(seed)?;
    install_tenant(&descriptor.tenant_id);
    resources.registry.update(descriptor.clone())?;
    Ok(Json(descriptor))
}

async fn handle_delete(
    State(resources): State<Arc<ServerResources>>,
    Path(tenant_id): Path<String>,
    claims: Option<Extension<Claims>>,
) -> AppResult<Json<Value>> {
    require_admin(claims.as_ref())?;
    let tenant_id: TenantId = tenant_id.parse()?;
    install_tenant(&tenant_id);
    resources.manager.stop_tenant(&tenant_id).await;
    resources.registry.delete(&tenant_id);
    Ok(Json(json!({ "deleted": tenant_id.as_str() })))
}

async fn handle_start_worker(
    State(resources): State<Arc<ServerResources>>,
    Path(tenant_id): Path<String>,
    claims: Option<Extension<Claims>>,
) -> AppResult<Json<Value>> {
    require_admin(claims.as_ref())?;
    let tenant_id: TenantId = tenant_id.parse()?;
    install_tenant(&tenant_id);
    let lease = resources.manager.start_tenant(&tenant_id).await?;
    Ok(Json(json!({
        "tenant_id": lease.tenant_id,
        "endpoint": lease.endpoint,
        "port": lease.port(),
        "start_time": lease.start_time(),
    })))
}

async fn handle_stop_worker(
    State(resources): State<Arc<ServerResources>>,
    Path(tenant_id): Path<String>,
    claims: Option<Extension<Claims>>,
) -> AppResult<Json<Value>> {
    require_admin(claims.as_ref())?;
    let tenant_id: TenantId = tenant_id.parse()?;
    install_tenant(&tenant_id);
    resources.manager.stop_tenant(&tenant_id).await;
    Ok(Json(json!({ "stopped": tenant_id.as_str() })))
}

async fn handle_rotate_keys(
    State(resources): State<Arc<ServerResources>>,
    Path(tenant_id): Path<String>,
    claims: Option<Extension<Claims>>,
) -> AppResult<Json<Value>> {
    require_admin(claims.as_ref())?;
    let tenant_id: TenantId = tenant_id.parse()?;
    install_tenant(&tenant_id);
    let outcome = resources
        .dispatcher
        .dispatch(&tenant_id, &RotateTenantKeys {})
        .await?;
    Ok(Json(json!({
        "tenant_id": tenant_id.as_str(),
        "new_version": outcome.new_version,
    })))
}
