// ABOUTME: Gateway health endpoint aggregating worker and traffic snapshots
// ABOUTME: Public path; no tenant resolution or authentication involved
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::gateway::ServerResources;

/// Health routes
pub fn routes(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .with_state(resources)
}

async fn handle_health(State(resources): State<Arc<ServerResources>>) -> Json<serde_json::Value> {
    let workers = resources.manager.workers_snapshot().await;
    let ports_in_use = resources.manager.ports_in_use().await;
    Json(json!({
        "status": "ok",
        "uptime_seconds": resources.started_at.elapsed().as_secs(),
        "tenants": resources.registry.len(),
        "ports_in_use": ports_in_use,
        "workers": workers,
        "traffic": resources.metrics.snapshot(),
    }))
}
