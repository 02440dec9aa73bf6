// ABOUTME: Login and token refresh endpoints issuing shared-secret JWTs
// ABOUTME: Public paths; the real identity store is an external collaborator
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{bearer_token, TokenResponse};
use crate::errors::{AppError, AppResult};
use crate::gateway::ServerResources;

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    token: Option<String>,
}

/// Authentication routes
pub fn routes(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/auth/login", post(handle_login))
        .route("/auth/refresh", post(handle_refresh))
        .with_state(resources)
}

async fn handle_login(
    State(resources): State<Arc<ServerResources>>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let response = resources.auth.login(&request.username, &request.password)?;
    Ok(Json(response))
}

async fn handle_refresh(
    State(resources): State<Arc<ServerResources>>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> AppResult<Json<TokenResponse>> {
    let from_body = body.and_then(|Json(r)| r.token);
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned);
    let token = from_body
        .or(from_header)
        .ok_or_else(|| AppError::unauthenticated("no token to refresh"))?;
    let response = resources.auth.refresh(&token)?;
    Ok(Json(response))
}
