// ABOUTME: Integration tests for the gateway HTTP surface via in-process routers
// ABOUTME: Covers auth enforcement, cross-tenant denial, resolution failures, and correlation echo
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt as _;

use acs_server::auth::Claims;
use acs_server::correlation::CORRELATION_ID_HEADER;

use common::{gateway_resources, gateway_router, init_test_logging, test_auth, token_for};

async fn send(router: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

fn command_request(path: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn create_user_body() -> Value {
    json!({ "command_type": "user.create", "payload": { "name": "alice" } })
}

#[tokio::test]
async fn health_is_public() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tenants"], 1);
}

#[tokio::test]
async fn missing_bearer_token_is_unauthenticated() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    let request = command_request("/tenants/t1/commands", None, create_user_body());
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "Unauthenticated");
}

#[tokio::test]
async fn foreign_tenant_without_grants_is_denied() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1", "t2"], keys.path());

    let token = token_for("t2");
    let request = command_request("/tenants/t1/commands", Some(&token), create_user_body());
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "CrossTenantDenied");
}

#[tokio::test]
async fn cross_tenant_access_all_clears_access_control() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1", "t2"], keys.path());

    let auth = test_auth();
    let now = chrono::Utc::now().timestamp();
    let token = auth
        .sign(&Claims {
            sub: "u-roaming".to_owned(),
            tenant_id: Some("t2".to_owned()),
            roles: vec![],
            accessible_tenants: vec![],
            cross_tenant_access: Some("all".to_owned()),
            session_id: None,
            exp: now + 600,
            iat: now,
        })
        .unwrap();

    let request = command_request("/tenants/t1/commands", Some(&token), create_user_body());
    let (status, _, body) = send(gateway_router(&resources), request).await;
    // Access control passed; dispatch then fails because this test gateway
    // has no real worker binary behind it
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "WorkerUnavailable");
}

#[tokio::test]
async fn accessible_tenant_claim_clears_access_control() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1", "t2"], keys.path());

    let auth = test_auth();
    let now = chrono::Utc::now().timestamp();
    let token = auth
        .sign(&Claims {
            sub: "u-guest".to_owned(),
            tenant_id: Some("t2".to_owned()),
            roles: vec![],
            accessible_tenants: vec!["t1".to_owned()],
            cross_tenant_access: None,
            session_id: None,
            exp: now + 600,
            iat: now,
        })
        .unwrap();

    let request = command_request("/tenants/t1/commands", Some(&token), create_user_body());
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "WorkerUnavailable");
}

#[tokio::test]
async fn unknown_tenant_in_path_is_rejected() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    let token = token_for("t1");
    let request = command_request("/tenants/ghost/commands", Some(&token), create_user_body());
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "UnknownTenant");
}

#[tokio::test]
async fn no_tenant_source_is_tenant_required() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    // Principal with no home tenant, request with no tenant markers
    let auth = test_auth();
    let now = chrono::Utc::now().timestamp();
    let token = auth
        .sign(&Claims {
            sub: "u-floating".to_owned(),
            tenant_id: None,
            roles: vec![],
            accessible_tenants: vec![],
            cross_tenant_access: None,
            session_id: None,
            exp: now + 600,
            iat: now,
        })
        .unwrap();

    let request = command_request("/commands", Some(&token), create_user_body());
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "TenantRequired");
}

#[tokio::test]
async fn unknown_command_type_is_rejected_before_dispatch() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    let token = token_for("t1");
    let request = command_request(
        "/tenants/t1/commands",
        Some(&token),
        json!({ "command_type": "no.such.command", "payload": {} }),
    );
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "UnknownCommandType");
}

#[tokio::test]
async fn malformed_payload_is_rejected_before_dispatch() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    let token = token_for("t1");
    let request = command_request(
        "/tenants/t1/commands",
        Some(&token),
        json!({ "command_type": "user.create", "payload": { "name": 42 } }),
    );
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "BadCommandPayload");
}

#[tokio::test]
async fn correlation_headers_are_echoed() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    // Inbound id is echoed back
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header(CORRELATION_ID_HEADER, "caller-chosen-id")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(gateway_router(&resources), request).await;
    assert_eq!(
        headers.get(CORRELATION_ID_HEADER).unwrap(),
        "caller-chosen-id"
    );

    // Absent ids are generated
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(gateway_router(&resources), request).await;
    assert!(!headers
        .get(CORRELATION_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .is_empty());
    assert!(headers.get("x-request-id").is_some());
    assert!(headers.get("x-trace-id").is_some());
}

#[tokio::test]
async fn errors_carry_the_request_correlation_id() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    let request = Request::builder()
        .method("POST")
        .uri("/tenants/t1/commands")
        .header(header::CONTENT_TYPE, "application/json")
        .header(CORRELATION_ID_HEADER, "corr-err-1")
        .body(Body::from(create_user_body().to_string()))
        .unwrap();
    let (status, headers, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["correlation_id"], "corr-err-1");
    assert_eq!(headers.get(CORRELATION_ID_HEADER).unwrap(), "corr-err-1");
}

#[tokio::test]
async fn login_issues_a_working_token() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    let request = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "username": "alice", "password": "wonder" }).to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenant_id"], "t1");
    let token = body["access_token"].as_str().unwrap().to_owned();

    // The issued token passes the auth middleware; the member role is then
    // turned away by the admin gate rather than by authentication
    let request = Request::builder()
        .method("GET")
        .uri("/tenants")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "CrossTenantDenied");
}

#[tokio::test]
async fn bad_credentials_are_rejected() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    let request = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "username": "alice", "password": "nope" }).to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "Unauthenticated");
}

#[tokio::test]
async fn refresh_reissues_from_bearer_header() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    let token = token_for("t1");
    let request = Request::builder()
        .method("POST")
        .uri("/auth/refresh")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].as_str().is_some());
}

#[tokio::test]
async fn tenant_management_requires_system_administrator() {
    init_test_logging();
    let keys = tempfile::TempDir::new().unwrap();
    let resources = gateway_resources(&["t1"], keys.path());

    let body = json!({ "tenant_id": "t9", "display_name": "Nine" });

    // Plain member is denied
    let member = token_for("t1");
    let request = command_request("/tenants", Some(&member), body.clone());
    let (status, _, _) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // SystemAdministrator may create tenants
    let admin = test_auth()
        .issue_token(
            "u-admin",
            "t1",
            vec!["SystemAdministrator".to_owned()],
            None,
        )
        .unwrap();
    let request = command_request("/tenants", Some(&admin), body);
    let (status, _, created) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["tenant_id"], "t9");
    assert_eq!(resources.registry.len(), 2);

    // Listing the catalog is admin-only as well
    let request = Request::builder()
        .method("GET")
        .uri("/tenants")
        .header(header::AUTHORIZATION, format!("Bearer {member}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::builder()
        .method("GET")
        .uri("/tenants")
        .header(header::AUTHORIZATION, format!("Bearer {admin}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, listed) = send(gateway_router(&resources), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 2);
}
