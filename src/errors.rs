// ABOUTME: Unified error handling with stable kind tags and HTTP response mapping
// ABOUTME: Provides AppError/AppResult used across the gateway, workers, and key subsystem
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result alias used throughout the crate
pub type AppResult<T> = Result<T, AppError>;

/// Application error with a stable kind tag for wire transport and an HTTP mapping
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// No tenant could be resolved for a non-public endpoint
    #[error("tenant required: {0}")]
    TenantRequired(String),

    /// The resolved tenant does not exist in the registry
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    /// The principal is not permitted to act on the resolved tenant
    #[error("cross-tenant access denied: {0}")]
    CrossTenantDenied(String),

    /// Missing or invalid bearer token
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Every port in the configured range is in use
    #[error("no free ports in the worker port range")]
    PortsExhausted,

    /// A spawned worker never reported healthy within the startup deadline
    #[error("worker startup timed out: {0}")]
    WorkerStartupTimeout(String),

    /// The worker endpoint could not be reached (retriable once)
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The RPC deadline elapsed before the worker responded
    #[error("worker call timed out: {0}")]
    Timeout(String),

    /// No command is registered under the given type id
    #[error("unknown command type: {0}")]
    UnknownCommandType(String),

    /// The command payload could not be deserialized
    #[error("bad command payload: {0}")]
    BadCommandPayload(String),

    /// The command buffer is full and the enqueue deadline elapsed
    #[error("command buffer overloaded")]
    Overloaded,

    /// The command was cancelled before its handler ran
    #[error("command cancelled")]
    Cancelled,

    /// An encrypted field failed its integrity checksum
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// A requested entity, key, or version does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored data could not be decrypted or parsed
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// An I/O failure in the key store or other persistent state
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// Catch-all for unexpected failures
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Internal error from any displayable cause
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Storage failure from any displayable cause
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFailure(msg.into())
    }

    /// Invalid stored-data format
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Missing entity, key, or version
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Missing or invalid credentials
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    /// Tenant resolution failed on a non-public endpoint
    pub fn tenant_required(msg: impl Into<String>) -> Self {
        Self::TenantRequired(msg.into())
    }

    /// Tenant absent from the registry
    pub fn unknown_tenant(tenant_id: impl Into<String>) -> Self {
        Self::UnknownTenant(tenant_id.into())
    }

    /// Principal/tenant mismatch without a cross-tenant grant
    pub fn cross_tenant_denied(msg: impl Into<String>) -> Self {
        Self::CrossTenantDenied(msg.into())
    }

    /// Payload failed to deserialize into the command struct
    pub fn bad_payload(msg: impl Into<String>) -> Self {
        Self::BadCommandPayload(msg.into())
    }

    /// Stable kind tag carried through the RPC envelope
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TenantRequired(_) => "TenantRequired",
            Self::UnknownTenant(_) => "UnknownTenant",
            Self::CrossTenantDenied(_) => "CrossTenantDenied",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::PortsExhausted => "PortsExhausted",
            Self::WorkerStartupTimeout(_) => "WorkerStartupTimeout",
            Self::WorkerUnavailable(_) => "WorkerUnavailable",
            Self::Timeout(_) => "Timeout",
            Self::UnknownCommandType(_) => "UnknownCommandType",
            Self::BadCommandPayload(_) => "BadCommandPayload",
            Self::Overloaded => "Overloaded",
            Self::Cancelled => "Cancelled",
            Self::IntegrityViolation(_) => "IntegrityViolation",
            Self::NotFound(_) => "NotFound",
            Self::InvalidFormat(_) => "InvalidFormat",
            Self::StorageFailure(_) => "StorageFailure",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Serialize to the `errorMessage` wire form: `<Kind>: <detail>`
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    /// Parse an error back out of the `errorMessage` wire form.
    ///
    /// Unrecognized tags map to `Internal` so a newer worker never crashes an
    /// older gateway.
    #[must_use]
    pub fn from_wire(message: &str) -> Self {
        let (kind, detail) = match message.split_once(": ") {
            Some((k, d)) => (k, d.to_owned()),
            None => ("InternalError", message.to_owned()),
        };
        match kind {
            "TenantRequired" => Self::TenantRequired(detail),
            "UnknownTenant" => Self::UnknownTenant(detail),
            "CrossTenantDenied" => Self::CrossTenantDenied(detail),
            "Unauthenticated" => Self::Unauthenticated(detail),
            "PortsExhausted" => Self::PortsExhausted,
            "WorkerStartupTimeout" => Self::WorkerStartupTimeout(detail),
            "WorkerUnavailable" => Self::WorkerUnavailable(detail),
            "Timeout" => Self::Timeout(detail),
            "UnknownCommandType" => Self::UnknownCommandType(detail),
            "BadCommandPayload" => Self::BadCommandPayload(detail),
            "Overloaded" => Self::Overloaded,
            "Cancelled" => Self::Cancelled,
            "IntegrityViolation" => Self::IntegrityViolation(detail),
            "NotFound" => Self::NotFound(detail),
            "InvalidFormat" => Self::InvalidFormat(detail),
            "StorageFailure" => Self::StorageFailure(detail),
            _ => Self::Internal(detail),
        }
    }

    /// HTTP status the gateway surfaces for this error
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::TenantRequired(_)
            | Self::UnknownTenant(_)
            | Self::UnknownCommandType(_)
            | Self::BadCommandPayload(_)
            | Self::Cancelled => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::CrossTenantDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PortsExhausted
            | Self::WorkerStartupTimeout(_)
            | Self::WorkerUnavailable(_)
            | Self::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::IntegrityViolation(_)
            | Self::InvalidFormat(_)
            | Self::StorageFailure(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::StorageFailure(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let correlation_id = crate::correlation::current().correlation_id;
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "correlation_id": correlation_id,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_kind() {
        let err = AppError::CrossTenantDenied("principal t1 vs tenant t2".into());
        let parsed = AppError::from_wire(&err.to_wire());
        assert_eq!(parsed.kind(), "CrossTenantDenied");
        assert_eq!(parsed.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn unknown_wire_tag_maps_to_internal() {
        let parsed = AppError::from_wire("SomethingNew: details");
        assert_eq!(parsed.kind(), "InternalError");
    }

    #[test]
    fn dispatcher_errors_map_to_503() {
        assert_eq!(
            AppError::PortsExhausted.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Overloaded.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Timeout("rpc".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
