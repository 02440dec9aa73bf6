// ABOUTME: Binary RPC wire contract between the gateway and tenant workers
// ABOUTME: Defines envelope/response/health frames and the bincode codec helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Cached channels keyed by worker endpoint
pub mod channel;

pub use channel::{RpcChannel, RpcChannelPool};

/// Worker route accepting command envelopes
pub const COMMAND_PATH: &str = "/rpc/command";
/// Worker route answering health probes
pub const HEALTH_PATH: &str = "/rpc/health";
/// Worker route requesting a graceful drain and exit
pub const SHUTDOWN_PATH: &str = "/rpc/shutdown";

/// One command crossing the gateway→worker boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Stable command type id
    pub command_type: String,
    /// Binary-serialized command struct
    pub command_data: Vec<u8>,
    /// Correlation id of the originating request
    pub correlation_id: String,
}

/// Worker reply to a command envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Whether the handler completed without error
    pub success: bool,
    /// Binary-serialized result (empty for void commands and failures)
    pub result_data: Vec<u8>,
    /// `<Kind>: <detail>` when `success` is false
    pub error_message: Option<String>,
    /// Echoed correlation id
    pub correlation_id: String,
}

impl CommandResponse {
    /// Successful reply
    #[must_use]
    pub fn ok(result_data: Vec<u8>, correlation_id: String) -> Self {
        Self {
            success: true,
            result_data,
            error_message: None,
            correlation_id,
        }
    }

    /// Failed reply carrying the error's wire form
    #[must_use]
    pub fn err(error: &AppError, correlation_id: String) -> Self {
        Self {
            success: false,
            result_data: Vec::new(),
            error_message: Some(error.to_wire()),
            correlation_id,
        }
    }

    /// Convert back into a result, reconstructing the error kind.
    ///
    /// # Errors
    /// Returns the transported error when `success` is false.
    pub fn into_result(self) -> AppResult<Vec<u8>> {
        if self.success {
            Ok(self.result_data)
        } else {
            Err(self
                .error_message
                .as_deref()
                .map_or_else(|| AppError::internal("worker reported failure"), AppError::from_wire))
        }
    }
}

/// Worker health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Whether the worker considers itself healthy
    pub healthy: bool,
    /// Seconds since worker start
    pub uptime_seconds: i64,
    /// Currently open RPC connections (approximated by in-flight commands)
    pub active_connections: i32,
    /// Commands processed since start
    pub commands_processed: i64,
}

/// Binary-serialize a wire frame or command struct.
///
/// # Errors
/// Returns `Internal`; encoding of owned values does not fail in practice.
pub fn encode<T: Serialize>(value: &T) -> AppResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| AppError::internal(format!("bincode encode: {e}")))
}

/// Deserialize a wire frame or command struct.
///
/// # Errors
/// Returns `BadCommandPayload` when the bytes do not match the expected shape.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> AppResult<T> {
    bincode::deserialize(bytes).map_err(|e| AppError::bad_payload(format!("bincode decode: {e}")))
}
