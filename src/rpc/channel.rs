// ABOUTME: Cached bidirectional RPC channels keyed by worker endpoint
// ABOUTME: Wraps a reqwest client per endpoint with deadline-aware error mapping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use super::{CommandEnvelope, CommandResponse, HealthResponse, COMMAND_PATH, HEALTH_PATH, SHUTDOWN_PATH};
use crate::errors::{AppError, AppResult};

/// A long-lived channel to one worker endpoint
pub struct RpcChannel {
    endpoint: String,
    client: reqwest::Client,
    deadline: Duration,
}

impl RpcChannel {
    fn connect(endpoint: &str, deadline: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::internal(format!("failed to build RPC client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.to_owned(),
            client,
            deadline,
        })
    }

    /// Endpoint this channel is bound to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a command envelope and await the worker's reply.
    ///
    /// # Errors
    /// `Timeout` when the RPC deadline elapses, `WorkerUnavailable` for any
    /// other transport failure, `BadCommandPayload` for an undecodable reply.
    pub async fn call(&self, envelope: &CommandEnvelope) -> AppResult<CommandResponse> {
        let body = super::encode(envelope)?;
        let response = self
            .client
            .post(format!("{}{COMMAND_PATH}", self.endpoint))
            .timeout(self.deadline)
            .body(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            return Err(AppError::WorkerUnavailable(format!(
                "worker at {} answered HTTP {}",
                self.endpoint,
                response.status()
            )));
        }
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        super::decode(&bytes)
    }

    /// Probe the worker's health RPC.
    ///
    /// # Errors
    /// Same mapping as [`Self::call`], with the probe's own timeout.
    pub async fn health(&self, timeout: Duration) -> AppResult<HealthResponse> {
        let response = self
            .client
            .get(format!("{}{HEALTH_PATH}", self.endpoint))
            .timeout(timeout)
            .send()
            .await
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            return Err(AppError::WorkerUnavailable(format!(
                "health probe to {} answered HTTP {}",
                self.endpoint,
                response.status()
            )));
        }
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        super::decode(&bytes)
    }

    /// Ask the worker to drain and exit.
    ///
    /// # Errors
    /// Transport failures map as in [`Self::call`]; callers treat them as
    /// best-effort and fall back to force kill.
    pub async fn shutdown(&self, timeout: Duration) -> AppResult<()> {
        self.client
            .post(format!("{}{SHUTDOWN_PATH}", self.endpoint))
            .timeout(timeout)
            .send()
            .await
            .map_err(map_transport_error)?;
        Ok(())
    }
}

fn map_transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(e.to_string())
    } else {
        AppError::WorkerUnavailable(e.to_string())
    }
}

/// Map from endpoint to channel with atomic get-or-create
pub struct RpcChannelPool {
    channels: DashMap<String, Arc<RpcChannel>>,
    rpc_deadline: Duration,
}

impl RpcChannelPool {
    /// Pool whose channels apply the given per-command deadline
    #[must_use]
    pub fn new(rpc_deadline: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            rpc_deadline,
        }
    }

    /// Return the channel for an endpoint, creating it atomically on first use.
    ///
    /// # Errors
    /// Returns `Internal` when the underlying client cannot be built.
    pub fn get_or_create(&self, endpoint: &str) -> AppResult<Arc<RpcChannel>> {
        if let Some(existing) = self.channels.get(endpoint) {
            return Ok(Arc::clone(&existing));
        }
        match self.channels.entry(endpoint.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(slot) => Ok(Arc::clone(slot.get())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let channel = Arc::new(RpcChannel::connect(endpoint, self.rpc_deadline)?);
                slot.insert(Arc::clone(&channel));
                debug!(endpoint, "created RPC channel");
                Ok(channel)
            }
        }
    }

    /// Drop the channel for an endpoint (worker stopped)
    pub fn remove(&self, endpoint: &str) {
        self.channels.remove(endpoint);
    }

    /// Drop every channel
    pub fn clear(&self) {
        self.channels.clear();
    }

    /// Number of live channels
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the pool is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
