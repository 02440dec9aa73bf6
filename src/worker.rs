// ABOUTME: Tenant worker server: binary RPC surface over the command buffer
// ABOUTME: Serves /rpc/command, /rpc/health, and /rpc/shutdown on the assigned port
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

use crate::buffer::{BufferMetrics, CommandBuffer, CommandExecutor};
use crate::config::WorkerConfig;
use crate::encryption::EncryptionEngine;
use crate::errors::{AppError, AppResult};
use crate::graph::AuthorizationGraph;
use crate::handlers::{builtin_registry, HandlerRegistry, WorkerState};
use crate::keystore::KeyStore;
use crate::rpc::{
    self, CommandEnvelope, CommandResponse, HealthResponse, COMMAND_PATH, HEALTH_PATH,
    SHUTDOWN_PATH,
};

/// Shared application state behind the worker routes
pub struct WorkerApp {
    state: Arc<WorkerState>,
    buffer: CommandBuffer,
    shutdown: Notify,
}

/// One tenant's worker process
pub struct WorkerServer {
    app: Arc<WorkerApp>,
    port: u16,
}

impl WorkerServer {
    /// Wire up the worker: key store, encryption engine, authorization
    /// graph, handler registry, and the command buffer consumer.
    ///
    /// # Errors
    /// Propagates key store failures; master-key absence is fatal upstream.
    pub async fn new(config: WorkerConfig) -> AppResult<Self> {
        let store = Arc::new(KeyStore::open(&config.key_store_dir, config.master_key).await?);
        let encryption = EncryptionEngine::new(store);
        let metrics = Arc::new(BufferMetrics::default());

        let state = Arc::new(WorkerState {
            tenant_id: config.tenant_id.clone(),
            port: config.port,
            started_at: Instant::now(),
            graph: Mutex::new(AuthorizationGraph::new()),
            encryption,
            metrics: Arc::clone(&metrics),
        });

        let registry = Arc::new(builtin_registry());
        let executor = Self::executor(Arc::clone(&state), registry);
        let (buffer, _consumer) = CommandBuffer::start(
            config.tenant_id.clone(),
            config.buffer_capacity,
            Duration::from_secs(config.enqueue_timeout_secs),
            metrics,
            executor,
        );

        info!(
            tenant_id = %config.tenant_id,
            port = config.port,
            "worker initialized"
        );
        Ok(Self {
            app: Arc::new(WorkerApp {
                state,
                buffer,
                shutdown: Notify::new(),
            }),
            port: config.port,
        })
    }

    fn executor(state: Arc<WorkerState>, registry: Arc<HandlerRegistry>) -> CommandExecutor {
        Arc::new(move |command_type, payload| {
            let state = Arc::clone(&state);
            let registry = Arc::clone(&registry);
            Box::pin(async move { registry.dispatch(state, &command_type, payload).await })
        })
    }

    /// The worker's RPC router (also used by in-process tests)
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route(COMMAND_PATH, post(handle_command))
            .route(HEALTH_PATH, get(handle_health))
            .route(SHUTDOWN_PATH, post(handle_shutdown))
            .with_state(Arc::clone(&self.app))
    }

    /// Serve on `127.0.0.1:<port>` until a shutdown request or ctrl-c.
    ///
    /// # Errors
    /// Returns `Internal` when the listener cannot bind or serving fails.
    pub async fn run(&self) -> AppResult<()> {
        let addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::internal(format!("failed to bind {addr}: {e}")))?;
        info!(addr, tenant_id = %self.app.state.tenant_id, "worker listening");

        let app = Arc::clone(&self.app);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = app.shutdown.notified() => info!("worker shutdown requested"),
                    _ = tokio::signal::ctrl_c() => info!("worker interrupted"),
                }
            })
            .await
            .map_err(|e| AppError::internal(format!("worker server error: {e}")))?;
        Ok(())
    }
}

async fn handle_command(State(app): State<Arc<WorkerApp>>, body: Bytes) -> Response {
    let envelope: CommandEnvelope = match rpc::decode(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "undecodable command envelope");
            return encode_response(&CommandResponse::err(&e, String::new()));
        }
    };
    let correlation_id = envelope.correlation_id.clone();

    let ticket = match app
        .buffer
        .enqueue(
            envelope.command_type,
            envelope.command_data,
            correlation_id.clone(),
            true,
        )
        .await
    {
        Ok(ticket) => ticket,
        Err(e) => return encode_response(&CommandResponse::err(&e, correlation_id)),
    };

    let response = match ticket.wait().await {
        Ok(result_data) => CommandResponse::ok(result_data, correlation_id),
        Err(e) => CommandResponse::err(&e, correlation_id),
    };
    encode_response(&response)
}

async fn handle_health(State(app): State<Arc<WorkerApp>>) -> Response {
    let metrics = &app.state.metrics;
    let health = HealthResponse {
        healthy: true,
        uptime_seconds: app.state.started_at.elapsed().as_secs() as i64,
        active_connections: metrics.in_flight() as i32,
        commands_processed: metrics.commands_processed() as i64,
    };
    match rpc::encode(&health) {
        Ok(bytes) => bytes.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn handle_shutdown(State(app): State<Arc<WorkerApp>>) -> StatusCode {
    app.shutdown.notify_one();
    StatusCode::ACCEPTED
}

fn encode_response(response: &CommandResponse) -> Response {
    match rpc::encode(response) {
        Ok(bytes) => bytes.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
