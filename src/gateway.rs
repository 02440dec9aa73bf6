// ABOUTME: Gateway server assembly: dependency-injected resources and the HTTP stack
// ABOUTME: Builds the router with correlation, metrics, and auth layers and runs until shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::AuthManager;
use crate::config::GatewayConfig;
use crate::dispatch::CommandDispatcher;
use crate::errors::{AppError, AppResult};
use crate::metrics::RequestMetrics;
use crate::middleware::{auth_middleware, correlation_middleware, metrics_middleware};
use crate::process::TenantProcessManager;
use crate::routes;
use crate::rpc::RpcChannelPool;
use crate::tenant::{TenantId, TenantRegistry, TenantResolver};

/// Everything the route handlers and middlewares share
pub struct ServerResources {
    /// Loaded configuration
    pub config: Arc<GatewayConfig>,
    /// Tenant catalog
    pub registry: Arc<TenantRegistry>,
    /// Request-to-tenant resolution
    pub resolver: TenantResolver,
    /// Worker channel pool
    pub channels: Arc<RpcChannelPool>,
    /// Worker process lifecycle
    pub manager: Arc<TenantProcessManager>,
    /// Command serialization and transport
    pub dispatcher: CommandDispatcher,
    /// Token issuance and validation
    pub auth: AuthManager,
    /// Per-tenant request counters
    pub metrics: RequestMetrics,
    /// Gateway start instant
    pub started_at: Instant,
}

impl ServerResources {
    /// Wire up all gateway subsystems from configuration.
    ///
    /// # Errors
    /// Propagates configuration failures (malformed seeds, absent secrets).
    pub fn new(config: GatewayConfig) -> AppResult<Arc<Self>> {
        let config = Arc::new(config);
        let registry = Arc::new(TenantRegistry::from_seeds(config.tenants.clone())?);
        let dev_default = config
            .dev_default_tenant
            .as_deref()
            .map(TenantId::new)
            .transpose()?;
        let resolver = TenantResolver::new(Arc::clone(&registry), dev_default);
        let channels = Arc::new(RpcChannelPool::new(Duration::from_secs(
            config.rpc_deadline_secs,
        )));
        let manager = Arc::new(TenantProcessManager::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&channels),
        ));
        let dispatcher = CommandDispatcher::new(Arc::clone(&manager));
        let auth = AuthManager::new(
            &config.require_jwt_secret()?,
            config.token_ttl_secs,
            config.credentials.clone(),
        );

        Ok(Arc::new(Self {
            config,
            registry,
            resolver,
            channels,
            manager,
            dispatcher,
            auth,
            metrics: RequestMetrics::new(),
            started_at: Instant::now(),
        }))
    }
}

/// The request-routing gateway
pub struct GatewayServer {
    resources: Arc<ServerResources>,
}

impl GatewayServer {
    /// Server over pre-built resources (dependency injection)
    #[must_use]
    pub const fn new(resources: Arc<ServerResources>) -> Self {
        Self { resources }
    }

    /// Shared reference to the resources
    #[must_use]
    pub fn resources(&self) -> Arc<ServerResources> {
        Arc::clone(&self.resources)
    }

    /// Build the full router. Layer order: correlation capture is outermost,
    /// then metrics, then bearer auth; handlers run innermost.
    #[must_use]
    pub fn router(&self) -> Router {
        let resources = Arc::clone(&self.resources);
        Router::new()
            .merge(routes::health::routes(Arc::clone(&resources)))
            .merge(routes::auth::routes(Arc::clone(&resources)))
            .merge(routes::commands::routes(Arc::clone(&resources)))
            .merge(routes::tenants::routes(Arc::clone(&resources)))
            .layer(from_fn_with_state(Arc::clone(&resources), auth_middleware))
            .layer(from_fn_with_state(
                Arc::clone(&resources),
                metrics_middleware,
            ))
            .layer(from_fn(correlation_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Serve until ctrl-c, then stop every worker.
    ///
    /// # Errors
    /// Returns `Internal` when the listener cannot bind or serving fails.
    pub async fn run(&self) -> AppResult<()> {
        let addr = format!("0.0.0.0:{}", self.resources.config.http_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::internal(format!("failed to bind {addr}: {e}")))?;
        info!(addr, "gateway listening");

        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await
            .map_err(|e| AppError::internal(format!("server error: {e}")))?;

        self.resources.manager.dispose().await;
        info!("gateway stopped");
        Ok(())
    }
}
