// ABOUTME: Per-tenant worker process lifecycle with a bounded port pool
// ABOUTME: Spawns, health-polls, supervises, and gracefully stops one subprocess per tenant
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

//! # Tenant process manager
//!
//! One worker subprocess per active tenant per node. Workers move through
//! `Starting → Healthy ↔ Degraded → Stopped`; a degraded worker is replaced
//! lazily on the next lookup. The manager mutex covers the worker map and
//! port pool and is held only for short administrative sections; per-tenant
//! start locks keep concurrent lookups from double-spawning while the new
//! process is health-polled.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt as _};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{GatewayConfig, MASTER_KEY_ENV, RPC_PORT_ENV, TENANT_ID_ENV};
use crate::errors::{AppError, AppResult};
use crate::rpc::{RpcChannel, RpcChannelPool};
use crate::tenant::{TenantId, TenantRegistry};

const STARTUP_PROBE_INTERVAL: Duration = Duration::from_secs(1);
const DISPOSE_CONCURRENCY: usize = 4;

/// Bounded pool of worker ports
pub struct PortPool {
    min: u16,
    max: u16,
    used: HashSet<u16>,
}

impl PortPool {
    /// Pool over the inclusive range `[min, max]`
    #[must_use]
    pub fn new(min: u16, max: u16) -> Self {
        Self {
            min,
            max,
            used: HashSet::new(),
        }
    }

    /// Claim the first free port.
    ///
    /// # Errors
    /// `PortsExhausted` when every port in the range is held.
    pub fn allocate(&mut self) -> AppResult<u16> {
        for port in self.min..=self.max {
            if self.used.insert(port) {
                return Ok(port);
            }
        }
        Err(AppError::PortsExhausted)
    }

    /// Return a port to the pool; idempotent
    pub fn release(&mut self, port: u16) {
        self.used.remove(&port);
    }

    /// Ports currently held
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.used.len()
    }

    fn clear(&mut self) {
        self.used.clear();
    }
}

/// Lifecycle state of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    /// Spawned, not yet observed healthy
    Starting,
    /// Most recent observation was healthy
    Healthy,
    /// Most recent observation failed; replaced on next lookup
    Degraded,
    /// Stopped and removed
    Stopped,
}

struct HealthObservation {
    healthy: bool,
    checked_at: Instant,
}

/// Shared, observable facts about one worker
pub struct WorkerInfo {
    /// Tenant the worker serves
    pub tenant_id: String,
    /// Allocated RPC port
    pub port: u16,
    /// `http://localhost:<port>`
    pub endpoint: String,
    /// Spawn time
    pub start_time: DateTime<Utc>,
    health: Mutex<HealthObservation>,
}

impl WorkerInfo {
    async fn mark(&self, healthy: bool) {
        let mut obs = self.health.lock().await;
        obs.healthy = healthy;
        obs.checked_at = Instant::now();
    }

    async fn observation(&self) -> (bool, Duration) {
        let obs = self.health.lock().await;
        (obs.healthy, obs.checked_at.elapsed())
    }
}

/// Reportable worker snapshot for the gateway health surface
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    /// Tenant the worker serves
    pub tenant_id: String,
    /// Allocated RPC port
    pub port: u16,
    /// Lifecycle state at snapshot time
    pub status: WorkerStatus,
    /// Seconds since the last health observation
    pub last_health_check_secs: u64,
    /// Spawn time
    pub start_time: DateTime<Utc>,
}

struct WorkerEntry {
    info: Arc<WorkerInfo>,
    channel: Arc<RpcChannel>,
    child: Child,
}

/// What a caller needs to talk to a healthy worker
#[derive(Clone)]
pub struct WorkerLease {
    /// Tenant the worker serves
    pub tenant_id: String,
    /// Worker endpoint
    pub endpoint: String,
    /// Pooled RPC channel
    pub channel: Arc<RpcChannel>,
    info: Arc<WorkerInfo>,
}

struct ManagerState {
    workers: HashMap<String, WorkerEntry>,
    ports: PortPool,
}

/// Owns every tenant worker on this node
pub struct TenantProcessManager {
    config: Arc<GatewayConfig>,
    registry: Arc<TenantRegistry>,
    channels: Arc<RpcChannelPool>,
    state: Mutex<ManagerState>,
    start_locks: dashmap::DashMap<String, Arc<Mutex<()>>>,
    disposed: AtomicBool,
}

impl TenantProcessManager {
    /// Build a manager over the catalog and channel pool
    #[must_use]
    pub fn new(
        config: Arc<GatewayConfig>,
        registry: Arc<TenantRegistry>,
        channels: Arc<RpcChannelPool>,
    ) -> Self {
        let ports = PortPool::new(config.min_port, config.max_port);
        Self {
            config,
            registry,
            channels,
            state: Mutex::new(ManagerState {
                workers: HashMap::new(),
                ports,
            }),
            start_locks: dashmap::DashMap::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Return the existing healthy worker or start one.
    ///
    /// # Errors
    /// `PortsExhausted`, `WorkerStartupTimeout`, `UnknownTenant`, or
    /// `WorkerUnavailable` for an inactive tenant or disposed manager.
    pub async fn get_or_start(&self, tenant_id: &TenantId) -> AppResult<WorkerLease> {
        self.start_tenant(tenant_id).await
    }

    /// Start (or return) the worker for a tenant.
    ///
    /// # Errors
    /// See [`Self::get_or_start`].
    pub async fn start_tenant(&self, tenant_id: &TenantId) -> AppResult<WorkerLease> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(AppError::WorkerUnavailable(
                "process manager is shut down".into(),
            ));
        }
        let descriptor = self.registry.get(tenant_id)?;
        if !descriptor.is_active {
            return Err(AppError::WorkerUnavailable(format!(
                "tenant {tenant_id} is inactive"
            )));
        }

        // One start at a time per tenant; the manager mutex stays short
        let start_lock = self
            .start_locks
            .entry(tenant_id.as_str().to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _start_guard = start_lock.lock().await;

        if let Some(lease) = self.existing_healthy(tenant_id).await? {
            return Ok(lease);
        }

        self.spawn_fresh(tenant_id).await
    }

    /// Re-probe a worker's health now and record the observation. Used by
    /// the dispatcher before its one retry.
    pub async fn force_health_check(&self, tenant_id: &TenantId) {
        let target = {
            let state = self.state.lock().await;
            state
                .workers
                .get(tenant_id.as_str())
                .map(|entry| (Arc::clone(&entry.info), Arc::clone(&entry.channel)))
        };
        let Some((info, channel)) = target else {
            return;
        };
        let timeout = Duration::from_secs(self.config.health_probe_timeout_secs);
        let healthy = matches!(channel.health(timeout).await, Ok(h) if h.healthy);
        info.mark(healthy).await;
        if !healthy {
            warn!(tenant_id = %tenant_id, "forced health recheck failed; worker marked degraded");
        }
    }

    /// Stop a tenant's worker: graceful drain, force kill after the grace
    /// period, release the port, drop the channel. Idempotent.
    pub async fn stop_tenant(&self, tenant_id: &TenantId) {
        let entry = {
            let mut state = self.state.lock().await;
            state.workers.remove(tenant_id.as_str())
        };
        let Some(entry) = entry else { return };
        self.stop_entry(entry).await;
    }

    /// Stop all workers with bounded concurrency, then clear every map and
    /// the port pool. Later calls are no-ops.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let entries: Vec<WorkerEntry> = {
            let mut state = self.state.lock().await;
            state.workers.drain().map(|(_, entry)| entry).collect()
        };
        info!(count = entries.len(), "stopping all tenant workers");
        stream::iter(entries)
            .for_each_concurrent(DISPOSE_CONCURRENCY, |entry| self.stop_entry(entry))
            .await;
        let mut state = self.state.lock().await;
        state.workers.clear();
        state.ports.clear();
        self.channels.clear();
        self.start_locks.clear();
    }

    /// Snapshot every worker for the health surface
    pub async fn workers_snapshot(&self) -> Vec<WorkerSummary> {
        let infos: Vec<Arc<WorkerInfo>> = {
            let state = self.state.lock().await;
            state
                .workers
                .values()
                .map(|entry| Arc::clone(&entry.info))
                .collect()
        };
        let liveness = Duration::from_secs(self.config.liveness_window_secs);
        let mut summaries = Vec::with_capacity(infos.len());
        for info in infos {
            let (healthy, age) = info.observation().await;
            let status = if healthy && age <= liveness {
                WorkerStatus::Healthy
            } else {
                WorkerStatus::Degraded
            };
            summaries.push(WorkerSummary {
                tenant_id: info.tenant_id.clone(),
                port: info.port,
                status,
                last_health_check_secs: age.as_secs(),
                start_time: info.start_time,
            });
        }
        summaries.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        summaries
    }

    /// Ports currently allocated
    pub async fn ports_in_use(&self) -> usize {
        self.state.lock().await.ports.in_use()
    }

    async fn existing_healthy(&self, tenant_id: &TenantId) -> AppResult<Option<WorkerLease>> {
        let existing = {
            let state = self.state.lock().await;
            state.workers.get(tenant_id.as_str()).map(|entry| {
                (Arc::clone(&entry.info), Arc::clone(&entry.channel))
            })
        };
        let Some((info, channel)) = existing else {
            return Ok(None);
        };

        let liveness = Duration::from_secs(self.config.liveness_window_secs);
        let probe_timeout = Duration::from_secs(self.config.health_probe_timeout_secs);
        let (healthy, age) = info.observation().await;

        if healthy && age <= liveness {
            // Routable now; refresh the observation off the request path
            let recheck_info = Arc::clone(&info);
            let recheck_channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let ok =
                    matches!(recheck_channel.health(probe_timeout).await, Ok(h) if h.healthy);
                recheck_info.mark(ok).await;
            });
            return Ok(Some(self.lease(tenant_id, &info, channel)));
        }

        if healthy {
            // Observation went stale; confirm before routing
            if matches!(channel.health(probe_timeout).await, Ok(h) if h.healthy) {
                info.mark(true).await;
                return Ok(Some(self.lease(tenant_id, &info, channel)));
            }
            info.mark(false).await;
        }

        // Degraded: stop inline (releasing its port) and let the caller spawn
        warn!(tenant_id = %tenant_id, "worker degraded; replacing");
        let entry = {
            let mut state = self.state.lock().await;
            state.workers.remove(tenant_id.as_str())
        };
        if let Some(entry) = entry {
            self.stop_entry(entry).await;
        }
        Ok(None)
    }

    async fn spawn_fresh(&self, tenant_id: &TenantId) -> AppResult<WorkerLease> {
        let port = {
            let mut state = self.state.lock().await;
            state.ports.allocate()?
        };

        match self.spawn_and_wait_healthy(tenant_id, port).await {
            Ok(lease) => Ok(lease),
            Err(e) => {
                let mut state = self.state.lock().await;
                state.ports.release(port);
                Err(e)
            }
        }
    }

    async fn spawn_and_wait_healthy(
        &self,
        tenant_id: &TenantId,
        port: u16,
    ) -> AppResult<WorkerLease> {
        let endpoint = format!("http://localhost:{port}");
        let binary = self.config.resolved_worker_binary();
        let master_key = self
            .config
            .master_key
            .clone()
            .ok_or_else(|| AppError::internal("master key missing at spawn time"))?;

        let mut child = Command::new(&binary)
            .arg("--tenant")
            .arg(tenant_id.as_str())
            .arg("--port")
            .arg(port.to_string())
            .env(TENANT_ID_ENV, tenant_id.as_str())
            .env(RPC_PORT_ENV, port.to_string())
            .env(MASTER_KEY_ENV, master_key)
            .env("ACS_KEY_STORE_DIR", &self.config.key_store_dir)
            .env("ACS_BUFFER_CAPACITY", self.config.buffer_capacity.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::WorkerUnavailable(format!(
                    "failed to spawn {} for tenant {tenant_id}: {e}",
                    binary.display()
                ))
            })?;

        forward_output(tenant_id.as_str(), &mut child);
        info!(tenant_id = %tenant_id, port, "spawned tenant worker");

        let channel = self.channels.get_or_create(&endpoint)?;
        let probe_timeout = Duration::from_secs(self.config.health_probe_timeout_secs);

        let mut became_healthy = false;
        for attempt in 0..self.config.worker_startup_probes {
            if let Ok(Some(status)) = child.try_wait() {
                let _ = status;
                break;
            }
            match channel.health(probe_timeout).await {
                Ok(h) if h.healthy => {
                    debug!(tenant_id = %tenant_id, attempt, "worker reported healthy");
                    became_healthy = true;
                    break;
                }
                _ => tokio::time::sleep(STARTUP_PROBE_INTERVAL).await,
            }
        }

        if !became_healthy {
            error!(tenant_id = %tenant_id, port, "worker never became healthy; aborting start");
            let _ = child.kill().await;
            self.channels.remove(&endpoint);
            return Err(AppError::WorkerStartupTimeout(format!(
                "tenant {tenant_id} on port {port}"
            )));
        }

        let info = Arc::new(WorkerInfo {
            tenant_id: tenant_id.as_str().to_owned(),
            port,
            endpoint: endpoint.clone(),
            start_time: Utc::now(),
            health: Mutex::new(HealthObservation {
                healthy: true,
                checked_at: Instant::now(),
            }),
        });

        let lease = self.lease(tenant_id, &info, Arc::clone(&channel));
        let mut state = self.state.lock().await;
        state.workers.insert(
            tenant_id.as_str().to_owned(),
            WorkerEntry {
                info,
                channel,
                child,
            },
        );
        Ok(lease)
    }

    fn lease(
        &self,
        tenant_id: &TenantId,
        info: &Arc<WorkerInfo>,
        channel: Arc<RpcChannel>,
    ) -> WorkerLease {
        WorkerLease {
            tenant_id: tenant_id.as_str().to_owned(),
            endpoint: info.endpoint.clone(),
            channel,
            info: Arc::clone(info),
        }
    }

    async fn stop_entry(&self, mut entry: WorkerEntry) {
        let grace = Duration::from_secs(self.config.graceful_stop_secs);
        let tenant_id = entry.info.tenant_id.clone();

        // Best-effort graceful drain before force kill
        let _ = entry.channel.shutdown(grace).await;
        match tokio::time::timeout(grace, entry.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(tenant_id = %tenant_id, ?status, "worker exited gracefully");
            }
            _ => {
                warn!(tenant_id = %tenant_id, "worker did not exit in time; killing");
                let _ = entry.child.kill().await;
            }
        }

        entry.info.mark(false).await;
        self.channels.remove(&entry.info.endpoint);
        {
            let mut state = self.state.lock().await;
            state.ports.release(entry.info.port);
        }
        info!(tenant_id = %tenant_id, port = entry.info.port, "worker stopped; port released");
    }
}

impl WorkerLease {
    /// Spawn time of the leased worker
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.info.start_time
    }

    /// Port of the leased worker
    #[must_use]
    pub fn port(&self) -> u16 {
        self.info.port
    }
}

fn forward_output(tenant_id: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let tenant = tenant_id.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(tenant_id = %tenant, "worker: {line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let tenant = tenant_id.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(tenant_id = %tenant, "worker: {line}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn port_pool_allocates_first_free_and_never_doubles() {
        let mut pool = PortPool::new(5001, 5003);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        let mut all = vec![a, b, c];
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 3);
        assert_eq!(pool.in_use(), 3);
    }

    #[test]
    fn port_pool_exhaustion_boundary() {
        let mut pool = PortPool::new(5001, 5003);
        for _ in 0..3 {
            pool.allocate().unwrap();
        }
        assert!(matches!(pool.allocate(), Err(AppError::PortsExhausted)));

        // Freeing one lets the next start reuse it
        pool.release(5002);
        assert_eq!(pool.allocate().unwrap(), 5002);
        assert!(matches!(pool.allocate(), Err(AppError::PortsExhausted)));
    }

    #[test]
    fn port_pool_release_is_idempotent() {
        let mut pool = PortPool::new(5001, 5001);
        let port = pool.allocate().unwrap();
        pool.release(port);
        pool.release(port);
        assert_eq!(pool.allocate().unwrap(), port);
    }

    #[test]
    fn single_port_range_cycles() {
        let mut pool = PortPool::new(6000, 6000);
        for _ in 0..5 {
            let port = pool.allocate().unwrap();
            assert_eq!(port, 6000);
            assert!(pool.allocate().is_err());
            pool.release(port);
        }
    }
}
