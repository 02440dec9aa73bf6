// ABOUTME: Bounded FIFO command buffer with a single consumer per worker
// ABOUTME: Serializes domain mutations while concurrent RPC ingress enqueues with backpressure
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

//! # Command buffer
//!
//! Many producers (RPC server tasks) enqueue `(command, completion)` pairs;
//! exactly one consumer task dequeues and runs handlers. A command enqueued
//! earlier completes before any later command's handler begins; there is no
//! parallel handler execution within one worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::correlation::{self, CorrelationContext};
use crate::errors::{AppError, AppResult};

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(10);

/// Executes one decoded command; installed once at buffer construction
pub type CommandExecutor =
    Arc<dyn Fn(String, Vec<u8>) -> BoxFuture<'static, AppResult<Vec<u8>>> + Send + Sync>;

struct QueuedCommand {
    command_type: String,
    payload: Vec<u8>,
    correlation_id: String,
    completion: oneshot::Sender<AppResult<Vec<u8>>>,
    cancelled: Arc<AtomicBool>,
}

/// Caller-side handle for one enqueued command
pub struct CommandTicket {
    receiver: oneshot::Receiver<AppResult<Vec<u8>>>,
    cancelled: Arc<AtomicBool>,
}

impl CommandTicket {
    /// Mark the command cancelled. Effective only while it is still queued;
    /// a running handler always completes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Await the handler outcome.
    ///
    /// Abandoning this future (caller disconnect) marks the command
    /// cancelled, so a still-queued item never runs for a caller that went
    /// away.
    ///
    /// # Errors
    /// Propagates the handler error, `Cancelled` for a cancelled queued
    /// command, or `Internal` when the consumer went away.
    pub async fn wait(self) -> AppResult<Vec<u8>> {
        let mut guard = CancelOnDrop {
            cancelled: Arc::clone(&self.cancelled),
            armed: true,
        };
        let result = self
            .receiver
            .await
            .map_err(|_| AppError::internal("command buffer consumer stopped"))?;
        guard.armed = false;
        result
    }
}

struct CancelOnDrop {
    cancelled: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

/// Live counters for one buffer
#[derive(Default)]
pub struct BufferMetrics {
    commands_processed: AtomicU64,
    commands_in_flight: AtomicU64,
    queue_depth: AtomicU64,
    completions: Mutex<VecDeque<Instant>>,
}

/// Point-in-time metrics view
#[derive(Debug, Clone, Serialize)]
pub struct BufferMetricsSnapshot {
    /// Handlers completed since start
    pub commands_processed: u64,
    /// 0 or 1: whether a handler is running now
    pub commands_in_flight: u64,
    /// Commands waiting in the queue
    pub queue_depth: u64,
    /// Completions per second over the rolling window
    pub commands_per_second: f64,
}

impl BufferMetrics {
    /// Total handlers completed since start
    pub fn commands_processed(&self) -> u64 {
        self.commands_processed.load(Ordering::Relaxed)
    }

    /// Current queue depth
    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    /// Whether a handler is executing right now
    pub fn in_flight(&self) -> u64 {
        self.commands_in_flight.load(Ordering::Relaxed)
    }

    /// Snapshot all counters plus the rolling throughput
    pub async fn snapshot(&self) -> BufferMetricsSnapshot {
        let mut window = self.completions.lock().await;
        prune_window(&mut window);
        let per_second = window.len() as f64 / THROUGHPUT_WINDOW.as_secs_f64();
        drop(window);
        BufferMetricsSnapshot {
            commands_processed: self.commands_processed(),
            commands_in_flight: self.in_flight(),
            queue_depth: self.queue_depth(),
            commands_per_second: per_second,
        }
    }

    async fn record_completion(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        let mut window = self.completions.lock().await;
        prune_window(&mut window);
        window.push_back(Instant::now());
    }
}

fn prune_window(window: &mut VecDeque<Instant>) {
    let Some(cutoff) = Instant::now().checked_sub(THROUGHPUT_WINDOW) else {
        return;
    };
    while window.front().is_some_and(|t| *t < cutoff) {
        window.pop_front();
    }
}

/// Per-worker FIFO of domain commands
pub struct CommandBuffer {
    sender: mpsc::Sender<QueuedCommand>,
    metrics: Arc<BufferMetrics>,
    enqueue_timeout: Duration,
    tenant_id: String,
}

impl CommandBuffer {
    /// Start a buffer and its consumer task.
    ///
    /// The consumer resolves each completion with the executor's result and
    /// is the only caller of domain handlers for this worker. `metrics` is
    /// shared so other components (health RPC, probes) can observe it.
    #[must_use]
    pub fn start(
        tenant_id: String,
        capacity: usize,
        enqueue_timeout: Duration,
        metrics: Arc<BufferMetrics>,
        executor: CommandExecutor,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let consumer = tokio::spawn(consume(
            tenant_id.clone(),
            receiver,
            Arc::clone(&metrics),
            executor,
        ));
        (
            Self {
                sender,
                metrics,
                enqueue_timeout,
                tenant_id,
            },
            consumer,
        )
    }

    /// Metrics for this buffer
    #[must_use]
    pub fn metrics(&self) -> Arc<BufferMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Enqueue a command.
    ///
    /// With `wait_for_space`, a full queue blocks up to the configured
    /// timeout before failing `Overloaded`; without it, a full queue fails
    /// immediately.
    ///
    /// # Errors
    /// `Overloaded` when no slot frees up in time; `Internal` after shutdown.
    pub async fn enqueue(
        &self,
        command_type: String,
        payload: Vec<u8>,
        correlation_id: String,
        wait_for_space: bool,
    ) -> AppResult<CommandTicket> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (completion, receiver) = oneshot::channel();
        let item = QueuedCommand {
            command_type,
            payload,
            correlation_id,
            completion,
            cancelled: Arc::clone(&cancelled),
        };

        if wait_for_space {
            match self.sender.send_timeout(item, self.enqueue_timeout).await {
                Ok(()) => {}
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                    warn!(tenant_id = %self.tenant_id, "command buffer full past enqueue deadline");
                    return Err(AppError::Overloaded);
                }
                Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                    return Err(AppError::internal("command buffer is shut down"));
                }
            }
        } else {
            match self.sender.try_send(item) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => return Err(AppError::Overloaded),
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(AppError::internal("command buffer is shut down"));
                }
            }
        }

        self.metrics.queue_depth.fetch_add(1, Ordering::Relaxed);
        Ok(CommandTicket {
            receiver,
            cancelled,
        })
    }
}

async fn consume(
    tenant_id: String,
    mut receiver: mpsc::Receiver<QueuedCommand>,
    metrics: Arc<BufferMetrics>,
    executor: CommandExecutor,
) {
    while let Some(item) = receiver.recv().await {
        metrics.queue_depth.fetch_sub(1, Ordering::Relaxed);

        if item.cancelled.load(Ordering::SeqCst) {
            let _ = item.completion.send(Err(AppError::Cancelled));
            continue;
        }

        metrics.commands_in_flight.store(1, Ordering::Relaxed);
        let ctx = CorrelationContext {
            correlation_id: item.correlation_id.clone(),
            tenant_id: Some(tenant_id.clone()),
            ..CorrelationContext::new()
        };
        let result = correlation::scope(
            ctx,
            (executor)(item.command_type.clone(), item.payload),
        )
        .await;
        metrics.commands_in_flight.store(0, Ordering::Relaxed);
        metrics.record_completion().await;

        if let Err(e) = &result {
            debug!(
                tenant_id = %tenant_id,
                command_type = %item.command_type,
                error = %e,
                "command handler failed"
            );
        }
        // Receiver may have given up (caller disconnect); the handler has
        // already run to completion either way
        let _ = item.completion.send(result);
    }
}
