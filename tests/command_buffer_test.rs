// ABOUTME: Integration tests for the per-worker FIFO command buffer
// ABOUTME: Covers strict ordering, backpressure, queued-item cancellation, and metrics
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};

use acs_server::buffer::{BufferMetrics, CommandBuffer, CommandExecutor};
use acs_server::correlation;
use acs_server::errors::AppError;

use common::init_test_logging;

fn recording_executor(log: Arc<Mutex<Vec<u64>>>) -> CommandExecutor {
    Arc::new(move |_command_type, payload| {
        let log = Arc::clone(&log);
        Box::pin(async move {
            let n = u64::from_le_bytes(payload.as_slice().try_into().unwrap());
            log.lock().await.push(n);
            Ok(Vec::new())
        })
    })
}

fn gated_executor(started: Arc<Semaphore>, gate: Arc<Semaphore>) -> CommandExecutor {
    Arc::new(move |_command_type, _payload| {
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        Box::pin(async move {
            started.add_permits(1);
            let permit = gate.acquire().await.unwrap();
            permit.forget();
            Ok(Vec::new())
        })
    })
}

#[tokio::test]
async fn one_thousand_commands_execute_in_enqueue_order() {
    init_test_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let (buffer, _consumer) = CommandBuffer::start(
        "t1".to_owned(),
        10_000,
        Duration::from_secs(5),
        Arc::new(BufferMetrics::default()),
        recording_executor(Arc::clone(&log)),
    );

    let mut tickets = Vec::with_capacity(1_000);
    for n in 1..=1_000u64 {
        let ticket = buffer
            .enqueue(
                "probe".to_owned(),
                n.to_le_bytes().to_vec(),
                format!("c-{n}"),
                true,
            )
            .await
            .unwrap();
        tickets.push(ticket);
        // Staggered dispatch: let the consumer interleave with ingress
        if n % 7 == 0 {
            tokio::task::yield_now().await;
        }
        if n % 97 == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
    for ticket in tickets {
        ticket.wait().await.unwrap();
    }

    let seen = log.lock().await;
    let expected: Vec<u64> = (1..=1_000).collect();
    assert_eq!(*seen, expected);
}

#[tokio::test]
async fn full_queue_fails_overloaded() {
    init_test_logging();
    let started = Arc::new(Semaphore::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let (buffer, _consumer) = CommandBuffer::start(
        "t1".to_owned(),
        2,
        Duration::from_millis(100),
        Arc::new(BufferMetrics::default()),
        gated_executor(Arc::clone(&started), Arc::clone(&gate)),
    );

    let running = buffer
        .enqueue("a".to_owned(), Vec::new(), "c-a".to_owned(), true)
        .await
        .unwrap();
    // Wait until the first handler is actually executing
    started.acquire().await.unwrap().forget();

    let queued_one = buffer
        .enqueue("b".to_owned(), Vec::new(), "c-b".to_owned(), true)
        .await
        .unwrap();
    let queued_two = buffer
        .enqueue("c".to_owned(), Vec::new(), "c-c".to_owned(), true)
        .await
        .unwrap();

    // Queue of two is full: immediate failure without waiting...
    assert!(matches!(
        buffer
            .enqueue("d".to_owned(), Vec::new(), "c-d".to_owned(), false)
            .await,
        Err(AppError::Overloaded)
    ));
    // ...and failure after the enqueue deadline when waiting
    assert!(matches!(
        buffer
            .enqueue("e".to_owned(), Vec::new(), "c-e".to_owned(), true)
            .await,
        Err(AppError::Overloaded)
    ));

    // Release all handlers; everything accepted completes
    gate.add_permits(16);
    running.wait().await.unwrap();
    queued_one.wait().await.unwrap();
    queued_two.wait().await.unwrap();
}

#[tokio::test]
async fn cancelling_a_queued_command_skips_its_handler() {
    init_test_logging();
    let started = Arc::new(Semaphore::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let metrics = Arc::new(BufferMetrics::default());
    let (buffer, _consumer) = CommandBuffer::start(
        "t1".to_owned(),
        16,
        Duration::from_secs(1),
        Arc::clone(&metrics),
        gated_executor(Arc::clone(&started), Arc::clone(&gate)),
    );

    let running = buffer
        .enqueue("a".to_owned(), Vec::new(), "c-a".to_owned(), true)
        .await
        .unwrap();
    started.acquire().await.unwrap().forget();

    let queued = buffer
        .enqueue("b".to_owned(), Vec::new(), "c-b".to_owned(), true)
        .await
        .unwrap();
    queued.cancel();

    gate.add_permits(16);
    // The running command is never cancelled mid-execution
    running.wait().await.unwrap();
    assert!(matches!(queued.wait().await, Err(AppError::Cancelled)));

    // Only the executed command counts as processed
    assert_eq!(metrics.commands_processed(), 1);
}

#[tokio::test]
async fn abandoning_the_wait_cancels_a_queued_command() {
    init_test_logging();
    let started = Arc::new(Semaphore::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let metrics = Arc::new(BufferMetrics::default());
    let (buffer, _consumer) = CommandBuffer::start(
        "t1".to_owned(),
        16,
        Duration::from_secs(1),
        Arc::clone(&metrics),
        gated_executor(Arc::clone(&started), Arc::clone(&gate)),
    );

    let running = buffer
        .enqueue("a".to_owned(), Vec::new(), "c-a".to_owned(), true)
        .await
        .unwrap();
    started.acquire().await.unwrap().forget();

    let queued = buffer
        .enqueue("b".to_owned(), Vec::new(), "c-b".to_owned(), true)
        .await
        .unwrap();

    // A caller that goes away mid-wait abandons its queued command
    let waiter = tokio::spawn(queued.wait());
    tokio::time::sleep(Duration::from_millis(20)).await;
    waiter.abort();
    let _ = waiter.await;

    gate.add_permits(16);
    running.wait().await.unwrap();

    // Give the consumer time to drain the abandoned item
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(metrics.commands_processed(), 1);
    assert_eq!(metrics.queue_depth(), 0);
}

#[tokio::test]
async fn handlers_observe_the_enqueued_correlation_id() {
    init_test_logging();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let observed_in_executor = Arc::clone(&observed);
    let executor: CommandExecutor = Arc::new(move |_ty, _payload| {
        let observed = Arc::clone(&observed_in_executor);
        Box::pin(async move {
            let ctx = correlation::current();
            observed
                .lock()
                .await
                .push((ctx.correlation_id, ctx.tenant_id));
            Ok(Vec::new())
        })
    });
    let (buffer, _consumer) = CommandBuffer::start(
        "t9".to_owned(),
        16,
        Duration::from_secs(1),
        Arc::new(BufferMetrics::default()),
        executor,
    );

    buffer
        .enqueue("probe".to_owned(), Vec::new(), "corr-42".to_owned(), true)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let seen = observed.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "corr-42");
    assert_eq!(seen[0].1.as_deref(), Some("t9"));
}

#[tokio::test]
async fn metrics_count_processed_and_depth() {
    init_test_logging();
    let metrics = Arc::new(BufferMetrics::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let (buffer, _consumer) = CommandBuffer::start(
        "t1".to_owned(),
        64,
        Duration::from_secs(1),
        Arc::clone(&metrics),
        recording_executor(log),
    );

    let mut tickets = Vec::new();
    for n in 0..10u64 {
        tickets.push(
            buffer
                .enqueue("n".to_owned(), n.to_le_bytes().to_vec(), format!("c{n}"), true)
                .await
                .unwrap(),
        );
    }
    for ticket in tickets {
        ticket.wait().await.unwrap();
    }

    let snapshot = metrics.snapshot().await;
    assert_eq!(snapshot.commands_processed, 10);
    assert_eq!(snapshot.commands_in_flight, 0);
    assert_eq!(snapshot.queue_depth, 0);
    assert!(snapshot.commands_per_second > 0.0);
}
