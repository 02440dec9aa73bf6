// ABOUTME: Structured logging initialization for the gateway and worker binaries
// ABOUTME: Wraps tracing-subscriber with env-filter defaults and a quiet test mode
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the process-wide subscriber.
///
/// `RUST_LOG` wins when set; otherwise the given default directive applies.
/// Safe to call more than once; later calls are no-ops.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Quiet subscriber for tests: warnings and errors only unless `TEST_LOG` is set.
pub fn init_for_tests() {
    let directive = std::env::var("TEST_LOG").unwrap_or_else(|_| "warn".to_owned());
    let _ = fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_test_writer()
        .try_init();
}
