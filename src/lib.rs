// ABOUTME: Library entry point for the multi-tenant access control gateway
// ABOUTME: Exposes the gateway, worker, and the subsystems they are assembled from
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

#![deny(unsafe_code)]

//! # ACS Server
//!
//! A multi-tenant access control system core: an HTTP gateway that resolves
//! each authenticated request to a tenant, dispatches CQRS commands to a
//! dedicated per-tenant worker process over a binary RPC channel, and
//! serializes each tenant's mutations through a single-consumer command
//! buffer. Sensitive fields are encrypted at rest with versioned per-tenant
//! keys wrapped by a process master key.
//!
//! ## Architecture
//!
//! - **Gateway** (`acs-gateway`): authentication, tenant resolution, worker
//!   lifecycle, command dispatch.
//! - **Worker** (`acs-worker`): one process per tenant, FIFO command
//!   execution against an in-memory authorization graph.
//! - **Key subsystem**: file-backed versioned tenant keys, AES-256-GCM at
//!   both the master-wrap and data layers, rotation with retained legacy
//!   decryption.

/// Bearer-token authentication with shared-secret JWTs
pub mod auth;

/// Per-worker FIFO command buffer with a single consumer
pub mod buffer;

/// Domain command structs with stable type ids
pub mod commands;

/// Configuration for the gateway and worker binaries
pub mod config;

/// Correlation context carried across async boundaries
pub mod correlation;

/// Gateway-side command dispatch over the RPC channel
pub mod dispatch;

/// Per-tenant AES-GCM field encryption with versioned keys
pub mod encryption;

/// Unified error handling with stable kind tags
pub mod errors;

/// Gateway server assembly and shared resources
pub mod gateway;

/// In-memory authorization graph (users, groups, roles, resources)
pub mod graph;

/// Worker-side command handler registry
pub mod handlers;

/// Versioned per-tenant key files wrapped with the master key
pub mod keystore;

/// Structured logging initialization
pub mod logging;

/// Per-tenant request counters and latency tracking
pub mod metrics;

/// Correlation, auth, and metrics middlewares
pub mod middleware;

/// Per-tenant worker process lifecycle and the port pool
pub mod process;

/// Gateway HTTP routes
pub mod routes;

/// Binary RPC wire contract and channel pool
pub mod rpc;

/// Tenant identity, catalog, and resolution
pub mod tenant;

/// Tenant worker server
pub mod worker;
