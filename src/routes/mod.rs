// ABOUTME: Gateway HTTP route organization by domain
// ABOUTME: Each module contains route builders and thin handlers delegating to resources
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

/// Token issuance and refresh
pub mod auth;
/// Command ingress (the CQRS surface)
pub mod commands;
/// Gateway and worker health aggregation
pub mod health;
/// Tenant catalog and worker management
pub mod tenants;
