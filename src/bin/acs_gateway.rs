// ABOUTME: Gateway binary: loads configuration and serves the access control gateway
// ABOUTME: Exits non-zero on fatal startup failure (missing master key, bad config)
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use acs_server::config::GatewayConfig;
use acs_server::gateway::{GatewayServer, ServerResources};
use acs_server::logging;

#[derive(Debug, Parser)]
#[command(name = "acs-gateway", about = "Multi-tenant access control gateway")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init("info,acs_server=debug");
    let args = Args::parse();

    let config = match GatewayConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal: configuration failed to load");
            return ExitCode::FAILURE;
        }
    };
    let resources = match ServerResources::new(config) {
        Ok(resources) => resources,
        Err(e) => {
            error!(error = %e, "fatal: gateway startup failed");
            return ExitCode::FAILURE;
        }
    };

    match GatewayServer::new(resources).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gateway exited with error");
            ExitCode::FAILURE
        }
    }
}
