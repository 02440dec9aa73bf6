// ABOUTME: Worker binary: one process per tenant serving the binary RPC surface
// ABOUTME: Tenant and port come from CLI flags or TENANT_ID / RPC_PORT environment
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use acs_server::config::WorkerConfig;
use acs_server::logging;
use acs_server::worker::WorkerServer;

#[derive(Debug, Parser)]
#[command(name = "acs-worker", about = "Dedicated tenant worker process")]
struct Args {
    /// Tenant this worker serves (falls back to TENANT_ID)
    #[arg(long)]
    tenant: Option<String>,
    /// RPC port to bind (falls back to RPC_PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init("info,acs_server=debug");
    let args = Args::parse();

    let config = match WorkerConfig::from_env(args.tenant, args.port) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal: worker configuration failed");
            return ExitCode::FAILURE;
        }
    };

    let server = match WorkerServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "fatal: worker startup failed");
            return ExitCode::FAILURE;
        }
    };

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "worker exited with error");
            ExitCode::FAILURE
        }
    }
}
