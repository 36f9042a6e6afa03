//! # server-acl-init
//!
//! One-shot Kubernetes Job that bootstraps and reconciles Consul ACLs.

use clap::Parser;
use server_acl_init::cli::Cli;
use server_acl_init::runtime::{handle_run_error, initialize, EXIT_FAILURE, EXIT_OK};
use server_acl_init::ReconcilerError;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let reconciler = match initialize(cli).await {
        Ok(reconciler) => reconciler,
        Err(e) => {
            let code = match e.downcast_ref::<ReconcilerError>() {
                Some(err) => handle_run_error(err),
                None => {
                    error!("❌ Initialization failed: {:#}", e);
                    EXIT_FAILURE
                }
            };
            return exit(code);
        }
    };

    match reconciler.run().await {
        Ok(report) => {
            info!(
                servers = report.servers.len(),
                fresh_bootstrap = report.fresh_bootstrap,
                "✅ ACL configuration is up to date"
            );
            exit(EXIT_OK)
        }
        Err(e) => exit(handle_run_error(&e)),
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
