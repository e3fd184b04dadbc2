// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! lambda-local - invoke a local function once
//!
//! Reads a function manifest, starts the named function's handler, invokes
//! it with the given payload (or stdin) and prints the result. A handled
//! function error prints the error envelope and exits with status 1.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use lambda_local_runtime::{Config, FunctionRegistry, Manifest, OutputTarget};

#[derive(Parser)]
#[command(name = "lambda-local")]
#[command(about = "Invoke a local Go Lambda handler once", long_about = None)]
struct Cli {
    /// Function manifest (JSON)
    #[arg(long, short, env = "LAMBDA_LOCAL_MANIFEST", value_name = "PATH")]
    manifest: PathBuf,

    /// Function to invoke
    function: String,

    /// Event payload; read from stdin when omitted
    payload: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lambda_local_runtime=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    // Our stdout carries the result payload only.
    config.handler_stdout = OutputTarget::Stderr;
    let manifest = Manifest::load(&cli.manifest)
        .with_context(|| format!("load manifest {}", cli.manifest.display()))?;

    let payload = match cli.payload {
        Some(payload) => payload.into_bytes(),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("read payload from stdin")?;
            buf
        }
    };

    info!(
        function = %cli.function,
        functions_dir = %config.functions_dir.display(),
        "Starting lambda-local"
    );

    let registry = FunctionRegistry::new(config, manifest.functions, manifest.overrides);
    let result = registry.invoke(&cli.function, payload).await;
    registry.stop_all().await;

    let invocation = result?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&invocation.payload)?;
    stdout.write_all(b"\n")?;

    if invocation.handled_error {
        for (header, value) in invocation.headers() {
            warn!(header, value, "Function returned an error");
        }
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}
