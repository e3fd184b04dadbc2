// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readiness probing.
//!
//! A freshly spawned handler needs a moment before it listens on its port.
//! The prober pings it until it answers:
//! - ping succeeded: the handler is ready
//! - connection refused: not listening yet, retry after the probe interval
//! - any other failure: fatal
//!
//! Probing gives up after the readiness timeout, and immediately when the
//! process exits.

use std::time::{Duration, Instant};

use lambda_local_protocol::{ClientError, RpcClient, RpcClientConfig};
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::supervisor::{ProcessExit, wait_exit};

/// Probe settings.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Delay between attempts while the port is closed. Default: 50ms
    pub interval: Duration,
    /// Overall deadline. Default: 10s
    pub ready_timeout: Duration,
    /// TCP connect timeout per attempt. Default: 1s
    pub connect_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ProbeConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.probe_interval(),
            ready_timeout: config.ready_timeout(),
            connect_timeout_ms: config.connect_timeout_ms,
        }
    }
}

/// Ping the handler on `port` once over a fresh connection.
pub async fn ping(port: u16, connect_timeout_ms: u64) -> std::result::Result<(), ClientError> {
    let config = RpcClientConfig::loopback(port).with_connect_timeout_ms(connect_timeout_ms);
    let mut client = RpcClient::connect(&config).await?;
    client.ping().await?;
    let _ = client.close().await;
    Ok(())
}

/// Wait until the handler named `name` answers a ping on `port`.
///
/// `exit_rx` observes the handler process; its exit aborts the probe with
/// [`Error::StartupFailure`].
#[instrument(skip(config, exit_rx), fields(function = %name))]
pub async fn wait_ready(
    name: &str,
    port: u16,
    config: &ProbeConfig,
    exit_rx: &mut watch::Receiver<Option<ProcessExit>>,
) -> Result<()> {
    let started = Instant::now();

    let probing = async {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match ping(port, config.connect_timeout_ms).await {
                Ok(()) => {
                    debug!(
                        port,
                        attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Handler is ready"
                    );
                    return Ok(());
                }
                Err(e) if e.is_connection_refused() => tokio::time::sleep(config.interval).await,
                Err(e) => return Err(Error::startup(name, format!("ping failed: {}", e))),
            }
        }
    };

    tokio::select! {
        result = tokio::time::timeout(config.ready_timeout, probing) => {
            result.unwrap_or_else(|_| {
                Err(Error::startup(
                    name,
                    format!("not ready after {}ms", config.ready_timeout.as_millis()),
                ))
            })
        }
        exit = wait_exit(exit_rx) => {
            let reason = match exit {
                Some(exit) => format!("process exited during startup ({})", exit.status),
                None => "process watcher ended during startup".to_string(),
            };
            Err(Error::startup(name, reason))
        }
    }
}
