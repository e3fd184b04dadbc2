// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for lambda-local-runtime.

use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default location of unpacked function code.
pub const DEFAULT_FUNCTIONS_DIR: &str = "/var/lambdas";

/// Where a handler's standard output is copied to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputTarget {
    #[default]
    Stdout,
    /// Keeps our own stdout free for results
    Stderr,
}

impl FromStr for OutputTarget {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(OutputTarget::Stdout),
            "stderr" => Ok(OutputTarget::Stderr),
            _ => Err(()),
        }
    }
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one code directory per function (`<dir>/<name>`)
    pub functions_dir: PathBuf,
    /// Loopback ports handed out to handlers (half-open)
    pub port_range: Range<u16>,
    /// Timeout for functions that do not declare one, in seconds
    pub default_timeout_secs: u64,
    /// How long a handler may take to answer its first ping
    pub ready_timeout_ms: u64,
    /// Delay between pings while the handler is not listening yet
    pub probe_interval_ms: u64,
    /// Time between SIGTERM and SIGKILL when stopping a handler
    pub stop_grace_ms: u64,
    /// TCP connect timeout for pings and invocations
    pub connect_timeout_ms: u64,
    /// Destination of handler stdout (handler stderr always goes to stderr)
    pub handler_stdout: OutputTarget,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            functions_dir: PathBuf::from(DEFAULT_FUNCTIONS_DIR),
            port_range: 2000..3000,
            default_timeout_secs: 3,
            ready_timeout_ms: 10_000,
            probe_interval_ms: 50,
            stop_grace_ms: 2_000,
            connect_timeout_ms: 1_000,
            handler_stdout: OutputTarget::Stdout,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let functions_dir = lookup("LAMBDA_LOCAL_FUNCTIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.functions_dir);

        let start = parse_var(&lookup, "LAMBDA_LOCAL_PORT_RANGE_START", defaults.port_range.start)?;
        let end = parse_var(&lookup, "LAMBDA_LOCAL_PORT_RANGE_END", defaults.port_range.end)?;
        if start == 0 || start >= end {
            return Err(ConfigError::InvalidPortRange { start, end });
        }

        Ok(Self {
            functions_dir,
            port_range: start..end,
            default_timeout_secs: parse_var(
                &lookup,
                "LAMBDA_LOCAL_DEFAULT_TIMEOUT_SECS",
                defaults.default_timeout_secs,
            )?,
            ready_timeout_ms: parse_var(
                &lookup,
                "LAMBDA_LOCAL_READY_TIMEOUT_MS",
                defaults.ready_timeout_ms,
            )?,
            probe_interval_ms: parse_var(
                &lookup,
                "LAMBDA_LOCAL_PROBE_INTERVAL_MS",
                defaults.probe_interval_ms,
            )?,
            stop_grace_ms: parse_var(&lookup, "LAMBDA_LOCAL_STOP_GRACE_MS", defaults.stop_grace_ms)?,
            connect_timeout_ms: parse_var(
                &lookup,
                "LAMBDA_LOCAL_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout_ms,
            )?,
            handler_stdout: parse_var(
                &lookup,
                "LAMBDA_LOCAL_HANDLER_STDOUT",
                defaults.handler_stdout,
            )?,
        })
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name, value: raw })
        }
        _ => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    /// The port range is empty or starts at zero.
    #[error("Invalid port range {start}..{end}")]
    InvalidPortRange { start: u16, end: u16 },
}
