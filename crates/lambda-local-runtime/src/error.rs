// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for lambda-local-runtime.

use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// No descriptor is known for the function.
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// Every port in the configured range is held by a live instance.
    #[error("No port available in {start}..{end}")]
    NoPortAvailable { start: u16, end: u16 },

    /// The handler could not be spawned or never became ready.
    #[error("Startup failure for {name}: {reason}")]
    StartupFailure { name: String, reason: String },

    /// The declared timeout cannot be turned into a deadline.
    #[error("Invalid timeout for {name}: {timeout_secs}s")]
    InvalidTimeout { name: String, timeout_secs: u64 },

    /// The handler process exited unexpectedly.
    #[error("Process crashed: {0}")]
    ProcessCrashed(String),

    /// Dialing or talking to the handler failed.
    #[error("Transport error: {0}")]
    Transport(#[from] lambda_local_protocol::ClientError),

    /// The instance is not in a state that accepts invocations.
    #[error("Function not ready: {0}")]
    NotReady(String),

    /// The instance was stopped while the caller was waiting on it.
    #[error("Function stopped: {0}")]
    Stopped(String),

    /// The process to stop had already exited.
    #[error("Process not found for {0}")]
    ProcessNotFound(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn startup(name: &str, reason: impl Into<String>) -> Self {
        Error::StartupFailure {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type using the runtime Error.
pub type Result<T> = std::result::Result<T, Error>;
