// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lambda Local Runtime - Function Runtime Supervisor
//!
//! Runs handler executables built for the Go Lambda handler library as
//! local child processes and invokes them synchronously over the handler's
//! own RPC protocol, so functions can be exercised without deploying them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Caller (HTTP adapter, lambda-local CLI)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ invoke(name, payload)
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   lambda-local-runtime (This Crate)                      │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  Function   │  │    Port     │  │   Process   │  │  Readiness  │     │
//! │  │  Registry   │  │  Allocator  │  │ Supervisor  │  │   Prober    │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! │  ┌─────────────┐  ┌─────────────┐                                       │
//! │  │ Invocation  │  │    Error    │                                       │
//! │  │   Client    │  │ Translator  │                                       │
//! │  └─────────────┘  └─────────────┘                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ spawn, Function.Ping, Function.Invoke
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │        Handler processes on 127.0.0.1:<_LAMBDA_SERVER_PORT>              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LAMBDA_LOCAL_FUNCTIONS_DIR` | `/var/lambdas` | Parent of the per-function code directories |
//! | `LAMBDA_LOCAL_PORT_RANGE_START` | `2000` | First handler port |
//! | `LAMBDA_LOCAL_PORT_RANGE_END` | `3000` | End of the handler port range (exclusive) |
//! | `LAMBDA_LOCAL_DEFAULT_TIMEOUT_SECS` | `3` | Timeout of functions that declare none |
//! | `LAMBDA_LOCAL_READY_TIMEOUT_MS` | `10000` | Readiness probe deadline |
//! | `LAMBDA_LOCAL_PROBE_INTERVAL_MS` | `50` | Delay between readiness pings |
//! | `LAMBDA_LOCAL_STOP_GRACE_MS` | `2000` | SIGTERM to SIGKILL grace period |
//! | `LAMBDA_LOCAL_CONNECT_TIMEOUT_MS` | `1000` | Handler connect timeout |
//! | `LAMBDA_LOCAL_HANDLER_STDOUT` | `stdout` | Where handler stdout is copied (`stdout` or `stderr`) |
//!
//! # Usage
//!
//! ```ignore
//! use lambda_local_runtime::{Config, FunctionDescriptor, FunctionRegistry};
//!
//! let registry = FunctionRegistry::new(
//!     Config::from_env()?,
//!     [FunctionDescriptor::new("hello", "hello").with_timeout(5)],
//!     Default::default(),
//! );
//!
//! let invocation = registry.invoke("hello", &b"{\"name\":\"world\"}"[..]).await?;
//! if invocation.handled_error {
//!     // payload holds {"errorMessage": ..., "errorType": ...}
//! }
//! registry.stop_all().await;
//! ```

/// Runtime configuration loaded from environment variables.
pub mod config;

/// Static function definitions.
pub mod descriptor;

/// Error translation into the external error envelope.
pub mod envelope;

/// Error types for runtime operations.
pub mod error;

/// Per-function runtime state and serialized invocation.
pub mod instance;

/// One-shot `Function.Invoke` calls.
pub mod invoker;

/// Loopback port pool.
pub mod ports;

/// Readiness probing of freshly spawned handlers.
pub mod probe;

/// Instance registry and lifecycle orchestration.
pub mod registry;

/// Handler process spawning, output relay and exit detection.
pub mod supervisor;

pub use config::{Config, OutputTarget};
pub use descriptor::{EnvOverrides, FunctionDescriptor, Manifest};
pub use envelope::{ErrorEnvelope, Invocation};
pub use error::{Error, Result};
pub use instance::{FunctionInstance, InstanceState};
pub use registry::FunctionRegistry;
