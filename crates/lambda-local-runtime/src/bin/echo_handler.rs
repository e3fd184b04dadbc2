// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! lambda-local-echo - reference handler process
//!
//! Serves `Function.Ping` / `Function.Invoke` on `_LAMBDA_SERVER_PORT`, the
//! same way a Go handler does. Behaviour is driven by environment variables:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `ECHO_HANDLER_SPAWN_LOG` | Append the process id to this file on start |
//! | `ECHO_HANDLER_EXIT_CODE` | Exit with this code before listening |
//! | `ECHO_HANDLER_STARTUP_DELAY_MS` | Sleep before listening |
//! | `ECHO_HANDLER_DELAY_MS` | Sleep inside every invocation |
//! | `ECHO_HANDLER_MODE` | `echo` (default), `error`, `context` or `exit` |
//! | `ECHO_HANDLER_ERROR_MESSAGE` | Error message in `error` mode (default `boom`) |
//! | `ECHO_HANDLER_ERROR_TYPE` | Error type in `error` mode (default `Error`) |
//! | `ECHO_HANDLER_STACK` | `1` adds a stack frame in `error` mode |
//! | `ECHO_HANDLER_ECHO_ENV` | Comma separated variables reported in `context` mode |

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use lambda_local_protocol::{
    FunctionService, InvokeError, InvokeRequest, InvokeResponse, PORT_ENV_VAR, RpcServer,
    StackFrame,
};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Echo,
    Error,
    Context,
    Exit,
}

struct EchoHandler {
    mode: Mode,
    delay: Option<Duration>,
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl EchoHandler {
    fn from_env() -> Self {
        let mode = match env_or("ECHO_HANDLER_MODE", "echo").as_str() {
            "error" => Mode::Error,
            "context" => Mode::Context,
            "exit" => Mode::Exit,
            _ => Mode::Echo,
        };
        Self {
            mode,
            delay: env_millis("ECHO_HANDLER_DELAY_MS"),
        }
    }

    fn context(request: &InvokeRequest) -> serde_json::Value {
        let env: serde_json::Map<String, serde_json::Value> = env_or("ECHO_HANDLER_ECHO_ENV", "")
            .split(',')
            .filter(|name| !name.is_empty())
            .map(|name| {
                let value = std::env::var(name).map_or(serde_json::Value::Null, |v| json!(v));
                (name.to_string(), value)
            })
            .collect();
        let cwd = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();

        json!({
            "requestId": request.request_id,
            "functionArn": request.invoked_function_arn,
            "deadlineSeconds": request.deadline.seconds,
            "cwd": cwd,
            "env": env,
        })
    }
}

#[async_trait]
impl FunctionService for EchoHandler {
    async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, String> {
        println!("Input: {}", String::from_utf8_lossy(&request.payload));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.mode {
            Mode::Echo => Ok(InvokeResponse::success(request.payload)),
            Mode::Context => {
                let body = serde_json::to_vec(&Self::context(&request)).map_err(|e| e.to_string())?;
                Ok(InvokeResponse::success(body))
            }
            Mode::Error => {
                let mut error = InvokeError::new(
                    env_or("ECHO_HANDLER_ERROR_MESSAGE", "boom"),
                    env_or("ECHO_HANDLER_ERROR_TYPE", "Error"),
                );
                if env_or("ECHO_HANDLER_STACK", "0") == "1" {
                    error.stack_trace.push(StackFrame {
                        path: "echo_handler.rs".to_string(),
                        line: 1,
                        label: "invoke".to_string(),
                    });
                }
                Ok(InvokeResponse::failure(error))
            }
            Mode::Exit => std::process::exit(3),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("ECHO_HANDLER_SPAWN_LOG") {
        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open spawn log {}", path))?;
        writeln!(log, "{}", std::process::id())?;
    }

    if let Ok(code) = std::env::var("ECHO_HANDLER_EXIT_CODE") {
        eprintln!("echo handler exiting early with code {}", code);
        std::process::exit(code.parse().unwrap_or(1));
    }

    if let Some(delay) = env_millis("ECHO_HANDLER_STARTUP_DELAY_MS") {
        tokio::time::sleep(delay).await;
    }

    let port: u16 = std::env::var(PORT_ENV_VAR)
        .with_context(|| format!("{} is not set", PORT_ENV_VAR))?
        .parse()
        .with_context(|| format!("{} is not a port", PORT_ENV_VAR))?;

    let server = RpcServer::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
    println!("echo handler listening on port {}", port);

    server.serve(Arc::new(EchoHandler::from_env())).await?;
    Ok(())
}
