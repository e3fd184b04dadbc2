// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lambda Local Protocol - Go net/rpc + gob communication layer
//!
//! This crate provides the wire protocol spoken between the supervisor and
//! handler processes built on the Go Lambda handler library.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   lambda-local-protocol                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: Function.Ping / Function.Invoke (net/rpc)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: encoding/gob                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: TCP on 127.0.0.1:<_LAMBDA_SERVER_PORT>          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ## Client (supervisor side)
//!
//! ```ignore
//! use lambda_local_protocol::{InvokeRequest, RpcClient, RpcClientConfig};
//!
//! let mut client = RpcClient::connect(&RpcClientConfig::loopback(2000)).await?;
//! client.ping().await?;
//!
//! let response = client
//!     .invoke(&InvokeRequest {
//!         payload: b"{}".to_vec().into(),
//!         request_id: "req-1".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```
//!
//! ## Server (handler side)
//!
//! ```ignore
//! use lambda_local_protocol::{FunctionService, InvokeRequest, InvokeResponse, RpcServer};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl FunctionService for Echo {
//!     async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, String> {
//!         Ok(InvokeResponse::success(request.payload))
//!     }
//! }
//!
//! let server = RpcServer::bind("127.0.0.1:2000".parse()?).await?;
//! server.serve(std::sync::Arc::new(Echo)).await?;
//! ```

pub mod client;
pub mod gob;
pub mod messages;
pub mod server;

// Re-export main types
pub use client::{ClientError, RpcClient, RpcClientConfig};
pub use gob::{Decoder, Encoder, GobError, GobMessage, GobType, Value};
pub use messages::{
    INVOKE_METHOD, InvokeError, InvokeRequest, InvokeResponse, PING_METHOD, PORT_ENV_VAR,
    PingRequest, PingResponse, RequestHeader, ResponseHeader, StackFrame, Timestamp,
};
pub use server::{FunctionService, RpcServer, ServerError};
