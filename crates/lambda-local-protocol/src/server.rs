// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RPC server for handler processes.
//!
//! The handler side of the protocol: accepts connections, decodes calls and
//! dispatches `Function.Ping` / `Function.Invoke` to a [`FunctionService`].
//! Used by native handlers and by tests that need a stand-in handler.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::gob::{Decoder, Encoder, GobError, GobMessage, GobType, Value};
use crate::messages::{
    INVOKE_METHOD, InvokeRequest, InvokeResponse, PING_METHOD, PingRequest, PingResponse,
    RequestHeader, ResponseHeader,
};

/// Errors that can occur in the RPC server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gob error: {0}")]
    Gob(#[from] GobError),
}

/// Handler logic behind the RPC endpoint.
///
/// An `Err` is reported to the caller as an RPC-level error. Handler failures
/// that belong to the invocation go into [`InvokeResponse::error`] instead.
#[async_trait]
pub trait FunctionService: Send + Sync + 'static {
    async fn ping(&self) -> Result<(), String> {
        Ok(())
    }

    async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, String>;
}

/// Body sent along with an RPC-level error.
struct InvalidRequest;

impl GobMessage for InvalidRequest {
    fn gob_type() -> GobType {
        GobType::structure("invalidRequest", Vec::new())
    }

    fn to_value(&self) -> Value {
        Value::Struct(Vec::new())
    }

    fn from_value(_value: Value) -> Result<Self, GobError> {
        Ok(Self)
    }
}

/// TCP listener serving a [`FunctionService`].
pub struct RpcServer {
    listener: TcpListener,
}

impl RpcServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped or accept fails.
    pub async fn serve<S: FunctionService>(self, service: Arc<S>) -> Result<(), ServerError> {
        info!(addr = %self.listener.local_addr()?, "RPC server listening");

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let service = service.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, service).await {
                    warn!(%peer, error = %e, "Connection failed");
                }
            });
        }
    }
}

async fn handle_connection<S: FunctionService>(
    stream: TcpStream,
    service: Arc<S>,
) -> Result<(), ServerError> {
    stream.set_nodelay(true)?;
    let mut stream = BufReader::new(stream);
    let mut decoder = Decoder::new();
    let mut encoder = Encoder::new();

    loop {
        let header: RequestHeader = match decoder.read(&mut stream).await {
            Ok(header) => header,
            Err(GobError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let body = decoder.decode(&mut stream).await?;
        debug!(method = %header.service_method, seq = header.seq, "RPC call received");

        let mut out = BytesMut::new();
        match header.service_method.as_str() {
            PING_METHOD => {
                PingRequest::from_value(body)?;
                let result = service.ping().await.map(|()| PingResponse);
                write_reply(&mut encoder, &header, result, &mut out)?;
            }
            INVOKE_METHOD => {
                let request = InvokeRequest::from_value(body)?;
                let result = service.invoke(request).await;
                write_reply(&mut encoder, &header, result, &mut out)?;
            }
            other => {
                let result: Result<PingResponse, String> =
                    Err(format!("rpc: can't find service {other}"));
                write_reply(&mut encoder, &header, result, &mut out)?;
            }
        }

        stream.get_mut().write_all(&out).await?;
    }
}

fn write_reply<M: GobMessage>(
    encoder: &mut Encoder,
    request: &RequestHeader,
    result: Result<M, String>,
    out: &mut BytesMut,
) -> Result<(), GobError> {
    let mut header = ResponseHeader {
        service_method: request.service_method.clone(),
        seq: request.seq,
        error: String::new(),
    };
    match result {
        Ok(body) => {
            encoder.encode_message(&header, out)?;
            encoder.encode_message(&body, out)
        }
        Err(message) => {
            header.error = message;
            encoder.encode_message(&header, out)?;
            encoder.encode_message(&InvalidRequest, out)
        }
    }
}
