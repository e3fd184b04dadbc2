// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RPC client for handler processes.
//!
//! Speaks the `net/rpc` client side: each call writes a [`RequestHeader`]
//! followed by the arguments, then reads a [`ResponseHeader`] followed by the
//! reply body.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::gob::{Decoder, Encoder, GobError, GobMessage};
use crate::messages::{
    INVOKE_METHOD, InvokeRequest, InvokeResponse, PING_METHOD, PingRequest, PingResponse,
    RequestHeader, ResponseHeader,
};

/// Errors that can occur in the RPC client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect error: {0}")]
    Connect(#[source] std::io::Error),

    #[error("connection timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gob error: {0}")]
    Gob(#[from] GobError),

    /// The handler answered with an RPC-level error string.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("response sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u64, actual: u64 },
}

impl ClientError {
    /// Whether the handler is not listening yet.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, ClientError::Connect(e) if e.kind() == std::io::ErrorKind::ConnectionRefused)
    }
}

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Handler address
    pub addr: SocketAddr,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 2000)),
            connect_timeout_ms: 1_000,
        }
    }
}

impl RpcClientConfig {
    /// Handler listening on a loopback port.
    pub fn loopback(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            ..Default::default()
        }
    }

    pub fn with_connect_timeout_ms(mut self, connect_timeout_ms: u64) -> Self {
        self.connect_timeout_ms = connect_timeout_ms;
        self
    }
}

/// A connection to one handler process.
pub struct RpcClient {
    stream: BufReader<TcpStream>,
    encoder: Encoder,
    decoder: Decoder,
    seq: u64,
}

impl RpcClient {
    /// Connect to the handler.
    #[instrument(skip(config), fields(addr = %config.addr))]
    pub async fn connect(config: &RpcClientConfig) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            TcpStream::connect(config.addr),
        )
        .await
        .map_err(|_| ClientError::Timeout(config.connect_timeout_ms))?
        .map_err(ClientError::Connect)?;
        stream.set_nodelay(true)?;

        debug!("Connected to handler");

        Ok(Self {
            stream: BufReader::new(stream),
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            seq: 0,
        })
    }

    /// Perform one call and wait for its reply.
    pub async fn call<Req: GobMessage, Resp: GobMessage>(
        &mut self,
        method: &str,
        args: &Req,
    ) -> Result<Resp, ClientError> {
        let seq = self.seq;
        self.seq += 1;

        let header = RequestHeader {
            service_method: method.to_string(),
            seq,
        };
        let mut out = BytesMut::new();
        self.encoder.encode_message(&header, &mut out)?;
        self.encoder.encode_message(args, &mut out)?;
        self.stream.get_mut().write_all(&out).await?;

        let reply: ResponseHeader = self.decoder.read(&mut self.stream).await?;
        // The body is always present, even when it carries nothing.
        let body = self.decoder.decode(&mut self.stream).await?;

        if reply.seq != seq {
            return Err(ClientError::SequenceMismatch {
                expected: seq,
                actual: reply.seq,
            });
        }
        if !reply.error.is_empty() {
            return Err(ClientError::Remote(reply.error));
        }

        debug!(method, seq, "RPC call completed");
        Ok(Resp::from_value(body)?)
    }

    /// Readiness check (`Function.Ping`).
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        let _: PingResponse = self.call(PING_METHOD, &PingRequest).await?;
        Ok(())
    }

    /// Run the handler once (`Function.Invoke`).
    pub async fn invoke(&mut self, request: &InvokeRequest) -> Result<InvokeResponse, ClientError> {
        self.call(INVOKE_METHOD, request).await
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}
