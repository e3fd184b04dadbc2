// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invocation client.
//!
//! One `Function.Invoke` call per connection: dial, call, close.

use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use lambda_local_protocol::{
    InvokeRequest, InvokeResponse, RpcClient, RpcClientConfig, Timestamp,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Where and how to invoke one function.
#[derive(Debug, Clone)]
pub struct InvokeTarget {
    pub name: String,
    pub arn: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub connect_timeout_ms: u64,
}

/// Absolute deadline of an invocation started at `now`.
///
/// Fails with [`Error::InvalidTimeout`] when the timeout does not fit a
/// timestamp.
pub fn deadline(target: &InvokeTarget, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    i64::try_from(target.timeout_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|timeout| now.checked_add_signed(timeout))
        .ok_or_else(|| Error::InvalidTimeout {
            name: target.name.clone(),
            timeout_secs: target.timeout_secs,
        })
}

/// Build the request for one invocation started at `now`.
pub fn build_request(
    target: &InvokeTarget,
    payload: Bytes,
    now: DateTime<Utc>,
) -> Result<InvokeRequest> {
    let deadline = deadline(target, now)?;
    Ok(InvokeRequest {
        payload,
        request_id: Uuid::new_v4().to_string(),
        deadline: Timestamp {
            seconds: deadline.timestamp(),
            nanos: deadline.timestamp_subsec_nanos() as i64,
        },
        invoked_function_arn: target.arn.clone(),
        ..Default::default()
    })
}

/// Invoke the handler once and return its raw response.
///
/// Dial and call failures surface as [`crate::Error::Transport`].
#[instrument(skip(target, payload), fields(function = %target.name, port = target.port))]
pub async fn invoke(target: &InvokeTarget, payload: Bytes) -> Result<InvokeResponse> {
    let start = Instant::now();
    let request = build_request(target, payload, Utc::now())?;
    debug!(
        request_id = %request.request_id,
        payload_size = request.payload.len(),
        "Invoking function"
    );

    let config =
        RpcClientConfig::loopback(target.port).with_connect_timeout_ms(target.connect_timeout_ms);
    let mut client = RpcClient::connect(&config).await?;

    let call_start = Instant::now();
    let result = client.invoke(&request).await;
    let call_end = Instant::now();
    let _ = client.close().await;

    info!(
        request_id = %request.request_id,
        dial_ms = call_start.duration_since(start).as_millis() as u64,
        call_ms = call_end.duration_since(call_start).as_millis() as u64,
        total_ms = call_end.duration_since(start).as_millis() as u64,
        "Invocation finished"
    );

    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> InvokeTarget {
        InvokeTarget {
            name: "hello".to_string(),
            arn: "hello".to_string(),
            port: 2000,
            timeout_secs: 3,
            connect_timeout_ms: 1_000,
        }
    }

    #[test]
    fn test_request_deadline_and_arn() {
        let now = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let request = build_request(&target(), Bytes::from_static(b"{}"), now).unwrap();

        assert_eq!(request.deadline.seconds, 1_700_000_003);
        assert_eq!(request.deadline.nanos, 250_000_000);
        assert_eq!(request.invoked_function_arn, "hello");
        assert_eq!(&request.payload[..], b"{}");
    }

    #[test]
    fn test_request_ids_are_unique_uuids() {
        let now = Utc::now();
        let a = build_request(&target(), Bytes::new(), now).unwrap();
        let b = build_request(&target(), Bytes::new(), now).unwrap();

        assert_ne!(a.request_id, b.request_id);
        assert!(Uuid::parse_str(&a.request_id).is_ok());
    }

    // ========== Deadline Tests ==========

    #[test]
    fn test_timeout_beyond_i64_is_rejected() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let target = InvokeTarget {
            timeout_secs: u64::MAX,
            ..target()
        };

        let err = build_request(&target, Bytes::new(), now).unwrap_err();
        assert!(
            matches!(err, Error::InvalidTimeout { ref name, timeout_secs: u64::MAX } if name == "hello"),
            "{err}"
        );
    }

    #[test]
    fn test_timeout_beyond_calendar_is_rejected() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let target = InvokeTarget {
            timeout_secs: 10_000_000_000_000,
            ..target()
        };

        let err = build_request(&target, Bytes::new(), now).unwrap_err();
        assert!(matches!(err, Error::InvalidTimeout { .. }), "{err}");
    }

    #[test]
    fn test_deadline_never_precedes_call() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        for timeout_secs in [0, 1, 900, i64::MAX as u64 / 1_000_000] {
            let target = InvokeTarget {
                timeout_secs,
                ..target()
            };
            if let Ok(deadline) = deadline(&target, now) {
                assert!(deadline >= now, "timeout {timeout_secs}");
            }
        }
    }

    #[tokio::test]
    async fn test_invalid_timeout_fails_before_dialing() {
        let target = InvokeTarget {
            timeout_secs: u64::MAX,
            ..target()
        };
        let err = invoke(&target, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTimeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_dial_failure_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = InvokeTarget { port, ..target() };
        let err = invoke(&target, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, crate::Error::Transport(_)));
    }
}
