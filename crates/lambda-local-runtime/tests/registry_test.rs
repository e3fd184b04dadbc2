// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the function registry - preparing, invoking and stopping real
//! handler processes.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{TestFunctions, eventually, spawn_count};
use lambda_local_runtime::{Error, InstanceState};

// ============================================================================
// Prepare Tests
// ============================================================================

#[tokio::test]
async fn test_prepare_reaches_ready() {
    let functions = TestFunctions::new().function("hello", &[]);
    let registry = functions.registry(23100..23110);

    let instance = registry.prepare("hello").await.unwrap();

    assert_eq!(instance.state(), InstanceState::Ready);
    assert!((23100..23110).contains(&instance.port()));
    assert!(instance.pid().is_some());
    assert_eq!(registry.running(), vec!["hello".to_string()]);

    registry.stop_all().await;
}

#[tokio::test]
async fn test_prepare_is_idempotent() {
    let functions = TestFunctions::new();
    let log = functions.spawn_log("hello");
    let functions = functions.function(
        "hello",
        &[("ECHO_HANDLER_SPAWN_LOG", log.to_str().unwrap())],
    );
    let registry = functions.registry(23110..23120);

    let first = registry.prepare("hello").await.unwrap();
    let second = registry.prepare("hello").await.unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(spawn_count(&log), 1);

    registry.stop_all().await;
}

#[tokio::test]
async fn test_distinct_functions_get_distinct_ports() {
    let functions = TestFunctions::new()
        .function("a", &[])
        .function("b", &[])
        .function("c", &[]);
    let registry = functions.registry(23120..23130);

    let (a, b, c) = tokio::join!(
        registry.prepare("a"),
        registry.prepare("b"),
        registry.prepare("c")
    );
    let mut ports = vec![a.unwrap().port(), b.unwrap().port(), c.unwrap().port()];
    ports.sort();
    ports.dedup();
    assert_eq!(ports.len(), 3);

    registry.stop_all().await;
}

#[tokio::test]
async fn test_port_range_exhausted() {
    let functions = TestFunctions::new().function("a", &[]).function("b", &[]);
    let registry = functions.registry(23130..23131);

    registry.prepare("a").await.unwrap();
    let err = registry.prepare("b").await.unwrap_err();
    assert!(
        matches!(err, Error::NoPortAvailable { start: 23130, end: 23131 }),
        "{err}"
    );
    assert!(registry.instance("b").is_none());

    // Stopping the first function frees the port for the second.
    registry.stop("a").await.unwrap();
    registry.prepare("b").await.unwrap();

    registry.stop_all().await;
}

#[tokio::test]
async fn test_startup_failure_is_not_registered() {
    let functions = TestFunctions::new();
    let log = functions.spawn_log("broken");
    let functions = functions.function(
        "broken",
        &[
            ("ECHO_HANDLER_SPAWN_LOG", log.to_str().unwrap()),
            ("ECHO_HANDLER_EXIT_CODE", "2"),
        ],
    );
    let registry = functions.registry(23140..23150);

    let err = registry.prepare("broken").await.unwrap_err();
    assert!(matches!(err, Error::StartupFailure { ref name, .. } if name == "broken"), "{err}");
    assert!(registry.instance("broken").is_none());
    assert!(registry.running().is_empty());

    // Nothing is cached: the next attempt spawns again.
    let err = registry.invoke("broken", &b"{}"[..]).await.unwrap_err();
    assert!(matches!(err, Error::StartupFailure { .. }), "{err}");
    assert_eq!(spawn_count(&log), 2);
}

#[tokio::test]
async fn test_ready_timeout() {
    let functions = TestFunctions::new().function(
        "slow",
        &[("ECHO_HANDLER_STARTUP_DELAY_MS", "5000")],
    );
    let registry = functions.registry_with(23150..23160, |config| config.ready_timeout_ms = 300);

    let started = Instant::now();
    let err = registry.prepare("slow").await.unwrap_err();
    assert!(matches!(err, Error::StartupFailure { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(registry.instance("slow").is_none());
}

// ============================================================================
// Invoke Tests
// ============================================================================

#[tokio::test]
async fn test_invoke_echoes_payload() {
    let functions = TestFunctions::new().function("hello", &[]);
    let registry = functions.registry(23160..23170);

    let invocation = registry.invoke("hello", &br#"{"ok":true}"#[..]).await.unwrap();

    assert!(!invocation.handled_error);
    assert_eq!(&invocation.payload[..], br#"{"ok":true}"#);
    assert!(invocation.headers().is_empty());

    registry.stop_all().await;
}

#[tokio::test]
async fn test_concurrent_first_invokes_spawn_once() {
    let functions = TestFunctions::new();
    let log = functions.spawn_log("hello");
    let functions = functions.function(
        "hello",
        &[
            ("ECHO_HANDLER_SPAWN_LOG", log.to_str().unwrap()),
            ("ECHO_HANDLER_STARTUP_DELAY_MS", "200"),
        ],
    );
    let registry = Arc::new(functions.registry(23170..23180));

    let calls = (0..8).map(|i| {
        let registry = registry.clone();
        async move { registry.invoke("hello", format!("{{\"n\":{}}}", i)).await }
    });
    let results = futures::future::join_all(calls).await;

    for (i, result) in results.into_iter().enumerate() {
        let invocation = result.unwrap();
        assert_eq!(invocation.payload, format!("{{\"n\":{}}}", i).into_bytes());
    }
    assert_eq!(spawn_count(&log), 1);

    registry.stop_all().await;
}

#[tokio::test]
async fn test_invocations_are_serialized() {
    let functions = TestFunctions::new().function("slow", &[("ECHO_HANDLER_DELAY_MS", "300")]);
    let registry = Arc::new(functions.registry(23180..23190));
    registry.prepare("slow").await.unwrap();

    let started = Instant::now();
    let (a, b) = tokio::join!(
        registry.invoke("slow", &b"1"[..]),
        registry.invoke("slow", &b"2"[..])
    );
    a.unwrap();
    b.unwrap();

    assert!(
        started.elapsed() >= Duration::from_millis(600),
        "invocations overlapped: {:?}",
        started.elapsed()
    );

    registry.stop_all().await;
}

#[tokio::test]
async fn test_handler_error_is_translated() {
    let functions = TestFunctions::new().function("failing", &[("ECHO_HANDLER_MODE", "error")]);
    let registry = functions.registry(23190..23200);

    let invocation = registry.invoke("failing", &b"{}"[..]).await.unwrap();

    assert!(invocation.handled_error);
    let body: serde_json::Value = serde_json::from_slice(&invocation.payload).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"errorMessage": "boom", "errorType": "Error"})
    );
    assert_eq!(
        invocation.headers(),
        vec![
            ("X-Amz-Executed-Version", "$LATEST"),
            ("X-Amz-Function-Error", "Unhandled"),
        ]
    );

    // A handled error leaves the instance usable.
    assert_eq!(registry.state("failing"), Some(InstanceState::Ready));

    registry.stop_all().await;
}

#[tokio::test]
async fn test_handler_error_with_stack_trace() {
    let functions = TestFunctions::new().function(
        "failing",
        &[
            ("ECHO_HANDLER_MODE", "error"),
            ("ECHO_HANDLER_ERROR_MESSAGE", "bad input"),
            ("ECHO_HANDLER_ERROR_TYPE", "ValidationError"),
            ("ECHO_HANDLER_STACK", "1"),
        ],
    );
    let registry = functions.registry(23200..23210);

    let invocation = registry.invoke("failing", &b"{}"[..]).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&invocation.payload).unwrap();

    assert_eq!(body["errorMessage"], "bad input");
    assert_eq!(body["errorType"], "ValidationError");
    assert_eq!(body["stackTrace"][0]["path"], "echo_handler.rs");
    assert_eq!(body["stackTrace"][0]["line"], 1);
    assert_eq!(body["stackTrace"][0]["label"], "invoke");

    registry.stop_all().await;
}

#[tokio::test]
async fn test_invoke_context() {
    let functions = TestFunctions::new()
        .function("ctx", &[("ECHO_HANDLER_MODE", "context")])
        .with_timeout("ctx", 5);
    let registry = functions.registry(23210..23220);

    let invocation = registry.invoke("ctx", &b"{}"[..]).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&invocation.payload).unwrap();

    let deadline = body["deadlineSeconds"].as_i64().unwrap();
    let expected = chrono::Utc::now().timestamp() + 5;
    assert!(
        (deadline - expected).abs() <= 2,
        "deadline {} not near {}",
        deadline,
        expected
    );
    assert_eq!(body["functionArn"], "ctx");
    assert!(
        uuid::Uuid::parse_str(body["requestId"].as_str().unwrap()).is_ok(),
        "request id is not a uuid: {}",
        body["requestId"]
    );

    registry.stop_all().await;
}

#[tokio::test]
async fn test_oversized_timeout_is_rejected() {
    let functions = TestFunctions::new()
        .function("forever", &[])
        .with_timeout("forever", u64::MAX);
    let registry = functions.registry(23270..23280);

    let err = registry.invoke("forever", &b"{}"[..]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTimeout { .. }), "{err}");

    // The handler itself is fine and stays registered.
    assert_eq!(registry.state("forever"), Some(InstanceState::Ready));

    registry.stop_all().await;
}

#[tokio::test]
async fn test_handler_environment_and_working_dir() {
    let functions = TestFunctions::new()
        .function(
            "env",
            &[
                ("ECHO_HANDLER_MODE", "context"),
                (
                    "ECHO_HANDLER_ECHO_ENV",
                    "STAGE,REGION,_LAMBDA_SERVER_PORT",
                ),
                ("STAGE", "declared"),
                ("REGION", "declared"),
                ("_LAMBDA_SERVER_PORT", "1"),
            ],
        )
        .with_override("env", "STAGE", "override")
        .with_override("env", "_LAMBDA_SERVER_PORT", "2");
    let registry = functions.registry(23220..23230);

    let instance = registry.prepare("env").await.unwrap();
    let invocation = registry.invoke("env", &b"{}"[..]).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&invocation.payload).unwrap();

    assert_eq!(body["env"]["STAGE"], "override");
    assert_eq!(body["env"]["REGION"], "declared");
    assert_eq!(
        body["env"]["_LAMBDA_SERVER_PORT"],
        instance.port().to_string()
    );

    let cwd = std::path::PathBuf::from(body["cwd"].as_str().unwrap());
    assert_eq!(
        cwd.canonicalize().unwrap(),
        functions.dir.join("env").canonicalize().unwrap()
    );

    registry.stop_all().await;
}

#[tokio::test]
async fn test_unknown_function() {
    let functions = TestFunctions::new().function("hello", &[]);
    let registry = functions.registry(23230..23240);

    let err = registry.invoke("nope", &b"{}"[..]).await.unwrap_err();
    assert!(matches!(err, Error::FunctionNotFound(ref name) if name == "nope"));
    assert!(registry.running().is_empty());
}

// ============================================================================
// Stop Tests
// ============================================================================

#[tokio::test]
async fn test_stop_terminates_and_releases() {
    let functions = TestFunctions::new().function("hello", &[]);
    let registry = functions.registry(23240..23241);

    let instance = registry.prepare("hello").await.unwrap();
    registry.stop("hello").await.unwrap();

    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(instance.pid().is_none());
    assert!(registry.instance("hello").is_none());

    let err = registry.stop("hello").await.unwrap_err();
    assert!(matches!(err, Error::ProcessNotFound(_)), "{err}");

    // The single port is free again, and the function starts fresh.
    let restarted = registry.prepare("hello").await.unwrap();
    assert_ne!(restarted.id(), instance.id());
    assert_eq!(restarted.port(), 23240);

    registry.stop_all().await;
}

#[tokio::test]
async fn test_stop_while_preparing() {
    let functions = TestFunctions::new();
    let log = functions.spawn_log("slow");
    let functions = functions
        .function(
            "slow",
            &[
                ("ECHO_HANDLER_SPAWN_LOG", log.to_str().unwrap()),
                ("ECHO_HANDLER_STARTUP_DELAY_MS", "3000"),
            ],
        )
        .function("fast", &[]);
    let registry = Arc::new(functions.registry(23260..23261));

    let preparing = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.prepare("slow").await })
    };
    assert!(eventually(Duration::from_secs(5), || spawn_count(&log) == 1).await);
    let instance = registry.instance("slow").unwrap();
    let pid: i32 = std::fs::read_to_string(&log).unwrap().trim().parse().unwrap();

    registry.stop("slow").await.unwrap();

    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(registry.instance("slow").is_none());
    // The spawned handler is gone by the time stop returns.
    assert!(nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err());

    let err = preparing.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Stopped(ref name) if name == "slow"), "{err}");

    // The only port was released after the handler died.
    let fast = registry.prepare("fast").await.unwrap();
    assert_eq!(fast.port(), 23260);

    registry.stop_all().await;
}

#[tokio::test]
async fn test_stop_all() {
    let functions = TestFunctions::new()
        .function("a", &[])
        .function("b", &[])
        .function("c", &[]);
    let registry = functions.registry(23250..23260);

    let a = registry.prepare("a").await.unwrap();
    let b = registry.prepare("b").await.unwrap();
    let c = registry.prepare("c").await.unwrap();

    registry.stop_all().await;

    assert!(registry.running().is_empty());
    for instance in [a, b, c] {
        assert_eq!(instance.state(), InstanceState::Stopped);
    }

    // Nothing left to stop.
    registry.stop_all().await;
}
