// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messages exchanged with a handler process.
//!
//! Type and field names must match the Go definitions in
//! `aws-lambda-go/lambda/messages` and `net/rpc` exactly, since gob matches
//! struct fields by name.

use std::sync::OnceLock;

use bytes::Bytes;

use crate::gob::{GobError, GobMessage, GobType, Value};

/// Environment variable that tells a handler which port to listen on.
pub const PORT_ENV_VAR: &str = "_LAMBDA_SERVER_PORT";

/// RPC method used for readiness checks.
pub const PING_METHOD: &str = "Function.Ping";

/// RPC method used to run the handler.
pub const INVOKE_METHOD: &str = "Function.Invoke";

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

/// Build a struct value, naming each field.
fn record(fields: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    Value::Struct(
        fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    )
}

// ============================================================================
// net/rpc envelope
// ============================================================================

/// Header written before every call's arguments (`rpc.Request`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeader {
    pub service_method: String,
    pub seq: u64,
}

impl GobMessage for RequestHeader {
    fn gob_type() -> GobType {
        static TYPE: OnceLock<GobType> = OnceLock::new();
        TYPE.get_or_init(|| {
            GobType::structure(
                "Request",
                [("ServiceMethod", GobType::String), ("Seq", GobType::Uint)],
            )
        })
        .clone()
    }

    fn to_value(&self) -> Value {
        record([
            ("ServiceMethod", text(&self.service_method)),
            ("Seq", Value::Uint(self.seq)),
        ])
    }

    fn from_value(value: Value) -> Result<Self, GobError> {
        value.expect_struct("Request")?;
        Ok(Self {
            service_method: value.str_field("ServiceMethod")?,
            seq: value.uint_field("Seq")?,
        })
    }
}

/// Header written before every reply body (`rpc.Response`).
///
/// A non-empty `error` means the call failed at the RPC layer and the body
/// that follows carries no data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    pub service_method: String,
    pub seq: u64,
    pub error: String,
}

impl GobMessage for ResponseHeader {
    fn gob_type() -> GobType {
        static TYPE: OnceLock<GobType> = OnceLock::new();
        TYPE.get_or_init(|| {
            GobType::structure(
                "Response",
                [
                    ("ServiceMethod", GobType::String),
                    ("Seq", GobType::Uint),
                    ("Error", GobType::String),
                ],
            )
        })
        .clone()
    }

    fn to_value(&self) -> Value {
        record([
            ("ServiceMethod", text(&self.service_method)),
            ("Seq", Value::Uint(self.seq)),
            ("Error", text(&self.error)),
        ])
    }

    fn from_value(value: Value) -> Result<Self, GobError> {
        value.expect_struct("Response")?;
        Ok(Self {
            service_method: value.str_field("ServiceMethod")?,
            seq: value.uint_field("Seq")?,
            error: value.str_field("Error")?,
        })
    }
}

// ============================================================================
// Ping
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingRequest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingResponse;

impl GobMessage for PingRequest {
    fn gob_type() -> GobType {
        GobType::structure("PingRequest", Vec::new())
    }

    fn to_value(&self) -> Value {
        Value::Struct(Vec::new())
    }

    fn from_value(value: Value) -> Result<Self, GobError> {
        value.expect_struct("PingRequest")?;
        Ok(Self)
    }
}

impl GobMessage for PingResponse {
    fn gob_type() -> GobType {
        GobType::structure("PingResponse", Vec::new())
    }

    fn to_value(&self) -> Value {
        Value::Struct(Vec::new())
    }

    fn from_value(value: Value) -> Result<Self, GobError> {
        value.expect_struct("PingResponse")?;
        Ok(Self)
    }
}

// ============================================================================
// Invoke
// ============================================================================

/// Absolute deadline, as seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i64,
}

impl Timestamp {
    fn gob_type() -> GobType {
        static TYPE: OnceLock<GobType> = OnceLock::new();
        TYPE.get_or_init(|| {
            GobType::structure(
                "InvokeRequest_Timestamp",
                [("Seconds", GobType::Int), ("Nanos", GobType::Int)],
            )
        })
        .clone()
    }

    fn to_value(self) -> Value {
        record([
            ("Seconds", Value::Int(self.seconds)),
            ("Nanos", Value::Int(self.nanos)),
        ])
    }

    fn from_value(value: &Value) -> Result<Self, GobError> {
        Ok(Self {
            seconds: value.int_field("Seconds")?,
            nanos: value.int_field("Nanos")?,
        })
    }
}

/// Arguments of `Function.Invoke`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeRequest {
    pub payload: Bytes,
    pub request_id: String,
    pub x_amzn_trace_id: String,
    pub deadline: Timestamp,
    pub invoked_function_arn: String,
    pub cognito_identity_id: String,
    pub cognito_identity_pool_id: String,
    pub client_context: Bytes,
}

impl GobMessage for InvokeRequest {
    fn gob_type() -> GobType {
        static TYPE: OnceLock<GobType> = OnceLock::new();
        TYPE.get_or_init(|| {
            GobType::structure(
                "InvokeRequest",
                [
                    ("Payload", GobType::Bytes),
                    ("RequestId", GobType::String),
                    ("XAmznTraceId", GobType::String),
                    ("Deadline", Timestamp::gob_type()),
                    ("InvokedFunctionArn", GobType::String),
                    ("CognitoIdentityId", GobType::String),
                    ("CognitoIdentityPoolId", GobType::String),
                    ("ClientContext", GobType::Bytes),
                ],
            )
        })
        .clone()
    }

    fn to_value(&self) -> Value {
        record([
            ("Payload", Value::Bytes(self.payload.clone())),
            ("RequestId", text(&self.request_id)),
            ("XAmznTraceId", text(&self.x_amzn_trace_id)),
            ("Deadline", self.deadline.to_value()),
            ("InvokedFunctionArn", text(&self.invoked_function_arn)),
            ("CognitoIdentityId", text(&self.cognito_identity_id)),
            ("CognitoIdentityPoolId", text(&self.cognito_identity_pool_id)),
            ("ClientContext", Value::Bytes(self.client_context.clone())),
        ])
    }

    fn from_value(value: Value) -> Result<Self, GobError> {
        value.expect_struct("InvokeRequest")?;
        let deadline = match value.field("Deadline") {
            Some(deadline) => Timestamp::from_value(deadline)?,
            None => Timestamp::default(),
        };
        Ok(Self {
            payload: value.bytes_field("Payload")?,
            request_id: value.str_field("RequestId")?,
            x_amzn_trace_id: value.str_field("XAmznTraceId")?,
            deadline,
            invoked_function_arn: value.str_field("InvokedFunctionArn")?,
            cognito_identity_id: value.str_field("CognitoIdentityId")?,
            cognito_identity_pool_id: value.str_field("CognitoIdentityPoolId")?,
            client_context: value.bytes_field("ClientContext")?,
        })
    }
}

/// One frame of a handler-reported stack trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackFrame {
    pub path: String,
    pub line: i32,
    pub label: String,
}

impl StackFrame {
    fn gob_type() -> GobType {
        static TYPE: OnceLock<GobType> = OnceLock::new();
        TYPE.get_or_init(|| {
            GobType::structure(
                "InvokeResponse_Error_StackFrame",
                [
                    ("Path", GobType::String),
                    ("Line", GobType::Int),
                    ("Label", GobType::String),
                ],
            )
        })
        .clone()
    }

    fn to_value(&self) -> Value {
        record([
            ("Path", text(&self.path)),
            ("Line", Value::Int(self.line as i64)),
            ("Label", text(&self.label)),
        ])
    }

    fn from_value(value: &Value) -> Result<Self, GobError> {
        let line = i32::try_from(value.int_field("Line")?).map_err(|_| GobError::TypeMismatch {
            field: "Line".to_string(),
            expected: "int32",
        })?;
        Ok(Self {
            path: value.str_field("Path")?,
            line,
            label: value.str_field("Label")?,
        })
    }
}

/// Error reported by the handler for a failed invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeError {
    pub message: String,
    pub error_type: String,
    pub stack_trace: Vec<StackFrame>,
    pub should_exit: bool,
}

impl InvokeError {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
            ..Default::default()
        }
    }

    fn gob_type() -> GobType {
        static TYPE: OnceLock<GobType> = OnceLock::new();
        TYPE.get_or_init(|| {
            GobType::structure(
                "InvokeResponse_Error",
                [
                    ("Message", GobType::String),
                    ("Type", GobType::String),
                    (
                        "StackTrace",
                        GobType::slice(
                            "[]*messages.InvokeResponse_Error_StackFrame",
                            StackFrame::gob_type(),
                        ),
                    ),
                    ("ShouldExit", GobType::Bool),
                ],
            )
        })
        .clone()
    }

    fn to_value(&self) -> Value {
        record([
            ("Message", text(&self.message)),
            ("Type", text(&self.error_type)),
            (
                "StackTrace",
                Value::Seq(self.stack_trace.iter().map(StackFrame::to_value).collect()),
            ),
            ("ShouldExit", Value::Bool(self.should_exit)),
        ])
    }

    fn from_value(value: &Value) -> Result<Self, GobError> {
        let stack_trace = value
            .seq_field("StackTrace")?
            .iter()
            .map(StackFrame::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            message: value.str_field("Message")?,
            error_type: value.str_field("Type")?,
            stack_trace,
            should_exit: value.bool_field("ShouldExit")?,
        })
    }
}

/// Reply of `Function.Invoke`. A present `error` means the handler failed and
/// `payload` is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeResponse {
    pub payload: Bytes,
    pub error: Option<InvokeError>,
}

impl InvokeResponse {
    pub fn success(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            error: None,
        }
    }

    pub fn failure(error: InvokeError) -> Self {
        Self {
            payload: Bytes::new(),
            error: Some(error),
        }
    }
}

impl GobMessage for InvokeResponse {
    fn gob_type() -> GobType {
        static TYPE: OnceLock<GobType> = OnceLock::new();
        TYPE.get_or_init(|| {
            GobType::structure(
                "InvokeResponse",
                [
                    ("Payload", GobType::Bytes),
                    ("Error", InvokeError::gob_type()),
                ],
            )
        })
        .clone()
    }

    fn to_value(&self) -> Value {
        let mut fields = vec![("Payload".to_string(), Value::Bytes(self.payload.clone()))];
        // A nil pointer is simply left out.
        if let Some(error) = &self.error {
            fields.push(("Error".to_string(), error.to_value()));
        }
        Value::Struct(fields)
    }

    fn from_value(value: Value) -> Result<Self, GobError> {
        value.expect_struct("InvokeResponse")?;
        let error = value.field("Error").map(InvokeError::from_value).transpose()?;
        Ok(Self {
            payload: value.bytes_field("Payload")?,
            error,
        })
    }
}
