// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error translation.
//!
//! A handler failure travels back to the caller as the platform's JSON
//! error envelope, e.g.
//!
//! ```json
//! {"errorMessage": "boom", "errorType": "Error"}
//! ```
//!
//! Each member is present only when the handler supplied it.

use bytes::Bytes;
use lambda_local_protocol::{InvokeError, InvokeResponse, StackFrame};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Header carrying the executed function version.
pub const EXECUTED_VERSION_HEADER: &str = "X-Amz-Executed-Version";
/// Header flagging a handled function error.
pub const FUNCTION_ERROR_HEADER: &str = "X-Amz-Function-Error";

/// External error envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<StackTraceEntry>>,
}

/// One stack frame as it appears in the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTraceEntry {
    pub path: String,
    pub line: i32,
    pub label: String,
}

impl From<&StackFrame> for StackTraceEntry {
    fn from(frame: &StackFrame) -> Self {
        Self {
            path: frame.path.clone(),
            line: frame.line,
            label: frame.label.clone(),
        }
    }
}

impl From<&InvokeError> for ErrorEnvelope {
    fn from(error: &InvokeError) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            error_message: non_empty(&error.message),
            error_type: non_empty(&error.error_type),
            stack_trace: (!error.stack_trace.is_empty())
                .then(|| error.stack_trace.iter().map(StackTraceEntry::from).collect()),
        }
    }
}

/// Outcome of a completed invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Handler result, or the serialized [`ErrorEnvelope`] if it failed
    pub payload: Bytes,
    /// Whether `payload` is an error envelope
    pub handled_error: bool,
}

impl Invocation {
    /// Turn a handler response into an invocation outcome.
    pub fn from_response(response: InvokeResponse) -> Result<Self> {
        match response.error {
            Some(error) => {
                let envelope = ErrorEnvelope::from(&error);
                Ok(Self {
                    payload: Bytes::from(serde_json::to_vec(&envelope)?),
                    handled_error: true,
                })
            }
            None => Ok(Self {
                payload: response.payload,
                handled_error: false,
            }),
        }
    }

    /// Response headers an HTTP adapter should attach.
    pub fn headers(&self) -> Vec<(&'static str, &'static str)> {
        if self.handled_error {
            vec![
                (EXECUTED_VERSION_HEADER, "$LATEST"),
                (FUNCTION_ERROR_HEADER, "Unhandled"),
            ]
        } else {
            Vec::new()
        }
    }
}
