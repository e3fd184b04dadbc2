// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function descriptors.
//!
//! A descriptor is the static definition of one function, supplied once at
//! startup. Code for function `name` is expected to be unpacked into
//! `<functions_dir>/<name>` before it is prepared.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-function environment overrides, keyed by function name.
pub type EnvOverrides = HashMap<String, HashMap<String, String>>;

/// Static definition of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDescriptor {
    /// Unique function name
    pub name: String,

    /// Function ARN passed to the handler (defaults to the name)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arn: String,

    /// Handler executable, relative to the function's code directory
    pub handler: String,

    /// Declared timeout in seconds (0 means the configured default)
    #[serde(default)]
    pub timeout: u64,

    /// Declared environment variables
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    /// Where the packaged code came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_uri: Option<String>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: handler.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn arn(&self) -> &str {
        if self.arn.is_empty() {
            &self.name
        } else {
            &self.arn
        }
    }

    pub fn timeout_secs(&self, default_secs: u64) -> u64 {
        if self.timeout == 0 {
            default_secs
        } else {
            self.timeout
        }
    }

    /// Code directory, also the handler's working directory.
    pub fn code_dir(&self, functions_dir: &Path) -> PathBuf {
        functions_dir.join(&self.name)
    }

    /// Absolute handler paths are used as-is.
    pub fn handler_path(&self, functions_dir: &Path) -> PathBuf {
        let handler = Path::new(&self.handler);
        if handler.is_absolute() {
            handler.to_path_buf()
        } else {
            self.code_dir(functions_dir).join(handler)
        }
    }
}

/// Descriptor file read by the `lambda-local` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub functions: Vec<FunctionDescriptor>,

    #[serde(default)]
    pub overrides: EnvOverrides,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{
            "name": "hello",
            "handler": "bin/hello",
            "timeout": 10,
            "environment": {"STAGE": "dev"},
            "codeUri": "s3://bucket/hello.zip"
        }"#;
        let descriptor: FunctionDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.name, "hello");
        assert_eq!(descriptor.timeout_secs(3), 10);
        assert_eq!(descriptor.environment.get("STAGE").map(String::as_str), Some("dev"));
        assert_eq!(descriptor.code_uri.as_deref(), Some("s3://bucket/hello.zip"));
    }

    #[test]
    fn test_arn_defaults_to_name() {
        let descriptor = FunctionDescriptor::new("hello", "hello");
        assert_eq!(descriptor.arn(), "hello");

        let descriptor = FunctionDescriptor {
            arn: "arn:aws:lambda:local:000000000000:function:hello".to_string(),
            ..descriptor
        };
        assert_eq!(
            descriptor.arn(),
            "arn:aws:lambda:local:000000000000:function:hello"
        );
    }

    #[test]
    fn test_zero_timeout_uses_default() {
        let descriptor = FunctionDescriptor::new("hello", "hello");
        assert_eq!(descriptor.timeout_secs(3), 3);
        assert_eq!(descriptor.with_timeout(7).timeout_secs(3), 7);
    }

    #[test]
    fn test_handler_path_resolution() {
        let dir = Path::new("/var/lambdas");
        let relative = FunctionDescriptor::new("hello", "bin/main");
        assert_eq!(relative.code_dir(dir), PathBuf::from("/var/lambdas/hello"));
        assert_eq!(
            relative.handler_path(dir),
            PathBuf::from("/var/lambdas/hello/bin/main")
        );

        let absolute = FunctionDescriptor::new("hello", "/opt/handlers/main");
        assert_eq!(
            absolute.handler_path(dir),
            PathBuf::from("/opt/handlers/main")
        );
    }

    #[test]
    fn test_manifest_overrides_optional() {
        let manifest: Manifest =
            serde_json::from_str(r#"{"functions": [{"name": "a", "handler": "a"}]}"#).unwrap();
        assert_eq!(manifest.functions.len(), 1);
        assert!(manifest.overrides.is_empty());
    }
}
