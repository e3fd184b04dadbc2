// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for lambda-local-runtime integration tests.
//!
//! Provides TestFunctions, which lays out a functions directory and builds a
//! registry whose functions all run the `lambda-local-echo` handler.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lambda_local_runtime::{Config, EnvOverrides, FunctionDescriptor, FunctionRegistry};

/// Absolute path of the reference handler built with this package.
pub const ECHO_HANDLER: &str = env!("CARGO_BIN_EXE_lambda-local-echo");

/// Functions directory plus the descriptors living in it.
pub struct TestFunctions {
    pub dir: PathBuf,
    descriptors: Vec<FunctionDescriptor>,
    overrides: EnvOverrides,
    _temp_dir: tempfile::TempDir,
}

impl TestFunctions {
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        Self {
            dir: temp_dir.path().to_path_buf(),
            descriptors: Vec::new(),
            overrides: EnvOverrides::new(),
            _temp_dir: temp_dir,
        }
    }

    /// Add an echo function configured through `ECHO_HANDLER_*` variables.
    pub fn function(mut self, name: &str, env: &[(&str, &str)]) -> Self {
        std::fs::create_dir_all(self.dir.join(name)).expect("Failed to create code dir");
        let descriptor = env
            .iter()
            .fold(FunctionDescriptor::new(name, ECHO_HANDLER), |d, (k, v)| {
                d.with_env(*k, *v)
            });
        self.descriptors.push(descriptor);
        self
    }

    pub fn with_timeout(mut self, name: &str, timeout: u64) -> Self {
        if let Some(descriptor) = self.descriptors.iter_mut().find(|d| d.name == name) {
            descriptor.timeout = timeout;
        }
        self
    }

    pub fn with_override(mut self, name: &str, key: &str, value: &str) -> Self {
        self.overrides
            .entry(name.to_string())
            .or_insert_with(HashMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Path of a spawn log inside the functions directory.
    pub fn spawn_log(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.spawns", name))
    }

    pub fn registry(&self, ports: Range<u16>) -> FunctionRegistry {
        self.registry_with(ports, |_| {})
    }

    pub fn registry_with(
        &self,
        ports: Range<u16>,
        configure: impl FnOnce(&mut Config),
    ) -> FunctionRegistry {
        let mut config = Config {
            functions_dir: self.dir.clone(),
            port_range: ports,
            ready_timeout_ms: 5_000,
            stop_grace_ms: 1_000,
            ..Default::default()
        };
        configure(&mut config);
        FunctionRegistry::new(config, self.descriptors.clone(), self.overrides.clone())
    }
}

/// Number of processes that recorded themselves in a spawn log.
pub fn spawn_count(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|log| log.lines().filter(|line| !line.is_empty()).count())
        .unwrap_or(0)
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
