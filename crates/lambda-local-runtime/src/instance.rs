// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function instances.
//!
//! A [`FunctionInstance`] is the runtime state of one function: its port,
//! its handler process and its lifecycle state.
//!
//! ```text
//! Preparing ─► Starting ─► WaitingReady ─► Ready ◄─► Invoking
//!     │            │             │            │          │
//!     └────────────┴─────┬───────┴────────────┴──────────┘
//!                        ▼
//!          Stopped (explicit) / Crashed (exit) / Failed (startup)
//! ```
//!
//! The state lives in a watch channel so concurrent preparers can wait for
//! the one running the startup sequence.

use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::envelope::Invocation;
use crate::error::{Error, Result};
use crate::invoker::{self, InvokeTarget};
use crate::supervisor::{ProcessExit, ProcessHandle, wait_exit};

/// After a transport failure, how long to wait for the exit watcher to
/// confirm that the process is gone.
const CRASH_CONFIRM_WINDOW: Duration = Duration::from_millis(200);

/// Lifecycle state of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Preparing,
    Starting,
    WaitingReady,
    Ready,
    Invoking,
    Stopped,
    Crashed,
    /// Startup failed with the given reason
    Failed(String),
}

impl InstanceState {
    /// No further transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Stopped | InstanceState::Crashed | InstanceState::Failed(_)
        )
    }

    /// Ready or serving an invocation.
    pub fn is_live(&self) -> bool {
        matches!(self, InstanceState::Ready | InstanceState::Invoking)
    }
}

/// Runtime state of one function.
#[derive(Debug)]
pub struct FunctionInstance {
    id: Uuid,
    name: String,
    arn: String,
    port: u16,
    timeout_secs: u64,
    connect_timeout_ms: u64,
    created_at: DateTime<Utc>,
    state: watch::Sender<InstanceState>,
    /// Set once the start task has finished, successfully or not
    settled: watch::Sender<bool>,
    process: Mutex<Option<ProcessHandle>>,
    invoke_lock: tokio::sync::Mutex<()>,
}

impl FunctionInstance {
    pub(crate) fn new(
        name: &str,
        arn: &str,
        port: u16,
        timeout_secs: u64,
        connect_timeout_ms: u64,
    ) -> Self {
        let (state, _) = watch::channel(InstanceState::Preparing);
        let (settled, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            arn: arn.to_string(),
            port,
            timeout_secs,
            connect_timeout_ms,
            created_at: Utc::now(),
            state,
            settled,
            process: Mutex::new(None),
            invoke_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arn(&self) -> &str {
        &self.arn
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time since the instance was created.
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }

    pub fn state(&self) -> InstanceState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<InstanceState> {
        self.state.subscribe()
    }

    /// Process id of the handler, once spawned.
    pub fn pid(&self) -> Option<u32> {
        self.lock_process().as_ref().map(ProcessHandle::pid)
    }

    /// Whether the handler process has been spawned and has exited since.
    pub fn has_exited(&self) -> bool {
        self.lock_process()
            .as_ref()
            .is_some_and(ProcessHandle::has_exited)
    }

    fn lock_process(&self) -> std::sync::MutexGuard<'_, Option<ProcessHandle>> {
        // The guarded value stays consistent even if a holder panicked.
        self.process.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn exit_receiver(&self) -> Option<watch::Receiver<Option<ProcessExit>>> {
        self.lock_process().as_ref().map(ProcessHandle::exit_receiver)
    }

    /// Move to `next` unless the instance already reached a terminal state.
    pub(crate) fn transition(&self, next: InstanceState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            debug!(function = %self.name, from = ?state, to = ?next, "State transition");
            *state = next;
            true
        })
    }

    /// Hand the spawned process to the instance. If the instance was stopped
    /// in the meantime the handle is given back so the caller can kill it.
    pub(crate) fn attach_process(
        &self,
        handle: ProcessHandle,
    ) -> std::result::Result<(), ProcessHandle> {
        let mut process = self.lock_process();
        if self.state.borrow().is_terminal() {
            return Err(handle);
        }
        *process = Some(handle);
        Ok(())
    }

    pub(crate) fn take_process(&self) -> Option<ProcessHandle> {
        self.lock_process().take()
    }

    pub(crate) fn mark_settled(&self) {
        self.settled.send_replace(true);
    }

    /// Wait for the start task to finish.
    pub(crate) async fn wait_settled(&self) {
        let mut rx = self.settled.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|settled| *settled).await;
    }

    /// Wait until the instance is ready, or fail with the reason it never
    /// will be.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.subscribe();
        let state = match rx
            .wait_for(|state| state.is_live() || state.is_terminal())
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => return Err(Error::NotReady(self.name.clone())),
        };
        if state.is_live() {
            Ok(())
        } else {
            Err(self.state_error(&state))
        }
    }

    fn state_error(&self, state: &InstanceState) -> Error {
        match state {
            InstanceState::Crashed => Error::ProcessCrashed(self.name.clone()),
            InstanceState::Stopped => Error::Stopped(self.name.clone()),
            InstanceState::Failed(reason) => Error::startup(&self.name, reason.clone()),
            _ => Error::NotReady(self.name.clone()),
        }
    }

    /// Run one invocation. Invocations of one instance never overlap.
    pub async fn invoke(&self, payload: Bytes) -> Result<Invocation> {
        let _serial = self.invoke_lock.lock().await;

        let began = self.state.send_if_modified(|state| {
            if *state == InstanceState::Ready {
                *state = InstanceState::Invoking;
                true
            } else {
                false
            }
        });
        if !began {
            return Err(self.state_error(&self.state()));
        }
        let _invoking = InvokingGuard(self);

        let mut exit_rx = self
            .exit_receiver()
            .ok_or_else(|| Error::NotReady(self.name.clone()))?;
        if exit_rx.borrow().is_some() {
            return Err(self.crashed());
        }

        let target = InvokeTarget {
            name: self.name.clone(),
            arn: self.arn.clone(),
            port: self.port,
            timeout_secs: self.timeout_secs,
            connect_timeout_ms: self.connect_timeout_ms,
        };

        let result = tokio::select! {
            result = invoker::invoke(&target, payload) => result,
            exit = wait_exit(&mut exit_rx) => Err(self.exit_error(exit)),
        };

        let response = match result {
            Ok(response) => response,
            Err(Error::Transport(e)) => {
                // A dying handler usually shows up as a reset connection first.
                let exit = tokio::time::timeout(CRASH_CONFIRM_WINDOW, wait_exit(&mut exit_rx)).await;
                return match exit {
                    Ok(exit) => Err(self.exit_error(exit)),
                    Err(_) => Err(Error::Transport(e)),
                };
            }
            Err(e) => return Err(e),
        };

        if let Some(error) = &response.error
            && error.should_exit
        {
            warn!(function = %self.name, "Handler asked to be restarted after this invocation");
        }
        Invocation::from_response(response)
    }

    fn exit_error(&self, exit: Option<ProcessExit>) -> Error {
        match exit {
            Some(exit) if exit.requested => Error::Stopped(self.name.clone()),
            _ => self.crashed(),
        }
    }

    fn crashed(&self) -> Error {
        self.transition(InstanceState::Crashed);
        Error::ProcessCrashed(self.name.clone())
    }
}

/// Returns an instance from `Invoking` to `Ready`, also when the invoking
/// future is dropped.
struct InvokingGuard<'a>(&'a FunctionInstance);

impl Drop for InvokingGuard<'_> {
    fn drop(&mut self) {
        self.0.state.send_if_modified(|state| {
            if *state == InstanceState::Invoking {
                *state = InstanceState::Ready;
                true
            } else {
                false
            }
        });
    }
}
