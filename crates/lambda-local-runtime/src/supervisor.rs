// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handler process supervision.
//!
//! Spawns a handler executable, relays its stdout/stderr to our own streams
//! and watches for its exit. The exit watcher task owns the
//! [`tokio::process::Child`] for the whole life of the process; everything
//! else talks to it through channels:
//!
//! - stop requests arrive over a oneshot carrying the grace period
//! - the exit is published on a watch channel (probing and invocation race
//!   against it)
//! - exits nobody asked for are also reported over the registry's mpsc
//!   channel so the dead instance can be reaped

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::OutputTarget;
use crate::error::{Error, Result};
use lambda_local_protocol::PORT_ENV_VAR;

const RELAY_DRAIN: Duration = Duration::from_millis(200);

/// Largest chunk of handler output forwarded in one write.
const RELAY_CHUNK: usize = 1024;

/// Everything needed to launch one handler process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub name: String,
    pub instance_id: Uuid,
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    /// Where the handler's stdout is copied to
    pub stdout: OutputTarget,
}

/// A handler process has exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub name: String,
    pub instance_id: Uuid,
    pub pid: u32,
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
    /// Human readable exit status
    pub status: String,
    /// Whether the exit was requested through [`ProcessHandle::stop`]
    pub requested: bool,
}

/// Compose a handler environment.
///
/// Precedence, lowest first: declared variables, the supervisor's own
/// environment, per-function overrides, the injected port.
pub fn compose_env(
    declared: &HashMap<String, String>,
    process_env: impl IntoIterator<Item = (String, String)>,
    overrides: Option<&HashMap<String, String>>,
    port: u16,
) -> HashMap<String, String> {
    let mut env = declared.clone();
    env.extend(process_env);
    if let Some(overrides) = overrides {
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    env.insert(PORT_ENV_VAR.to_string(), port.to_string());
    env
}

/// Handle to a running (or exited) handler process.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: u32,
    stop_tx: Option<oneshot::Sender<Duration>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Launch a handler process.
///
/// The child is spawned with a cleared environment (exactly `spec.env`),
/// `spec.working_dir` as its working directory and kill-on-drop set.
/// Dropping the returned handle kills the process.
#[instrument(skip(spec, exits), fields(function = %spec.name, instance_id = %spec.instance_id))]
pub fn spawn(spec: SpawnSpec, exits: mpsc::UnboundedSender<ProcessExit>) -> Result<ProcessHandle> {
    debug!(
        executable = %spec.executable.display(),
        working_dir = %spec.working_dir.display(),
        "Launching handler"
    );

    let mut child = Command::new(&spec.executable)
        .current_dir(&spec.working_dir)
        .env_clear()
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            Error::startup(
                &spec.name,
                format!("failed to spawn {}: {}", spec.executable.display(), e),
            )
        })?;

    let pid = child
        .id()
        .ok_or_else(|| Error::startup(&spec.name, "process exited before it was tracked"))?;

    let mut tasks = Vec::with_capacity(3);
    if let Some(stdout) = child.stdout.take() {
        tasks.push(match spec.stdout {
            OutputTarget::Stdout => tokio::spawn(relay(stdout, tokio::io::stdout())),
            OutputTarget::Stderr => tokio::spawn(relay(stdout, tokio::io::stderr())),
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tasks.push(tokio::spawn(relay(stderr, tokio::io::stderr())));
    }

    let (stop_tx, stop_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = watch::channel(None);
    tasks.push(tokio::spawn(watch_exit(
        child,
        spec.name.clone(),
        spec.instance_id,
        pid,
        stop_rx,
        exit_tx,
        exits,
    )));

    info!(pid, "Handler process started");

    Ok(ProcessHandle {
        name: spec.name,
        pid,
        stop_tx: Some(stop_tx),
        exit_rx,
        tasks,
    })
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Receiver that observes the process exit.
    pub fn exit_receiver(&self) -> watch::Receiver<Option<ProcessExit>> {
        self.exit_rx.clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait for the process to exit.
    pub async fn wait(&self) -> Option<ProcessExit> {
        wait_exit(&mut self.exit_rx.clone()).await
    }

    /// Terminate the process: SIGTERM, then SIGKILL once `grace` has passed.
    ///
    /// Fails with [`Error::ProcessNotFound`] if the process had already exited.
    pub async fn stop(&mut self, grace: Duration) -> Result<ProcessExit> {
        if self.has_exited() {
            return Err(Error::ProcessNotFound(self.name.clone()));
        }
        if let Some(stop_tx) = self.stop_tx.take() {
            // The watcher may have just seen a natural exit; waiting covers both.
            let _ = stop_tx.send(grace);
        }
        let exit = self
            .wait()
            .await
            .ok_or_else(|| Error::ProcessNotFound(self.name.clone()))?;

        // Let the relays flush what the process wrote last. Descendants may
        // keep the pipes open, so this is bounded.
        for task in self.tasks.drain(..) {
            let _ = tokio::time::timeout(RELAY_DRAIN, task).await;
        }
        Ok(exit)
    }
}

/// Wait until a process exit is published. `None` if the watcher is gone.
pub async fn wait_exit(exit_rx: &mut watch::Receiver<Option<ProcessExit>>) -> Option<ProcessExit> {
    exit_rx
        .wait_for(|exit| exit.is_some())
        .await
        .ok()
        .and_then(|exit| exit.clone())
}

/// Copy a child stream to ours as output arrives, partial lines included.
async fn relay<R, W>(mut source: R, mut sink: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_CHUNK];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if sink.write_all(&buf[..n]).await.is_err() || sink.flush().await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output relay stopped");
                break;
            }
        }
    }
}

async fn watch_exit(
    mut child: Child,
    name: String,
    instance_id: Uuid,
    pid: u32,
    mut stop_rx: oneshot::Receiver<Duration>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    exits: mpsc::UnboundedSender<ProcessExit>,
) {
    let (status, requested) = tokio::select! {
        status = child.wait() => (status, false),
        grace = &mut stop_rx => {
            // A dropped handle means nobody will stop us politely.
            let grace = grace.unwrap_or(Duration::ZERO);
            (terminate(&mut child, pid, grace).await, true)
        }
    };

    let (code, status) = describe(&status);
    let exit = ProcessExit {
        name,
        instance_id,
        pid,
        code,
        status,
        requested,
    };

    // Publish on the watch channel first: whoever handles the report must
    // already see the process as exited.
    exit_tx.send_replace(Some(exit.clone()));
    if requested {
        info!(function = %exit.name, pid, status = %exit.status, "Handler process stopped");
    } else {
        warn!(function = %exit.name, pid, status = %exit.status, "Handler process exited");
        let _ = exits.send(exit);
    }
}

async fn terminate(child: &mut Child, pid: u32, grace: Duration) -> std::io::Result<ExitStatus> {
    if !grace.is_zero() {
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => return status,
                Err(_) => warn!(pid, grace_ms = grace.as_millis() as u64, "Handler ignored SIGTERM, killing"),
            },
            Err(e) => warn!(pid, error = %e, "Failed to send SIGTERM, killing"),
        }
    }
    child.kill().await?;
    child.wait().await
}

fn describe(status: &std::io::Result<ExitStatus>) -> (Option<i32>, String) {
    match status {
        Ok(status) => (status.code(), status.to_string()),
        Err(e) => (None, format!("wait failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_compose_env_precedence() {
        let declared = map(&[("A", "declared"), ("B", "declared"), ("C", "declared")]);
        let process = map(&[("B", "process"), ("C", "process")]);
        let overrides = map(&[("C", "override")]);

        let env = compose_env(&declared, process, Some(&overrides), 2001);

        assert_eq!(env["A"], "declared");
        assert_eq!(env["B"], "process");
        assert_eq!(env["C"], "override");
        assert_eq!(env[PORT_ENV_VAR], "2001");
    }

    #[test]
    fn test_port_cannot_be_overridden() {
        let declared = map(&[(PORT_ENV_VAR, "1")]);
        let overrides = map(&[(PORT_ENV_VAR, "2")]);
        let env = compose_env(&declared, map(&[(PORT_ENV_VAR, "3")]), Some(&overrides), 2500);
        assert_eq!(env[PORT_ENV_VAR], "2500");
    }

    fn spec(executable: &str, args_env: &[(&str, &str)]) -> SpawnSpec {
        SpawnSpec {
            name: "sh".to_string(),
            instance_id: Uuid::new_v4(),
            executable: PathBuf::from(executable),
            working_dir: std::env::temp_dir(),
            env: map(args_env),
            stdout: OutputTarget::Stdout,
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = spawn(spec("/nonexistent/handler", &[]), tx).unwrap_err();
        assert!(matches!(err, Error::StartupFailure { .. }));
    }

    #[tokio::test]
    async fn test_unexpected_exit_is_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // /bin/true exits immediately with status 0
        let handle = spawn(spec("/bin/true", &[]), tx).unwrap();

        let exit = rx.recv().await.unwrap();
        assert_eq!(exit.pid, handle.pid());
        assert_eq!(exit.code, Some(0));
        assert!(!exit.requested);
        assert!(handle.wait().await.is_some());
        assert!(handle.has_exited());
    }

    #[tokio::test]
    async fn test_stop_after_exit_is_process_not_found() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = spawn(spec("/bin/true", &[]), tx).unwrap();
        handle.wait().await.unwrap();

        let err = handle.stop(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, Error::ProcessNotFound(ref name) if name == "sh"));
    }

    // ========== Relay Tests ==========

    #[tokio::test]
    async fn test_relay_forwards_partial_lines() {
        let (mut child_out, source) = tokio::io::duplex(64);
        let (sink, mut relayed) = tokio::io::duplex(64);
        let task = tokio::spawn(relay(source, sink));

        child_out.write_all(b"progress 50%").await.unwrap();

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_millis(500), relayed.read(&mut buf))
            .await
            .expect("output without a newline was held back")
            .unwrap();
        assert_eq!(&buf[..n], b"progress 50%");

        drop(child_out);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_streams_long_lines() {
        let (mut child_out, source) = tokio::io::duplex(256);
        let (sink, mut relayed) = tokio::io::duplex(256);
        let task = tokio::spawn(relay(source, sink));

        let line = vec![b'x'; 16 * RELAY_CHUNK];
        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            relayed.read_to_end(&mut out).await.unwrap();
            out
        });
        // Completes only if the relay keeps draining a line with no newline.
        tokio::time::timeout(Duration::from_secs(5), child_out.write_all(&line))
            .await
            .expect("relay stopped draining")
            .unwrap();
        drop(child_out);

        task.await.unwrap();
        assert_eq!(reader.await.unwrap(), line);
    }

    #[tokio::test]
    async fn test_stdout_can_be_redirected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut spec = spec("/bin/echo", &[]);
        spec.stdout = OutputTarget::Stderr;

        let handle = spawn(spec, tx).unwrap();
        let exit = handle.wait().await.unwrap();
        assert_eq!(exit.code, Some(0));
    }
}
