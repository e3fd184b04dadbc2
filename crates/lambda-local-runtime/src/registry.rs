// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function Registry
//!
//! Owns at most one [`FunctionInstance`] per function name and drives it
//! through its lifecycle:
//!
//! - `prepare` allocates a port, spawns the handler and probes it. The first
//!   caller for a name starts this sequence on its own task; every other
//!   caller waits on the instance's state.
//! - `invoke` prepares lazily, then runs one serialized RPC.
//! - `stop` / `stop_all` terminate handlers and drop their entries.
//! - A reaper task receives unexpected process exits and drops the dead
//!   instance. Its name is remembered as crashed: invocations fail with
//!   [`Error::ProcessCrashed`] until the function is prepared again.
//!
//! The instance map and the port pool share one lock, so a port is held
//! exactly while some entry owns it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::descriptor::{EnvOverrides, FunctionDescriptor};
use crate::envelope::Invocation;
use crate::error::{Error, Result};
use crate::instance::{FunctionInstance, InstanceState};
use crate::ports::PortAllocator;
use crate::probe::{self, ProbeConfig};
use crate::supervisor::{self, ProcessExit, SpawnSpec};

/// Registry of function instances.
///
/// Must be created inside a Tokio runtime (it spawns its reaper task).
/// Dropping the registry kills every handler it started.
pub struct FunctionRegistry {
    inner: Arc<Inner>,
    reaper: JoinHandle<()>,
}

struct Inner {
    config: Config,
    descriptors: HashMap<String, FunctionDescriptor>,
    overrides: EnvOverrides,
    state: Mutex<RegistryState>,
    exits: mpsc::UnboundedSender<ProcessExit>,
}

struct RegistryState {
    instances: HashMap<String, Arc<FunctionInstance>>,
    ports: PortAllocator,
    crashed: HashSet<String>,
}

impl FunctionRegistry {
    pub fn new(
        config: Config,
        descriptors: impl IntoIterator<Item = FunctionDescriptor>,
        overrides: EnvOverrides,
    ) -> Self {
        let descriptors: HashMap<String, FunctionDescriptor> = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.name.clone(), descriptor))
            .collect();
        let (exits, exit_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            state: Mutex::new(RegistryState {
                instances: HashMap::new(),
                ports: PortAllocator::new(config.port_range.clone()),
                crashed: HashSet::new(),
            }),
            config,
            descriptors,
            overrides,
            exits,
        });
        let reaper = tokio::spawn(reap(Arc::downgrade(&inner), exit_rx));

        info!(
            functions = inner.descriptors.len(),
            functions_dir = %inner.config.functions_dir.display(),
            "Function registry created"
        );

        Self { inner, reaper }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn descriptor(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.inner.descriptors.get(name)
    }

    /// Current instance for `name`, if any.
    pub fn instance(&self, name: &str) -> Option<Arc<FunctionInstance>> {
        self.inner.lock().instances.get(name).cloned()
    }

    pub fn state(&self, name: &str) -> Option<InstanceState> {
        self.instance(name).map(|instance| instance.state())
    }

    /// Names with a current instance, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().instances.keys().cloned().collect();
        names.sort();
        names
    }

    /// Prepare `name` and wait until it is ready.
    ///
    /// Idempotent: if an instance exists or is starting, it is reused. An
    /// explicit prepare also clears a previous crash of the function.
    #[instrument(skip(self))]
    pub async fn prepare(&self, name: &str) -> Result<Arc<FunctionInstance>> {
        let instance = self.inner.get_or_start(name, true)?;
        instance.wait_ready().await?;
        Ok(instance)
    }

    /// Invoke `name` with `payload`, preparing it on first use.
    #[instrument(skip(self, payload))]
    pub async fn invoke(&self, name: &str, payload: impl Into<Bytes>) -> Result<Invocation> {
        let payload = payload.into();
        debug!(payload_size = payload.len(), "Invocation requested");

        let instance = self.inner.get_or_start(name, false)?;
        instance.wait_ready().await?;

        let result = instance.invoke(payload).await;
        if let Err(Error::ProcessCrashed(_)) = &result {
            self.inner.mark_crashed(&instance);
        }
        result
    }

    /// Stop `name`: terminate its handler and drop its entry.
    ///
    /// Fails with [`Error::ProcessNotFound`] when there is nothing to stop.
    #[instrument(skip(self))]
    pub async fn stop(&self, name: &str) -> Result<()> {
        if !self.inner.descriptors.contains_key(name) {
            return Err(Error::FunctionNotFound(name.to_string()));
        }
        let instance = self
            .inner
            .lock()
            .instances
            .remove(name)
            .ok_or_else(|| Error::ProcessNotFound(name.to_string()))?;
        self.inner.shutdown(instance).await
    }

    /// Stop every instance. Failures are logged, not returned.
    pub async fn stop_all(&self) {
        let instances: Vec<Arc<FunctionInstance>> = {
            let mut state = self.inner.lock();
            state.instances.drain().map(|(_, instance)| instance).collect()
        };
        info!(count = instances.len(), "Stopping all functions");

        for instance in instances {
            let name = instance.name().to_string();
            if let Err(e) = self.inner.shutdown(instance).await {
                warn!(function = %name, error = %e, "Failed to stop function");
            }
        }
    }
}

impl Drop for FunctionRegistry {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Every critical section leaves the state consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the instance for `name`, creating it (and starting its
    /// handler on a separate task) if there is none.
    fn get_or_start(self: &Arc<Self>, name: &str, clear_crash: bool) -> Result<Arc<FunctionInstance>> {
        let descriptor = self
            .descriptors
            .get(name)
            .ok_or_else(|| Error::FunctionNotFound(name.to_string()))?;

        let instance = {
            let mut state = self.lock();
            if clear_crash {
                state.crashed.remove(name);
            } else if state.crashed.contains(name) {
                return Err(Error::ProcessCrashed(name.to_string()));
            }

            if let Some(existing) = state.instances.get(name) {
                return Ok(existing.clone());
            }

            let port = state.ports.allocate()?;
            let instance = Arc::new(FunctionInstance::new(
                name,
                descriptor.arn(),
                port,
                descriptor.timeout_secs(self.config.default_timeout_secs),
                self.config.connect_timeout_ms,
            ));
            state.instances.insert(name.to_string(), instance.clone());
            instance
        };

        info!(
            function = %name,
            instance_id = %instance.id(),
            port = instance.port(),
            "Preparing function"
        );

        let inner = self.clone();
        let starting = instance.clone();
        tokio::spawn(async move { inner.start(starting).await });

        Ok(instance)
    }

    /// Spawn-and-probe sequence, run once per instance.
    async fn start(self: Arc<Self>, instance: Arc<FunctionInstance>) {
        self.run_start(&instance).await;
        instance.mark_settled();
    }

    async fn run_start(&self, instance: &Arc<FunctionInstance>) {
        let result = self.launch(instance).await;

        let failure = match result {
            Ok(()) => {
                let state = self.lock();
                if instance.has_exited() {
                    Some("process exited during startup".to_string())
                } else if instance.transition(InstanceState::Ready) {
                    // Published under the registry lock, so the reaper sees
                    // either a starting instance or a ready one.
                    drop(state);
                    None
                } else {
                    Some("stopped during startup".to_string())
                }
            }
            Err(e) => Some(match e {
                Error::StartupFailure { reason, .. } => reason,
                other => other.to_string(),
            }),
        };

        let Some(reason) = failure else {
            info!(
                function = %instance.name(),
                port = instance.port(),
                pid = instance.pid(),
                "Function ready"
            );
            return;
        };

        if instance.state() == InstanceState::Stopped {
            debug!(function = %instance.name(), "Startup abandoned after stop");
        } else {
            warn!(function = %instance.name(), reason = %reason, "Function failed to start");
        }
        if let Some(mut handle) = instance.take_process() {
            let _ = handle.stop(std::time::Duration::ZERO).await;
        }

        let mut state = self.lock();
        Self::remove_entry(&mut state, instance);
        instance.transition(InstanceState::Failed(reason));
    }

    async fn launch(&self, instance: &FunctionInstance) -> Result<()> {
        let name = instance.name();
        let descriptor = self
            .descriptors
            .get(name)
            .ok_or_else(|| Error::FunctionNotFound(name.to_string()))?;

        instance.transition(InstanceState::Starting);
        let env = supervisor::compose_env(
            &descriptor.environment,
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
            self.overrides.get(name),
            instance.port(),
        );
        let spec = SpawnSpec {
            name: name.to_string(),
            instance_id: instance.id(),
            executable: descriptor.handler_path(&self.config.functions_dir),
            working_dir: descriptor.code_dir(&self.config.functions_dir),
            env,
            stdout: self.config.handler_stdout,
        };

        let handle = supervisor::spawn(spec, self.exits.clone())?;
        let mut exit_rx = handle.exit_receiver();
        if let Err(mut handle) = instance.attach_process(handle) {
            let _ = handle.stop(std::time::Duration::ZERO).await;
            return Err(Error::Stopped(name.to_string()));
        }

        instance.transition(InstanceState::WaitingReady);
        probe::wait_ready(
            name,
            instance.port(),
            &ProbeConfig::from(&self.config),
            &mut exit_rx,
        )
        .await
    }

    /// Terminate an instance that was already taken out of the map.
    ///
    /// An instance that is still starting counts as stopped once its start
    /// task has given up and killed whatever it spawned.
    async fn shutdown(&self, instance: Arc<FunctionInstance>) -> Result<()> {
        let starting = !instance.state().is_live() && !instance.state().is_terminal();
        instance.transition(InstanceState::Stopped);

        let result = match instance.take_process() {
            Some(mut handle) => match handle.stop(self.config.stop_grace()).await {
                Ok(exit) => {
                    info!(
                        function = %instance.name(),
                        pid = exit.pid,
                        status = %exit.status,
                        uptime_ms = instance.uptime().num_milliseconds(),
                        "Function stopped"
                    );
                    Ok(())
                }
                Err(_) if starting => Ok(()),
                Err(e) => Err(e),
            },
            None if starting => Ok(()),
            None => Err(Error::ProcessNotFound(instance.name().to_string())),
        };
        if starting {
            instance.wait_settled().await;
        }

        // The port is free only once the process no longer listens on it.
        self.lock().ports.release(instance.port());
        result
    }

    /// Drop a dead instance and remember the crash.
    fn mark_crashed(&self, instance: &FunctionInstance) {
        let mut state = self.lock();
        if Self::remove_entry(&mut state, instance) {
            state.crashed.insert(instance.name().to_string());
            warn!(
                function = %instance.name(),
                instance_id = %instance.id(),
                uptime_ms = instance.uptime().num_milliseconds(),
                "Function crashed, prepare it again to restart"
            );
        }
        instance.transition(InstanceState::Crashed);
    }

    /// Handle an exit reported by a process watcher.
    fn handle_exit(&self, exit: ProcessExit) {
        let instance = {
            let state = self.lock();
            match state.instances.get(&exit.name) {
                Some(instance) if instance.id() == exit.instance_id => instance.clone(),
                _ => {
                    debug!(function = %exit.name, instance_id = %exit.instance_id, "Exit of a stale instance");
                    return;
                }
            }
        };

        // Startup failures are handled by the start task.
        let current = instance.state();
        if current.is_live() || current == InstanceState::Crashed {
            self.mark_crashed(&instance);
        }
    }

    /// Remove `instance` from the map if it is the current entry for its
    /// name, releasing its port. Returns whether it was removed.
    fn remove_entry(state: &mut RegistryState, instance: &FunctionInstance) -> bool {
        let current = state
            .instances
            .get(instance.name())
            .is_some_and(|entry| entry.id() == instance.id());
        if current {
            state.instances.remove(instance.name());
            state.ports.release(instance.port());
        }
        current
    }
}

async fn reap(inner: Weak<Inner>, mut exits: mpsc::UnboundedReceiver<ProcessExit>) {
    while let Some(exit) = exits.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_exit(exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(range: std::ops::Range<u16>) -> FunctionRegistry {
        let config = Config {
            port_range: range,
            functions_dir: std::env::temp_dir(),
            ..Default::default()
        };
        FunctionRegistry::new(
            config,
            [FunctionDescriptor::new("missing-binary", "does-not-exist")],
            EnvOverrides::new(),
        )
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let registry = registry(21000..21010);
        let err = registry.invoke("nope", &b"{}"[..]).await.unwrap_err();
        assert!(matches!(err, Error::FunctionNotFound(ref name) if name == "nope"));
        assert!(matches!(
            registry.stop("nope").await,
            Err(Error::FunctionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_not_registered() {
        let registry = registry(21010..21020);
        let err = registry.prepare("missing-binary").await.unwrap_err();

        assert!(matches!(err, Error::StartupFailure { .. }), "{err}");
        assert!(registry.instance("missing-binary").is_none());
        assert_eq!(registry.inner.lock().ports.held_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_without_instance() {
        let registry = registry(21020..21030);
        let err = registry.stop("missing-binary").await.unwrap_err();
        assert!(matches!(err, Error::ProcessNotFound(_)));
    }

    #[tokio::test]
    async fn test_crash_tombstone_cleared_by_prepare() {
        let registry = registry(21030..21040);
        registry
            .inner
            .lock()
            .crashed
            .insert("missing-binary".to_string());

        let err = registry.invoke("missing-binary", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, Error::ProcessCrashed(_)));

        // Prepare clears the crash and tries again (and fails to spawn here).
        let err = registry.prepare("missing-binary").await.unwrap_err();
        assert!(matches!(err, Error::StartupFailure { .. }));
        assert!(!registry.inner.lock().crashed.contains("missing-binary"));
    }
}
