//! # Instance Supervisor Module
//!
//! Owns the set of plugin-instance configurations and their runtime
//! state: child processes, RPC handles, and the routing-registry effects
//! of every state transition.
//!
//! ## State Machine
//!
//! ```text
//! stopped ──Start──▶ starting ──handshake-ok──▶ running
//!    ▲                  │                         │
//!    │                  └──handshake-fail──▶ failed
//!    │                                            │
//!    └────────────Stop / child-exit◀──────────────┘
//!                 (stopping → stopped)
//! ```
//!
//! ## Handshake
//!
//! After spawning the child, the supervisor dials `127.0.0.1:port` with
//! exponential backoff inside a total budget (ten seconds by default) and
//! issues `GetPluginInfo` with a two-second per-call timeout. The returned
//! `supported_biz_names` must contain the configured biz; the plugin type
//! and version are recorded for logging only. On success the instance is
//! promoted to `running`, the backend handle is published into the routing
//! registry, and `last_started_at` is stamped. Any failure path ends in
//! `failed` with no registry entry.
//!
//! ## Stop Ordering
//!
//! `Stop` removes the routing entry *before* any signal reaches the
//! child, so readers never observe a handle to a dying backend. The child
//! gets a graceful termination signal, then a force-kill after the grace
//! period (five seconds).
//!
//! ## Crash Handling
//!
//! A per-instance reaper watches the child; an unexpected exit transitions
//! the instance to `failed`, removes its routing entry, and logs. No
//! automatic restart is attempted; an operator must call `Start` again.
//!
//! ## Concurrency
//!
//! Per-instance operations serialize on a per-instance async mutex; list
//! operations take a snapshot. The routing registry is mutated exclusively
//! here.

use crate::gateway_error::GatewayError;
use crate::registry::BackendRegistry;
use crate::store::{PluginInstanceRow, SystemStore};
use chrono::Utc;
use dashmap::DashMap;
use dsgate_backend_sdk::{DataBackend, RpcBackend};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Runtime status of an instance. Never persisted; every instance loads
/// as `stopped` after a gateway restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Running,
    Failed,
    Stopping,
}

/// Handshake tuning; overridable for tests.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeConfig {
    /// Total dial budget across retries
    pub total_budget: Duration,
    /// Per-call timeout for `GetPluginInfo`
    pub call_timeout: Duration,
    /// Initial retry backoff, doubled per attempt
    pub initial_backoff: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            total_budget: Duration::from_secs(10),
            call_timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Snapshot of one instance, as returned by `list_instances`.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub display_name: String,
    pub plugin_id: String,
    pub version: String,
    pub biz_name: String,
    pub port: u16,
    pub enabled: bool,
    pub status: InstanceStatus,
    pub created_at: chrono::DateTime<Utc>,
    pub last_started_at: Option<chrono::DateTime<Utc>>,
}

struct InstanceRuntime {
    row: PluginInstanceRow,
    status: InstanceStatus,
    child: Option<Child>,
    /// Bumped on every start/stop so stale reapers notice and exit.
    epoch: u64,
}

impl InstanceRuntime {
    fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            instance_id: self.row.instance_id.clone(),
            display_name: self.row.display_name.clone(),
            plugin_id: self.row.plugin_id.clone(),
            version: self.row.version.clone(),
            biz_name: self.row.biz_name.clone(),
            port: self.row.port,
            enabled: self.row.enabled,
            status: self.status,
            created_at: self.row.created_at,
            last_started_at: self.row.last_started_at,
        }
    }
}

/// The instance supervisor.
pub struct InstanceSupervisor {
    store: SystemStore,
    registry: Arc<BackendRegistry>,
    port_range: (u16, u16),
    instance_data_root: PathBuf,
    handshake: HandshakeConfig,
    stop_grace: Duration,
    data_rpc_timeout: Duration,
    instances: DashMap<String, Arc<Mutex<InstanceRuntime>>>,
}

impl InstanceSupervisor {
    pub fn new(
        store: SystemStore,
        registry: Arc<BackendRegistry>,
        port_range: (u16, u16),
        instance_data_root: PathBuf,
    ) -> Self {
        Self {
            store,
            registry,
            port_range,
            instance_data_root,
            handshake: HandshakeConfig::default(),
            stop_grace: Duration::from_secs(5),
            data_rpc_timeout: Duration::from_secs(30),
            instances: DashMap::new(),
        }
    }

    /// Override handshake tuning (tests use short budgets).
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    /// Override the stop grace period.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Load persisted instance configurations. Every instance starts in
    /// `stopped` regardless of its state before the last shutdown.
    pub async fn load_existing(&self) -> Result<usize, GatewayError> {
        let rows = self.store.list_plugin_instances().await?;
        let count = rows.len();
        for row in rows {
            self.instances.insert(
                row.instance_id.clone(),
                Arc::new(Mutex::new(InstanceRuntime {
                    row,
                    status: InstanceStatus::Stopped,
                    child: None,
                    epoch: 0,
                })),
            );
        }
        Ok(count)
    }

    // -- CreateInstance / DeleteInstance ------------------------------------

    /// Create an instance configuration: allocate a free port from the
    /// configured range, persist the row, and return the new id.
    ///
    /// Fails with `conflict` when another enabled instance already claims
    /// the biz.
    pub async fn create_instance(
        &self,
        display_name: &str,
        plugin_id: &str,
        version: &str,
        biz_name: &str,
    ) -> Result<InstanceSnapshot, GatewayError> {
        if display_name.is_empty() || plugin_id.is_empty() || version.is_empty() || biz_name.is_empty()
        {
            return Err(GatewayError::Validation {
                message: "display_name, plugin_id, version and biz_name are required".to_string(),
            });
        }

        if self.biz_claimed(biz_name, None).await {
            return Err(GatewayError::Conflict {
                message: format!("biz {biz_name} is already claimed by an enabled instance"),
            });
        }

        let port = self.allocate_port().await?;
        let row = PluginInstanceRow {
            instance_id: format!("inst-{}", uuid::Uuid::new_v4()),
            display_name: display_name.to_string(),
            plugin_id: plugin_id.to_string(),
            version: version.to_string(),
            biz_name: biz_name.to_string(),
            port,
            enabled: true,
            created_at: Utc::now(),
            last_started_at: None,
        };
        self.store.insert_plugin_instance(&row).await?;

        let runtime = InstanceRuntime {
            row: row.clone(),
            status: InstanceStatus::Stopped,
            child: None,
            epoch: 0,
        };
        let snapshot = runtime.snapshot();
        self.instances
            .insert(row.instance_id.clone(), Arc::new(Mutex::new(runtime)));

        tracing::info!(
            instance_id = %row.instance_id,
            biz = %row.biz_name,
            port,
            "Instance created"
        );
        Ok(snapshot)
    }

    /// Delete an instance. A running instance is stopped first; the row
    /// and the instance's data directory are removed.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<(), GatewayError> {
        let slot = self.slot(instance_id)?;
        {
            let mut runtime = slot.lock().await;
            if runtime.status == InstanceStatus::Running {
                self.stop_locked(&mut runtime).await;
            }
            self.store.delete_plugin_instance(instance_id).await?;
        }
        self.instances.remove(instance_id);

        let data_dir = self.instance_data_root.join(instance_id);
        if tokio::fs::try_exists(&data_dir).await.unwrap_or(false) {
            let _ = tokio::fs::remove_dir_all(&data_dir).await;
        }

        tracing::info!(instance_id, "Instance deleted");
        Ok(())
    }

    // -- Start / Stop -------------------------------------------------------

    /// Start an instance: spawn the child, perform the handshake, and on
    /// success publish the backend handle.
    pub async fn start(&self, instance_id: &str) -> Result<InstanceSnapshot, GatewayError> {
        let slot = self.slot(instance_id)?;
        let mut runtime = slot.lock().await;

        match runtime.status {
            InstanceStatus::Stopped | InstanceStatus::Failed => {}
            InstanceStatus::Running => {
                return Err(GatewayError::Conflict {
                    message: format!("instance {instance_id} is already running"),
                })
            }
            status => {
                return Err(GatewayError::Conflict {
                    message: format!("instance {instance_id} is {status:?}"),
                })
            }
        }

        if !runtime.row.enabled {
            return Err(GatewayError::Conflict {
                message: format!("instance {instance_id} is disabled"),
            });
        }
        if self.registry.lookup(&runtime.row.biz_name).is_some() {
            return Err(GatewayError::Conflict {
                message: format!("biz {} is already routed", runtime.row.biz_name),
            });
        }

        let installed = self
            .store
            .get_installed_plugin(&runtime.row.plugin_id, &runtime.row.version)
            .await?
            .ok_or_else(|| GatewayError::NotFound {
                message: format!(
                    "plugin {} {} is not installed",
                    runtime.row.plugin_id, runtime.row.version
                ),
            })?;

        let exec = load_exec_info(&installed.install_path).await?;
        let entrypoint = PathBuf::from(&installed.install_path).join(&exec.entrypoint);
        if !tokio::fs::try_exists(&entrypoint).await.unwrap_or(false) {
            return Err(GatewayError::NotFound {
                message: format!("entrypoint {} does not exist", entrypoint.display()),
            });
        }

        let instance_dir = self.instance_data_root.join(&runtime.row.instance_id);
        tokio::fs::create_dir_all(&instance_dir)
            .await
            .map_err(|e| GatewayError::Internal {
                message: format!("cannot create instance directory: {e}"),
            })?;

        let args = substitute_args(
            &exec.args,
            runtime.row.port,
            &runtime.row.biz_name,
            &instance_dir,
        );

        tracing::info!(
            instance_id,
            biz = %runtime.row.biz_name,
            entrypoint = %entrypoint.display(),
            ?args,
            "Starting instance"
        );

        runtime.status = InstanceStatus::Starting;
        let mut child = Command::new(&entrypoint)
            .args(&args)
            .current_dir(&instance_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                runtime.status = InstanceStatus::Failed;
                GatewayError::Internal {
                    message: format!("failed to spawn {}: {e}", entrypoint.display()),
                }
            })?;

        forward_child_output(instance_id, &mut child);

        match self.handshake(&runtime.row).await {
            Ok(info) => {
                tracing::info!(
                    instance_id,
                    plugin_type = %info.plugin_type,
                    plugin_version = %info.version,
                    "Handshake complete"
                );

                let backend = RpcBackend::connect(runtime.row.port, self.data_rpc_timeout)
                    .map_err(|e| GatewayError::Internal {
                        message: format!("failed to build data-plane client: {e}"),
                    })?;

                runtime.child = Some(child);
                runtime.status = InstanceStatus::Running;
                runtime.epoch += 1;
                runtime.row.last_started_at = Some(Utc::now());
                self.store
                    .touch_instance_started(instance_id, runtime.row.last_started_at.unwrap())
                    .await?;
                self.registry
                    .publish(&runtime.row.biz_name, Arc::new(backend) as Arc<dyn DataBackend>);

                self.spawn_reaper(instance_id.to_string(), slot.clone(), runtime.epoch);
                Ok(runtime.snapshot())
            }
            Err(e) => {
                tracing::warn!(instance_id, error = %e, "Handshake failed, killing child");
                let _ = child.start_kill();
                let _ = child.wait().await;
                runtime.status = InstanceStatus::Failed;
                runtime.child = None;
                Err(e)
            }
        }
    }

    /// Stop a running instance. The routing entry is removed before any
    /// signal is sent to the child.
    pub async fn stop(&self, instance_id: &str) -> Result<InstanceSnapshot, GatewayError> {
        let slot = self.slot(instance_id)?;
        let mut runtime = slot.lock().await;

        if runtime.status != InstanceStatus::Running {
            return Err(GatewayError::Conflict {
                message: format!(
                    "instance {instance_id} is not running ({:?})",
                    runtime.status
                ),
            });
        }

        self.stop_locked(&mut runtime).await;
        Ok(runtime.snapshot())
    }

    async fn stop_locked(&self, runtime: &mut InstanceRuntime) {
        runtime.status = InstanceStatus::Stopping;
        runtime.epoch += 1;

        // Registry first: no reader may pick up a handle to a child we
        // are about to signal.
        self.registry.remove(&runtime.row.biz_name);

        if let Some(mut child) = runtime.child.take() {
            terminate_gracefully(&mut child, self.stop_grace).await;
        }

        runtime.status = InstanceStatus::Stopped;
        tracing::info!(instance_id = %runtime.row.instance_id, "Instance stopped");
    }

    /// Stop every running instance, in parallel. Used during shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        let stops = ids.into_iter().map(|id| async move {
            if let Ok(snapshot) = self.stop(&id).await {
                tracing::debug!(instance_id = %snapshot.instance_id, "Stopped during shutdown");
            }
        });
        futures::future::join_all(stops).await;
    }

    /// Snapshot of every instance with live status.
    pub async fn list_instances(&self) -> Vec<InstanceSnapshot> {
        let slots: Vec<Arc<Mutex<InstanceRuntime>>> =
            self.instances.iter().map(|e| e.value().clone()).collect();

        let mut snapshots = Vec::with_capacity(slots.len());
        for slot in slots {
            snapshots.push(slot.lock().await.snapshot());
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Snapshot of one instance.
    pub async fn get_instance(&self, instance_id: &str) -> Result<InstanceSnapshot, GatewayError> {
        let slot = self.slot(instance_id)?;
        let runtime = slot.lock().await;
        Ok(runtime.snapshot())
    }

    // -- internals ----------------------------------------------------------

    fn slot(&self, instance_id: &str) -> Result<Arc<Mutex<InstanceRuntime>>, GatewayError> {
        self.instances
            .get(instance_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GatewayError::NotFound {
                message: format!("instance {instance_id} does not exist"),
            })
    }

    async fn biz_claimed(&self, biz: &str, exclude_instance: Option<&str>) -> bool {
        let slots: Vec<Arc<Mutex<InstanceRuntime>>> = self
            .instances
            .iter()
            .filter(|e| exclude_instance != Some(e.key().as_str()))
            .map(|e| e.value().clone())
            .collect();
        for slot in slots {
            let runtime = slot.lock().await;
            if runtime.row.enabled && runtime.row.biz_name == biz {
                return true;
            }
        }
        false
    }

    /// Allocate a free port: unused by any configured instance and
    /// currently bindable on localhost.
    async fn allocate_port(&self) -> Result<u16, GatewayError> {
        let mut taken = Vec::new();
        let slots: Vec<Arc<Mutex<InstanceRuntime>>> =
            self.instances.iter().map(|e| e.value().clone()).collect();
        for slot in slots {
            taken.push(slot.lock().await.row.port);
        }

        let (lo, hi) = self.port_range;
        for port in lo..=hi {
            if taken.contains(&port) {
                continue;
            }
            if tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok() {
                return Ok(port);
            }
        }

        Err(GatewayError::Conflict {
            message: format!("no free port in range [{lo}, {hi}]"),
        })
    }

    /// Dial the child with exponential backoff inside the total budget and
    /// validate the plugin's identity.
    async fn handshake(
        &self,
        row: &PluginInstanceRow,
    ) -> Result<dsgate_backend_sdk::PluginInfo, GatewayError> {
        let client = RpcBackend::connect(row.port, self.handshake.call_timeout).map_err(|e| {
            GatewayError::Internal {
                message: format!("failed to build handshake client: {e}"),
            }
        })?;

        let deadline = Instant::now() + self.handshake.total_budget;
        let mut backoff = self.handshake.initial_backoff;
        let info = loop {
            match client.get_plugin_info().await {
                Ok(info) => break info,
                Err(e) if e.is_retryable() && Instant::now() + backoff < deadline => {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(2));
                }
                Err(e) => {
                    return Err(GatewayError::BackendUnavailable {
                        message: format!("handshake with instance {} failed: {e}", row.instance_id),
                    })
                }
            }
        };

        if !info.supported_biz_names.iter().any(|b| b == &row.biz_name) {
            return Err(GatewayError::Conflict {
                message: format!(
                    "plugin does not support biz {} (supports: {:?})",
                    row.biz_name, info.supported_biz_names
                ),
            });
        }

        Ok(info)
    }

    /// Watch the child; an unexpected exit while `running` transitions the
    /// instance to `failed` and removes its routing entry.
    fn spawn_reaper(&self, instance_id: String, slot: Arc<Mutex<InstanceRuntime>>, epoch: u64) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let mut runtime = slot.lock().await;

                // A stop or restart supersedes this reaper.
                if runtime.epoch != epoch || runtime.status != InstanceStatus::Running {
                    return;
                }

                let Some(child) = runtime.child.as_mut() else {
                    return;
                };
                match child.try_wait() {
                    Ok(None) => {}
                    Ok(Some(exit_status)) => {
                        tracing::warn!(
                            instance_id = %instance_id,
                            biz = %runtime.row.biz_name,
                            %exit_status,
                            "Instance child exited unexpectedly"
                        );
                        registry.remove(&runtime.row.biz_name);
                        runtime.status = InstanceStatus::Failed;
                        runtime.child = None;
                        return;
                    }
                    Err(e) => {
                        tracing::error!(
                            instance_id = %instance_id,
                            error = %e,
                            "Failed to poll instance child"
                        );
                        return;
                    }
                }
            }
        });
    }
}

/// Load the exec descriptor the installer persisted at the artifact root.
async fn load_exec_info(install_path: &str) -> Result<dsgate_backend_sdk::ExecInfo, GatewayError> {
    let descriptor_path = PathBuf::from(install_path).join("plugin.json");
    let raw = tokio::fs::read(&descriptor_path)
        .await
        .map_err(|e| GatewayError::NotFound {
            message: format!("missing plugin descriptor {}: {e}", descriptor_path.display()),
        })?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Substitute `{port}`, `{biz}` and `{instance_dir}` in the argument
/// template.
fn substitute_args(template: &[String], port: u16, biz: &str, instance_dir: &PathBuf) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{port}", &port.to_string())
                .replace("{biz}", biz)
                .replace("{instance_dir}", &instance_dir.to_string_lossy())
        })
        .collect()
}

/// Forward child stdout/stderr lines into the gateway log.
fn forward_child_output(instance_id: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let instance_id = instance_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(target: "plugin", instance_id = %instance_id, "{line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let instance_id = instance_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(target: "plugin", instance_id = %instance_id, "{line}");
            }
        });
    }
}

/// Send a graceful termination signal, then force-kill after the grace
/// period.
async fn terminate_gracefully(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from a live child handle owned by this
        // supervisor; SIGTERM to it cannot affect other processes.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.start_kill();
    let _ = child.wait().await;
}
