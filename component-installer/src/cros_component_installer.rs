// Copyright 2024 The NativeLink Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::fmt;
use core::time::Duration;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use component_config::components::InstallerConfig;
use component_error::{Code, Error, ResultExt, make_err};
use component_util::sequence::TaskSequence;
use component_util::version::Version;
use component_util::{background_spawn, spawn_blocking};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{Level, event};

use crate::component_table::{
    COMPONENTS_ROOT_PATH, ComponentConfig, ComponentTable, component_id, installed_configs,
};
use crate::image_loader::ImageLoader;
use crate::installer_policy::{CrosComponentInstallerPolicy, PolicyHost};
use crate::load_cache::{self, CacheLookup, LoadCache, LoadInfo};
use crate::metadata_table::MetadataTable;
use crate::metrics::InstallerMetrics;
use crate::update_service::{ComponentRegistration, ComponentUpdateService, Priority, UpdateError};

/// Outcome handed to every load callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadError {
    /// Success. The path is empty when mounting was not requested.
    None = 0,
    /// The name is not in the component table.
    UnknownComponent = 1,
    /// The on-demand update failed.
    InstallFailure = 2,
    /// The mount request failed.
    MountFailure = 3,
    /// An update ran but no compatible version is installed afterwards.
    CompatibilityCheckFailed = 4,
    /// Updates were skipped and no compatible version is installed.
    NotFound = 5,
    /// Another update of the component is already running.
    UpdateInProgress = 6,
}

impl LoadError {
    pub const ALL: [Self; 7] = [
        Self::None,
        Self::UnknownComponent,
        Self::InstallFailure,
        Self::MountFailure,
        Self::CompatibilityCheckFailed,
        Self::NotFound,
        Self::UpdateInProgress,
    ];

    pub const fn is_success(self) -> bool {
        matches!(self, Self::None)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::UnknownComponent => "UNKNOWN_COMPONENT",
            Self::InstallFailure => "INSTALL_FAILURE",
            Self::MountFailure => "MOUNT_FAILURE",
            Self::CompatibilityCheckFailed => "COMPATIBILITY_CHECK_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MountPolicy {
    #[default]
    Mount,
    DontMount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Always run an on-demand update, even when a compatible version is
    /// already installed.
    Force,
    /// Only update when no compatible version is installed.
    #[default]
    DontForce,
    /// Never update, only use what is installed.
    Skip,
}

/// Receives the outcome of a load request exactly once.
pub type LoadCallback = Box<dyn FnOnce(LoadError, PathBuf) + Send + 'static>;

/// Notified whenever a new version of a component is installed.
pub trait InstallerDelegate: Send + Sync + 'static {
    fn emit_installed_signal(&self, component: &str);
}

#[derive(Debug, Default)]
struct InstallerState {
    /// Name to the install path of the newest version that passed its
    /// policy's compatibility check.
    compatible_components: HashMap<String, PathBuf>,
    load_cache: LoadCache,
    last_mount_id: u64,
}

/// Installs, updates and mounts the components of a [`ComponentTable`].
///
/// Mount requests for the same name are coalesced: while a mount is in
/// flight every further request waits for it and all of them get the same
/// answer. Callbacks always run on the installer's task sequence, never from
/// inside the call that triggered them.
pub struct CrosComponentInstaller {
    table: ComponentTable,
    components_root: PathBuf,
    host_major_version: u32,
    mount_timeout: Option<Duration>,
    update_timeout: Option<Duration>,

    update_service: Arc<dyn ComponentUpdateService>,
    image_loader: Arc<dyn ImageLoader>,
    metadata_table: Arc<dyn MetadataTable>,
    delegate: Mutex<Option<Arc<dyn InstallerDelegate>>>,

    state: Mutex<InstallerState>,
    sequence: TaskSequence,
    metrics: InstallerMetrics,

    /// Handed to the installer policies so they can report back.
    weak_self: Weak<Self>,
}

impl fmt::Debug for CrosComponentInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrosComponentInstaller")
            .field("components_root", &self.components_root)
            .field("host_major_version", &self.host_major_version)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

const fn optional_timeout(millis: u64) -> Option<Duration> {
    if millis == 0 {
        None
    } else {
        Some(Duration::from_millis(millis))
    }
}

impl CrosComponentInstaller {
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &InstallerConfig,
        update_service: Arc<dyn ComponentUpdateService>,
        image_loader: Arc<dyn ImageLoader>,
        metadata_table: Arc<dyn MetadataTable>,
    ) -> Result<Arc<Self>, Error> {
        let host_version: Version = config
            .host_version
            .parse()
            .err_tip(|| format!("Invalid host_version '{}'", config.host_version))?;
        let table = ComponentTable::from_optional(config.components.clone())
            .err_tip(|| "Invalid component table")?;
        Ok(Arc::new_cyclic(|weak_self| Self {
            table,
            components_root: PathBuf::from(&config.components_root),
            host_major_version: host_version.major(),
            mount_timeout: optional_timeout(config.mount_timeout_ms),
            update_timeout: optional_timeout(config.update_timeout_ms),
            update_service,
            image_loader,
            metadata_table,
            delegate: Mutex::new(None),
            state: Mutex::new(InstallerState::default()),
            sequence: TaskSequence::new("cros_component_installer"),
            metrics: InstallerMetrics::default(),
            weak_self: weak_self.clone(),
        }))
    }

    pub fn set_delegate(&self, delegate: Arc<dyn InstallerDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    pub const fn table(&self) -> &ComponentTable {
        &self.table
    }

    pub const fn metrics(&self) -> &InstallerMetrics {
        &self.metrics
    }

    /// Resolves once every callback dispatched so far has run.
    pub async fn flush_callbacks(&self) {
        self.sequence.flush().await;
    }

    /// Installs (if needed) and optionally mounts `name`, then runs
    /// `load_callback` with the outcome.
    pub fn load(
        self: &Arc<Self>,
        name: &str,
        mount_policy: MountPolicy,
        update_policy: UpdatePolicy,
        load_callback: LoadCallback,
    ) {
        if !self.is_compatible(name) || update_policy == UpdatePolicy::Force {
            // No compatible version is installed or an update was requested.
            self.install(name, update_policy, mount_policy, load_callback);
        } else if mount_policy == MountPolicy::Mount {
            self.load_internal(name, load_callback);
        } else {
            self.dispatch(load_callback, LoadError::None, PathBuf::new());
        }
    }

    /// Same as [`Self::load`] but returns the outcome.
    pub async fn load_async(
        self: &Arc<Self>,
        name: &str,
        mount_policy: MountPolicy,
        update_policy: UpdatePolicy,
    ) -> (LoadError, PathBuf) {
        let (result_tx, result_rx) = oneshot::channel();
        self.load(
            name,
            mount_policy,
            update_policy,
            Box::new(move |error, path| {
                // Failing to send just means the caller stopped waiting.
                let _ = result_tx.send((error, path));
            }),
        );
        result_rx.await.unwrap_or_else(|_| {
            event!(Level::ERROR, name, "Load callback was dropped without a result");
            (LoadError::InstallFailure, PathBuf::new())
        })
    }

    /// Forgets any mount of `name`, answering callers still waiting for it
    /// with a mount failure, and drops the current user's claim on the
    /// component. Returns `true` if the component is still used by another
    /// user or was unregistered from the update service.
    pub fn unload(&self, name: &str) -> bool {
        let callbacks = load_cache::invalidate(&mut self.state.lock().load_cache, name);
        self.dispatch_failed_loads(callbacks);

        let Some(config) = self.table.find(name) else {
            return false;
        };
        let id = component_id(config);
        self.metadata_table.delete_component_for_current_user(name);
        let unloaded = self.metadata_table.has_component_for_any_user(name)
            || self.update_service.unregister_component(&id);
        event!(Level::INFO, name, unloaded, "Unloaded component");
        unloaded
    }

    /// Registers every component that already has an install directory. The
    /// directory scan runs on the blocking pool.
    pub fn register_installed(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        background_spawn!("cros_component_register_installed", async move {
            let root = this.components_root.clone();
            let table = this.table.clone();
            let configs = match spawn_blocking!(
                "cros_component_find_installed",
                move || installed_configs(&root, &table)
            )
            .await
            {
                Ok(configs) => configs,
                Err(err) => {
                    event!(Level::ERROR, ?err, "Failed to scan installed components");
                    return;
                }
            };
            for config in configs {
                if let Err(err) = this.register(&config).await {
                    event!(
                        Level::WARN,
                        name = %config.name,
                        ?err,
                        "Failed to register installed component"
                    );
                }
            }
        })
    }

    /// Returns whether `name` has an install directory. Blocks on the
    /// filesystem.
    pub fn is_registered_may_block(&self, name: &str) -> bool {
        self.components_root
            .join(COMPONENTS_ROOT_PATH)
            .join(name)
            .exists()
    }

    /// Install path of the compatible version of `name`, empty if none.
    pub fn get_compatible_path(&self, name: &str) -> PathBuf {
        self.state
            .lock()
            .compatible_components
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_compatible(&self, name: &str) -> bool {
        self.state.lock().compatible_components.contains_key(name)
    }

    /// Raw access to the load cache so tests can seed and inspect entries.
    pub fn load_cache_for_testing(&self) -> MappedMutexGuard<'_, LoadCache> {
        MutexGuard::map(self.state.lock(), |state| &mut state.load_cache)
    }

    /// Registers `config` with the update service and returns its id.
    /// Registering the same config twice is harmless.
    async fn register(&self, config: &ComponentConfig) -> Result<String, Error> {
        let host: Weak<dyn PolicyHost> = self.weak_self.clone();
        let policy = Arc::new(CrosComponentInstallerPolicy::new(
            config,
            host,
            self.host_major_version,
        ));
        let id = component_id(config);
        self.update_service
            .register_component(ComponentRegistration {
                id: id.clone(),
                policy,
            })
            .await
            .err_tip(|| format!("Failed to register component {}", config.name))?;
        Ok(id)
    }

    fn install(
        self: &Arc<Self>,
        name: &str,
        update_policy: UpdatePolicy,
        mount_policy: MountPolicy,
        load_callback: LoadCallback,
    ) {
        let Some(config) = self.table.find(name).cloned() else {
            event!(Level::WARN, name, "Load requested for unknown component");
            self.dispatch(load_callback, LoadError::UnknownComponent, PathBuf::new());
            return;
        };
        let this = self.clone();
        background_spawn!(
            "cros_component_install",
            async move {
                let result = match this.register(&config).await {
                    Ok(id) => this.start_install(&config.name, &id, update_policy).await,
                    Err(err) => Err(err.into()),
                };
                this.finish_install(
                    &config.name,
                    mount_policy,
                    update_policy,
                    load_callback,
                    result,
                );
            },
            name
        );
    }

    /// Decides whether an on-demand update is needed and runs it.
    async fn start_install(
        &self,
        name: &str,
        id: &str,
        update_policy: UpdatePolicy,
    ) -> Result<(), UpdateError> {
        // Registration may have found a compatible version on disk.
        let is_compatible = self.is_compatible(name);
        if update_policy == UpdatePolicy::Skip
            || (is_compatible && update_policy != UpdatePolicy::Force)
        {
            return Ok(());
        }

        let priority = if is_compatible {
            Priority::Background
        } else {
            Priority::Foreground
        };
        event!(Level::INFO, name, id, ?priority, "Starting on-demand update");
        let update_fut = self.update_service.on_demand_update(id, priority);
        let Some(update_timeout) = self.update_timeout else {
            return update_fut.await;
        };
        timeout(update_timeout, update_fut).await.unwrap_or_else(|_| {
            Err(UpdateError::Failed(make_err!(
                Code::DeadlineExceeded,
                "On-demand update of {name} timed out after {update_timeout:?}"
            )))
        })
    }

    fn finish_install(
        self: &Arc<Self>,
        name: &str,
        mount_policy: MountPolicy,
        update_policy: UpdatePolicy,
        load_callback: LoadCallback,
        result: Result<(), UpdateError>,
    ) {
        if let Err(err) = result {
            let error = match err {
                UpdateError::UpdateInProgress => LoadError::UpdateInProgress,
                UpdateError::Failed(_) => LoadError::InstallFailure,
            };
            event!(Level::WARN, name, %err, %error, "Component install failed");
            self.dispatch(load_callback, error, PathBuf::new());
        } else if !self.is_compatible(name) {
            let error = if update_policy == UpdatePolicy::Skip {
                LoadError::NotFound
            } else {
                LoadError::CompatibilityCheckFailed
            };
            event!(Level::WARN, name, %error, "No compatible version installed");
            self.dispatch(load_callback, error, PathBuf::new());
        } else {
            self.metadata_table.add_component_for_current_user(name);
            if mount_policy == MountPolicy::Mount {
                self.load_internal(name, load_callback);
            } else {
                self.dispatch(load_callback, LoadError::None, PathBuf::new());
            }
        }
    }

    /// Mounts the compatible version of `name`, sharing an in-flight or
    /// finished mount when there is one.
    fn load_internal(self: &Arc<Self>, name: &str, load_callback: LoadCallback) {
        let mut state = self.state.lock();
        let load_callback = match load_cache::lookup(&mut state.load_cache, name, load_callback) {
            CacheLookup::Queued => return,
            CacheLookup::Resolved {
                callback,
                path,
                success,
            } => {
                drop(state);
                self.dispatch_load_callback(callback, path, success);
                return;
            }
            CacheLookup::Miss(load_callback) => load_callback,
        };

        let Some(install_path) = state.compatible_components.get(name).cloned() else {
            // Unregistered between the compatibility check and now.
            drop(state);
            event!(Level::WARN, name, "Compatible path vanished before mount");
            self.dispatch_load_callback(load_callback, PathBuf::new(), false);
            return;
        };
        state.last_mount_id += 1;
        let mount_id = state.last_mount_id;
        state.load_cache.insert(
            name.to_string(),
            LoadInfo::pending(mount_id, install_path.clone(), load_callback),
        );
        drop(state);

        let this = self.clone();
        let mount_name = name.to_string();
        background_spawn!(
            "cros_component_mount",
            async move {
                let start_time = Instant::now();
                let result = this.mount(&mount_name, &install_path).await;
                this.metrics.mount_time.record(start_time.elapsed());
                this.finish_load(&mount_name, mount_id, result);
            },
            name,
            mount_id
        );
    }

    async fn mount(&self, name: &str, install_path: &Path) -> Option<PathBuf> {
        event!(
            Level::INFO,
            name,
            path = %install_path.display(),
            "Mounting component"
        );
        let mount_fut = self.image_loader.load_component_at_path(name, install_path);
        let Some(mount_timeout) = self.mount_timeout else {
            return mount_fut.await;
        };
        timeout(mount_timeout, mount_fut).await.unwrap_or_else(|_| {
            event!(Level::WARN, name, ?mount_timeout, "Mount timed out");
            None
        })
    }

    fn finish_load(&self, name: &str, mount_id: u64, result: Option<PathBuf>) {
        let success = result.is_some();
        let path = result.unwrap_or_default();
        let callbacks = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.load_cache.get_mut(name) {
                Some(info) if info.mount_id == mount_id => {
                    let callbacks = info.resolve(success, path.clone());
                    // A newer version became compatible while mounting. The
                    // waiters get this result but later loads mount again.
                    if state.compatible_components.get(name) != Some(&info.install_path) {
                        state.load_cache.remove(name);
                        event!(
                            Level::INFO,
                            name,
                            mount_id,
                            "Compatible path changed during mount, not caching result"
                        );
                    }
                    callbacks
                }
                _ => {
                    event!(
                        Level::DEBUG,
                        name,
                        mount_id,
                        "Mount finished after its cache entry was invalidated"
                    );
                    Vec::new()
                }
            }
        };
        event!(
            Level::INFO,
            name,
            success,
            waiters = callbacks.len(),
            "Mount finished"
        );
        for callback in callbacks {
            self.dispatch_load_callback(callback, path.clone(), success);
        }
    }

    fn dispatch_load_callback(&self, load_callback: LoadCallback, path: PathBuf, success: bool) {
        let error = if success {
            LoadError::None
        } else {
            LoadError::MountFailure
        };
        self.dispatch(load_callback, error, path);
    }

    fn dispatch_failed_loads(&self, callbacks: Vec<LoadCallback>) {
        for callback in callbacks {
            self.dispatch_load_callback(callback, PathBuf::new(), false);
        }
    }

    /// Counts the outcome and posts the callback to the task sequence.
    fn dispatch(&self, load_callback: LoadCallback, error: LoadError, path: PathBuf) {
        self.metrics.record_result(error);
        self.sequence.post(move || load_callback(error, path));
    }
}

impl PolicyHost for CrosComponentInstaller {
    fn register_compatible_path(&self, name: &str, path: PathBuf) {
        let mut state = self.state.lock();
        let previous = state
            .compatible_components
            .insert(name.to_string(), path.clone());
        // A finished mount of an older version must not keep being served.
        // An in-flight one is dropped once it finishes.
        let stale = previous.is_some_and(|previous| previous != path)
            && state
                .load_cache
                .get(name)
                .is_some_and(|info| !info.is_pending());
        if stale {
            state.load_cache.remove(name);
            event!(
                Level::INFO,
                name,
                "Compatible path changed, dropped cached mount result"
            );
        }
    }

    fn unregister_compatible_path(&self, name: &str) {
        let callbacks = {
            let mut state = self.state.lock();
            state.compatible_components.remove(name);
            load_cache::invalidate(&mut state.load_cache, name)
        };
        self.dispatch_failed_loads(callbacks);
    }

    fn emit_installed_signal(&self, name: &str) {
        let delegate = self.delegate.lock().clone();
        if let Some(delegate) = delegate {
            delegate.emit_installed_signal(name);
        }
    }

    fn unmount_uninstalled(&self, name: &str) {
        let image_loader = self.image_loader.clone();
        let unmount_name = name.to_string();
        background_spawn!(
            "cros_component_unmount",
            async move {
                let result = image_loader.unmount_component(&unmount_name).await;
                event!(
                    Level::INFO,
                    name = %unmount_name,
                    ?result,
                    "Unmounted uninstalled component"
                );
            },
            name
        );
    }
}
