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

use core::mem;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use component_error::{Code, Error, ResultExt, make_err};
use component_util::spawn_blocking;
use component_util::task::JoinHandleDropGuard;
use component_util::version::Version;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{Level, event};

use crate::installer_policy::InstallerPolicy;
use crate::update_service::{ComponentRegistration, ComponentUpdateService, Priority, UpdateError};

/// Every version directory carries one of these.
pub const MANIFEST_FILE: &str = "manifest.json";

/// A version directory found on disk.
#[derive(Debug, Clone)]
pub struct VersionDir {
    pub version: Version,
    pub path: PathBuf,
    pub manifest: Value,
}

/// Returns the highest `<dir>/<version>/` that holds a readable manifest.
/// Entries that are not versions or lack a manifest are skipped. A missing
/// `dir` yields `None`.
pub fn find_newest_version(dir: &Path) -> Result<Option<VersionDir>, Error> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).err_tip(|| format!("Could not list {}", dir.display())),
    };
    let mut newest: Option<VersionDir> = None;
    for entry in entries {
        let entry = entry.err_tip(|| format!("Could not list {}", dir.display()))?;
        let Some(version) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<Version>().ok())
        else {
            continue;
        };
        if newest.as_ref().is_some_and(|newest| newest.version >= version) {
            continue;
        }
        let path = entry.path();
        let manifest = match fs::read(path.join(MANIFEST_FILE)) {
            Ok(data) => match serde_json::from_slice::<Value>(&data) {
                Ok(manifest) => manifest,
                Err(err) => {
                    event!(
                        Level::WARN,
                        ?err,
                        path = %path.display(),
                        "Skipping version with unparsable manifest"
                    );
                    continue;
                }
            },
            Err(err) => {
                event!(
                    Level::DEBUG,
                    ?err,
                    path = %path.display(),
                    "Skipping version without manifest"
                );
                continue;
            }
        };
        newest = Some(VersionDir {
            version,
            path,
            manifest,
        });
    }
    Ok(newest)
}

fn copy_dir_all(src: &Path, dst: &Path) -> Result<(), Error> {
    fs::create_dir_all(dst).err_tip(|| format!("Could not create {}", dst.display()))?;
    for entry in fs::read_dir(src).err_tip(|| format!("Could not list {}", src.display()))? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .err_tip(|| format!("Could not copy into {}", target.display()))?;
        }
    }
    Ok(())
}

/// Copies `source` into `<install_dir>/<version>` through a temporary
/// directory so a half-copied version is never picked up.
fn install_version(source: &VersionDir, install_dir: &Path) -> Result<VersionDir, Error> {
    let version_dir = install_dir.join(source.version.to_string());
    let temp_dir = install_dir.join(format!(".{}.partial", source.version));
    if temp_dir.exists() {
        fs::remove_dir_all(&temp_dir)
            .err_tip(|| format!("Could not clear {}", temp_dir.display()))?;
    }
    copy_dir_all(&source.path, &temp_dir)?;
    if version_dir.exists() {
        fs::remove_dir_all(&version_dir)
            .err_tip(|| format!("Could not replace {}", version_dir.display()))?;
    }
    fs::rename(&temp_dir, &version_dir)
        .err_tip(|| format!("Could not move {} into place", version_dir.display()))?;
    Ok(VersionDir {
        version: source.version.clone(),
        path: version_dir,
        manifest: source.manifest.clone(),
    })
}

/// Removes an uninstalled component's directory. A missing directory is fine.
fn remove_install_dir(install_dir: &Path) {
    match fs::remove_dir_all(install_dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => event!(
            Level::WARN,
            ?err,
            path = %install_dir.display(),
            "Failed to remove install directory"
        ),
    }
}

/// Removes the id from the in-flight set when the update ends, including
/// when the update future is dropped.
struct UpdateGuard<'a> {
    updating: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.updating.lock().remove(&self.id);
    }
}

/// [`ComponentUpdateService`] that installs versions from a local mirror
/// directory laid out as `<mirror_root>/<name>/<version>/`.
#[derive(Debug)]
pub struct MirrorUpdateService {
    components_root: PathBuf,
    /// Without a mirror only already installed versions are found.
    mirror_root: Option<PathBuf>,
    registrations: Mutex<HashMap<String, Arc<dyn InstallerPolicy>>>,
    updating: Mutex<HashSet<String>>,
    /// Install directories of unregistered components still being removed.
    removals: Mutex<Vec<JoinHandleDropGuard<()>>>,
}

impl MirrorUpdateService {
    pub fn new(components_root: impl Into<PathBuf>, mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            components_root: components_root.into(),
            mirror_root: Some(mirror_root.into()),
            registrations: Mutex::new(HashMap::new()),
            updating: Mutex::new(HashSet::new()),
            removals: Mutex::new(Vec::new()),
        }
    }

    pub fn without_mirror(components_root: impl Into<PathBuf>) -> Self {
        Self {
            components_root: components_root.into(),
            mirror_root: None,
            registrations: Mutex::new(HashMap::new()),
            updating: Mutex::new(HashSet::new()),
            removals: Mutex::new(Vec::new()),
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.registrations.lock().contains_key(id)
    }

    /// Resolves once every install directory removal started so far is
    /// done. Installs wait for this so a late removal cannot delete a fresh
    /// version.
    pub async fn wait_for_removals(&self) {
        let removals = mem::take(&mut *self.removals.lock());
        for removal in removals {
            if let Err(err) = removal.await {
                event!(Level::ERROR, ?err, "Install directory removal did not finish");
            }
        }
    }

    fn install_dir(&self, policy: &dyn InstallerPolicy) -> PathBuf {
        self.components_root.join(policy.relative_install_dir())
    }

    async fn update(&self, policy: Arc<dyn InstallerPolicy>) -> Result<(), Error> {
        let Some(mirror_root) = &self.mirror_root else {
            event!(Level::INFO, name = policy.name(), "No mirror configured");
            return Ok(());
        };
        self.wait_for_removals().await;
        let install_dir = self.install_dir(policy.as_ref());
        let mirror_dir = mirror_root.join(policy.name());
        let installed = {
            let install_dir = install_dir.clone();
            spawn_blocking!("mirror_find_installed", move || find_newest_version(
                &install_dir
            ))
            .await??
        };
        let Some(available) =
            spawn_blocking!("mirror_find_available", move || find_newest_version(
                &mirror_dir
            ))
            .await??
        else {
            event!(Level::INFO, name = policy.name(), "No version in mirror");
            return Ok(());
        };
        if installed
            .as_ref()
            .is_some_and(|installed| installed.version >= available.version)
        {
            event!(
                Level::INFO,
                name = policy.name(),
                version = %available.version,
                "Installed version is up to date"
            );
            return Ok(());
        }

        let installed = {
            let install_dir = install_dir.clone();
            spawn_blocking!("mirror_install_version", move || install_version(
                &available,
                &install_dir
            ))
            .await??
        };
        if !policy.verify_installation(&installed.manifest, &installed.path) {
            let path = installed.path.clone();
            // Best effort, a leftover directory is skipped once unregistered.
            let _ = spawn_blocking!("mirror_remove_unverified", move || fs::remove_dir_all(
                &path
            ))
            .await;
            return Err(make_err!(
                Code::DataLoss,
                "Installation of {} {} failed verification",
                policy.name(),
                installed.version
            ));
        }
        policy
            .on_custom_install(&installed.manifest, &installed.path)
            .err_tip(|| format!("Custom install of {} failed", policy.name()))?;
        event!(
            Level::INFO,
            name = policy.name(),
            version = %installed.version,
            "Installed version from mirror"
        );
        policy.component_ready(&installed.version, &installed.path, &installed.manifest);
        Ok(())
    }
}

#[async_trait]
impl ComponentUpdateService for MirrorUpdateService {
    async fn register_component(&self, registration: ComponentRegistration) -> Result<(), Error> {
        let ComponentRegistration { id, policy } = registration;
        self.registrations.lock().insert(id, policy.clone());
        if policy.hash().is_empty() {
            event!(
                Level::WARN,
                name = policy.name(),
                "Registered component has no valid hash, not loading it"
            );
            return Ok(());
        }

        self.wait_for_removals().await;
        let install_dir = self.install_dir(policy.as_ref());
        let installed = spawn_blocking!("mirror_find_installed", move || find_newest_version(
            &install_dir
        ))
        .await??;
        if let Some(installed) = installed {
            policy.component_ready(&installed.version, &installed.path, &installed.manifest);
        }
        Ok(())
    }

    async fn on_demand_update(&self, id: &str, priority: Priority) -> Result<(), UpdateError> {
        let policy = self.registrations.lock().get(id).cloned().ok_or_else(|| {
            UpdateError::Failed(make_err!(Code::NotFound, "Component {id} is not registered"))
        })?;
        if policy.hash().is_empty() {
            return Err(UpdateError::Failed(make_err!(
                Code::FailedPrecondition,
                "Component {} is disabled",
                policy.name()
            )));
        }
        if !self.updating.lock().insert(id.to_string()) {
            return Err(UpdateError::UpdateInProgress);
        }
        let _guard = UpdateGuard {
            updating: &self.updating,
            id: id.to_string(),
        };
        event!(Level::DEBUG, name = policy.name(), ?priority, "Checking mirror");
        self.update(policy).await.map_err(UpdateError::from)
    }

    fn unregister_component(&self, id: &str) -> bool {
        let Some(policy) = self.registrations.lock().remove(id) else {
            return false;
        };
        let install_dir = self.install_dir(policy.as_ref());
        let removal = spawn_blocking!(
            "mirror_remove_install_dir",
            move || remove_install_dir(&install_dir),
            name = policy.name()
        );
        self.removals.lock().push(removal);
        policy.on_custom_uninstall();
        true
    }
}
