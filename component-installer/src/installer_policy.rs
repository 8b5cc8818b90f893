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
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Weak;

use component_error::Error;
use component_util::id_util::SHA256_LENGTH;
use component_util::version::Version;
use serde_json::Value;
use tracing::{Level, event};

use crate::component_table::{ComponentConfig, PolicyType, relative_install_dir};

/// Manifest key holding the oldest environment version a component supports.
pub const MIN_ENV_VERSION_KEY: &str = "min_env_version";

/// Installer attribute carrying the configured environment version.
pub const ENV_VERSION_ATTRIBUTE: &str = "_env_version";

pub type InstallerAttributes = BTreeMap<String, String>;

/// What an installer policy needs from the component installer that owns it.
pub trait PolicyHost: Send + Sync + 'static {
    fn register_compatible_path(&self, name: &str, path: PathBuf);

    fn unregister_compatible_path(&self, name: &str);

    fn emit_installed_signal(&self, name: &str);

    /// Asynchronously unmounts `name`. Called after the component was
    /// uninstalled.
    fn unmount_uninstalled(&self, name: &str);
}

/// Hooks the update service calls while it manages one component.
pub trait InstallerPolicy: Send + Sync + fmt::Debug + 'static {
    fn name(&self) -> &str;

    /// SHA-256 of the component's public key, empty when the component is
    /// disabled. An empty hash never matches and never installs.
    fn hash(&self) -> &[u8];

    fn relative_install_dir(&self) -> PathBuf;

    fn installer_attributes(&self) -> InstallerAttributes;

    fn supports_group_policy_enabled_component_updates(&self) -> bool {
        true
    }

    fn requires_network_encryption(&self) -> bool {
        true
    }

    fn verify_installation(&self, _manifest: &Value, _install_dir: &Path) -> bool {
        true
    }

    /// Runs after a new version was unpacked into `install_dir`.
    fn on_custom_install(&self, manifest: &Value, install_dir: &Path) -> Result<(), Error>;

    /// Runs after the component was removed from the update service.
    fn on_custom_uninstall(&self);

    /// A verified version is available at `path`.
    fn component_ready(&self, version: &Version, path: &Path, manifest: &Value);
}

/// Returns whether a component that requires at least `min_env_version`
/// works in an environment of `env_version`: both versions must be valid,
/// share the major version and `env_version` must not be older.
pub fn is_compatible(env_version: &str, min_env_version: &str) -> bool {
    let (Ok(env_version), Ok(min_env_version)) = (
        env_version.parse::<Version>(),
        min_env_version.parse::<Version>(),
    ) else {
        return false;
    };
    env_version.major() == min_env_version.major() && env_version >= min_env_version
}

/// Each Lacros release stays compatible through the next major host
/// release. Lacros 89 works with host 90 but may not work with host 91.
pub const fn is_lacros_compatible(lacros_major_version: u32, host_major_version: u32) -> bool {
    lacros_major_version.saturating_add(1) >= host_major_version
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PolicyKind {
    EnvVersion { env_version: String },
    Lacros { host_major_version: u32 },
}

/// Installer policy of a single component.
pub struct CrosComponentInstallerPolicy {
    name: String,
    sha2_hash: Vec<u8>,
    kind: PolicyKind,
    host: Weak<dyn PolicyHost>,
}

impl fmt::Debug for CrosComponentInstallerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrosComponentInstallerPolicy")
            .field("name", &self.name)
            .field("sha2_hash", &hex::encode(&self.sha2_hash))
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl CrosComponentInstallerPolicy {
    /// `host_major_version` is only consulted by Lacros policies.
    pub fn new(
        config: &ComponentConfig,
        host: Weak<dyn PolicyHost>,
        host_major_version: u32,
    ) -> Self {
        let kind = match config.policy {
            PolicyType::EnvVersion => PolicyKind::EnvVersion {
                env_version: config.env_version.clone().unwrap_or_default(),
            },
            PolicyType::Lacros => PolicyKind::Lacros { host_major_version },
        };
        Self {
            name: config.name.clone(),
            sha2_hash: decode_sha2_hash(&config.name, &config.sha2hash),
            kind,
            host,
        }
    }

    pub const fn policy_type(&self) -> PolicyType {
        match self.kind {
            PolicyKind::EnvVersion { .. } => PolicyType::EnvVersion,
            PolicyKind::Lacros { .. } => PolicyType::Lacros,
        }
    }

    fn with_host(&self, f: impl FnOnce(&dyn PolicyHost)) {
        match self.host.upgrade() {
            Some(host) => f(host.as_ref()),
            None => event!(
                Level::DEBUG,
                name = %self.name,
                "Component installer is gone, ignoring policy event"
            ),
        }
    }
}

/// A hash of the wrong length leaves the policy disabled with an empty hash.
fn decode_sha2_hash(name: &str, sha2hash: &str) -> Vec<u8> {
    if sha2hash.len() != SHA256_LENGTH * 2 {
        event!(
            Level::WARN,
            name,
            len = sha2hash.len(),
            "Component hash has the wrong length, component is disabled"
        );
        return Vec::new();
    }
    match hex::decode(sha2hash) {
        Ok(hash) => hash,
        Err(err) => {
            event!(
                Level::WARN,
                name,
                ?err,
                "Component hash is not valid hex, component is disabled"
            );
            Vec::new()
        }
    }
}

impl InstallerPolicy for CrosComponentInstallerPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn hash(&self) -> &[u8] {
        &self.sha2_hash
    }

    fn relative_install_dir(&self) -> PathBuf {
        relative_install_dir(&self.name)
    }

    fn installer_attributes(&self) -> InstallerAttributes {
        let mut attrs = InstallerAttributes::new();
        if let PolicyKind::EnvVersion { env_version } = &self.kind {
            attrs.insert(ENV_VERSION_ATTRIBUTE.to_string(), env_version.clone());
        }
        attrs
    }

    fn on_custom_install(&self, _manifest: &Value, _install_dir: &Path) -> Result<(), Error> {
        self.with_host(|host| host.emit_installed_signal(&self.name));
        Ok(())
    }

    fn on_custom_uninstall(&self) {
        self.with_host(|host| {
            host.unregister_compatible_path(&self.name);
            host.unmount_uninstalled(&self.name);
        });
    }

    fn component_ready(&self, version: &Version, path: &Path, manifest: &Value) {
        let compatible = match &self.kind {
            PolicyKind::EnvVersion { env_version } => {
                let Some(min_env_version) = manifest.get(MIN_ENV_VERSION_KEY).and_then(Value::as_str)
                else {
                    event!(
                        Level::WARN,
                        name = %self.name,
                        %version,
                        "Manifest has no {MIN_ENV_VERSION_KEY}, ignoring version"
                    );
                    return;
                };
                is_compatible(env_version, min_env_version)
            }
            PolicyKind::Lacros { host_major_version } => {
                is_lacros_compatible(version.major(), *host_major_version)
            }
        };
        if !compatible {
            event!(
                Level::INFO,
                name = %self.name,
                %version,
                "Installed version is not compatible"
            );
            return;
        }
        event!(
            Level::INFO,
            name = %self.name,
            %version,
            path = %path.display(),
            "Registering compatible component version"
        );
        self.with_host(|host| host.register_compatible_path(&self.name, path.to_path_buf()));
    }
}
