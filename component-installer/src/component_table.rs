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

use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub use component_config::components::{ComponentSpec as ComponentConfig, PolicyType};
use component_error::{Error, ResultExt, error_if};
use component_util::id_util::generate_id;
use component_util::version::Version;

/// Directory under the components root that holds every component.
pub const COMPONENTS_ROOT_PATH: &str = "cros-components";

/// (name, policy, env_version, sha2hash) of every downloadable component.
// NOTE: The lacros channel names are also used by the browser loader, keep
// them in sync.
const BUILTIN_CONFIGS: &[(&str, PolicyType, Option<&str>, &str)] = &[
    (
        "cros-termina",
        PolicyType::EnvVersion,
        Some("980.1"),
        "e9d960f84f628e1f42d05de4046bb5b3154b6f1f65c08412c6af57a29aecaffb",
    ),
    (
        "rtanalytics-light",
        PolicyType::EnvVersion,
        Some("96.0"),
        "69f09d33c439c2ab55bbbe24b47ab55cb3f6c0bd1f1ef46eefea3216ec925038",
    ),
    (
        "rtanalytics-full",
        PolicyType::EnvVersion,
        Some("96.0"),
        "c93c3e1013c52100a20038b405ac854d69fa889f6dc4fa6f188267051e05e444",
    ),
    (
        "demo-mode-resources",
        PolicyType::EnvVersion,
        Some("1.0"),
        "93c093ebac788581389015e9c59c5af111d2fa5174d206eb795042e6376cbd10",
    ),
    (
        "lacros-dogfood-canary",
        PolicyType::Lacros,
        None,
        "7a85ffb4b316a3b89135a3f43660ef3049950a61a2f8df4237e1ec213852b848",
    ),
    (
        "lacros-dogfood-dev",
        PolicyType::Lacros,
        None,
        "b3e1ef1780c0acd2d3fa44b4d73c657a0f1ed3ad83fd8c964a18a3502ccf5f4f",
    ),
    (
        "lacros-dogfood-beta",
        PolicyType::Lacros,
        None,
        "7d5c1428f7f67b56f95123851adec1da105980c56b5c126352040f3b65d3e43b",
    ),
    (
        "lacros-dogfood-stable",
        PolicyType::Lacros,
        None,
        "47f910805afac79e2d4d9117c42d5291a32ac60a4ea1a42e537fd86082c3ba48",
    ),
];

/// Immutable table of every component the installer knows about.
#[derive(Debug, Clone)]
pub struct ComponentTable {
    configs: Vec<ComponentConfig>,
}

impl ComponentTable {
    /// Builds a table from `configs`.
    ///
    /// Names must be unique and every `env_version` component must carry a
    /// valid `env_version`.
    pub fn new(configs: Vec<ComponentConfig>) -> Result<Self, Error> {
        let mut names = HashSet::with_capacity(configs.len());
        for config in &configs {
            error_if!(config.name.is_empty(), "Component name must not be empty");
            error_if!(
                !names.insert(config.name.as_str()),
                "Duplicate component name '{}'",
                config.name
            );
            if config.policy == PolicyType::EnvVersion {
                let env_version = config
                    .env_version
                    .as_deref()
                    .err_tip(|| format!("Component '{}' needs an env_version", config.name))?;
                env_version.parse::<Version>().err_tip(|| {
                    format!("Invalid env_version for component '{}'", config.name)
                })?;
            }
        }
        Ok(Self { configs })
    }

    pub fn builtin() -> Self {
        Self {
            configs: BUILTIN_CONFIGS
                .iter()
                .map(|(name, policy, env_version, sha2hash)| ComponentConfig {
                    name: (*name).to_string(),
                    policy: *policy,
                    env_version: env_version.map(ToString::to_string),
                    sha2hash: (*sha2hash).to_string(),
                })
                .collect(),
        }
    }

    /// Uses `configs` when given, the built-in table otherwise.
    pub fn from_optional(configs: Option<Vec<ComponentConfig>>) -> Result<Self, Error> {
        match configs {
            Some(configs) => Self::new(configs),
            None => Ok(Self::builtin()),
        }
    }

    pub fn find(&self, name: &str) -> Option<&ComponentConfig> {
        self.configs.iter().find(|config| config.name == name)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, ComponentConfig> {
        self.configs.iter()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

impl<'a> IntoIterator for &'a ComponentTable {
    type Item = &'a ComponentConfig;
    type IntoIter = core::slice::Iter<'a, ComponentConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.configs.iter()
    }
}

/// Id under which the component is known to the update service.
pub fn component_id(config: &ComponentConfig) -> String {
    generate_id(&config.sha2hash)
}

/// `cros-components/<name>`, relative to the components root.
pub fn relative_install_dir(name: &str) -> PathBuf {
    Path::new(COMPONENTS_ROOT_PATH).join(name)
}

/// Returns the configs whose install directory exists under `root`.
///
/// This touches the filesystem and must run off the coordination tasks.
pub fn installed_configs(root: &Path, table: &ComponentTable) -> Vec<ComponentConfig> {
    table
        .iter()
        .filter(|config| root.join(relative_install_dir(&config.name)).exists())
        .cloned()
        .collect()
}
