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

use serde::Deserialize;

use crate::serde_utils::{
    convert_numeric_with_shellexpand, convert_optional_string_with_shellexpand,
    convert_string_with_shellexpand,
};

/// Selects the compatibility check that runs when a downloaded version of a
/// component becomes available.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    /// The component declares a `min_env_version` in its manifest and is
    /// usable when the configured `env_version` is in the same major line
    /// and not older than that minimum.
    EnvVersion,

    /// The component is a Lacros browser build. A build stays usable through
    /// the host major version that follows its own.
    Lacros,
}

/// One entry of the component table.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ComponentSpec {
    /// Unique name of the component, also the last segment of its install
    /// directory.
    pub name: String,

    /// Compatibility policy applied to this component.
    pub policy: PolicyType,

    /// Environment version this process provides. Required when `policy`
    /// is `env_version`, ignored otherwise.
    #[serde(default, deserialize_with = "convert_optional_string_with_shellexpand")]
    pub env_version: Option<String>,

    /// Hex encoded SHA-256 of the component's public key. The first 32 hex
    /// characters derive the component id. A value that is not exactly 64
    /// hex characters disables the component.
    pub sha2hash: String,
}

/// Settings of the installer core.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct InstallerConfig {
    /// Directory where components are installed. Each component lives under
    /// `<components_root>/cros-components/<name>`.
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub components_root: String,

    /// Version of the host binary (for example "96.0.4664.1"). Its major
    /// component bounds the Lacros compatibility window.
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub host_version: String,

    /// Give up on a mount request after this many milliseconds and report a
    /// mount failure to every waiting caller.
    /// Default: 0 (wait forever)
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub mount_timeout_ms: u64,

    /// Give up on an on-demand update after this many milliseconds and report
    /// an install failure.
    /// Default: 0 (wait forever)
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub update_timeout_ms: u64,

    /// Replaces the built-in component table when set.
    #[serde(default)]
    pub components: Option<Vec<ComponentSpec>>,
}
