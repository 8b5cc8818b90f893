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

use component_error::{Error, ResultExt};
use serde::Deserialize;

use crate::components::InstallerConfig;
use crate::serde_utils::{
    convert_optional_string_with_shellexpand, convert_string_with_shellexpand,
};

/// Name of the metadata file when `metadata_file` is not set.
pub const DEFAULT_METADATA_FILE: &str = "metadata.json";

/// User recorded in the metadata table when `current_user` is not set.
pub const DEFAULT_CURRENT_USER: &str = "default";

fn default_current_user() -> String {
    DEFAULT_CURRENT_USER.to_string()
}

/// Root of the configuration file read by the `component-manager` binary.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ComponentManagerConfig {
    /// Core installer settings.
    pub installer: InstallerConfig,

    /// Directory under which mounted components are exposed as
    /// `<mount_root>/<name>`.
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub mount_root: String,

    /// Directory holding downloadable versions laid out as
    /// `<mirror_root>/<name>/<version>/`. Without a mirror on-demand updates
    /// find nothing to install and only already installed versions load.
    #[serde(default, deserialize_with = "convert_optional_string_with_shellexpand")]
    pub mirror_root: Option<String>,

    /// Identity recorded in the per-user metadata table.
    /// Default: "default"
    #[serde(
        default = "default_current_user",
        deserialize_with = "convert_string_with_shellexpand"
    )]
    pub current_user: String,

    /// Metadata table path, relative paths are resolved against
    /// `installer.components_root`.
    /// Default: "metadata.json"
    #[serde(default, deserialize_with = "convert_optional_string_with_shellexpand")]
    pub metadata_file: Option<String>,
}

impl ComponentManagerConfig {
    /// # Errors
    ///
    /// Will return `Err` if we can't load or parse the file.
    pub fn try_from_json5_file(config_file: &str) -> Result<Self, Error> {
        let json_contents = std::fs::read_to_string(config_file)
            .err_tip(|| format!("Could not open config file {config_file}"))?;
        serde_json5::from_str(&json_contents)
            .err_tip(|| format!("Could not parse config file {config_file}"))
    }
}
