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

use std::path::PathBuf;

use component_error::Error;
use component_installer::component_table::{
    ComponentConfig, ComponentTable, PolicyType, component_id, installed_configs,
    relative_install_dir,
};
use component_macro::component_test;
use pretty_assertions::assert_eq;
use utils::installer_utils::make_temp_path;

mod utils {
    pub(crate) mod installer_utils;
    pub(crate) mod mock_image_loader;
    pub(crate) mod mock_update_service;
}

fn env_config(name: &str, env_version: Option<&str>) -> ComponentConfig {
    ComponentConfig {
        name: name.to_string(),
        policy: PolicyType::EnvVersion,
        env_version: env_version.map(ToString::to_string),
        sha2hash: "00".repeat(32),
    }
}

#[component_test]
async fn builtin_table_has_every_component() -> Result<(), Error> {
    let table = ComponentTable::builtin();
    let names: Vec<&str> = table.iter().map(|config| config.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "cros-termina",
            "rtanalytics-light",
            "rtanalytics-full",
            "demo-mode-resources",
            "lacros-dogfood-canary",
            "lacros-dogfood-dev",
            "lacros-dogfood-beta",
            "lacros-dogfood-stable",
        ]
    );
    let termina = table.find("cros-termina").unwrap();
    assert_eq!(termina.policy, PolicyType::EnvVersion);
    assert_eq!(termina.env_version.as_deref(), Some("980.1"));
    assert_eq!(component_id(termina), "ojnjgapiepgciobpecnafnoeaegllfld");
    assert_eq!(table.find("cros-termina-2"), None);
    // Built-in entries are valid input for a custom table too.
    assert_eq!(ComponentTable::new(table.iter().cloned().collect())?.len(), 8);
    Ok(())
}

#[component_test]
async fn custom_table_is_validated() -> Result<(), Error> {
    assert!(ComponentTable::new(vec![env_config("a", Some("1.0"))]).is_ok());
    assert!(ComponentTable::new(vec![env_config("", Some("1.0"))]).is_err());
    assert!(ComponentTable::new(vec![env_config("a", None)]).is_err());
    assert!(ComponentTable::new(vec![env_config("a", Some("x.1"))]).is_err());
    assert!(
        ComponentTable::new(vec![env_config("a", Some("1.0")), env_config("a", Some("2.0"))])
            .is_err()
    );
    assert!(ComponentTable::from_optional(None)?.len() == 8);
    assert!(ComponentTable::from_optional(Some(vec![]))?.is_empty());
    Ok(())
}

#[component_test]
async fn installed_configs_follow_install_dirs() -> Result<(), Error> {
    let root = make_temp_path("components");
    let table = ComponentTable::builtin();
    assert_eq!(installed_configs(&root, &table), vec![]);

    std::fs::create_dir_all(root.join(relative_install_dir("rtanalytics-full")))?;
    std::fs::create_dir_all(root.join(relative_install_dir("not-in-table")))?;
    let installed: Vec<String> = installed_configs(&root, &table)
        .into_iter()
        .map(|config| config.name)
        .collect();
    assert_eq!(installed, vec!["rtanalytics-full".to_string()]);
    assert_eq!(
        relative_install_dir("rtanalytics-full"),
        PathBuf::from("cros-components/rtanalytics-full")
    );
    Ok(())
}
