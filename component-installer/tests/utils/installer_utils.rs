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

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use component_config::components::InstallerConfig;
use component_installer::component_table::relative_install_dir;
use component_installer::cros_component_installer::{
    CrosComponentInstaller, LoadCallback, LoadError,
};
use component_installer::metadata_table::JsonMetadataTable;
use component_util::version::Version;
use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};

use super::mock_image_loader::MockImageLoader;
use super::mock_update_service::MockUpdateService;

pub const TERMINA: &str = "cros-termina";
/// Id the update service knows `cros-termina` by.
pub const TERMINA_ID: &str = "ojnjgapiepgciobpecnafnoeaegllfld";
pub const LACROS: &str = "lacros-dogfood-stable";
pub const HOST_VERSION: &str = "90.0.4400.1";
pub const TEST_USER: &str = "user@example.com";

pub fn make_temp_path(data: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}/{}/{}",
        env::var("TEST_TMPDIR").unwrap_or(env::temp_dir().to_str().unwrap().to_string()),
        rand::rng().random::<u64>(),
        data
    ))
}

pub fn test_config(components_root: &Path) -> InstallerConfig {
    InstallerConfig {
        components_root: components_root.to_str().unwrap().to_string(),
        host_version: HOST_VERSION.to_string(),
        ..Default::default()
    }
}

pub fn version(version: &str) -> Version {
    version.parse().unwrap()
}

pub fn env_manifest(min_env_version: &str) -> Value {
    json!({ "min_env_version": min_env_version })
}

/// Installer wired to mock collaborators.
pub struct TestInstaller {
    pub installer: Arc<CrosComponentInstaller>,
    pub update_service: Arc<MockUpdateService>,
    pub image_loader: Arc<MockImageLoader>,
    pub metadata_table: Arc<JsonMetadataTable>,
    pub components_root: PathBuf,
}

impl TestInstaller {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(update_config: impl FnOnce(&mut InstallerConfig)) -> Self {
        let components_root = make_temp_path("components");
        let mut config = test_config(&components_root);
        update_config(&mut config);
        let update_service = Arc::new(MockUpdateService::new());
        let image_loader = Arc::new(MockImageLoader::new());
        let metadata_table = Arc::new(JsonMetadataTable::in_memory(TEST_USER));
        let installer = CrosComponentInstaller::new(
            &config,
            update_service.clone(),
            image_loader.clone(),
            metadata_table.clone(),
        )
        .unwrap();
        Self {
            installer,
            update_service,
            image_loader,
            metadata_table,
            components_root,
        }
    }

    pub fn install_path(&self, name: &str, version: &str) -> PathBuf {
        self.components_root
            .join(relative_install_dir(name))
            .join(version)
    }
}

/// Collects load results in the order their callbacks ran.
pub struct LoadRecorder {
    tx_result: mpsc::UnboundedSender<(usize, LoadError, PathBuf)>,
    rx_result: Mutex<mpsc::UnboundedReceiver<(usize, LoadError, PathBuf)>>,
}

impl Default for LoadRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadRecorder {
    pub fn new() -> Self {
        let (tx_result, rx_result) = mpsc::unbounded_channel();
        Self {
            tx_result,
            rx_result: Mutex::new(rx_result),
        }
    }

    /// Callback that records its result under `tag`.
    pub fn callback(&self, tag: usize) -> LoadCallback {
        let tx_result = self.tx_result.clone();
        Box::new(move |error, path| {
            tx_result
                .send((tag, error, path))
                .expect("Could not send result to mpsc");
        })
    }

    /// Waits for the next callback to run.
    pub async fn next(&self) -> (usize, LoadError, PathBuf) {
        self.rx_result
            .lock()
            .await
            .recv()
            .await
            .expect("Could not receive result from mpsc")
    }

    /// Returns a result only if a callback already ran.
    pub fn try_next(&self) -> Option<(usize, LoadError, PathBuf)> {
        self.rx_result
            .try_lock()
            .expect("Result receiver is locked")
            .try_recv()
            .ok()
    }
}
