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

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use component_error::{Error, ResultExt};
use tracing::{Level, event};

use crate::image_loader::ImageLoader;

/// [`ImageLoader`] that "mounts" a component by pointing
/// `<mount_root>/<name>` at its install path.
#[derive(Debug, Clone)]
pub struct SymlinkImageLoader {
    mount_root: PathBuf,
}

impl SymlinkImageLoader {
    pub fn new(mount_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
        }
    }

    pub fn mount_point(&self, name: &str) -> PathBuf {
        self.mount_root.join(name)
    }

    async fn mount(&self, name: &str, path: &Path) -> Result<PathBuf, Error> {
        tokio::fs::create_dir_all(&self.mount_root)
            .await
            .err_tip(|| format!("Could not create {}", self.mount_root.display()))?;
        let mount_point = self.mount_point(name);
        // Remounting replaces whatever version was mounted before.
        match tokio::fs::remove_file(&mount_point).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .err_tip(|| format!("Could not replace {}", mount_point.display()));
            }
        }
        tokio::fs::symlink(path, &mount_point)
            .await
            .err_tip(|| format!("Could not link {}", mount_point.display()))?;
        Ok(mount_point)
    }
}

#[async_trait]
impl ImageLoader for SymlinkImageLoader {
    async fn load_component_at_path(&self, name: &str, path: &Path) -> Option<PathBuf> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            event!(
                Level::WARN,
                name,
                path = %path.display(),
                "Install path does not exist, cannot mount"
            );
            return None;
        }
        match self.mount(name, path).await {
            Ok(mount_point) => Some(mount_point),
            Err(err) => {
                event!(Level::ERROR, name, ?err, "Mount failed");
                None
            }
        }
    }

    async fn unmount_component(&self, name: &str) -> Option<bool> {
        match tokio::fs::remove_file(self.mount_point(name)).await {
            Ok(()) => Some(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Some(false),
            Err(err) => {
                event!(Level::ERROR, name, ?err, "Unmount failed");
                None
            }
        }
    }
}
