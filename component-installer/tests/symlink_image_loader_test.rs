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

use std::fs;

use component_error::Error;
use component_installer::image_loader::ImageLoader;
use component_installer::symlink_image_loader::SymlinkImageLoader;
use component_macro::component_test;
use pretty_assertions::assert_eq;
use utils::installer_utils::make_temp_path;

mod utils {
    pub(crate) mod installer_utils;
    pub(crate) mod mock_image_loader;
    pub(crate) mod mock_update_service;
}

#[component_test]
async fn mount_links_and_remount_replaces() -> Result<(), Error> {
    let base = make_temp_path("loader");
    let v1 = base.join("install/1.0");
    let v2 = base.join("install/2.0");
    fs::create_dir_all(&v1)?;
    fs::create_dir_all(&v2)?;
    let loader = SymlinkImageLoader::new(base.join("mount"));

    let mount_point = loader.load_component_at_path("demo", &v1).await.unwrap();
    assert_eq!(mount_point, loader.mount_point("demo"));
    assert_eq!(fs::read_link(&mount_point)?, v1);

    assert_eq!(
        loader.load_component_at_path("demo", &v2).await,
        Some(mount_point.clone())
    );
    assert_eq!(fs::read_link(&mount_point)?, v2);
    Ok(())
}

#[component_test]
async fn missing_install_path_fails_mount() -> Result<(), Error> {
    let base = make_temp_path("loader");
    let loader = SymlinkImageLoader::new(base.join("mount"));
    assert_eq!(
        loader
            .load_component_at_path("demo", &base.join("does-not-exist"))
            .await,
        None
    );
    assert!(fs::symlink_metadata(loader.mount_point("demo")).is_err());
    Ok(())
}

#[component_test]
async fn unmount_reports_whether_mounted() -> Result<(), Error> {
    let base = make_temp_path("loader");
    let install = base.join("install");
    fs::create_dir_all(&install)?;
    let loader = SymlinkImageLoader::new(base.join("mount"));

    assert_eq!(loader.unmount_component("demo").await, Some(false));
    loader.load_component_at_path("demo", &install).await.unwrap();
    assert_eq!(loader.unmount_component("demo").await, Some(true));
    assert!(fs::symlink_metadata(loader.mount_point("demo")).is_err());
    assert!(install.exists());
    Ok(())
}
