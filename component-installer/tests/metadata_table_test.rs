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

use component_error::{Code, Error};
use component_installer::metadata_table::{JsonMetadataTable, MetadataTable};
use component_macro::component_test;
use pretty_assertions::assert_eq;
use utils::installer_utils::make_temp_path;

mod utils {
    pub(crate) mod installer_utils;
    pub(crate) mod mock_image_loader;
    pub(crate) mod mock_update_service;
}

#[component_test]
async fn in_memory_table_tracks_current_user() -> Result<(), Error> {
    let table = JsonMetadataTable::in_memory("alice");
    assert_eq!(table.current_user(), "alice");
    assert!(!table.has_component_for_any_user("cros-termina"));

    table.add_component_for_current_user("cros-termina");
    table.add_component_for_current_user("cros-termina");
    assert!(table.has_component_for_any_user("cros-termina"));
    assert_eq!(
        table.components_for_user("alice"),
        vec!["cros-termina".to_string()]
    );

    table.delete_component_for_current_user("cros-termina");
    table.delete_component_for_current_user("never-added");
    assert!(!table.has_component_for_any_user("cros-termina"));
    assert_eq!(table.components_for_user("alice"), Vec::<String>::new());
    Ok(())
}

#[component_test]
async fn other_users_keep_component_alive() -> Result<(), Error> {
    let path = make_temp_path("metadata.json");
    {
        let alice = JsonMetadataTable::load(&path, "alice").await?;
        alice.add_component_for_current_user("cros-termina");
        alice.add_component_for_current_user("demo-mode-resources");
        alice.flush().await;
    }

    let bob = JsonMetadataTable::load(&path, "bob").await?;
    bob.add_component_for_current_user("cros-termina");
    bob.delete_component_for_current_user("cros-termina");
    assert!(bob.has_component_for_any_user("cros-termina"));
    assert_eq!(bob.components_for_user("bob"), Vec::<String>::new());
    bob.flush().await;

    let reloaded = JsonMetadataTable::load(&path, "alice").await?;
    assert_eq!(
        reloaded.components_for_user("alice"),
        vec![
            "cros-termina".to_string(),
            "demo-mode-resources".to_string()
        ]
    );
    Ok(())
}

#[component_test]
async fn missing_file_starts_empty_and_garbage_is_rejected() -> Result<(), Error> {
    let path = make_temp_path("metadata.json");
    let table = JsonMetadataTable::load(&path, "alice").await?;
    assert!(!table.has_component_for_any_user("cros-termina"));
    assert!(!path.exists());

    std::fs::create_dir_all(path.parent().unwrap())?;
    std::fs::write(&path, b"{ not json")?;
    let err = JsonMetadataTable::load(&path, "alice").await.unwrap_err();
    assert_eq!(err.code, Code::InvalidArgument);
    Ok(())
}

#[component_test]
async fn changes_reach_disk_in_order() -> Result<(), Error> {
    let path = make_temp_path("metadata.json");
    let table = JsonMetadataTable::load(&path, "alice").await?;
    for name in ["cros-termina", "rtanalytics-light", "rtanalytics-full"] {
        table.add_component_for_current_user(name);
    }
    table.delete_component_for_current_user("rtanalytics-light");
    table.flush().await;

    let on_disk: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
    assert_eq!(
        on_disk,
        serde_json::json!({
            "users": { "alice": ["cros-termina", "rtanalytics-full"] }
        })
    );
    // Flushing an in-memory table has nothing to wait for.
    JsonMetadataTable::in_memory("bob").flush().await;
    Ok(())
}
