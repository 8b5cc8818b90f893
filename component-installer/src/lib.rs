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

pub mod component_table;
pub mod cros_component_installer;
pub mod image_loader;
pub mod installer_policy;
pub mod load_cache;
pub mod metadata_table;
pub mod metrics;
pub mod mirror_update_service;
pub mod symlink_image_loader;
pub mod update_service;
