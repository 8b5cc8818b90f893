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

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Makes installed component images available at a stable location.
#[async_trait]
pub trait ImageLoader: Send + Sync + 'static {
    /// Mounts the image installed at `path` and returns the mount point, or
    /// `None` if the mount failed.
    async fn load_component_at_path(&self, name: &str, path: &Path) -> Option<PathBuf>;

    /// Returns `None` if the request could not be delivered, otherwise
    /// whether the component was unmounted.
    async fn unmount_component(&self, name: &str) -> Option<bool>;
}
