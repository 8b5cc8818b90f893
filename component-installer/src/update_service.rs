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

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use component_error::Error;

use crate::installer_policy::InstallerPolicy;

/// How urgently an on-demand update should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Somebody is blocked waiting for the component.
    Foreground,
    /// A usable version is already installed, this is a best-effort refresh.
    Background,
}

/// Reasons an on-demand update can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// Another update of the same component is already running.
    UpdateInProgress,
    /// Any other failure.
    Failed(Error),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpdateInProgress => f.write_str("update already in progress"),
            Self::Failed(err) => write!(f, "update failed: {err}"),
        }
    }
}

impl From<Error> for UpdateError {
    fn from(err: Error) -> Self {
        Self::Failed(err)
    }
}

/// What gets handed to the update service when a component is registered.
#[derive(Debug, Clone)]
pub struct ComponentRegistration {
    pub id: String,
    pub policy: Arc<dyn InstallerPolicy>,
}

/// Downloads, verifies and installs component versions.
///
/// Whenever a version of a registered component is available on disk, either
/// because it was found at registration or because an update installed it,
/// the service calls [`InstallerPolicy::component_ready`] before completing
/// the corresponding call.
#[async_trait]
pub trait ComponentUpdateService: Send + Sync + 'static {
    /// Registering the same id again replaces the previous registration.
    async fn register_component(&self, registration: ComponentRegistration) -> Result<(), Error>;

    async fn on_demand_update(&self, id: &str, priority: Priority) -> Result<(), UpdateError>;

    /// Returns `true` if the component was registered and is now removed.
    fn unregister_component(&self, id: &str) -> bool;
}
